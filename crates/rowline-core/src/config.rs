//! Connection configuration.

/// Configuration for one registered connection identity.
///
/// Mirrors what the host ORM supplies at registration: the engine
/// connect descriptor plus credentials, optional table-creation options,
/// and pool bounds.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Unique identity this connection is registered under
    pub identity: String,
    /// Connect descriptor (TNS name or full descriptor string)
    pub tns: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Optional default charset for created tables
    pub charset: Option<String>,
    /// Optional default collation for created tables
    pub collation: Option<String>,
    /// Minimum sessions kept alive by the pool
    pub min_sessions: usize,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Idle sessions above the minimum are destroyed after this long
    pub idle_timeout_ms: u64,
    /// Maximum time an acquisition waits for a free session
    pub acquire_timeout_ms: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            tns: String::new(),
            user: String::new(),
            password: String::new(),
            charset: None,
            collation: None,
            min_sessions: 5,
            max_sessions: 20,
            idle_timeout_ms: 30_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl ConnectConfig {
    /// Create a config for the given identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Set the connect descriptor.
    pub fn tns(mut self, tns: impl Into<String>) -> Self {
        self.tns = tns.into();
        self
    }

    /// Set the user name.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the default charset for created tables.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Set the default collation for created tables.
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_sessions(mut self, n: usize) -> Self {
        self.min_sessions = n;
        self
    }

    /// Set the maximum pool size.
    pub fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }
}
