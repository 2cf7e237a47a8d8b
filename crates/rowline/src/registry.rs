//! Connection registry.
//!
//! One entry per registered identity: the connection config, the
//! collection definitions, and the session pool. Populated at startup and
//! read-mostly afterwards; only `describe` writes collections back.

use rowline_core::error::{ConfigErrorKind, Error, Result};
use rowline_core::schema::CollectionDef;
use rowline_core::ConnectConfig;
use rowline_pool::{Pool, PoolConfig, SessionFactory};
use rowline_query::SchemaMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Everything registered under one connection identity.
pub struct RegistryEntry<F: SessionFactory> {
    /// The registration config
    pub config: ConnectConfig,
    /// Collection definitions; describe updates these in place
    collections: Mutex<HashMap<String, CollectionDef>>,
    /// The session pool for this identity
    pub pool: Pool<F>,
}

impl<F: SessionFactory> RegistryEntry<F> {
    /// Look up a collection definition by name.
    pub fn collection(&self, name: &str) -> Result<CollectionDef> {
        self.collections
            .lock()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownCollection,
                    format!(
                        "unknown collection `{name}` on connection `{}`",
                        self.config.identity
                    ),
                )
            })
    }

    /// Snapshot every collection on this connection, keyed by identity —
    /// the schema the compiler works against.
    pub fn schema_map(&self) -> SchemaMap {
        self.collections
            .lock()
            .expect("registry lock poisoned")
            .clone()
    }

    /// Store (or replace) a collection definition.
    pub fn store_collection(&self, def: CollectionDef) {
        self.collections
            .lock()
            .expect("registry lock poisoned")
            .insert(def.identity.clone(), def);
    }
}

/// Identity -> registry entry map.
///
/// An injected service owned by the adapter, not ambient state: operations
/// receive it explicitly, which keeps the concurrency discipline visible.
pub struct ConnectionRegistry<F: SessionFactory> {
    entries: Mutex<HashMap<String, Arc<RegistryEntry<F>>>>,
}

impl<F: SessionFactory> Default for ConnectionRegistry<F> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<F: SessionFactory> ConnectionRegistry<F> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection identity with its collections and session
    /// factory. An empty identity and a duplicate identity both fail.
    pub fn register(
        &self,
        config: ConnectConfig,
        collections: Vec<CollectionDef>,
        factory: F,
    ) -> Result<()> {
        if config.identity.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::MissingIdentity,
                "connection registration requires an identity",
            ));
        }

        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if entries.contains_key(&config.identity) {
            return Err(Error::config(
                ConfigErrorKind::DuplicateIdentity,
                format!("connection `{}` is already registered", config.identity),
            ));
        }

        tracing::debug!(identity = %config.identity, "registering connection pool");
        let pool_config = PoolConfig::new(config.max_sessions)
            .min_sessions(config.min_sessions)
            .idle_timeout(config.idle_timeout_ms)
            .acquire_timeout(config.acquire_timeout_ms);
        let identity = config.identity.clone();
        let entry = RegistryEntry {
            config,
            collections: Mutex::new(
                collections
                    .into_iter()
                    .map(|def| (def.identity.clone(), def))
                    .collect(),
            ),
            pool: Pool::new(pool_config, factory),
        };
        entries.insert(identity, Arc::new(entry));
        Ok(())
    }

    /// Look up an entry by identity.
    pub fn entry(&self, identity: &str) -> Result<Arc<RegistryEntry<F>>> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(identity)
            .cloned()
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownConnection,
                    format!("no connection registered as `{identity}`"),
                )
            })
    }

    /// Remove an entry, handing it back for teardown.
    pub fn remove(&self, identity: &str) -> Result<Arc<RegistryEntry<F>>> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .remove(identity)
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownConnection,
                    format!("no connection registered as `{identity}`"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowline_core::driver::{Driver, ExecResult};
    use rowline_core::schema::{AttrDef, AttrType};
    use rowline_core::value::Value;
    use rowline_core::{Cx, Outcome};
    use std::future::Future;

    struct NullSession;

    impl Driver for NullSession {
        fn execute(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
            async { Outcome::Ok(ExecResult::default()) }
        }

        fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
            async { Ok(()) }
        }
    }

    struct NullFactory;

    impl SessionFactory for NullFactory {
        type Session = NullSession;

        fn create(&self, _cx: &Cx) -> impl Future<Output = Outcome<NullSession, Error>> + Send {
            async { Outcome::Ok(NullSession) }
        }
    }

    fn users() -> CollectionDef {
        CollectionDef::new(
            "users",
            [(
                "id".to_string(),
                AttrDef::new(AttrType::Integer).primary_key(),
            )],
        )
    }

    #[test]
    fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        registry
            .register(ConnectConfig::new("db1"), vec![users()], NullFactory)
            .expect("register");

        let entry = registry.entry("db1").expect("entry");
        assert_eq!(entry.collection("users").expect("users").identity, "users");
        assert!(matches!(
            entry.collection("missing"),
            Err(Error::Config(e)) if e.kind == ConfigErrorKind::UnknownCollection
        ));
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let registry = ConnectionRegistry::new();
        registry
            .register(ConnectConfig::new("db1"), vec![], NullFactory)
            .expect("register");

        match registry.register(ConnectConfig::new("db1"), vec![], NullFactory) {
            Err(Error::Config(e)) => assert_eq!(e.kind, ConfigErrorKind::DuplicateIdentity),
            other => panic!("expected duplicate-identity error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn missing_identity_is_rejected() {
        let registry = ConnectionRegistry::<NullFactory>::new();
        match registry.register(ConnectConfig::default(), vec![], NullFactory) {
            Err(Error::Config(e)) => assert_eq!(e.kind, ConfigErrorKind::MissingIdentity),
            other => panic!("expected missing-identity error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn unknown_connection_lookup_fails() {
        let registry = ConnectionRegistry::<NullFactory>::new();
        assert!(matches!(
            registry.entry("nope"),
            Err(Error::Config(e)) if e.kind == ConfigErrorKind::UnknownConnection
        ));
    }

    #[test]
    fn describe_store_back_replaces_collection() {
        let registry = ConnectionRegistry::new();
        registry
            .register(ConnectConfig::new("db1"), vec![users()], NullFactory)
            .expect("register");

        let entry = registry.entry("db1").expect("entry");
        let mut updated = users();
        updated
            .attributes
            .insert("name".to_string(), AttrDef::new(AttrType::Text));
        entry.store_collection(updated);

        assert!(entry.collection("users").expect("users").attr("name").is_some());
    }

    #[test]
    fn remove_hands_back_the_entry() {
        let registry = ConnectionRegistry::new();
        registry
            .register(ConnectConfig::new("db1"), vec![], NullFactory)
            .expect("register");

        assert!(registry.remove("db1").is_ok());
        assert!(registry.entry("db1").is_err());
        assert!(registry.remove("db1").is_err());
    }
}
