//! Error types for adapter operations.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::value::Value;

/// The primary error type for all adapter operations.
#[derive(Debug)]
pub enum Error {
    /// Connection registry errors (duplicate/missing identity, unknown collection)
    Config(ConfigError),
    /// Criteria could not be translated to SQL
    Compile(CompileError),
    /// Statement failed at the engine
    Execution(ExecutionError),
    /// Unique-constraint violation remapped to a structured shape
    Constraint(ConstraintViolation),
    /// Grouping or aggregate field requested without an aggregate function
    InvalidAggregate,
    /// Pool errors
    Pool(PoolError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A connection with this identity is already registered
    DuplicateIdentity,
    /// Registration without an identity
    MissingIdentity,
    /// No connection registered under this identity
    UnknownConnection,
    /// No collection with this name on the connection
    UnknownCollection,
}

#[derive(Debug)]
pub struct CompileError {
    pub message: String,
    /// The criteria fragment that failed, when known
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct ExecutionError {
    /// Engine error code when reported (e.g. `ORA-00001`, `ER_DUP_ENTRY`)
    pub code: Option<String>,
    /// The statement that failed, when known
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// A unique-constraint violation in the shape the host ORM consumes:
/// the offending attribute and the value that collided.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    /// Attribute (or constraint) name the violation was reported against
    pub attribute: String,
    /// The attempted value
    pub value: Value,
    /// The violated rule; always `unique` for this adapter
    pub rule: &'static str,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// No session available and the pool is at capacity
    Exhausted,
    /// Acquisition waited past the configured bound
    Timeout,
    /// Pool is closed or draining
    Closed,
    /// Session bootstrap statement failed during creation
    SessionInit,
}

impl Error {
    /// Shorthand for a config error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a compile error.
    pub fn compile(message: impl Into<String>) -> Self {
        Error::Compile(CompileError {
            message: message.into(),
            detail: None,
        })
    }

    /// Shorthand for an execution error without an engine code.
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution(ExecutionError {
            code: None,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (pool contention, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted | PoolErrorKind::Timeout),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Get the engine error code, if available.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Execution(e) => e.code.as_deref(),
            _ => None,
        }
    }
}

static DUP_ENTRY_RE: OnceLock<Regex> = OnceLock::new();
static ORA_UNIQUE_RE: OnceLock<Regex> = OnceLock::new();

/// Remap an execution error to a structured uniqueness violation when the
/// engine message matches a known shape; otherwise pass it through.
///
/// Detection is best-effort pattern matching on the message/code, covering
/// the engine's native `ORA-00001 … unique constraint (…) violated` report
/// and the `Duplicate entry '…' for key '…'` shape some drivers surface.
pub fn remap_constraint_violation(err: ExecutionError) -> Error {
    let dup = DUP_ENTRY_RE.get_or_init(|| {
        Regex::new(r"Duplicate entry '(.*)' for key '(.*?)'$").expect("valid pattern")
    });
    if let Some(caps) = dup.captures(&err.message) {
        tracing::debug!(attribute = &caps[2], "remapping duplicate-entry violation");
        return Error::Constraint(ConstraintViolation {
            attribute: caps[2].to_string(),
            value: Value::Text(caps[1].to_string()),
            rule: "unique",
        });
    }

    let ora = ORA_UNIQUE_RE.get_or_init(|| {
        Regex::new(r"ORA-00001.*unique constraint \((?:[^.)]+\.)?([^)]+)\) violated")
            .expect("valid pattern")
    });
    if let Some(caps) = ora.captures(&err.message) {
        // The engine reports the constraint name only; the attempted value
        // is not recoverable from the message.
        return Error::Constraint(ConstraintViolation {
            attribute: caps[1].to_string(),
            value: Value::Null,
            rule: "unique",
        });
    }

    Error::Execution(err)
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Compile(e) => write!(f, "Compile error: {}", e.message),
            Error::Execution(e) => {
                if let Some(code) = &e.code {
                    write!(f, "Execution error ({}): {}", code, e.message)
                } else {
                    write!(f, "Execution error: {}", e.message)
                }
            }
            Error::Constraint(e) => write!(
                f,
                "Unique constraint violated on '{}' with value {:?}",
                e.attribute, e.value
            ),
            Error::InvalidAggregate => {
                write!(f, "Aggregate request without an aggregate function")
            }
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Execution(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{} ({})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;
