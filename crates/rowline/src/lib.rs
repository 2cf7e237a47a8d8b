//! Waterline-style ORM adapter for row-number-pagination SQL engines.
//!
//! `rowline` is the **adapter façade**. The host ORM registers connection
//! identities with their collection definitions, then drives operations
//! (create/find/update/destroy/count/join and the schema passthroughs)
//! against them. Each operation compiles its criteria, borrows a pooled
//! session, executes, and reshapes raw rows into normalized records.
//!
//! # Role In The Architecture
//!
//! - **Adapter**: the dispatch surface with owned services.
//! - **Connection registry**: identity -> config/collections/pool.
//! - **Auto-increment registry**: process-managed identity values.
//! - **Result processor**: row -> record normalization.
//! - **Population engine**: join emulation via per-association UNIONs.
//!
//! # Example
//!
//! ```ignore
//! let adapter: Adapter<MyFactory> = Adapter::new();
//! adapter.register(config, collections, factory)?;
//!
//! let record = adapter
//!     .create(&cx, "db1", "users", vec![
//!         ("name".into(), Value::from("a")),
//!         ("active".into(), Value::from(true)),
//!     ])
//!     .await?;
//!
//! let page = adapter
//!     .find(&cx, "db1", "users", Criteria::new().skip(1).limit(1))
//!     .await?;
//! ```

pub mod adapter;
pub mod autoinc;
pub mod populate;
pub mod processor;
pub mod registry;

pub use adapter::Adapter;
pub use autoinc::AutoIncrementRegistry;
pub use populate::Buffer;
pub use registry::{ConnectionRegistry, RegistryEntry};

pub use rowline_core::{
    AttrDef, AttrType, CollectionDef, ConnectConfig, ConstraintViolation, Cx, Driver, Error,
    ExecResult, Outcome, Record, Result, Row, Value,
};
pub use rowline_pool::{Pool, PoolConfig, PooledSession, SessionFactory};
pub use rowline_query::{
    Cmp, Condition, Criteria, CriteriaCompiler, JoinInstruction, JoinStrategy, SequelCompiler,
    SortDir,
};
