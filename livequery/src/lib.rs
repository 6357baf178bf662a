//! livequery - incremental live queries over MySQL replication or Postgres
//! NOTIFY/trigger events.
//!
//! ```ignore
//! use livequery::{Engine, EngineConfig, KeySelector, Trigger};
//!
//! let engine = Engine::new(backend, executor, parser, EngineConfig::default());
//! let subscription = engine
//!     .select("SELECT * FROM orders", params, key_selector, vec![Trigger::new("orders")], None,
//!         |diff, data| { /* ... */ },
//!         |err| { /* ... */ })
//!     .await?;
//! ```

pub use livequery_core::{
    Diff, Engine, EngineConfig, IndexedRow, KeySelector, LiveQueryError, LiveQueryResult,
    QueryCache, QueryIdentity, Row, RowEvent, RowOp, Subscription, Trigger,
};

pub use livequery_notify::{NotifyBackend, NotifyConfig};
pub use livequery_replication::{ReplicationBackend, ReplicationConfig};
