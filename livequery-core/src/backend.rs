use async_trait::async_trait;

use crate::errors::LiveQueryResult;
use crate::model::InterestSet;

/// §6 backend adapter contract. Concrete implementations
/// (`livequery-replication`, `livequery-notify`) deliver `RowEvent`s over the
/// channel supplied at construction; the actual binlog decoding / trigger
/// DDL is their concern, not the engine's.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn start(&self, interest: InterestSet) -> LiveQueryResult<()>;
    async fn stop(&self) -> LiveQueryResult<()>;
    async fn set_interest(&self, interest: InterestSet) -> LiveQueryResult<()>;
}

/// A `BackendAdapter` that accepts any interest set and never produces
/// events: useful for tests and for the supplied-payload incremental path,
/// where the engine is driven entirely by `QueryCache::push_pending_event`.
pub struct NullBackend;

#[async_trait]
impl BackendAdapter for NullBackend {
    async fn start(&self, _interest: InterestSet) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn stop(&self) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn set_interest(&self, _interest: InterestSet) -> LiveQueryResult<()> {
        Ok(())
    }
}
