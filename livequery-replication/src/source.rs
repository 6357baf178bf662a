use async_trait::async_trait;
use livequery_core::{InterestSet, LiveQueryResult, RowEvent};

/// Narrow boundary between the adapter and the actual binlog connection.
/// Byte-level decoding (row-based replication event parsing, GTID tracking)
/// is out of scope (§1); a real implementation would wrap a MySQL binlog
/// client (e.g. `mysql_async`'s binlog stream) behind this trait so
/// `ReplicationBackend` never depends on its wire format directly. This
/// crate ships only `NullLogSource`; it does not itself depend on a MySQL
/// client crate.
#[async_trait]
pub trait LogSource: Send {
    /// Open the binlog connection and start streaming from the current
    /// position. Called once, before the first `next_event`.
    async fn connect(&mut self) -> LiveQueryResult<()>;

    /// Block until the next row-level event is available, or `None` once the
    /// stream has been told to stop.
    async fn next_event(&mut self) -> LiveQueryResult<Option<RowEvent>>;

    /// Narrow the set of `(database, table)` pairs the source filters
    /// events to. A source that can't filter server-side may ignore this and
    /// let `ReplicationBackend` drop uninteresting events instead.
    async fn set_interest(&mut self, interest: InterestSet) -> LiveQueryResult<()>;

    async fn disconnect(&mut self);
}

/// A `LogSource` that never produces events, for tests and for engines that
/// only ever drive their caches via the supplied-payload path.
pub struct NullLogSource;

#[async_trait]
impl LogSource for NullLogSource {
    async fn connect(&mut self) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> LiveQueryResult<Option<RowEvent>> {
        std::future::pending().await
    }

    async fn set_interest(&mut self, _interest: InterestSet) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {}
}
