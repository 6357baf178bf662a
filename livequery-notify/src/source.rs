use async_trait::async_trait;
use livequery_core::LiveQueryResult;

/// A raw `NOTIFY` payload as delivered by Postgres, before the adapter
/// interprets its JSON body into a `CandidateRow`.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

/// Narrow boundary between the adapter and the actual `LISTEN` connection.
/// Installing the triggers/functions that call `pg_notify` is out of scope
/// (§1); a real implementation would wrap a Postgres client's notification
/// stream (e.g. `tokio-postgres`) behind this trait so `NotifyBackend` never
/// depends on its connection machinery directly. This crate ships only
/// `NullListenSource`; it does not itself depend on a Postgres client crate.
#[async_trait]
pub trait ListenSource: Send {
    async fn connect(&mut self) -> LiveQueryResult<()>;

    /// Subscribe to the channel the installed triggers publish on. Calling
    /// this more than once replaces the prior subscription.
    async fn listen(&mut self, channel: &str) -> LiveQueryResult<()>;

    async fn next_notification(&mut self) -> LiveQueryResult<Option<RawNotification>>;

    async fn disconnect(&mut self);
}

/// A `ListenSource` that never produces notifications, for tests and for
/// engines driven entirely by a replication backend.
pub struct NullListenSource;

#[async_trait]
impl ListenSource for NullListenSource {
    async fn connect(&mut self) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn listen(&mut self, _channel: &str) -> LiveQueryResult<()> {
        Ok(())
    }

    async fn next_notification(&mut self) -> LiveQueryResult<Option<RawNotification>> {
        std::future::pending().await
    }

    async fn disconnect(&mut self) {}
}
