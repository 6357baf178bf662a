use std::time::Duration;

/// Adapter-local configuration for the NOTIFY backend (§4.9 convention).
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Postgres connection string, e.g. `host=localhost user=postgres dbname=app`.
    pub dsn: String,
    pub reconnect_backoff: Duration,
}

impl NotifyConfig {
    pub fn from_env() -> Option<Self> {
        let dsn = std::env::var("LIVEQUERY_POSTGRES_DSN").ok()?;
        let reconnect_backoff = std::env::var("LIVEQUERY_RECONNECT_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(2));
        Some(Self { dsn, reconnect_backoff })
    }
}
