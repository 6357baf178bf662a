use std::time::Duration;

/// Ambient configuration, loaded the way `sync-server`'s `main.rs` reads
/// `DATABASE_URL`/`BIND_ADDRESS` from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// §5: bounded wait for backend initialization, default 6s.
    pub backend_init_timeout: Duration,
    /// Adopted by a cache only if `select()` doesn't supply its own.
    pub default_min_interval: Option<Duration>,
    /// Used to resolve a trigger's database when neither the trigger nor
    /// the query specifies one (§6 input validation).
    pub default_database: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_init_timeout: Duration::from_secs(6),
            default_min_interval: None,
            default_database: None,
        }
    }
}

impl EngineConfig {
    /// Reads `LIVEQUERY_BACKEND_INIT_TIMEOUT_MS`, `LIVEQUERY_MIN_INTERVAL_MS`,
    /// and `LIVEQUERY_DEFAULT_DATABASE` from the environment, falling back to
    /// `Default::default()` for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend_init_timeout = std::env::var("LIVEQUERY_BACKEND_INIT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backend_init_timeout);
        let default_min_interval = std::env::var("LIVEQUERY_MIN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .or(defaults.default_min_interval);
        let default_database = std::env::var("LIVEQUERY_DEFAULT_DATABASE").ok().or(defaults.default_database);

        Self {
            backend_init_timeout,
            default_min_interval,
            default_database,
        }
    }
}
