use thiserror::Error;

/// Error kinds from spec §7. Construction-time errors (`Configuration`) are
/// returned synchronously; the rest are delivered to subscribers through the
/// `Subscription` error sink and never silently dropped.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum LiveQueryError {
    #[error("invalid select() arguments: {0}")]
    Configuration(String),

    #[error("backend did not become ready within {0:?}")]
    BackendInitTimeout(std::time::Duration),

    #[error("backend ingress interrupted: {0}")]
    BackendIngress(String),

    #[error("re-evaluation failed: {0}")]
    ReEvaluation(String),

    #[error("unsupported query shape: {0}")]
    Matcher(String),

    #[error("engine has been shut down")]
    EngineStopped,

    #[error("serialization failed: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for LiveQueryError {
    fn from(err: serde_json::Error) -> Self {
        LiveQueryError::Serde(err.to_string())
    }
}

impl LiveQueryError {
    /// §4.3: a matcher failure is a `ReEvaluationError` with a distinguishing kind.
    pub fn as_reevaluation(&self) -> LiveQueryError {
        match self {
            LiveQueryError::Matcher(msg) => LiveQueryError::ReEvaluation(format!("matcher: {msg}")),
            other => other.clone(),
        }
    }
}

pub type LiveQueryResult<T> = Result<T, LiveQueryError>;
