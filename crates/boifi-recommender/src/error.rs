use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error(transparent)]
    Domain(#[from] boifi_domain::DomainError),

    #[error("session {0} not found")]
    SessionNotFound(uuid::Uuid),

    #[error("io error persisting session state: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("executor circuit breaker is open")]
    CircuitOpen,

    #[error("executor request failed: {0}")]
    Executor(String),
}
