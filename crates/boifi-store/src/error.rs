use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("policy already exists: {0}")]
    AlreadyExists(String),

    #[error("update body name '{body}' does not match path name '{path}'")]
    NameMismatch { path: String, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("watch stream terminated: {0}")]
    WatchTerminated(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Internal(e.to_string())
    }
}
