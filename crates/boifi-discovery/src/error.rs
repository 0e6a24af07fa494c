use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("publish failed after retries: {0}")]
    PublishFailed(String),

    #[error(transparent)]
    Domain(#[from] boifi_domain::DomainError),
}
