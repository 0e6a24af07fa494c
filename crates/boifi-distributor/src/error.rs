use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("store error: {0}")]
    Store(#[from] boifi_store::StoreError),

    #[error("subscriber {0} not found")]
    UnknownSubscriber(uuid::Uuid),
}
