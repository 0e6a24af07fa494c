mod distributor;
mod error;
mod message;

pub use distributor::{Distributor, SubscriberId};
pub use error::DistributorError;
pub use message::DistributorMessage;
