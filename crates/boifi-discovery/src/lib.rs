mod error;
mod kubernetes;
mod openapi;
mod pipeline;
mod publisher;
mod scheduler;
mod topology;

pub use error::DiscoveryError;
pub use pipeline::DiscoveryPipeline;
pub use publisher::{HttpKvPublisher, KvPublisher};
pub use scheduler::{Scheduler, DEFAULT_INTERVAL};
