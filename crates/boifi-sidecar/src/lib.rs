mod cache;
mod engine;
mod error;
mod host;
mod matcher;
mod rng;

#[cfg(feature = "wasm")]
mod wasm;

pub use cache::ConfigCache;
pub use engine::{EnforcementEngine, PendingRequest, RequestOutcome};
pub use error::SidecarError;
pub use host::{Host, TimerId};
pub use rng::Xorshift64Star;

#[cfg(feature = "wasm")]
pub use wasm::FilterRoot;
