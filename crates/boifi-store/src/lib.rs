mod error;
mod memory;
mod postgres_store;
mod store;

pub use error::StoreError;
pub use memory::InMemoryPolicyStore;
pub use postgres_store::PostgresPolicyStore;
pub use store::{ChangeEvent, ChangeStream, PolicyStore};
