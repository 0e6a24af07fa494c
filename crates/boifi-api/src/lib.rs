mod app;
mod auth;
mod error;
mod handlers;
mod sse;
mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
