mod analyzer;
mod error;
mod executor;
mod optimizer;
mod session_manager;
mod worker;

pub use analyzer::ResponseAnalyzer;
pub use error::RecommenderError;
pub use executor::ExecutorClient;
pub use optimizer::{OptimizerCore, OptimizerPhase};
pub use session_manager::SessionManager;
pub use worker::{ScoringBaseline, Worker};
