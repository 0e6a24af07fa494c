mod error;
mod hash;
mod identity;
mod policy;
mod servicemap;
mod session;

pub use error::DomainError;
pub use hash::compute_canonical_hash;
pub use identity::EnvoyIdentity;
pub use policy::{
    FaultAction, FaultInjectionPolicy, FaultPlan, FaultRule, MatchPredicate, PolicyMetadata,
    PolicySpec, Selector, StringMatch,
};
pub use servicemap::{ApiEndpoint, ApiSource, MatchType, ServiceEdge, ServiceEntry, ServiceMap, ServiceMapMetadata};
pub use session::{
    BestResult, Dimension, DimensionKind, OptimizationSession, RawObservation, SearchSpaceConfig,
    SeverityScore, TraceData, TraceSpan, Trial, TrialStatus, SessionStatus,
};
