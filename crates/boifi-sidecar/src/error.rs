use thiserror::Error;

/// Non-fatal — every variant is logged and the affected rule or request is
/// dropped/released rather than propagated, per the fail-open mandate.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("rule {index} in policy '{policy}' is malformed: {reason}")]
    ConfigDrift { policy: String, index: usize, reason: String },

    #[error("identity unavailable at plugin init")]
    IdentityInvalid,
}
