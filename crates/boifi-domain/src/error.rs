use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("policy name must not be empty")]
    EmptyName,

    #[error("policy '{0}' has no rules")]
    NoRules,

    #[error("rule {index} in policy '{policy}' must set exactly one of abort/delay, found {found}")]
    FaultCardinality { policy: String, index: usize, found: &'static str },

    #[error("rule {index} in policy '{policy}': http_status {status} out of range [100,599]")]
    HttpStatusOutOfRange { policy: String, index: usize, status: u32 },

    #[error("rule {index} in policy '{policy}': fixed_delay_ms {ms} exceeds 30000")]
    DelayTooLarge { policy: String, index: usize, ms: u32 },

    #[error("rule {index} in policy '{policy}': percentage {pct} out of range [0,100]")]
    PercentageOutOfRange { policy: String, index: usize, pct: f64 },

    #[error("search space has {0} dimensions, exceeding the limit of 20")]
    TooManyDimensions(usize),

    #[error("search space dimension name '{0}' is duplicated")]
    DuplicateDimension(String),

    #[error("real/integer dimension '{name}' has min {min} >= max {max}")]
    DimensionBoundsInverted { name: String, min: f64, max: f64 },

    #[error("raw observation carries none of status_code/latency_ms/logs/trace_data")]
    EmptyObservation,

    #[error("error_rate {0} out of range [0,1]")]
    ErrorRateOutOfRange(f64),

    #[error("severity component '{0}' out of range [0,10]")]
    SeverityOutOfRange(&'static str),

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("illegal session status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("multiple validation errors: {0:?}")]
    Multiple(Vec<String>),
}
