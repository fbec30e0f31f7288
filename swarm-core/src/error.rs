use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ramp profile has zero length and never targets any VUs")]
    EmptyRamp,

    #[error("`poll_interval` must be greater than zero")]
    ZeroPollInterval,

    #[error("{field} of {value:?} is too large")]
    DurationOutOfRange { field: &'static str, value: Duration },

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error("invalid threshold metric selector `{0}` (expected `name` or `name{{key:value,...}}`)")]
    InvalidMetricKey(String),

    #[error("weighted scenario needs at least one variant")]
    EmptyScenarioSet,

    #[error("invalid scenario weights: {0}")]
    InvalidWeights(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] swarm_metrics::Error),
}
