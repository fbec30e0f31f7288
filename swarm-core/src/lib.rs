#![forbid(unsafe_code)]

mod aggregator;
mod config;
mod error;
mod executor;
mod progress;
mod ramp;
mod random;
mod run;
mod scenario;
mod select;
mod summary;
mod thresholds;

pub use aggregator::{ActiveVuGuard, Aggregator, IterationOutcome, metric_names};
pub use config::{DEFAULT_POLL_INTERVAL, RunConfig, Stage};
pub use error::{Error, Result};
pub use executor::{ExecutionReport, Executor, RunState};
pub use progress::{ProgressFn, ProgressUpdate};
pub use ramp::{RampProfile, StageSnapshot};
pub use random::{ALPHANUMERIC, random_int, random_string, traceparent};
pub use run::{RunOutcome, Runner, run};
pub use scenario::{CheckResult, IterationContext, MetricSample, Scenario, ScenarioError};
pub use select::WeightedScenario;
pub use summary::{CheckSummary, RunSummary};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdOutcome, ThresholdReport, ThresholdSet,
    evaluate_thresholds, parse_metric_key, parse_threshold_expr,
};

pub use swarm_http::{
    Error as HttpError, HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind,
};
pub use swarm_metrics::{
    AggregatedMetric, DurationSummary, DurationValue, MetricKind, MetricsSnapshot, RateValue,
    SeriesSnapshot,
};
