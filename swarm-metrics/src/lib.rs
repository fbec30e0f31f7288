pub mod error;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod tags;

pub use error::{Error, Result};
pub use key::Symbol;
pub use metrics::{MetricHandle, MetricKind};
pub use registry::{MetricId, Registry};
pub use snapshot::{
    AggregatedMetric, DurationSummary, DurationValue, MetricsSnapshot, RateValue, SeriesSnapshot,
};
pub use tags::TagSet;
