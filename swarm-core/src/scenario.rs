use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use swarm_http::HttpClient;
use swarm_metrics::MetricKind;

use crate::random;

pub type Tags = Vec<(String, String)>;

/// Tag added to checks and samples emitted while a group is active.
pub const GROUP_TAG: &str = "group";

/// Named boolean assertion about one request/response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricSample {
    Counter { name: String, value: u64, tags: Tags },
    Rate { name: String, passed: bool, tags: Tags },
    /// Duration in milliseconds.
    Duration { name: String, ms: f64, tags: Tags },
}

impl MetricSample {
    pub fn name(&self) -> &str {
        match self {
            Self::Counter { name, .. } | Self::Rate { name, .. } | Self::Duration { name, .. } => {
                name
            }
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Self::Counter { tags, .. } | Self::Rate { tags, .. } | Self::Duration { tags, .. } => {
                tags
            }
        }
    }

    fn tags_mut(&mut self) -> &mut Tags {
        match self {
            Self::Counter { tags, .. } | Self::Rate { tags, .. } | Self::Duration { tags, .. } => {
                tags
            }
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Duration { .. } => MetricKind::Duration,
        }
    }
}

/// Why an iteration failed. Failures are recorded per iteration and never
/// stop other virtual users.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("transport error: {0}")]
    Transport(#[from] swarm_http::Error),

    #[error("script error: {0}")]
    Script(String),

    #[error("iteration panicked: {0}")]
    Panicked(String),
}

impl ScenarioError {
    /// Short label used as the `error` tag of `iterations_failed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Script(_) => "script",
            Self::Panicked(_) => "panic",
        }
    }
}

/// One virtual-user iteration.
#[async_trait]
pub trait Scenario: Send + Sync {
    async fn run(&self, ctx: &mut IterationContext) -> Result<(), ScenarioError>;
}

/// Per-iteration context handed to a [`Scenario`].
///
/// Checks and samples are buffered here and forwarded to the aggregator once
/// the iteration returns, including when it returns an error.
#[derive(Debug)]
pub struct IterationContext {
    vu_id: u64,
    iteration: u64,
    rng: StdRng,
    http: Arc<HttpClient>,
    group: Option<String>,
    checks: Vec<CheckResult>,
    samples: Vec<MetricSample>,
}

impl IterationContext {
    pub fn new(vu_id: u64, iteration: u64, rng: StdRng, http: Arc<HttpClient>) -> Self {
        Self {
            vu_id,
            iteration,
            rng,
            http,
            group: None,
            checks: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based iteration number within this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fresh W3C `traceparent` value.
    pub fn traceparent(&mut self) -> String {
        random::traceparent(&mut self.rng)
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Replaces the active group and returns the previous one.
    pub fn set_group(&mut self, group: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.group, group)
    }

    fn apply_group(&self, tags: &mut Tags) {
        if let Some(group) = &self.group
            && !tags.iter().any(|(k, _)| k == GROUP_TAG)
        {
            tags.push((GROUP_TAG.to_string(), group.clone()));
        }
    }

    /// Records a check and returns `passed` so it can be used inline.
    pub fn check(&mut self, name: impl Into<String>, passed: bool) -> bool {
        self.check_with_tags(name, passed, Vec::new())
    }

    pub fn check_with_tags(&mut self, name: impl Into<String>, passed: bool, mut tags: Tags) -> bool {
        self.apply_group(&mut tags);
        self.checks.push(CheckResult {
            name: name.into(),
            passed,
            tags,
        });
        passed
    }

    pub fn emit(&mut self, mut sample: MetricSample) {
        let mut tags = std::mem::take(sample.tags_mut());
        self.apply_group(&mut tags);
        *sample.tags_mut() = tags;
        self.samples.push(sample);
    }

    pub fn add_counter(&mut self, name: impl Into<String>, value: u64) {
        self.emit(MetricSample::Counter {
            name: name.into(),
            value,
            tags: Vec::new(),
        });
    }

    pub fn add_rate(&mut self, name: impl Into<String>, passed: bool) {
        self.emit(MetricSample::Rate {
            name: name.into(),
            passed,
            tags: Vec::new(),
        });
    }

    pub fn add_duration(&mut self, name: impl Into<String>, ms: f64) {
        self.emit(MetricSample::Duration {
            name: name.into(),
            ms,
            tags: Vec::new(),
        });
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Hands back the random source and everything emitted so far.
    pub fn into_parts(self) -> (StdRng, Vec<CheckResult>, Vec<MetricSample>) {
        (self.rng, self.checks, self.samples)
    }
}
