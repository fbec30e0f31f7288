use std::sync::Arc;

use swarm_http::HttpClient;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::Aggregator;
use crate::config::RunConfig;
use crate::error::Result;
use crate::executor::{Executor, RunState};
use crate::progress::ProgressFn;
use crate::scenario::Scenario;
use crate::summary::RunSummary;
use crate::thresholds::{ThresholdReport, ThresholdSet, evaluate_thresholds};

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub thresholds: ThresholdReport,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.thresholds.passed()
    }
}

/// One run: owns the aggregator from construction until the outcome is
/// produced.
pub struct Runner {
    executor: Executor,
    aggregator: Arc<Aggregator>,
    thresholds: Vec<ThresholdSet>,
}

impl Runner {
    /// Validates `config`; configuration errors surface here, before any
    /// virtual user starts.
    pub fn new(config: RunConfig, scenario: Arc<dyn Scenario>) -> Result<Self> {
        config.validate()?;
        let aggregator = Arc::new(Aggregator::new()?);
        let thresholds = config.thresholds.clone();

        Ok(Self {
            executor: Executor::new(config, scenario, aggregator.clone()),
            aggregator,
            thresholds,
        })
    }

    #[must_use]
    pub fn with_http_client(mut self, http: Arc<HttpClient>) -> Self {
        self.executor = self.executor.with_http_client(http);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.executor = self.executor.with_progress(progress);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.executor.state()
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<RunOutcome> {
        let report = self.executor.run(cancel).await;

        let snapshot = self.aggregator.snapshot().with_elapsed(report.elapsed);
        let thresholds = evaluate_thresholds(&self.thresholds, &snapshot);
        let summary = RunSummary::new(snapshot, &report);

        info!(
            iterations = summary.iterations,
            failed = summary.iterations_failed,
            thresholds_passed = thresholds.passed(),
            "run finished"
        );
        self.executor.complete();

        Ok(RunOutcome {
            summary,
            thresholds,
        })
    }
}

/// Validates `config`, runs `scenario` along the ramp and evaluates the
/// thresholds against the final metrics.
pub async fn run(
    config: RunConfig,
    scenario: Arc<dyn Scenario>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
) -> Result<RunOutcome> {
    Runner::new(config, scenario)?
        .with_progress(progress)
        .run(cancel)
        .await
}
