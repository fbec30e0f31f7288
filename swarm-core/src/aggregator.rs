use std::time::Duration;

use swarm_metrics::{MetricHandle, MetricId, MetricKind, MetricsSnapshot, Registry, TagSet};

use crate::scenario::{CheckResult, MetricSample};

pub mod metric_names {
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATIONS_FAILED: &str = "iterations_failed";
    pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const CHECKS: &str = "checks";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";

    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Failed { kind: &'static str },
}

#[derive(Debug)]
struct Builtins {
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    iterations_failed: MetricId,
    iterations_interrupted: MetricHandle,
    checks: MetricId,
    vus: MetricHandle,
    vus_max: MetricHandle,
}

/// Owns every metric of a run. Shared by all VUs behind an `Arc`; dropped
/// when the run is torn down.
#[derive(Debug)]
pub struct Aggregator {
    registry: Registry,
    builtins: Builtins,
}

fn untagged(registry: &Registry, name: &str, kind: MetricKind) -> swarm_metrics::Result<MetricHandle> {
    registry.register_series(name, kind, TagSet::default())
}

impl Aggregator {
    pub fn new() -> swarm_metrics::Result<Self> {
        use metric_names::*;

        let registry = Registry::new();
        let iterations_failed = registry.register(ITERATIONS_FAILED, MetricKind::Counter)?;
        // zero-valued series so `iterations_failed` exists even in clean runs
        let _ = registry.handle(iterations_failed, TagSet::default());

        let builtins = Builtins {
            iterations: untagged(&registry, ITERATIONS, MetricKind::Counter)?,
            iteration_duration: untagged(&registry, ITERATION_DURATION, MetricKind::Duration)?,
            iterations_failed,
            iterations_interrupted: untagged(&registry, ITERATIONS_INTERRUPTED, MetricKind::Counter)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            vus: untagged(&registry, VUS, MetricKind::Gauge)?,
            vus_max: untagged(&registry, VUS_MAX, MetricKind::Gauge)?,
        };

        Ok(Self { registry, builtins })
    }

    /// Records a scenario-emitted sample. Fails only when the metric name is
    /// already used with a different kind.
    pub fn record(&self, sample: &MetricSample) -> swarm_metrics::Result<()> {
        let tags = self.registry.resolve_tags(sample.tags());
        let handle = self
            .registry
            .register_series(sample.name(), sample.kind(), tags)?;

        match sample {
            MetricSample::Counter { value, .. } => handle.add(*value),
            MetricSample::Rate { passed, .. } => handle.observe_rate(*passed),
            MetricSample::Duration { ms, .. } => handle.observe_millis(*ms),
        }
        Ok(())
    }

    pub fn record_check(&self, check: &CheckResult) {
        let mut tags: Vec<(&str, &str)> = check
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tags.push(("check", check.name.as_str()));

        if let Some(h) = self
            .registry
            .handle(self.builtins.checks, self.registry.resolve_tags(&tags))
        {
            h.observe_rate(check.passed);
        }
    }

    pub fn record_iteration(&self, duration: Duration, outcome: IterationOutcome) {
        self.builtins.iterations.add(1);
        self.builtins.iteration_duration.observe_duration(duration);

        if let IterationOutcome::Failed { kind } = outcome {
            let tags = self.registry.resolve_tags(&[("error", kind)]);
            if let Some(h) = self.registry.handle(self.builtins.iterations_failed, tags) {
                h.add(1);
            }
        }
    }

    pub fn record_interrupted(&self, count: u64) {
        self.builtins.iterations_interrupted.add(count);
    }

    /// Marks a VU as running until the guard is dropped.
    pub fn enter_vu(&self) -> ActiveVuGuard {
        let active = self.builtins.vus.add_gauge(1);
        self.builtins.vus_max.raise_gauge(active);
        ActiveVuGuard {
            vus: self.builtins.vus.clone(),
        }
    }

    pub fn active_vus(&self) -> u64 {
        self.builtins.vus.gauge_value().max(0) as u64
    }

    pub fn iterations_total(&self) -> u64 {
        self.builtins.iterations.counter_value()
    }

    pub fn iterations_failed(&self) -> u64 {
        self.registry.counter_total(self.builtins.iterations_failed)
    }

    pub fn checks_failed(&self) -> u64 {
        let (hits, total) = self.registry.rate_totals(self.builtins.checks);
        total.saturating_sub(hits)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }
}

pub struct ActiveVuGuard {
    vus: MetricHandle,
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.vus.add_gauge(-1);
    }
}
