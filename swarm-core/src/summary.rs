use std::collections::BTreeMap;
use std::time::Duration;

use swarm_metrics::{AggregatedMetric, MetricsSnapshot};

use crate::aggregator::metric_names;
use crate::executor::ExecutionReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// End-of-run view: headline counters plus the full metrics snapshot.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub cancelled: bool,
    pub vus_max: u64,
    pub iterations: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub checks: Vec<CheckSummary>,
    pub metrics: MetricsSnapshot,
}

const NO_TAGS: &[(&str, &str)] = &[];

impl RunSummary {
    pub(crate) fn new(metrics: MetricsSnapshot, report: &ExecutionReport) -> Self {
        let counter = |name: &str| metrics.counter(name, NO_TAGS).unwrap_or(0);

        Self {
            elapsed: report.elapsed,
            cancelled: report.cancelled,
            vus_max: metrics
                .gauge(metric_names::VUS_MAX, NO_TAGS)
                .unwrap_or(0)
                .max(0) as u64,
            iterations: counter(metric_names::ITERATIONS),
            iterations_failed: counter(metric_names::ITERATIONS_FAILED),
            iterations_interrupted: counter(metric_names::ITERATIONS_INTERRUPTED),
            checks: check_breakdown(&metrics),
            metrics,
        }
    }

    pub fn iterations_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.iterations as f64 / secs
        } else {
            0.0
        }
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks.iter().map(|c| c.fails).sum()
    }
}

// Per check name, merged across groups and other tags.
fn check_breakdown(metrics: &MetricsSnapshot) -> Vec<CheckSummary> {
    let mut by_name: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for series in metrics
        .series()
        .iter()
        .filter(|s| s.name == metric_names::CHECKS)
    {
        let (Some(name), AggregatedMetric::Rate(rate)) = (series.tag("check"), &series.value) else {
            continue;
        };
        let entry = by_name.entry(name).or_default();
        entry.0 += rate.hits;
        entry.1 += rate.misses();
    }

    by_name
        .into_iter()
        .map(|(name, (passes, fails))| CheckSummary {
            name: name.to_string(),
            passes,
            fails,
        })
        .collect()
}
