use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use swarm_core::{AggregatedMetric, ProgressUpdate, RunOutcome};

use super::OutputFormatter;
use crate::scenario_file::LoadedScenario;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _file: &Path, _scenario: &LoadedScenario) {}

    fn progress(&self) -> Option<swarm_core::ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        let line = build_summary_line(outcome);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub state: String,
    pub target_vus: u64,
    pub live_vus: u64,
    pub active_vus: u64,
    pub stage: Option<JsonStage>,
    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub checks_failed: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonStage {
    /// 1-based.
    pub stage: usize,
    pub stages: usize,
    pub current_target: u64,
    pub stage_remaining_secs: f64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        state: u.state.to_string(),
        target_vus: u.target_vus,
        live_vus: u.live_vus,
        active_vus: u.active_vus,
        stage: u.stage.as_ref().map(|s| JsonStage {
            stage: s.index + 1,
            stages: s.count,
            current_target: s.current_target,
            stage_remaining_secs: s.stage_remaining.as_secs_f64(),
        }),
        iterations_total: u.iterations_total,
        iterations_failed: u.iterations_failed,
        checks_failed: u.checks_failed,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub passed: bool,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub vus_max: u64,
    pub iterations: JsonIterations,
    pub checks: Vec<JsonCheck>,
    pub metrics: Vec<JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonIterations {
    pub total: u64,
    pub failed: u64,
    pub interrupted: u64,
    pub per_sec: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub value: JsonMetricValue,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonMetricValue {
    Counter {
        count: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        rate: Option<f64>,
        hits: u64,
        total: u64,
    },
    Duration {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<&AggregatedMetric> for JsonMetricValue {
    fn from(value: &AggregatedMetric) -> Self {
        match value {
            AggregatedMetric::Counter(count) => Self::Counter { count: *count },
            AggregatedMetric::Gauge(value) => Self::Gauge { value: *value },
            AggregatedMetric::Rate(r) => Self::Rate {
                rate: r.rate(),
                hits: r.hits,
                total: r.total,
            },
            AggregatedMetric::Duration(d) => {
                let s = d.summary();
                Self::Duration {
                    count: s.count,
                    avg: s.avg,
                    min: s.min,
                    med: s.med,
                    max: s.max,
                    p90: s.p90,
                    p95: s.p95,
                    p99: s.p99,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

pub(crate) fn build_summary_line(outcome: &RunOutcome) -> JsonSummaryLine {
    let s = &outcome.summary;

    JsonSummaryLine {
        kind: "summary",
        passed: outcome.passed(),
        elapsed_secs: s.elapsed.as_secs_f64(),
        cancelled: s.cancelled,
        vus_max: s.vus_max,
        iterations: JsonIterations {
            total: s.iterations,
            failed: s.iterations_failed,
            interrupted: s.iterations_interrupted,
            per_sec: s.iterations_per_sec(),
        },
        checks: s
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        metrics: s
            .metrics
            .series()
            .iter()
            .map(|m| JsonMetric {
                name: m.name.clone(),
                kind: m.kind.to_string(),
                tags: m.tags.iter().cloned().collect(),
                value: JsonMetricValue::from(&m.value),
            })
            .collect(),
        thresholds: outcome
            .thresholds
            .outcomes
            .iter()
            .map(|o| JsonThreshold {
                metric: o.metric.clone(),
                expression: o.expression.clone(),
                observed: o.observed,
                passed: o.passed,
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
