use std::collections::BTreeMap;
use std::fmt::Write as _;

use swarm_core::{AggregatedMetric, RunOutcome, SeriesSnapshot, metric_names};

use super::format::*;

pub(crate) fn render(outcome: &RunOutcome) -> String {
    let summary = &outcome.summary;
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        out,
        "  elapsed: {}{}",
        format_duration(summary.elapsed),
        if summary.cancelled { " (cancelled)" } else { "" }
    )
    .ok();
    writeln!(out, "  vus_max: {}", summary.vus_max).ok();
    writeln!(
        out,
        "  iterations: {} (failed {}, interrupted {}) {}/s",
        summary.iterations,
        summary.iterations_failed,
        summary.iterations_interrupted,
        format_rate(summary.iterations_per_sec())
    )
    .ok();

    render_checks(outcome, &mut out);
    render_metrics(outcome, &mut out);
    render_thresholds(outcome, &mut out);

    out
}

fn render_checks(outcome: &RunOutcome, out: &mut String) {
    let checks = &outcome.summary.checks;
    if checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for c in checks {
        let total = c.passes.saturating_add(c.fails);
        let rate = (total > 0).then(|| c.passes as f64 / total as f64);
        let mark = if c.fails > 0 { "✗" } else { "✓" };
        writeln!(
            out,
            "  {mark} {}: {} pass={} fail={}",
            c.name,
            format_percent(rate),
            c.passes,
            c.fails
        )
        .ok();
    }
}

fn render_metrics(outcome: &RunOutcome, out: &mut String) {
    let metrics = &outcome.summary.metrics;
    let elapsed_secs = outcome.summary.elapsed.as_secs_f64();

    let mut by_name: BTreeMap<&str, Vec<&SeriesSnapshot>> = BTreeMap::new();
    for s in metrics.series() {
        if s.name == metric_names::CHECKS {
            continue;
        }
        by_name.entry(s.name.as_str()).or_default().push(s);
    }

    if by_name.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    for (name, rows) in by_name {
        let no_tags: &[(&str, &str)] = &[];
        if let Some(total) = metrics.metric(name, no_tags) {
            writeln!(out, "  {name} = {}", format_value(&total, elapsed_secs)).ok();
        }

        let tagged: Vec<_> = rows.into_iter().filter(|s| !s.tags.is_empty()).collect();
        if tagged.len() < 2 && tagged.iter().all(|s| s.tags.len() < 2) {
            continue;
        }
        for s in tagged {
            writeln!(
                out,
                "    {}{} = {}",
                name,
                format_tags_inline(&s.tags, &[]),
                format_value(&s.value, elapsed_secs)
            )
            .ok();
        }
    }
}

fn format_value(value: &AggregatedMetric, elapsed_secs: f64) -> String {
    match value {
        AggregatedMetric::Counter(v) => {
            if elapsed_secs > 0.0 {
                format!("{v} ({}/s)", format_rate(*v as f64 / elapsed_secs))
            } else {
                v.to_string()
            }
        }
        AggregatedMetric::Gauge(v) => v.to_string(),
        AggregatedMetric::Rate(r) => {
            format!("{} ({}/{})", format_percent(r.rate()), r.hits, r.total)
        }
        AggregatedMetric::Duration(d) => {
            let s = d.summary();
            format!(
                "avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
                format_ms(s.avg),
                format_ms(s.min),
                format_ms(s.med),
                format_ms(s.max),
                format_ms(s.p90),
                format_ms(s.p95),
                s.count
            )
        }
    }
}

fn render_thresholds(outcome: &RunOutcome, out: &mut String) {
    let outcomes = &outcome.thresholds.outcomes;
    if outcomes.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for o in outcomes {
        let mark = if o.passed { "✓" } else { "✗" };
        let observed = match o.observed {
            Some(v) => format!("observed {v:.4}"),
            None => "no data".to_string(),
        };
        writeln!(out, "  {mark} {}: {} ({observed})", o.metric, o.expression).ok();
    }
}
