use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;

use super::OutputFormatter;
use crate::scenario_file::LoadedScenario;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new(run_duration: Duration) -> Self {
        Self {
            progress: Arc::new(HumanProgress::new(run_duration)),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, file: &Path, scenario: &LoadedScenario) {
        println!("scenario: {}", file.display());
        print!("{}", render_profile(scenario));
        println!();
    }

    fn progress(&self) -> Option<swarm_core::ProgressFn> {
        let progress = self.progress.clone();
        let prev_iters = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let prev_elapsed_ms = Arc::new(std::sync::atomic::AtomicU64::new(0));

        Some(Arc::new(move |u| {
            use std::sync::atomic::Ordering;

            let elapsed_ms = u.elapsed.as_millis() as u64;
            let last_ms = prev_elapsed_ms.swap(elapsed_ms, Ordering::Relaxed);
            let last_iters = prev_iters.swap(u.iterations_total, Ordering::Relaxed);
            let dt = (elapsed_ms.saturating_sub(last_ms) as f64 / 1000.0).max(1e-9);
            let iters_per_sec = u.iterations_total.saturating_sub(last_iters) as f64 / dt;

            let mut msg = format!(
                "{} vus={}/{} elapsed={}",
                u.state,
                u.active_vus,
                u.target_vus,
                format_duration(u.elapsed)
            );
            if let Some(stage) = &u.stage {
                write!(
                    msg,
                    " stage={}/{} stage_remaining={}",
                    stage.index + 1,
                    stage.count,
                    format_duration(stage.stage_remaining)
                )
                .ok();
            }
            write!(
                msg,
                " iters/s={} iters={} failed={} checks_failed={}",
                format_rate(iters_per_sec),
                u.iterations_total,
                u.iterations_failed,
                u.checks_failed
            )
            .ok();

            progress.update(u.elapsed, msg);
        }))
    }

    fn print_summary(&self, outcome: &swarm_core::RunOutcome) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", summary::render(outcome));

        if !outcome.passed() {
            eprintln!("thresholds failed:");
            for o in outcome.thresholds.failures() {
                match o.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", o.metric, o.expression),
                    None => eprintln!("  {}: {} (missing series)", o.metric, o.expression),
                }
            }
        }

        Ok(())
    }
}

/// Resolved profile: ramp stages, run length, flows and thresholds.
pub(crate) fn render_profile(scenario: &LoadedScenario) -> String {
    let mut out = String::new();
    let config = &scenario.config;
    let ramp = &config.ramp;

    writeln!(
        out,
        "  ramp: start_vus={} start_time={} stages={} max_vus={}",
        ramp.start_target(),
        format_duration(ramp.start_offset()),
        ramp.stages().len(),
        ramp.max_target()
    )
    .ok();
    for (i, stage) in ramp.stages().iter().enumerate() {
        writeln!(
            out,
            "    stage {}: {} -> {} vus",
            i + 1,
            format_duration(stage.duration),
            stage.target
        )
        .ok();
    }

    let run_duration = match config.max_duration {
        Some(d) => format!("{} (max_duration)", format_duration(d)),
        None => format_duration(config.run_duration()),
    };
    writeln!(
        out,
        "  run: duration={run_duration} poll_interval={}",
        format_duration(config.poll_interval)
    )
    .ok();

    let total_weight: f64 = scenario.flows.iter().map(|f| f.weight).sum();
    for flow in &scenario.flows {
        let share = if total_weight > 0.0 {
            flow.weight / total_weight * 100.0
        } else {
            0.0
        };
        let steps = flow
            .steps
            .iter()
            .map(|s| format!("{} {}", s.method, s.url.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "  flow {} ({share:.1}%): {steps}", flow.name).ok();
    }

    for set in &config.thresholds {
        let exprs = set
            .expressions
            .iter()
            .map(|e| e.source.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "  threshold {}: {exprs}", set.key).ok();
    }

    out
}
