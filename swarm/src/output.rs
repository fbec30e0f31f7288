use std::path::Path;
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::scenario_file::LoadedScenario;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, file: &Path, scenario: &LoadedScenario);
    fn progress(&self) -> Option<swarm_core::ProgressFn>;
    fn print_summary(&self, outcome: &swarm_core::RunOutcome) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat, run_duration: Duration) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new(run_duration)),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

pub(crate) use human::render_profile;
