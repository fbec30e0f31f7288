use std::collections::BTreeMap;
use std::sync::Arc;

use swarm_core::{HttpClient, Runner, Scenario};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::http_scenario::{self, FlowSettings};
use crate::output;
use crate::run_error::RunError;
use crate::scenario_file;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let loaded = scenario_file::load(&args.file, &args.overrides)
        .await
        .map_err(RunError::InvalidInput)?;

    let out = output::formatter(args.output, loaded.config.run_duration());
    out.print_header(&args.file, &loaded);

    let env = merged_env(&loaded.env, &args.env);
    for (flow, step, var) in http_scenario::unresolved_variables(&loaded.flows, &env) {
        warn!(flow, step, variable = var, "variable is not set; the step will fail");
    }
    let http = Arc::new(HttpClient::default().with_default_timeout(loaded.request_timeout));
    let scenario: Arc<dyn Scenario> = Arc::new(
        http_scenario::build(
            loaded.flows,
            FlowSettings {
                env,
                error_rate_metric: loaded.error_rate_metric,
            },
        )
        .map_err(RunError::from_core_setup)?,
    );

    let runner = Runner::new(loaded.config, scenario)
        .map_err(RunError::from_core_setup)?
        .with_http_client(http)
        .with_progress(out.progress());

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let outcome = runner
        .run(cancel)
        .await
        .map_err(|e| RunError::RuntimeError(anyhow::Error::new(e).context("run failed")))?;
    ctrl_c.abort();

    out.print_summary(&outcome).map_err(RunError::RuntimeError)?;

    info!(passed = outcome.passed(), "thresholds evaluated");
    Ok(ExitCode::from_thresholds(outcome.passed()))
}

pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let loaded = scenario_file::load(&args.file, &args.overrides)
        .await
        .map_err(RunError::InvalidInput)?;

    println!("scenario: {} (valid)", args.file.display());
    print!("{}", output::render_profile(&loaded));
    Ok(ExitCode::Success)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received, draining virtual users");
            cancel.cancel();
        }
        Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
    }
}

/// Scenario file `env` < process env < `--env` overrides.
fn merged_env(
    defaults: &BTreeMap<String, String>,
    overrides: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut map = defaults.clone();
    map.extend(std::env::vars());
    map.extend(overrides.iter().cloned());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_env_overrides_file_defaults() {
        let defaults: BTreeMap<String, String> = [
            ("SWARM_TEST_ONLY_IN_FILE".to_string(), "file".to_string()),
            ("SWARM_TEST_OVERRIDDEN".to_string(), "file".to_string()),
        ]
        .into_iter()
        .collect();
        let overrides = vec![("SWARM_TEST_OVERRIDDEN".to_string(), "cli".to_string())];

        let env = merged_env(&defaults, &overrides);
        assert_eq!(
            env.get("SWARM_TEST_ONLY_IN_FILE").map(String::as_str),
            Some("file")
        );
        assert_eq!(
            env.get("SWARM_TEST_OVERRIDDEN").map(String::as_str),
            Some("cli")
        );
    }
}
