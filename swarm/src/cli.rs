use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' ({e}; expected e.g. 10s, 250ms, 1m)"))
}

fn parse_env_override(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        return Err(format!("invalid --env (empty KEY): {s}"));
    }
    Ok((k.to_string(), v.to_string()))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary line to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "swarm",
    author,
    version,
    about = "Ramp-driven HTTP load generator",
    long_about = "swarm ramps virtual users along a staged profile and runs declarative HTTP flows in a loop.\n\nA scenario file (YAML) describes the ramp stages, the weighted request flows and the thresholds that decide whether the run passes.\n\nEnvironment variables of the current process are visible to `${NAME}` placeholders; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  swarm run scenario.yaml\n  swarm run scenario.yaml --max-duration 30s --env BASE_URL=http://localhost:8080\n  swarm run scenario.yaml --output json --seed 42\n  swarm validate scenario.yaml"
)]
pub struct Cli {
    /// Log filter directives (e.g. `info`, `swarm_core=debug`). Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "LEVEL", env = "SWARM_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test scenario
    #[command(
        long_about = "Run a scenario file: ramp virtual users along its stages, execute its flows and evaluate its thresholds.\n\nCLI flags override values from the scenario file."
    )]
    Run(RunArgs),

    /// Parse a scenario file and print the resolved profile without running it
    Validate(ValidateArgs),
}

/// Run-shape overrides shared by `run` and `validate`.
#[derive(Debug, Clone, Default, Args)]
pub struct ProfileOverrides {
    /// Stop the run after this long (e.g. 10s, 250ms, 1m); holds the final target past the last stage
    #[arg(long, value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// Control-loop interval for reconciling virtual users with the ramp target
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Seed for per-VU random sources (reproducible flow choice and template values)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario file (.yaml)
    pub file: PathBuf,

    #[command(flatten)]
    pub overrides: ProfileOverrides,

    /// Add/override env vars visible to templates (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_override)]
    pub env: Vec<(String, String)>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the scenario file (.yaml)
    pub file: PathBuf,

    #[command(flatten)]
    pub overrides: ProfileOverrides,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn env_override_requires_key() {
        assert_eq!(
            parse_env_override("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert_eq!(
            parse_env_override("EMPTY="),
            Ok(("EMPTY".to_string(), String::new()))
        );
        assert!(parse_env_override("=x").is_err());
        assert!(parse_env_override("novalue").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "swarm",
            "run",
            "scenario.yaml",
            "--max-duration",
            "250ms",
            "--poll-interval",
            "100ms",
            "--seed",
            "7",
            "--env",
            "FOO=bar",
            "--env",
            "EMPTY=",
            "--output",
            "json",
            "--log-level",
            "debug",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.file, PathBuf::from("scenario.yaml"));
                assert_eq!(
                    args.overrides.max_duration,
                    Some(Duration::from_millis(250))
                );
                assert_eq!(
                    args.overrides.poll_interval,
                    Some(Duration::from_millis(100))
                );
                assert_eq!(args.overrides.seed, Some(7));
                assert_eq!(
                    args.env,
                    vec![
                        ("FOO".to_string(), "bar".to_string()),
                        ("EMPTY".to_string(), String::new())
                    ]
                );
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_validate_defaults() {
        let parsed = Cli::try_parse_from(["swarm", "validate", "scenario.yaml"]);
        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Validate(args) => {
                assert_eq!(args.file, PathBuf::from("scenario.yaml"));
                assert_eq!(args.overrides.max_duration, None);
                assert_eq!(args.overrides.seed, None);
            }
            Command::Run(_) => panic!("expected validate command"),
        }
    }

    #[test]
    fn cli_rejects_bad_duration() {
        let parsed = Cli::try_parse_from(["swarm", "run", "s.yaml", "--max-duration", "10x"]);
        assert!(parsed.is_err());
    }
}
