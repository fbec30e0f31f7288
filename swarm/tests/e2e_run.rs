use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context as _;
use swarm_testserver::TestServer;

fn scenario(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/scenarios")
        .join(name)
}

struct RunResult {
    code: i32,
    stdout: String,
    stderr: String,
}

impl RunResult {
    fn json_lines(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        self.stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).with_context(|| format!("invalid json line: {l}")))
            .collect()
    }

    fn summary(&self) -> anyhow::Result<serde_json::Value> {
        let lines = self.json_lines()?;
        let last = lines
            .into_iter()
            .last()
            .with_context(|| format!("no output\nstderr:\n{}", self.stderr))?;
        anyhow::ensure!(last["kind"] == "summary", "last line is not a summary: {last}");
        Ok(last)
    }
}

async fn run_swarm(args: Vec<String>, base_url: Option<String>) -> anyhow::Result<RunResult> {
    let exe = env!("CARGO_BIN_EXE_swarm");

    let out = tokio::task::spawn_blocking(move || {
        let mut cmd = Command::new(exe);
        cmd.args(&args);
        if let Some(base_url) = base_url {
            cmd.env("BASE_URL", base_url);
        }
        cmd.output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run swarm binary")?;

    Ok(RunResult {
        code: out.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

fn run_args(file: PathBuf, extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        file.display().to_string(),
        "--output".to_string(),
        "json".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

fn metric_total(summary: &serde_json::Value, name: &str, field: &str) -> u64 {
    summary["metrics"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|m| m["name"] == name)
        .filter_map(|m| m[field].as_u64())
        .sum()
}

#[tokio::test]
async fn login_flow_runs_both_flows_and_passes() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let res = run_swarm(
        run_args(scenario("login_flow.yaml"), &["--seed", "42"]),
        Some(server.base_url().to_string()),
    )
    .await?;
    let stats = server.stats().clone();
    server.shutdown().await;

    anyhow::ensure!(res.code == 0, "exit {}\nstderr:\n{}", res.code, res.stderr);

    let lines = res.json_lines()?;
    anyhow::ensure!(
        lines.iter().any(|l| l["kind"] == "progress"),
        "expected progress lines"
    );

    let summary = res.summary()?;
    anyhow::ensure!(summary["passed"] == true, "summary: {summary}");
    anyhow::ensure!(summary["vus_max"] == 2, "summary: {summary}");

    let iterations = summary["iterations"]["total"].as_u64().unwrap_or(0);
    anyhow::ensure!(iterations > 0, "no iterations: {summary}");
    anyhow::ensure!(summary["iterations"]["failed"] == 0, "summary: {summary}");

    let checks = summary["checks"].as_array().cloned().unwrap_or_default();
    anyhow::ensure!(
        checks.iter().all(|c| c["fails"] == 0),
        "failed checks: {checks:?}"
    );

    let http_reqs = metric_total(&summary, "http_reqs", "count");
    anyhow::ensure!(
        http_reqs == stats.requests_total(),
        "client counted {http_reqs} requests, server saw {}",
        stats.requests_total()
    );
    anyhow::ensure!(stats.logins_ok() > 0, "login flow never ran");
    anyhow::ensure!(stats.traceparent_seen() > 0, "traceparent header not sent");
    Ok(())
}

#[tokio::test]
async fn missing_extract_ends_flow_without_failing() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let res = run_swarm(
        run_args(scenario("unknown_user.yaml"), &[]),
        Some(server.base_url().to_string()),
    )
    .await?;
    server.shutdown().await;

    anyhow::ensure!(res.code == 0, "exit {}\nstderr:\n{}", res.code, res.stderr);
    let summary = res.summary()?;

    anyhow::ensure!(summary["iterations"]["failed"] == 0, "summary: {summary}");
    let me_requests = summary["metrics"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|m| m["name"] == "http_reqs" && m["tags"]["name"] == "me")
        .count();
    anyhow::ensure!(me_requests == 0, "`me` step ran without a token: {summary}");
    Ok(())
}

#[tokio::test]
async fn transport_errors_fail_checks_and_iterations() -> anyhow::Result<()> {
    // Nothing listens on port 1.
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("unreachable.yaml");
    std::fs::write(
        &path,
        r#"
startVUs: 1
stages: [{duration: 300ms, target: 1}]
pollInterval: 50ms
thinkTime: 20ms
timeout: 500ms
thresholds:
  http_req_failed: "rate<0.5"
flows:
  - name: down
    steps:
      - {name: ping, url: "${BASE_URL}/ok", checks: {ok_200: 200}}
      - {name: never, url: "${BASE_URL}/ok"}
"#,
    )
    .context("write scenario")?;

    let res = run_swarm(
        run_args(path, &[]),
        Some("http://127.0.0.1:1".to_string()),
    )
    .await?;

    anyhow::ensure!(res.code == 11, "exit {}\nstderr:\n{}", res.code, res.stderr);
    let summary = res.summary()?;

    let iterations = summary["iterations"]["total"].as_u64().unwrap_or(0);
    anyhow::ensure!(iterations > 0, "no iterations: {summary}");
    anyhow::ensure!(
        summary["iterations"]["failed"].as_u64() == Some(iterations),
        "every iteration should fail: {summary}"
    );
    anyhow::ensure!(
        summary["checks"][0]["name"] == "ok_200" && summary["checks"][0]["passes"] == 0,
        "summary: {summary}"
    );
    let never = summary["metrics"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|m| m["tags"]["name"] == "never")
        .count();
    anyhow::ensure!(never == 0, "remaining steps must be skipped: {summary}");
    Ok(())
}

#[tokio::test]
async fn max_duration_override_shortens_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("long.yaml");
    std::fs::write(
        &path,
        r#"
startVUs: 1
stages: [{duration: 1h, target: 1}]
pollInterval: 50ms
thinkTime: 20ms
flows:
  - name: health
    steps:
      - {name: ok, url: "${BASE_URL}/ok"}
"#,
    )
    .context("write scenario")?;

    let server = TestServer::start().await.context("start test server")?;
    let started = std::time::Instant::now();
    let res = run_swarm(
        run_args(path, &["--max-duration", "300ms"]),
        Some(server.base_url().to_string()),
    )
    .await?;
    let took = started.elapsed();
    server.shutdown().await;

    anyhow::ensure!(res.code == 0, "exit {}\nstderr:\n{}", res.code, res.stderr);
    anyhow::ensure!(
        took < std::time::Duration::from_secs(30),
        "run ignored --max-duration (took {took:?})"
    );
    let summary = res.summary()?;
    let elapsed = summary["elapsed_secs"].as_f64().unwrap_or(f64::MAX);
    anyhow::ensure!(elapsed < 5.0, "elapsed {elapsed}");
    Ok(())
}

#[tokio::test]
async fn human_output_prints_summary_sections() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let res = run_swarm(
        vec![
            "run".to_string(),
            scenario("server_errors.yaml").display().to_string(),
        ],
        Some(server.base_url().to_string()),
    )
    .await?;
    server.shutdown().await;

    anyhow::ensure!(res.code == 11, "exit {}\nstderr:\n{}", res.code, res.stderr);
    for needle in ["summary", "checks", "metrics", "thresholds", "✗ server_error_rate"] {
        anyhow::ensure!(
            res.stdout.contains(needle),
            "missing `{needle}` in stdout:\n{}",
            res.stdout
        );
    }
    anyhow::ensure!(
        res.stderr.contains("thresholds failed"),
        "stderr:\n{}",
        res.stderr
    );
    Ok(())
}

#[tokio::test]
async fn validate_prints_resolved_profile() -> anyhow::Result<()> {
    let res = run_swarm(
        vec![
            "validate".to_string(),
            scenario("login_flow.yaml").display().to_string(),
            "--max-duration".to_string(),
            "1s".to_string(),
        ],
        None,
    )
    .await?;

    anyhow::ensure!(res.code == 0, "exit {}\nstderr:\n{}", res.code, res.stderr);
    for needle in [
        "(valid)",
        "stage 1: 400ms -> 2 vus",
        "duration=1s (max_duration)",
        "flow login (75.0%)",
        "flow health (25.0%)",
        "threshold server_error_rate: rate<0.01",
    ] {
        anyhow::ensure!(
            res.stdout.contains(needle),
            "missing `{needle}` in stdout:\n{}",
            res.stdout
        );
    }
    Ok(())
}
