use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use swarm_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn scenario(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/scenarios")
        .join(name)
}

fn ensure_exit(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out.status) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

async fn run_against(server: &TestServer, file: PathBuf) -> anyhow::Result<Output> {
    let base_url = server.base_url().to_string();
    let exe = env!("CARGO_BIN_EXE_swarm");

    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&file)
            .arg("--output")
            .arg("json")
            .env("BASE_URL", &base_url)
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run swarm binary")
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_swarm");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--max-duration")
        .arg("10x")
        .output()
        .context("run swarm binary")?;

    ensure_exit(&out, 30)
}

#[test]
fn missing_scenario_file_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_swarm");

    let out = Command::new(exe)
        .arg("run")
        .arg(scenario("does-not-exist.yaml"))
        .output()
        .context("run swarm binary")?;

    ensure_exit(&out, 30)?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(
        stderr.contains("failed to read scenario file"),
        "unexpected stderr:\n{stderr}"
    );
    Ok(())
}

#[test]
fn unknown_field_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_swarm");

    let out = Command::new(exe)
        .arg("validate")
        .arg(scenario("invalid_field.yaml"))
        .output()
        .context("run swarm binary")?;

    ensure_exit(&out, 30)
}

#[test]
fn invalid_threshold_exit_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("bad_threshold.yaml");
    std::fs::write(
        &path,
        r#"
stages: [{duration: 1s, target: 1}]
thresholds: {http_req_duration: "p(95)=<500"}
flows: [{name: a, steps: [{name: s, url: "http://127.0.0.1:1/"}]}]
"#,
    )
    .context("write scenario")?;

    let out = Command::new(env!("CARGO_BIN_EXE_swarm"))
        .arg("run")
        .arg(&path)
        .output()
        .context("run swarm binary")?;

    ensure_exit(&out, 30)
}

#[test]
fn oversized_duration_exit_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("huge_duration.yaml");
    std::fs::write(
        &path,
        r#"
stages: [{duration: 18446744073709551615, target: 1}]
flows: [{name: a, steps: [{name: s, url: "http://127.0.0.1:1/"}]}]
"#,
    )
    .context("write scenario")?;

    for command in ["validate", "run"] {
        let out = Command::new(env!("CARGO_BIN_EXE_swarm"))
            .arg(command)
            .arg(&path)
            .output()
            .context("run swarm binary")?;
        ensure_exit(&out, 30)?;
    }
    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_against(&server, scenario("server_errors.yaml")).await?;
    server.shutdown().await;

    ensure_exit(&out, 11)
}

#[tokio::test]
async fn passing_run_exit_0() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_against(&server, scenario("login_flow.yaml")).await?;
    server.shutdown().await;

    ensure_exit(&out, 0)
}
