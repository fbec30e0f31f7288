use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_OK: &str = "/ok";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_DELAY: &str = "/delay/{ms}";
pub const PATH_LOGIN: &str = "/login";
pub const PATH_ME: &str = "/me";

/// Password accepted by the login endpoint.
pub const VALID_PASSWORD: &str = "secret";
/// Usernames with this prefix are reported as unknown (404).
pub const UNKNOWN_USER_PREFIX: &str = "ghost";

const TOKEN_PREFIX: &str = "token-";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    logins_ok: Arc<AtomicU64>,
    traceparent_seen: Arc<AtomicU64>,
}

impl TestServerStats {
    fn observe(&self, headers: &HeaderMap) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if headers.contains_key("traceparent") {
            self.traceparent_seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn logins_ok(&self) -> u64 {
        self.logins_ok.load(Ordering::Relaxed)
    }

    pub fn traceparent_seen(&self) -> u64 {
        self.traceparent_seen.load(Ordering::Relaxed)
    }
}

async fn handle_ok(State(stats): State<TestServerStats>, headers: HeaderMap) -> &'static str {
    stats.observe(&headers);
    "ok"
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    Path(code): Path<u16>,
) -> StatusCode {
    stats.observe(&headers);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_delay(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    Path(ms): Path<u64>,
) -> &'static str {
    stats.observe(&headers);
    sleep(Duration::from_millis(ms)).await;
    "ok"
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn handle_login(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> (StatusCode, Json<serde_json::Value>) {
    stats.observe(&headers);

    if form.username.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "username required"})));
    }
    if form.username.starts_with(UNKNOWN_USER_PREFIX) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown user"})));
    }
    if form.password != VALID_PASSWORD {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad credentials"})));
    }

    stats.logins_ok.fetch_add(1, Ordering::Relaxed);
    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("{TOKEN_PREFIX}{}", form.username),
            "token_type": "bearer",
        })),
    )
}

async fn handle_me(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    stats.observe(&headers);

    let username = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| token.strip_prefix(TOKEN_PREFIX));

    match username {
        Some(name) if !name.is_empty() => (StatusCode::OK, Json(json!({"username": name}))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))),
    }
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_OK, get(handle_ok))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_DELAY, get(handle_delay))
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_ME, get(handle_me))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
