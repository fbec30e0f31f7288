use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use swarm_http::HttpClient;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, IterationOutcome};
use crate::config::RunConfig;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::scenario::{IterationContext, Scenario, ScenarioError};

// Deadline used when the run length does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of a run. Cancellation jumps straight to `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Idle,
    Ramping,
    Draining,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    pub elapsed: Duration,
    pub vus_spawned: u64,
    /// VUs aborted after `graceful_stop` expired.
    pub iterations_interrupted: u64,
    pub cancelled: bool,
}

struct LiveVu {
    id: u64,
    token: CancellationToken,
}

/// Runs VU loops, keeping the number of live VUs equal to the ramp target.
pub struct Executor {
    config: RunConfig,
    scenario: Arc<dyn Scenario>,
    aggregator: Arc<Aggregator>,
    http: Arc<HttpClient>,
    progress: Option<ProgressFn>,
    state: watch::Sender<RunState>,
}

impl Executor {
    pub fn new(config: RunConfig, scenario: Arc<dyn Scenario>, aggregator: Arc<Aggregator>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config,
            scenario,
            aggregator,
            http: Arc::new(HttpClient::default()),
            progress: None,
            state,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http: Arc<HttpClient>) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, next: RunState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "run state changed");
        }
    }

    pub(crate) fn complete(&self) {
        self.transition(RunState::Completed);
    }

    /// Drives the control loop until the run duration elapses or `cancel`
    /// fires, then waits for in-flight iterations.
    pub async fn run(&self, cancel: CancellationToken) -> ExecutionReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::from_std(started)
            .checked_add(self.config.run_duration())
            .unwrap_or_else(|| tokio::time::Instant::from_std(started) + FAR_FUTURE);

        let vus_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut live: Vec<LiveVu> = Vec::new();
        let mut handles: Vec<AbortHandle> = Vec::new();
        let mut next_id: u64 = 1;
        let mut tick: u64 = 0;

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.transition(RunState::Ramping);

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break true,
                _ = tokio::time::sleep_until(deadline) => break false,
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            let target = self.config.ramp.run_target_at(elapsed);
            let live_count = live.len() as u64;

            if target > live_count {
                for _ in live_count..target {
                    let vu = LiveVu {
                        id: next_id,
                        token: vus_token.child_token(),
                    };
                    next_id += 1;
                    handles.push(self.spawn_vu(&vu, &tracker));
                    live.push(vu);
                }
                debug!(target, spawned = target - live_count, "scaled up");
            } else if target < live_count {
                // most recently spawned first
                for vu in live.drain(target as usize..).rev() {
                    debug!(vu = vu.id, "retiring");
                    vu.token.cancel();
                }
                debug!(target, retired = live_count - target, "scaled down");
            }
            handles.retain(|h| !h.is_finished());

            tick += 1;
            self.report_progress(tick, elapsed, RunState::Ramping, target, live.len() as u64);
        };

        if cancelled {
            info!("run cancelled");
        }
        self.transition(RunState::Draining);
        vus_token.cancel();
        live.clear();
        tracker.close();

        let interrupted = self.drain(&tracker, &handles).await;
        if interrupted > 0 {
            self.aggregator.record_interrupted(interrupted);
        }

        let elapsed = started.elapsed();
        self.report_progress(tick + 1, elapsed, RunState::Draining, 0, 0);

        ExecutionReport {
            elapsed,
            vus_spawned: next_id - 1,
            iterations_interrupted: interrupted,
            cancelled,
        }
    }

    // Returns how many VUs had to be aborted.
    async fn drain(&self, tracker: &TaskTracker, handles: &[AbortHandle]) -> u64 {
        let Some(grace) = self.config.graceful_stop else {
            tracker.wait().await;
            return 0;
        };

        if tokio::time::timeout(grace, tracker.wait()).await.is_ok() {
            return 0;
        }

        let mut aborted = 0;
        for handle in handles.iter().filter(|h| !h.is_finished()) {
            handle.abort();
            aborted += 1;
        }
        warn!(aborted, grace = ?grace, "graceful stop expired, interrupting iterations");
        tracker.wait().await;
        aborted
    }

    fn spawn_vu(&self, vu: &LiveVu, tracker: &TaskTracker) -> AbortHandle {
        let user = VirtualUser {
            id: vu.id,
            token: vu.token.clone(),
            scenario: self.scenario.clone(),
            aggregator: self.aggregator.clone(),
            http: self.http.clone(),
            think_time: self.config.think_time.filter(|d| !d.is_zero()),
            rng: vu_rng(self.config.seed, vu.id),
        };
        debug!(vu = vu.id, "spawning");
        tracker.spawn(user.run()).abort_handle()
    }

    fn report_progress(&self, tick: u64, elapsed: Duration, state: RunState, target: u64, live: u64) {
        let Some(progress) = &self.progress else {
            return;
        };
        let profile_elapsed = elapsed.saturating_sub(self.config.ramp.start_offset());

        progress(ProgressUpdate {
            tick,
            elapsed,
            state,
            target_vus: target,
            live_vus: live,
            active_vus: self.aggregator.active_vus(),
            stage: self.config.ramp.stage_at(profile_elapsed),
            iterations_total: self.aggregator.iterations_total(),
            iterations_failed: self.aggregator.iterations_failed(),
            checks_failed: self.aggregator.checks_failed(),
        });
    }
}

fn vu_rng(seed: Option<u64>, vu_id: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ vu_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct VirtualUser {
    id: u64,
    token: CancellationToken,
    scenario: Arc<dyn Scenario>,
    aggregator: Arc<Aggregator>,
    http: Arc<HttpClient>,
    think_time: Option<Duration>,
    rng: StdRng,
}

impl VirtualUser {
    async fn run(self) {
        let VirtualUser {
            id,
            token,
            scenario,
            aggregator,
            http,
            think_time,
            mut rng,
        } = self;

        let _active = aggregator.enter_vu();
        let mut iteration: u64 = 0;
        let mut failures: u64 = 0;
        let mut reported_conflict = false;

        while !token.is_cancelled() {
            let mut ctx = IterationContext::new(id, iteration, rng, http.clone());
            let started = Instant::now();
            let result = match AssertUnwindSafe(scenario.run(&mut ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(ScenarioError::Panicked(panic_message(payload.as_ref()))),
            };
            let duration = started.elapsed();

            let (next_rng, checks, samples) = ctx.into_parts();
            rng = next_rng;

            for check in &checks {
                aggregator.record_check(check);
            }
            for sample in &samples {
                if let Err(err) = aggregator.record(sample)
                    && !reported_conflict
                {
                    warn!(vu = id, error = %err, "dropping metric sample");
                    reported_conflict = true;
                }
            }

            let outcome = match &result {
                Ok(()) => IterationOutcome::Completed,
                Err(err) => {
                    if failures == 0 {
                        warn!(vu = id, iteration, error = %err, "iteration failed");
                    } else {
                        debug!(vu = id, iteration, error = %err, "iteration failed");
                    }
                    failures += 1;
                    IterationOutcome::Failed { kind: err.kind() }
                }
            };
            aggregator.record_iteration(duration, outcome);
            iteration += 1;

            if let Some(pause) = think_time {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        debug!(vu = id, iterations = iteration, "stopped");
    }
}
