use std::sync::Arc;
use std::time::Duration;

use crate::executor::RunState;
use crate::ramp::StageSnapshot;

/// Emitted once per control-loop tick, plus once after draining.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    pub state: RunState,
    pub target_vus: u64,
    /// VUs spawned and not yet retired.
    pub live_vus: u64,
    /// VUs currently inside their iteration loop.
    pub active_vus: u64,
    pub stage: Option<StageSnapshot>,
    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub checks_failed: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
