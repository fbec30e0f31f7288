use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::ramp::RampProfile;
use crate::thresholds::ThresholdSet;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub ramp: RampProfile,
    pub thresholds: Vec<ThresholdSet>,
    /// How often the executor reconciles live VUs with the ramp target.
    pub poll_interval: Duration,
    /// Run length override. Past the end of the ramp the final target is held;
    /// a shorter value truncates the ramp.
    pub max_duration: Option<Duration>,
    /// Pause between iterations of one VU.
    pub think_time: Option<Duration>,
    /// Upper bound on waiting for in-flight iterations when the run stops.
    pub graceful_stop: Option<Duration>,
    /// Seed for per-VU random sources. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl RunConfig {
    pub fn new(ramp: RampProfile) -> Self {
        Self {
            ramp,
            thresholds: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
            think_time: None,
            graceful_stop: None,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::ZeroPollInterval);
        }
        self.ramp.validate()?;

        let now = Instant::now();
        for (field, value) in [
            ("run duration", Some(self.run_duration())),
            ("poll_interval", Some(self.poll_interval)),
            ("graceful_stop", self.graceful_stop),
        ] {
            if let Some(value) = value
                && now.checked_add(value).is_none()
            {
                return Err(Error::DurationOutOfRange { field, value });
            }
        }
        Ok(())
    }

    /// Wall-clock length of the run measured from its start.
    pub fn run_duration(&self) -> Duration {
        self.max_duration.unwrap_or_else(|| {
            self.ramp
                .start_offset()
                .saturating_add(self.ramp.total_duration())
        })
    }
}
