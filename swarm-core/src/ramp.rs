use std::time::Duration;

use crate::config::Stage;
use crate::error::{Error, Result};

/// Position within a ramp profile at some instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear target concurrency over time.
///
/// Stage `i` ramps from the previous stage's target (or `start_target` for the
/// first stage) to its own target over its duration. A zero-length stage is a
/// step. Past the end of the profile the last target is held.
#[derive(Debug, Clone)]
pub struct RampProfile {
    start_target: u64,
    start_offset: Duration,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    index: usize,
    start: Duration,
    end: Duration,
    from: u64,
    to: u64,
}

impl Segment {
    fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    fn value_at(&self, elapsed: Duration) -> u64 {
        let length = self.duration();
        if length.is_zero() {
            return self.to;
        }
        let progressed = elapsed.saturating_sub(self.start).min(length);

        // integer division truncates towards `from` in both directions
        let from = self.from as i128;
        let delta = self.to as i128 - from;
        let step = delta.saturating_mul(progressed.as_nanos() as i128) / (length.as_nanos() as i128);
        (from + step).clamp(0, u64::MAX as i128) as u64
    }
}

impl RampProfile {
    pub fn new(start_target: u64, stages: Vec<Stage>) -> Self {
        let cumulative_ends = stages
            .iter()
            .scan(Duration::ZERO, |acc, s| {
                *acc = acc.saturating_add(s.duration);
                Some(*acc)
            })
            .collect();

        Self {
            start_target,
            start_offset: Duration::ZERO,
            stages,
            cumulative_ends,
        }
    }

    /// Holds `target` VUs for `duration`.
    pub fn constant(target: u64, duration: Duration) -> Self {
        Self::new(target, vec![Stage { duration, target }])
    }

    /// Delays the whole profile; the target is 0 until the offset elapses.
    #[must_use]
    pub fn with_start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn start_target(&self) -> u64 {
        self.start_target
    }

    pub fn start_offset(&self) -> Duration {
        self.start_offset
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of the stage durations (the offset is not included).
    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn final_target(&self) -> u64 {
        self.stages.last().map_or(self.start_target, |s| s.target)
    }

    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_target, u64::max)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_target() == 0 && self.total_duration().is_zero() {
            return Err(Error::EmptyRamp);
        }
        Ok(())
    }

    fn segment(&self, index: usize) -> Option<Segment> {
        let stage = self.stages.get(index)?;
        let previous = index.checked_sub(1);
        Some(Segment {
            index,
            start: previous.map_or(Duration::ZERO, |i| self.cumulative_ends[i]),
            end: self.cumulative_ends[index],
            from: previous.map_or(self.start_target, |i| self.stages[i].target),
            to: stage.target,
        })
    }

    // The stage containing `elapsed`: the first one that ends strictly after
    // it, so a zero-length stage at `elapsed` has already been applied.
    fn locate(&self, elapsed: Duration) -> Option<Segment> {
        self.segment(self.cumulative_ends.partition_point(|end| *end <= elapsed))
    }

    /// Target at `elapsed` since the profile started (after the offset).
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if elapsed.is_zero() {
            return self.start_target;
        }
        match self.locate(elapsed) {
            Some(segment) => segment.value_at(elapsed),
            None => self.final_target(),
        }
    }

    /// Target at `elapsed` since the run started, honouring the start offset.
    pub fn run_target_at(&self, run_elapsed: Duration) -> u64 {
        match run_elapsed.checked_sub(self.start_offset) {
            Some(elapsed) => self.target_at(elapsed),
            None => 0,
        }
    }

    pub fn stage_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let last = self.stages.len().checked_sub(1)?;
        let segment = self
            .locate(elapsed)
            .or_else(|| self.segment(last))?;

        let stage_elapsed = elapsed.min(segment.end).saturating_sub(segment.start);
        Some(StageSnapshot {
            index: segment.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: segment.duration().saturating_sub(stage_elapsed),
            start_target: segment.from,
            end_target: segment.to,
            current_target: self.target_at(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(secs: u64, target: u64) -> Stage {
        Stage {
            duration: Duration::from_secs(secs),
            target,
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn starts_at_start_target_and_ends_at_last_target() {
        let profiles = [
            RampProfile::new(0, vec![stage(30, 30), stage(1200, 30), stage(10, 0)]),
            RampProfile::new(5, vec![stage(10, 1)]),
            RampProfile::new(3, vec![stage(0, 9), stage(10, 2)]),
            RampProfile::new(7, vec![]),
        ];

        for p in &profiles {
            assert_eq!(p.target_at(Duration::ZERO), p.start_target());
            let total = p.total_duration();
            assert_eq!(p.target_at(total), p.final_target());
            assert_eq!(p.target_at(total + secs(3600.0)), p.final_target());
        }
    }

    #[test]
    fn interpolates_linearly_within_a_stage() {
        let p = RampProfile::new(0, vec![stage(10, 10), stage(10, 20), stage(10, 0)]);
        assert_eq!(p.target_at(secs(5.0)), 5);
        assert_eq!(p.target_at(secs(10.0)), 10);
        assert_eq!(p.target_at(secs(15.0)), 15);
        assert_eq!(p.target_at(secs(25.0)), 10);
        assert_eq!(p.total_duration(), secs(30.0));
        assert!(p.is_done(secs(30.0)));
        assert!(!p.is_done(secs(29.9)));
    }

    #[test]
    fn truncates_towards_previous_target() {
        let up = RampProfile::new(0, vec![stage(10, 3)]);
        // 3 * 0.5 = 1.5
        assert_eq!(up.target_at(secs(5.0)), 1);

        let down = RampProfile::new(3, vec![stage(10, 0)]);
        assert_eq!(down.target_at(secs(5.0)), 2);
    }

    #[test]
    fn zero_length_stage_is_a_step() {
        let p = RampProfile::new(0, vec![stage(10, 5), stage(0, 50), stage(10, 50)]);
        assert_eq!(p.target_at(secs(9.999)), 4);
        assert_eq!(p.target_at(secs(10.0)), 50);
        assert_eq!(p.target_at(secs(15.0)), 50);

        let first = RampProfile::new(0, vec![stage(0, 8), stage(10, 8)]);
        assert_eq!(first.target_at(secs(0.001)), 8);
    }

    #[test]
    fn start_offset_delays_the_profile() {
        let p = RampProfile::constant(4, secs(10.0)).with_start_offset(secs(2.0));
        assert_eq!(p.run_target_at(secs(1.0)), 0);
        assert_eq!(p.run_target_at(secs(2.5)), 4);
        assert_eq!(p.run_target_at(secs(100.0)), 4);
    }

    #[test]
    fn stage_snapshot_tracks_position() {
        let p = RampProfile::new(2, vec![stage(10, 10), stage(20, 0)]);

        let s = p.stage_at(secs(15.0)).unwrap_or_else(|| panic!("no stage"));
        assert_eq!(s.index, 1);
        assert_eq!(s.count, 2);
        assert_eq!(s.stage_elapsed, secs(5.0));
        assert_eq!(s.stage_remaining, secs(15.0));
        assert_eq!((s.start_target, s.end_target), (10, 0));
        assert_eq!(s.current_target, 8);

        let end = p.stage_at(secs(99.0)).unwrap_or_else(|| panic!("no stage"));
        assert_eq!(end.index, 1);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 0);

        assert!(RampProfile::new(1, vec![]).stage_at(secs(1.0)).is_none());
    }

    #[test]
    fn validate_rejects_profiles_without_load() {
        assert!(matches!(
            RampProfile::new(0, vec![]).validate(),
            Err(Error::EmptyRamp)
        ));
        assert!(RampProfile::new(0, vec![stage(0, 0), stage(0, 0)]).validate().is_err());
        // an idle hold still has a length to run for
        assert!(RampProfile::new(0, vec![stage(5, 0)]).validate().is_ok());
        assert!(RampProfile::new(0, vec![stage(5, 1)]).validate().is_ok());
        assert!(RampProfile::new(2, vec![]).validate().is_ok());
    }

    #[test]
    fn target_is_deterministic() {
        let p = RampProfile::new(1, vec![stage(7, 13), stage(3, 2)]);
        for ms in (0..12_000).step_by(37) {
            let t = Duration::from_millis(ms);
            assert_eq!(p.target_at(t), p.target_at(t));
        }
    }
}
