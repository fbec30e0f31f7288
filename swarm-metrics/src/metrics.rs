use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Duration,
}

// Durations are recorded in microseconds; upper bound is one hour.
const HISTOGRAM_LOW_US: u64 = 1;
const HISTOGRAM_HIGH_US: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

pub(crate) fn new_duration_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(HISTOGRAM_LOW_US, HISTOGRAM_HIGH_US, HISTOGRAM_SIGFIG)
    {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

#[derive(Debug, Default)]
pub(crate) struct RateCell {
    pub(crate) hits: AtomicU64,
    pub(crate) total: AtomicU64,
}

#[derive(Debug)]
pub(crate) enum Series {
    Counter(AtomicU64),
    Gauge(AtomicI64),
    Rate(RateCell),
    Duration(Mutex<Histogram<u64>>),
}

impl Series {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Series::Counter(AtomicU64::new(0)),
            MetricKind::Gauge => Series::Gauge(AtomicI64::new(0)),
            MetricKind::Rate => Series::Rate(RateCell::default()),
            MetricKind::Duration => Series::Duration(Mutex::new(new_duration_histogram())),
        }
    }
}

/// Write handle for one series. Cheap to clone; operations that do not match
/// the series kind are ignored.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    series: Arc<Series>,
}

impl MetricHandle {
    pub(crate) fn new(series: Arc<Series>) -> Self {
        Self { series }
    }

    pub fn kind(&self) -> MetricKind {
        match &*self.series {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Rate(_) => MetricKind::Rate,
            Series::Duration(_) => MetricKind::Duration,
        }
    }

    #[inline]
    pub fn add(&self, value: u64) {
        if let Series::Counter(c) = &*self.series {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let Series::Gauge(g) = &*self.series {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Adds `delta` to the gauge and returns the new value.
    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match &*self.series {
            Series::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed) + delta,
            _ => 0,
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    pub fn raise_gauge(&self, value: i64) {
        if let Series::Gauge(g) = &*self.series {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn observe_rate(&self, passed: bool) {
        if let Series::Rate(r) = &*self.series {
            if passed {
                r.hits.fetch_add(1, Ordering::Relaxed);
            }
            r.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn observe_micros(&self, micros: u64) {
        if let Series::Duration(h) = &*self.series {
            h.lock().saturating_record(micros.max(HISTOGRAM_LOW_US));
        }
    }

    pub fn observe_duration(&self, value: Duration) {
        self.observe_micros(u64::try_from(value.as_micros()).unwrap_or(u64::MAX));
    }

    /// Records a duration given in (fractional) milliseconds.
    pub fn observe_millis(&self, ms: f64) {
        let micros = if ms.is_finite() && ms > 0.0 {
            (ms * 1000.0).round() as u64
        } else {
            0
        };
        self.observe_micros(micros);
    }

    pub fn counter_value(&self) -> u64 {
        match &*self.series {
            Series::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge_value(&self) -> i64 {
        match &*self.series {
            Series::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// `(hits, total)`.
    pub fn rate_value(&self) -> (u64, u64) {
        match &*self.series {
            Series::Rate(r) => (r.hits.load(Ordering::Relaxed), r.total.load(Ordering::Relaxed)),
            _ => (0, 0),
        }
    }
}
