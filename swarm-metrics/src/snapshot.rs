use hdrhistogram::Histogram;
use std::time::Duration;

use crate::metrics::{MetricKind, new_duration_histogram};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateValue {
    pub hits: u64,
    pub total: u64,
}

impl RateValue {
    /// `hits / total`, or `None` when nothing was observed.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }

    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hits)
    }

    fn merge(&mut self, other: &RateValue) {
        self.hits += other.hits;
        self.total += other.total;
    }
}

/// Duration distribution, stored in microseconds and reported in milliseconds.
#[derive(Debug, Clone)]
pub struct DurationValue {
    hist: Histogram<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DurationSummary {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

fn us_to_ms(us: f64) -> f64 {
    us / 1000.0
}

impl DurationValue {
    pub(crate) fn new(hist: Histogram<u64>) -> Self {
        Self { hist }
    }

    pub fn empty() -> Self {
        Self::new(new_duration_histogram())
    }

    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hist.len() == 0
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| us_to_ms(self.hist.mean()))
    }

    pub fn min_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| us_to_ms(self.hist.min() as f64))
    }

    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| us_to_ms(self.hist.max() as f64))
    }

    pub fn stdev_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| us_to_ms(self.hist.stdev()))
    }

    /// Value at percentile `p` (0..=100, fractional allowed).
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        if self.is_empty() || !p.is_finite() {
            return None;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        Some(us_to_ms(self.hist.value_at_quantile(q) as f64))
    }

    pub fn summary(&self) -> DurationSummary {
        DurationSummary {
            count: self.count(),
            avg: self.mean_ms(),
            min: self.min_ms(),
            med: self.percentile_ms(50.0),
            max: self.max_ms(),
            p90: self.percentile_ms(90.0),
            p95: self.percentile_ms(95.0),
            p99: self.percentile_ms(99.0),
        }
    }

    fn merge(&mut self, other: &DurationValue) {
        // both sides share the same bounds, so `add` cannot overflow them
        let _ = self.hist.add(&other.hist);
    }
}

#[derive(Debug, Clone)]
pub enum AggregatedMetric {
    Counter(u64),
    Gauge(i64),
    Rate(RateValue),
    Duration(DurationValue),
}

impl AggregatedMetric {
    pub fn kind(&self) -> MetricKind {
        match self {
            AggregatedMetric::Counter(_) => MetricKind::Counter,
            AggregatedMetric::Gauge(_) => MetricKind::Gauge,
            AggregatedMetric::Rate(_) => MetricKind::Rate,
            AggregatedMetric::Duration(_) => MetricKind::Duration,
        }
    }

    fn merge(&mut self, other: &AggregatedMetric) {
        match (self, other) {
            (AggregatedMetric::Counter(a), AggregatedMetric::Counter(b)) => {
                *a = a.saturating_add(*b)
            }
            (AggregatedMetric::Gauge(a), AggregatedMetric::Gauge(b)) => *a += *b,
            (AggregatedMetric::Rate(a), AggregatedMetric::Rate(b)) => a.merge(b),
            (AggregatedMetric::Duration(a), AggregatedMetric::Duration(b)) => a.merge(b),
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub value: AggregatedMetric,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches<K: AsRef<str>, V: AsRef<str>>(&self, filter: &[(K, V)]) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tag(k.as_ref()) == Some(v.as_ref()))
    }
}

/// Immutable copy of every series in a registry.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    series: Vec<SeriesSnapshot>,
    elapsed: Option<Duration>,
}

impl MetricsSnapshot {
    pub fn from_series(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self {
            series,
            elapsed: None,
        }
    }

    /// Attaches the wall-clock time the metrics were collected over.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    /// Distinct metric names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.series.iter().map(|s| s.name.as_str()).collect();
        names.dedup();
        names
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.series.iter().find(|s| s.name == name).map(|s| s.kind)
    }

    /// Merges every series of `name` whose tags contain all pairs in `filter`.
    /// Returns `None` when no series matches.
    pub fn metric<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        filter: &[(K, V)],
    ) -> Option<AggregatedMetric> {
        let mut matching = self
            .series
            .iter()
            .filter(|s| s.name == name && s.matches(filter));
        let mut acc = matching.next()?.value.clone();
        for s in matching {
            acc.merge(&s.value);
        }
        Some(acc)
    }

    pub fn counter<K: AsRef<str>, V: AsRef<str>>(&self, name: &str, filter: &[(K, V)]) -> Option<u64> {
        match self.metric(name, filter)? {
            AggregatedMetric::Counter(v) => Some(v),
            _ => None,
        }
    }

    pub fn gauge<K: AsRef<str>, V: AsRef<str>>(&self, name: &str, filter: &[(K, V)]) -> Option<i64> {
        match self.metric(name, filter)? {
            AggregatedMetric::Gauge(v) => Some(v),
            _ => None,
        }
    }

    pub fn rate<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        filter: &[(K, V)],
    ) -> Option<RateValue> {
        match self.metric(name, filter)? {
            AggregatedMetric::Rate(v) => Some(v),
            _ => None,
        }
    }

    pub fn duration<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        filter: &[(K, V)],
    ) -> Option<DurationValue> {
        match self.metric(name, filter)? {
            AggregatedMetric::Duration(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    const NO_TAGS: &[(&str, &str)] = &[];

    fn series(name: &str, tags: &[(&str, &str)], value: AggregatedMetric) -> SeriesSnapshot {
        SeriesSnapshot {
            name: name.to_string(),
            kind: value.kind(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
        }
    }

    #[test]
    fn rate_value_handles_empty() {
        assert_eq!(RateValue::default().rate(), None);
        let r = RateValue { hits: 1, total: 4 };
        assert_eq!(r.rate(), Some(0.25));
        assert_eq!(r.misses(), 3);
    }

    #[test]
    fn metric_merges_matching_series() {
        let snap = MetricsSnapshot::from_series(vec![
            series(
                "checks",
                &[("check", "a")],
                AggregatedMetric::Rate(RateValue { hits: 3, total: 4 }),
            ),
            series(
                "checks",
                &[("check", "b")],
                AggregatedMetric::Rate(RateValue { hits: 0, total: 4 }),
            ),
            series("http_reqs", &[], AggregatedMetric::Counter(8)),
        ]);

        assert_eq!(snap.names(), vec!["checks", "http_reqs"]);
        assert_eq!(
            snap.rate("checks", NO_TAGS),
            Some(RateValue { hits: 3, total: 8 })
        );
        assert_eq!(
            snap.rate("checks", &[("check", "a")]),
            Some(RateValue { hits: 3, total: 4 })
        );
        assert!(snap.rate("checks", &[("check", "c")]).is_none());
        assert!(snap.metric("missing", NO_TAGS).is_none());
        assert!(snap.rate("http_reqs", NO_TAGS).is_none());
        assert_eq!(snap.counter("http_reqs", NO_TAGS), Some(8));
    }

    #[test]
    fn duration_percentiles_are_reported_in_millis() {
        let registry = Registry::new();
        let id = registry
            .register("d", MetricKind::Duration)
            .unwrap_or_else(|e| panic!("{e}"));
        let Some(h) = registry.handle(id, registry.resolve_tags(NO_TAGS)) else {
            panic!("missing handle");
        };
        for ms in 1..=100 {
            h.observe_millis(ms as f64);
        }

        let snap = registry.snapshot();
        let Some(d) = snap.duration("d", NO_TAGS) else {
            panic!("missing duration");
        };
        assert_eq!(d.count(), 100);
        let p95 = d.percentile_ms(95.0).unwrap_or_default();
        assert!((p95 - 95.0).abs() < 0.5, "p95 = {p95}");
        let p999 = d.percentile_ms(99.9).unwrap_or_default();
        assert!((p999 - 100.0).abs() < 0.5, "p99.9 = {p999}");
        let avg = d.mean_ms().unwrap_or_default();
        assert!((avg - 50.5).abs() < 0.5, "avg = {avg}");

        let summary = d.summary();
        assert_eq!(summary.count, 100);
        assert!(summary.min.is_some_and(|v| (v - 1.0).abs() < 0.01));
    }

    #[test]
    fn empty_duration_has_no_stats() {
        let d = DurationValue::empty();
        assert!(d.is_empty());
        assert_eq!(d.summary(), DurationSummary::default());
        assert!(d.percentile_ms(50.0).is_none());
    }
}
