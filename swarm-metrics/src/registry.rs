use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::key::{Symbol, SymbolTable};
use crate::metrics::{MetricHandle, MetricKind, Series};
use crate::snapshot::{AggregatedMetric, DurationValue, MetricsSnapshot, RateValue, SeriesSnapshot};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug, Clone, Copy)]
struct MetricDef {
    name: Symbol,
    kind: MetricKind,
}

/// Thread-safe metric store. Metrics are identified by name; each metric owns
/// one series per distinct tag set.
#[derive(Debug, Default)]
pub struct Registry {
    symbols: SymbolTable,
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<Symbol, MetricId>,
    series: DashMap<MetricId, DashMap<TagSet, Arc<Series>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with `kind`, or returns the existing id when it is
    /// already registered with the same kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_sym = self.symbols.intern(name);
        if let Some(id) = self.by_name.get(&name_sym).map(|e| *e.value()) {
            return self.check_kind(id, name, kind);
        }

        let mut defs = self.defs.write();
        if let Some(id) = self.by_name.get(&name_sym).map(|e| *e.value()) {
            drop(defs);
            return self.check_kind(id, name, kind);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_sym,
            kind,
        });
        self.series.insert(id, DashMap::new());
        self.by_name.insert(name_sym, id);
        Ok(id)
    }

    fn check_kind(&self, id: MetricId, name: &str, requested: MetricKind) -> Result<MetricId> {
        let registered = self.kind(id).unwrap_or(requested);
        if registered == requested {
            Ok(id)
        } else {
            Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                requested,
            })
        }
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let sym = self.symbols.get(name)?;
        let id = *self.by_name.get(&sym)?.value();
        Some((id, self.kind(id)?))
    }

    pub fn kind(&self, id: MetricId) -> Option<MetricKind> {
        self.defs.read().get(id.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_tags<K, V>(&self, tags: &[(K, V)]) -> TagSet
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        TagSet::from_pairs(tags.iter().map(|(k, v)| {
            (
                self.symbols.intern(k.as_ref()),
                self.symbols.intern(v.as_ref()),
            )
        }))
    }

    /// Returns the write handle for `(metric, tags)`, creating the series on
    /// first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.kind(metric)?;
        Some(self.series_handle(metric, kind, tags))
    }

    /// Registers `name` if needed and returns the handle for one of its series.
    pub fn register_series(
        &self,
        name: &str,
        kind: MetricKind,
        tags: TagSet,
    ) -> Result<MetricHandle> {
        let id = self.register(name, kind)?;
        Ok(self.series_handle(id, kind, tags))
    }

    fn series_handle(&self, metric: MetricId, kind: MetricKind, tags: TagSet) -> MetricHandle {
        if let Some(series_map) = self.series.get(&metric)
            && let Some(series) = series_map.get(&tags)
        {
            return MetricHandle::new(series.value().clone());
        }

        let series_map = self.series.entry(metric).or_default();
        let series = series_map
            .entry(tags)
            .or_insert_with(|| Arc::new(Series::new(kind)))
            .value()
            .clone();
        MetricHandle::new(series)
    }

    /// Sum of every series of a counter metric.
    pub fn counter_total(&self, metric: MetricId) -> u64 {
        self.fold_series(metric, 0u64, |acc, series| match series {
            Series::Counter(c) => acc.saturating_add(c.load(Ordering::Relaxed)),
            _ => acc,
        })
    }

    /// `(hits, total)` across every series of a rate metric.
    pub fn rate_totals(&self, metric: MetricId) -> (u64, u64) {
        self.fold_series(metric, (0u64, 0u64), |(hits, total), series| match series {
            Series::Rate(r) => (
                hits + r.hits.load(Ordering::Relaxed),
                total + r.total.load(Ordering::Relaxed),
            ),
            _ => (hits, total),
        })
    }

    fn fold_series<T>(&self, metric: MetricId, init: T, f: impl Fn(T, &Series) -> T) -> T {
        let Some(series_map) = self.series.get(&metric) else {
            return init;
        };
        series_map
            .iter()
            .fold(init, |acc, entry| f(acc, entry.value().as_ref()))
    }

    /// Copies every series into an immutable snapshot. Each series is read
    /// consistently; series are not read atomically with respect to each other.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let defs: Vec<MetricDef> = self.defs.read().clone();
        let mut out = Vec::new();

        for (idx, def) in defs.iter().enumerate() {
            let Some(series_map) = self.series.get(&MetricId(idx as u32)) else {
                continue;
            };
            let name = self.symbols.name_or_empty(def.name);

            for entry in series_map.iter() {
                let tags = entry
                    .key()
                    .iter()
                    .map(|(k, v)| (self.symbols.name_or_empty(k), self.symbols.name_or_empty(v)))
                    .collect();

                let value = match entry.value().as_ref() {
                    Series::Counter(c) => AggregatedMetric::Counter(c.load(Ordering::Relaxed)),
                    Series::Gauge(g) => AggregatedMetric::Gauge(g.load(Ordering::Relaxed)),
                    Series::Rate(r) => AggregatedMetric::Rate(RateValue {
                        hits: r.hits.load(Ordering::Relaxed),
                        total: r.total.load(Ordering::Relaxed),
                    }),
                    Series::Duration(h) => AggregatedMetric::Duration(DurationValue::new(h.lock().clone())),
                };

                out.push(SeriesSnapshot {
                    name: name.clone(),
                    kind: def.kind,
                    tags,
                    value,
                });
            }
        }

        MetricsSnapshot::from_series(out)
    }
}
