use swarm_metrics::{AggregatedMetric, MetricsSnapshot};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    fn apply(self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Lte => observed <= expected,
            Self::Gt => observed > expected,
            Self::Gte => observed >= expected,
            Self::Eq => observed == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`, fractional allowed.
    P(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
    /// Expression as written.
    pub source: String,
}

/// Expressions attached to one metric selector such as `http_req_duration`
/// or `checks{check:login_200}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub key: String,
    pub metric: String,
    pub tags: Vec<(String, String)>,
    pub expressions: Vec<ThresholdExpr>,
}

impl ThresholdSet {
    pub fn parse<S: AsRef<str>>(key: &str, expressions: &[S]) -> Result<Self> {
        let (metric, tags) = parse_metric_key(key)?;
        let expressions = expressions
            .iter()
            .map(|raw| {
                parse_threshold_expr(raw.as_ref()).map_err(|error| Error::InvalidThreshold {
                    metric: key.to_string(),
                    error,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key: key.to_string(),
            metric,
            tags,
            expressions,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThresholdReport {
    pub outcomes: Vec<ThresholdOutcome>,
}

impl ThresholdReport {
    /// True when every expression passed (vacuously true when there are none).
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Splits `name{k:v,k2:v2}` into the metric name and its tag filter.
pub fn parse_metric_key(key: &str) -> Result<(String, Vec<(String, String)>)> {
    let invalid = || Error::InvalidMetricKey(key.to_string());
    let key_trimmed = key.trim();

    let Some((name, rest)) = key_trimmed.split_once('{') else {
        if key_trimmed.is_empty() || key_trimmed.contains('}') {
            return Err(invalid());
        }
        return Ok((key_trimmed.to_string(), Vec::new()));
    };

    let name = name.trim();
    let body = rest.strip_suffix('}').ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }

    let mut tags = Vec::new();
    for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once(':').ok_or_else(invalid)?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(invalid());
        }
        tags.push((k.to_string(), v.to_string()));
    }

    Ok((name.to_string(), tags))
}

fn parse_agg(left: &str) -> std::result::Result<ThresholdAgg, String> {
    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile {inner} out of range (0, 100]"));
            }
            ThresholdAgg::P(p)
        }
    };
    Ok(agg)
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let op_pos = s
        .find(['<', '>', '='])
        .ok_or_else(|| format!("missing operator in `{raw}`"))?;
    let (op, op_len) = match &s[op_pos..] {
        r if r.starts_with("<=") => (ThresholdOp::Lte, 2),
        r if r.starts_with(">=") => (ThresholdOp::Gte, 2),
        r if r.starts_with("==") => (ThresholdOp::Eq, 2),
        r if r.starts_with('<') => (ThresholdOp::Lt, 1),
        r if r.starts_with('>') => (ThresholdOp::Gt, 1),
        _ => return Err(format!("invalid operator in `{raw}`")),
    };

    let (left, right) = (&s[..op_pos], &s[op_pos + op_len..]);
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold `{raw}`"));
    }

    let agg = parse_agg(left)?;
    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value `{right}`"));
    }

    Ok(ThresholdExpr {
        agg,
        op,
        value,
        source: raw.trim().to_string(),
    })
}

/// Evaluates every expression against `snapshot`. Pure: the same snapshot
/// always yields the same report.
pub fn evaluate_thresholds(sets: &[ThresholdSet], snapshot: &MetricsSnapshot) -> ThresholdReport {
    let mut outcomes = Vec::new();

    for set in sets {
        let metric = snapshot.metric(&set.metric, &set.tags);
        for expr in &set.expressions {
            let observed = metric
                .as_ref()
                .and_then(|m| observed_value(m, expr.agg, snapshot));
            outcomes.push(ThresholdOutcome {
                metric: set.key.clone(),
                expression: expr.source.clone(),
                observed,
                passed: observed.is_some_and(|v| expr.op.apply(v, expr.value)),
            });
        }
    }

    ThresholdReport { outcomes }
}

fn observed_value(metric: &AggregatedMetric, agg: ThresholdAgg, snapshot: &MetricsSnapshot) -> Option<f64> {
    match (metric, agg) {
        (AggregatedMetric::Counter(v), ThresholdAgg::Count) => Some(*v as f64),
        (AggregatedMetric::Counter(v), ThresholdAgg::Rate) => {
            let secs = snapshot.elapsed()?.as_secs_f64();
            (secs > 0.0).then(|| *v as f64 / secs)
        }
        (AggregatedMetric::Gauge(v), ThresholdAgg::Value) => Some(*v as f64),
        (AggregatedMetric::Rate(r), ThresholdAgg::Rate) => r.rate(),
        (AggregatedMetric::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),
        (AggregatedMetric::Duration(d), agg) => match agg {
            ThresholdAgg::Count => Some(d.count() as f64),
            ThresholdAgg::Avg => d.mean_ms(),
            ThresholdAgg::Min => d.min_ms(),
            ThresholdAgg::Max => d.max_ms(),
            ThresholdAgg::Med => d.percentile_ms(50.0),
            ThresholdAgg::P(p) => d.percentile_ms(p),
            ThresholdAgg::Rate | ThresholdAgg::Value => None,
        },
        _ => None,
    }
}
