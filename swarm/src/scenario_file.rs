use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use swarm_core::{RampProfile, RunConfig, Stage, ThresholdSet};

use crate::cli::ProfileOverrides;
use crate::http_scenario::{Flow, Step, StepBody};
use crate::template::Template;

pub(crate) const DEFAULT_ERROR_RATE_METRIC: &str = "server_error_rate";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioFile {
    /// Delay before the first stage starts.
    #[serde(default)]
    pub start_time: Option<YamlDuration>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,

    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,
    #[serde(default)]
    pub poll_interval: Option<YamlDuration>,
    #[serde(default)]
    pub think_time: Option<YamlDuration>,
    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Per-request timeout applied to steps without their own.
    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Fallback values for `${NAME}` placeholders; the process env and
    /// `--env` take precedence.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default)]
    pub error_rate_metric: Option<String>,

    pub flows: Vec<FlowYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct FlowYaml {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    pub steps: Vec<StepYaml>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StepYaml {
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// `application/x-www-form-urlencoded` body.
    #[serde(default)]
    pub form: Option<BTreeMap<String, String>>,

    /// Raw body.
    #[serde(default)]
    pub body: Option<String>,

    /// Check name -> expected status code.
    #[serde(default)]
    pub checks: BTreeMap<String, u16>,

    /// Variable name -> JSON key (dotted path) of the response body.
    #[serde(default)]
    pub extract: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|e| E::custom(format!("invalid duration {v}: {e}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let v = v.trim();
                if v == "0" {
                    return Ok(YamlDuration(Duration::ZERO));
                }
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// A scenario file resolved into a run configuration and the flows to run.
#[derive(Debug, Clone)]
pub(crate) struct LoadedScenario {
    pub config: RunConfig,
    pub flows: Vec<Flow>,
    pub request_timeout: Option<Duration>,
    pub error_rate_metric: String,
    pub env: BTreeMap<String, String>,
}

pub(crate) async fn load(
    path: &Path,
    overrides: &ProfileOverrides,
) -> anyhow::Result<LoadedScenario> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario file: {}", path.display()))?;

    let file: ScenarioFile = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;

    file.resolve(overrides)
        .with_context(|| format!("invalid scenario file: {}", path.display()))
}

impl ScenarioFile {
    /// Applies CLI overrides (which win over file values) and validates the
    /// result.
    pub(crate) fn resolve(self, overrides: &ProfileOverrides) -> anyhow::Result<LoadedScenario> {
        let ScenarioFile {
            start_time,
            start_vus,
            stages,
            max_duration,
            poll_interval,
            think_time,
            graceful_stop,
            timeout,
            seed,
            env,
            thresholds,
            error_rate_metric,
            flows,
        } = self;

        let stages = stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect();
        let mut ramp = RampProfile::new(start_vus, stages);
        if let Some(offset) = start_time {
            ramp = ramp.with_start_offset(offset.into_inner());
        }

        let mut config = RunConfig::new(ramp);
        config.thresholds = parse_thresholds(thresholds)?;
        if let Some(d) = overrides.poll_interval.or(poll_interval.map(YamlDuration::into_inner)) {
            config.poll_interval = d;
        }
        config.max_duration = overrides
            .max_duration
            .or(max_duration.map(YamlDuration::into_inner));
        config.think_time = think_time
            .map(YamlDuration::into_inner)
            .filter(|d| !d.is_zero());
        config.graceful_stop = graceful_stop.map(YamlDuration::into_inner);
        config.seed = overrides.seed.or(seed);
        config.validate()?;

        if flows.is_empty() {
            anyhow::bail!("at least one flow is required");
        }
        let flows = flows
            .into_iter()
            .map(resolve_flow)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let error_rate_metric = error_rate_metric
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_ERROR_RATE_METRIC.to_string());
        if error_rate_metric.is_empty() {
            anyhow::bail!("errorRateMetric must not be empty");
        }

        Ok(LoadedScenario {
            config,
            flows,
            request_timeout: timeout.map(YamlDuration::into_inner),
            error_rate_metric,
            env,
        })
    }
}

fn parse_thresholds(
    thresholds: BTreeMap<String, ThresholdExprYaml>,
) -> anyhow::Result<Vec<ThresholdSet>> {
    thresholds
        .into_iter()
        .map(|(key, exprs)| {
            let exprs = exprs.into_vec();
            ThresholdSet::parse(&key, &exprs).map_err(anyhow::Error::from)
        })
        .collect()
}

fn resolve_flow(flow: FlowYaml) -> anyhow::Result<Flow> {
    let FlowYaml {
        name,
        weight,
        steps,
    } = flow;

    if name.trim().is_empty() {
        anyhow::bail!("flow name must not be empty");
    }
    if !weight.is_finite() || weight < 0.0 {
        anyhow::bail!("flow `{name}`: weight must be a non-negative number (got {weight})");
    }
    if steps.is_empty() {
        anyhow::bail!("flow `{name}`: at least one step is required");
    }

    let steps = steps
        .into_iter()
        .map(|s| {
            let step_name = s.name.clone();
            resolve_step(s).with_context(|| format!("flow `{name}`, step `{step_name}`"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Flow {
        name,
        weight,
        steps,
    })
}

fn resolve_step(step: StepYaml) -> anyhow::Result<Step> {
    let StepYaml {
        name,
        method,
        url,
        headers,
        form,
        body,
        checks,
        extract,
        timeout,
    } = step;

    let method = http::Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method `{method}`"))?;

    let body = match (form, body) {
        (Some(_), Some(_)) => anyhow::bail!("`form` and `body` are mutually exclusive"),
        (Some(fields), None) => StepBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, Template::parse(&v)?)))
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        (None, Some(raw)) => StepBody::Raw(Template::parse(&raw)?),
        (None, None) => StepBody::Empty,
    };

    let headers = headers
        .into_iter()
        .map(|(k, v)| Ok((k, Template::parse(&v)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if extract.values().any(|key| key.trim().is_empty()) {
        anyhow::bail!("extract keys must not be empty");
    }

    Ok(Step {
        name,
        method,
        url: Template::parse(&url)?,
        headers,
        body,
        checks: checks.into_iter().collect(),
        extract: extract.into_iter().collect(),
        timeout: timeout.map(YamlDuration::into_inner),
    })
}
