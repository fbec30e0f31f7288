use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swarm_core::{
    HttpRequest, HttpResponse, IterationContext, MetricSample, Scenario, ScenarioError,
    WeightedScenario, metric_names,
};
use tracing::debug;

use crate::template::{RenderScope, Template};

#[derive(Debug, Clone)]
pub(crate) struct Flow {
    pub name: String,
    pub weight: f64,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub(crate) enum StepBody {
    Empty,
    Form(Vec<(String, Template)>),
    Raw(Template),
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub name: String,
    pub method: http::Method,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: StepBody,
    /// Check name and the status code it expects.
    pub checks: Vec<(String, u16)>,
    /// Variable name and the JSON key it is read from.
    pub extract: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// Settings shared by every flow of one run.
#[derive(Debug)]
pub(crate) struct FlowSettings {
    pub env: BTreeMap<String, String>,
    pub error_rate_metric: String,
}

/// Runs the steps of one flow in order.
#[derive(Debug)]
pub(crate) struct FlowScenario {
    flow: Flow,
    settings: Arc<FlowSettings>,
}

impl FlowScenario {
    pub(crate) fn new(flow: Flow, settings: Arc<FlowSettings>) -> Self {
        Self { flow, settings }
    }
}

/// Wraps the flows in a weighted selector; each iteration runs one flow
/// under `group = <flow name>`.
pub(crate) fn build(
    flows: Vec<Flow>,
    settings: FlowSettings,
) -> swarm_core::Result<WeightedScenario> {
    let settings = Arc::new(settings);
    let variants = flows
        .into_iter()
        .map(|flow| {
            let name = flow.name.clone();
            let weight = flow.weight;
            let scenario: Arc<dyn Scenario> = Arc::new(FlowScenario::new(flow, settings.clone()));
            (name, weight, scenario)
        })
        .collect();
    WeightedScenario::new(variants)
}

/// `${NAME}` references that neither an earlier step of the same flow
/// extracts nor `env` provides, as `(flow, step, variable)`.
pub(crate) fn unresolved_variables<'a>(
    flows: &'a [Flow],
    env: &BTreeMap<String, String>,
) -> Vec<(&'a str, &'a str, &'a str)> {
    let mut missing = Vec::new();
    for flow in flows {
        let mut extracted: Vec<&str> = Vec::new();
        for step in &flow.steps {
            let templates = std::iter::once(&step.url)
                .chain(step.headers.iter().map(|(_, t)| t))
                .chain(match &step.body {
                    StepBody::Empty => Vec::new(),
                    StepBody::Raw(t) => vec![t],
                    StepBody::Form(fields) => fields.iter().map(|(_, t)| t).collect(),
                });
            for var in templates.flat_map(|t| t.variables()) {
                if !extracted.contains(&var) && !env.contains_key(var) {
                    missing.push((flow.name.as_str(), step.name.as_str(), var));
                }
            }
            extracted.extend(step.extract.iter().map(|(v, _)| v.as_str()));
        }
    }
    missing
}

enum StepOutcome {
    Continue,
    /// An `extract` key was missing; the rest of the flow is skipped.
    Stop,
}

#[async_trait]
impl Scenario for FlowScenario {
    async fn run(&self, ctx: &mut IterationContext) -> Result<(), ScenarioError> {
        let traceparent = ctx.traceparent();
        let mut vars: HashMap<String, String> = HashMap::new();

        for step in &self.flow.steps {
            match self.run_step(ctx, step, &traceparent, &mut vars).await? {
                StepOutcome::Continue => {}
                StepOutcome::Stop => break,
            }
        }
        Ok(())
    }
}

impl FlowScenario {
    async fn run_step(
        &self,
        ctx: &mut IterationContext,
        step: &Step,
        traceparent: &str,
        vars: &mut HashMap<String, String>,
    ) -> Result<StepOutcome, ScenarioError> {
        let req = {
            let mut scope = RenderScope {
                vars: &*vars,
                env: &self.settings.env,
                traceparent,
                rng: ctx.rng(),
            };
            build_request(step, &mut scope)
                .map_err(|e| ScenarioError::Script(format!("step `{}`: {e:#}", step.name)))?
        };

        match ctx.http().request(req).await {
            Ok(resp) => {
                self.record_response(ctx, step, &resp);
                Ok(extract_vars(step, &resp, vars))
            }
            Err(err) => {
                debug!(step = %step.name, error = %err, "request failed");
                self.record_transport_error(ctx, step);
                Err(err.into())
            }
        }
    }

    fn record_response(&self, ctx: &mut IterationContext, step: &Step, resp: &HttpResponse) {
        let status = resp.status.to_string();
        let tags = vec![
            ("name".to_string(), step.name.clone()),
            ("status".to_string(), status),
        ];

        ctx.emit(MetricSample::Counter {
            name: metric_names::HTTP_REQS.to_string(),
            value: 1,
            tags: tags.clone(),
        });
        ctx.emit(MetricSample::Duration {
            name: metric_names::HTTP_REQ_DURATION.to_string(),
            ms: resp.elapsed.as_secs_f64() * 1000.0,
            tags: tags.clone(),
        });
        ctx.emit(MetricSample::Rate {
            name: metric_names::HTTP_REQ_FAILED.to_string(),
            passed: !(200..400).contains(&resp.status),
            tags,
        });
        ctx.emit(MetricSample::Rate {
            name: self.settings.error_rate_metric.clone(),
            passed: resp.is_server_error(),
            tags: vec![("name".to_string(), step.name.clone())],
        });

        for (check, expected) in &step.checks {
            ctx.check(check.clone(), resp.status == *expected);
        }
    }

    /// No response: every check of the step fails and both failure rates
    /// record a hit.
    fn record_transport_error(&self, ctx: &mut IterationContext, step: &Step) {
        let name_tag = vec![("name".to_string(), step.name.clone())];

        ctx.emit(MetricSample::Counter {
            name: metric_names::HTTP_REQS.to_string(),
            value: 1,
            tags: vec![
                ("name".to_string(), step.name.clone()),
                ("status".to_string(), "0".to_string()),
            ],
        });
        ctx.emit(MetricSample::Rate {
            name: metric_names::HTTP_REQ_FAILED.to_string(),
            passed: true,
            tags: name_tag.clone(),
        });
        ctx.emit(MetricSample::Rate {
            name: self.settings.error_rate_metric.clone(),
            passed: true,
            tags: name_tag,
        });

        for (check, _) in &step.checks {
            ctx.check(check.clone(), false);
        }
    }
}

fn build_request<R: rand::Rng>(
    step: &Step,
    scope: &mut RenderScope<'_, R>,
) -> anyhow::Result<HttpRequest> {
    let mut req = HttpRequest::new(step.method.clone(), step.url.render(scope)?);
    for (name, value) in &step.headers {
        req = req.with_header(name.clone(), value.render(scope)?);
    }
    match &step.body {
        StepBody::Empty => {}
        StepBody::Raw(body) => req = req.with_body(body.render(scope)?),
        StepBody::Form(fields) => {
            let rendered = fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.render(scope)?)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            req = req.with_form(rendered);
        }
    }
    if let Some(timeout) = step.timeout {
        req = req.with_timeout(timeout);
    }
    Ok(req)
}

/// Stores the step's `extract` values into `vars`. A missing key ends the
/// flow without failing the iteration.
fn extract_vars(
    step: &Step,
    resp: &HttpResponse,
    vars: &mut HashMap<String, String>,
) -> StepOutcome {
    if step.extract.is_empty() {
        return StepOutcome::Continue;
    }

    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&resp.body) else {
        debug!(step = %step.name, status = resp.status, "response body is not JSON; stopping flow");
        return StepOutcome::Stop;
    };

    for (var, key) in &step.extract {
        match lookup(&doc, key) {
            Some(value) => {
                vars.insert(var.clone(), value);
            }
            None => {
                debug!(step = %step.name, key = %key, "extract key missing; stopping flow");
                return StepOutcome::Stop;
            }
        }
    }
    StepOutcome::Continue
}

/// Resolves a dotted path (`data.token`) to a scalar rendered as text.
fn lookup(doc: &serde_json::Value, path: &str) -> Option<String> {
    let value = path
        .split('.')
        .try_fold(doc, |cur, segment| match cur {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        })?;

    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
