//! `${...}` placeholders in scenario strings.
//!
//! Supported forms:
//! - `${NAME}`: a variable extracted earlier in the iteration, else an env var;
//! - `${randomInt(a,b)}`: uniform integer in `[a, b]`;
//! - `${randomString(n)}`: `n` alphanumeric characters;
//! - `${traceparent}`: the iteration's W3C trace context header value.

use std::collections::{BTreeMap, HashMap};

use anyhow::Context as _;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
    RandomInt(i64, i64),
    RandomString(usize),
    Traceparent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    raw: String,
    segments: Vec<Segment>,
}

/// Values a template may draw from while rendering one step.
pub(crate) struct RenderScope<'a, R: Rng> {
    pub vars: &'a HashMap<String, String>,
    pub env: &'a BTreeMap<String, String>,
    pub traceparent: &'a str,
    pub rng: &'a mut R,
}

impl Template {
    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .with_context(|| format!("unterminated placeholder in `{raw}`"))?;
            let expr = after[..end].trim();
            segments.push(
                parse_placeholder(expr)
                    .with_context(|| format!("invalid placeholder `${{{expr}}}` in `{raw}`"))?,
            );
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names referenced through `${NAME}`.
    pub(crate) fn variables(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub(crate) fn render<R: Rng>(&self, scope: &mut RenderScope<'_, R>) -> anyhow::Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(name) => {
                    let value = scope
                        .vars
                        .get(name)
                        .or_else(|| scope.env.get(name))
                        .with_context(|| format!("unresolved variable `${{{name}}}`"))?;
                    out.push_str(value);
                }
                Segment::RandomInt(min, max) => {
                    out.push_str(&swarm_core::random_int(&mut *scope.rng, *min, *max).to_string());
                }
                Segment::RandomString(len) => out.push_str(&swarm_core::random_string(
                    &mut *scope.rng,
                    *len,
                    swarm_core::ALPHANUMERIC,
                )),
                Segment::Traceparent => out.push_str(scope.traceparent),
            }
        }
        Ok(out)
    }
}

fn parse_placeholder(expr: &str) -> anyhow::Result<Segment> {
    if expr == "traceparent" {
        return Ok(Segment::Traceparent);
    }
    if let Some(args) = call_args(expr, "randomInt") {
        let (a, b) = args
            .split_once(',')
            .context("randomInt expects two arguments")?;
        let a: i64 = a.trim().parse().context("randomInt: invalid lower bound")?;
        let b: i64 = b.trim().parse().context("randomInt: invalid upper bound")?;
        return Ok(Segment::RandomInt(a, b));
    }
    if let Some(args) = call_args(expr, "randomString") {
        let len: usize = args.trim().parse().context("randomString: invalid length")?;
        return Ok(Segment::RandomString(len));
    }
    if is_identifier(expr) {
        return Ok(Segment::Var(expr.to_string()));
    }
    anyhow::bail!("expected a variable name, randomInt(a,b), randomString(n) or traceparent")
}

fn call_args<'a>(expr: &'a str, func: &str) -> Option<&'a str> {
    expr.strip_prefix(func)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
