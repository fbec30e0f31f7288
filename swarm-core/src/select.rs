use std::sync::Arc;

use async_trait::async_trait;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::error::{Error, Result};
use crate::scenario::{IterationContext, Scenario, ScenarioError};

struct Variant {
    name: String,
    scenario: Arc<dyn Scenario>,
}

/// Picks one variant per iteration from a discrete weighted distribution and
/// runs it under `group = <variant name>`.
pub struct WeightedScenario {
    variants: Vec<Variant>,
    weights: Vec<f64>,
    index: WeightedIndex<f64>,
}

impl std::fmt::Debug for WeightedScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedScenario")
            .field("variants", &self.names().collect::<Vec<_>>())
            .field("weights", &self.weights)
            .finish()
    }
}

impl WeightedScenario {
    pub fn new(variants: Vec<(String, f64, Arc<dyn Scenario>)>) -> Result<Self> {
        if variants.is_empty() {
            return Err(Error::EmptyScenarioSet);
        }

        let weights: Vec<f64> = variants.iter().map(|(_, w, _)| *w).collect();
        let index =
            WeightedIndex::new(weights.iter().copied()).map_err(|e| Error::InvalidWeights(e.to_string()))?;

        Ok(Self {
            variants: variants
                .into_iter()
                .map(|(name, _, scenario)| Variant { name, scenario })
                .collect(),
            weights,
            index,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.variants.iter().map(|v| v.name.as_str())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn pick<R: rand::Rng>(&self, rng: &mut R) -> &str {
        &self.variants[self.index.sample(rng)].name
    }
}

#[async_trait]
impl Scenario for WeightedScenario {
    async fn run(&self, ctx: &mut IterationContext) -> std::result::Result<(), ScenarioError> {
        let variant = &self.variants[self.index.sample(ctx.rng())];
        let previous = ctx.set_group(Some(variant.name.clone()));
        let result = variant.scenario.run(ctx).await;
        ctx.set_group(previous);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use swarm_http::HttpClient;

    struct Mark(&'static str);

    #[async_trait]
    impl Scenario for Mark {
        async fn run(&self, ctx: &mut IterationContext) -> std::result::Result<(), ScenarioError> {
            ctx.add_counter(self.0, 1);
            Ok(())
        }
    }

    fn variants(weights: &[f64]) -> Vec<(String, f64, Arc<dyn Scenario>)> {
        const NAMES: [&str; 3] = ["a", "b", "c"];
        weights
            .iter()
            .zip(NAMES)
            .map(|(w, n)| (n.to_string(), *w, Arc::new(Mark(n)) as Arc<dyn Scenario>))
            .collect()
    }

    #[test]
    fn rejects_empty_and_zero_weights() {
        assert!(matches!(
            WeightedScenario::new(Vec::new()),
            Err(Error::EmptyScenarioSet)
        ));
        assert!(matches!(
            WeightedScenario::new(variants(&[0.0, 0.0])),
            Err(Error::InvalidWeights(_))
        ));
        assert!(matches!(
            WeightedScenario::new(variants(&[1.0, -1.0])),
            Err(Error::InvalidWeights(_))
        ));
    }

    #[test]
    fn picks_follow_weights() {
        let selector =
            WeightedScenario::new(variants(&[0.33, 0.66, 0.01])).unwrap_or_else(|e| panic!("{e}"));
        let mut rng = StdRng::seed_from_u64(11);

        let mut counts = [0u32; 3];
        for _ in 0..10_000 {
            match selector.pick(&mut rng) {
                "a" => counts[0] += 1,
                "b" => counts[1] += 1,
                _ => counts[2] += 1,
            }
        }
        assert!((2_900..3_700).contains(&counts[0]), "{counts:?}");
        assert!((6_200..7_000).contains(&counts[1]), "{counts:?}");
        assert!(counts[2] < 300, "{counts:?}");
    }

    #[test]
    fn zero_weight_variant_is_never_picked() {
        let selector = WeightedScenario::new(variants(&[1.0, 0.0])).unwrap_or_else(|e| panic!("{e}"));
        let mut rng = StdRng::seed_from_u64(5);
        assert!((0..1000).all(|_| selector.pick(&mut rng) == "a"));
    }

    #[tokio::test]
    async fn runs_variant_under_its_group() {
        let selector = WeightedScenario::new(variants(&[1.0])).unwrap_or_else(|e| panic!("{e}"));
        let mut ctx = IterationContext::new(
            1,
            0,
            StdRng::seed_from_u64(1),
            Arc::new(HttpClient::default()),
        );

        selector
            .run(&mut ctx)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(ctx.group().is_none());

        let (_, _, samples) = ctx.into_parts();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].tags(), &vec![("group".to_string(), "a".to_string())]);
    }
}
