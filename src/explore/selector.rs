use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TunerError};
use crate::explore::random::RandomSource;
use crate::interface::prompts::closest_match;
use crate::models::{
    ChoiceAssignment, ChoiceDescriptor, DimensionSelectionPolicy, ExpandedChoiceOrder, JsonMap,
    PipelineDescription,
};

/// How the next choice assignment is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExploreStrategy {
    #[default]
    Random,
    ParallelRandom,
    Loop,
    ParallelLoop,
    /// Delegates to an injected [`ExplorationPlugin`].
    #[serde(
        alias = "machine-learning-based",
        alias = "model-based",
        alias = "adaptive",
        alias = "plugin-based"
    )]
    Customized,
}

impl ExploreStrategy {
    pub const NAMES: [&'static str; 9] = [
        "random",
        "parallel-random",
        "loop",
        "parallel-loop",
        "customized",
        "machine-learning-based",
        "model-based",
        "adaptive",
        "plugin-based",
    ];

    pub fn is_parallel(self) -> bool {
        matches!(self, ExploreStrategy::ParallelRandom | ExploreStrategy::ParallelLoop)
    }

    pub fn is_loop(self) -> bool {
        matches!(self, ExploreStrategy::Loop | ExploreStrategy::ParallelLoop)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExploreStrategy::Random => "random",
            ExploreStrategy::ParallelRandom => "parallel-random",
            ExploreStrategy::Loop => "loop",
            ExploreStrategy::ParallelLoop => "parallel-loop",
            ExploreStrategy::Customized => "customized",
        }
    }
}

impl fmt::Display for ExploreStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExploreStrategy {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(ExploreStrategy::Random),
            "parallel-random" => Ok(ExploreStrategy::ParallelRandom),
            "loop" => Ok(ExploreStrategy::Loop),
            "parallel-loop" => Ok(ExploreStrategy::ParallelLoop),
            "customized" | "machine-learning-based" | "model-based" | "adaptive"
            | "plugin-based" => Ok(ExploreStrategy::Customized),
            other => {
                let hint = closest_match(other, Self::NAMES.iter().copied())
                    .map(|m| format!(" (did you mean '{}'?)", m))
                    .unwrap_or_default();
                Err(TunerError::contract(format!(
                    "unknown exploration strategy '{}'{}",
                    other, hint
                )))
            }
        }
    }
}

/// Range over the flattened combination index used by loop exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBounds {
    pub start: u64,
    pub stop: Option<u64>,
    pub step: u64,
}

impl Default for LoopBounds {
    fn default() -> Self {
        Self {
            start: 0,
            stop: None,
            step: 1,
        }
    }
}

/// What a customized strategy sees when asked for the next assignment.
pub struct ExplorationContext<'a> {
    pub expanded: &'a ExpandedChoiceOrder,
    pub catalog: &'a BTreeMap<String, ChoiceDescriptor>,
    pub pipeline: &'a PipelineDescription,
    pub state: &'a JsonMap,
    pub history: &'a [ChoiceAssignment],
    pub iteration: usize,
}

/// Pluggable exploration (model-based, adaptive, ...). `None` means exhausted.
pub trait ExplorationPlugin: Send {
    fn next(&mut self, context: &ExplorationContext<'_>) -> Option<ChoiceAssignment>;
}

/// Result of one selection step.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub assignment: ChoiceAssignment,
    pub exhausted: bool,
}

impl Selection {
    fn next(assignment: ChoiceAssignment) -> Self {
        Self {
            assignment,
            exhausted: false,
        }
    }

    fn exhausted() -> Self {
        Self {
            assignment: ChoiceAssignment::new(),
            exhausted: true,
        }
    }
}

/// A dimension with a non-empty value domain.
#[derive(Debug, Clone)]
struct Dimension {
    name: String,
    group: usize,
    values: Vec<Value>,
}

/// Produces one choice assignment per iteration.
pub struct ChoiceSelector {
    strategy: ExploreStrategy,
    expanded: ExpandedChoiceOrder,
    catalog: BTreeMap<String, ChoiceDescriptor>,
    dimensions: Vec<Dimension>,
    policies: Vec<DimensionSelectionPolicy>,
    bounds: LoopBounds,
    combinations: u64,
    cursor: u64,
    defaults_drawn: bool,
    plugin: Option<Box<dyn ExplorationPlugin>>,
    history: Vec<ChoiceAssignment>,
}

impl ChoiceSelector {
    pub fn new(
        expanded: &ExpandedChoiceOrder,
        policies: &[DimensionSelectionPolicy],
        catalog: &BTreeMap<String, ChoiceDescriptor>,
        strategy: ExploreStrategy,
        bounds: LoopBounds,
    ) -> Result<Self> {
        if bounds.step == 0 {
            return Err(TunerError::contract("loop step must be at least 1"));
        }

        let mut dimensions = Vec::new();
        for (group, names) in expanded.iter().enumerate() {
            for name in names {
                let desc = catalog.get(name).ok_or_else(|| {
                    TunerError::contract(format!("choice dimension '{}' is not described", name))
                })?;
                let values = desc.domain();
                if !values.is_empty() {
                    dimensions.push(Dimension {
                        name: name.clone(),
                        group,
                        values,
                    });
                }
            }
        }

        // An empty product still holds one point: the pipeline defaults.
        let combinations = dimensions
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.values.len() as u64))
            .ok_or_else(|| TunerError::contract("choice space is too large to enumerate"))?;

        Ok(Self {
            strategy,
            expanded: expanded.clone(),
            catalog: catalog.clone(),
            dimensions,
            policies: policies.to_vec(),
            bounds,
            combinations,
            cursor: 0,
            defaults_drawn: false,
            plugin: None,
            history: Vec::new(),
        })
    }

    pub fn with_plugin(mut self, plugin: Box<dyn ExplorationPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn strategy(&self) -> ExploreStrategy {
        self.strategy
    }

    pub fn has_plugin(&self) -> bool {
        self.plugin.is_some()
    }

    /// Size of the Cartesian product of all non-empty dimensions.
    pub fn combinations(&self) -> u64 {
        self.combinations
    }

    pub fn history(&self) -> &[ChoiceAssignment] {
        &self.history
    }

    /// Next assignment under the configured strategy.
    pub fn select(
        &mut self,
        rng: &mut RandomSource,
        pipeline: &PipelineDescription,
        state: &JsonMap,
        iteration: usize,
    ) -> Result<Selection> {
        let selection = match self.strategy {
            ExploreStrategy::Random | ExploreStrategy::ParallelRandom => {
                if self.dimensions.is_empty() {
                    if self.defaults_drawn {
                        Selection::exhausted()
                    } else {
                        self.defaults_drawn = true;
                        Selection::next(ChoiceAssignment::new())
                    }
                } else {
                    Selection::next(self.random_assignment(rng))
                }
            }
            ExploreStrategy::Loop | ExploreStrategy::ParallelLoop => match self.next_in_loop() {
                Some(a) => Selection::next(a),
                None => Selection::exhausted(),
            },
            ExploreStrategy::Customized => {
                let mut plugin = self.plugin.take().ok_or_else(|| {
                    TunerError::contract("customized exploration requires a plugin")
                })?;
                let context = ExplorationContext {
                    expanded: &self.expanded,
                    catalog: &self.catalog,
                    pipeline,
                    state,
                    history: &self.history,
                    iteration,
                };
                let next = plugin.next(&context);
                self.plugin = Some(plugin);
                match next {
                    Some(a) => Selection::next(a),
                    None => Selection::exhausted(),
                }
            }
        };

        if !selection.exhausted {
            self.history.push(selection.assignment.clone());
        }
        Ok(selection)
    }

    /// Independent uniform draw for every dimension.
    pub fn random_assignment(&self, rng: &mut RandomSource) -> ChoiceAssignment {
        let mut assignment = ChoiceAssignment::new();
        for dim in &self.dimensions {
            let omit = self
                .policies
                .get(dim.group)
                .map(|p| p.omit_probability)
                .unwrap_or(0.0);
            if rng.chance(omit) {
                continue;
            }
            if let Some(i) = rng.index(dim.values.len()) {
                assignment.set(dim.name.clone(), dim.values[i].clone());
            }
        }
        assignment
    }

    /// Decode a flattened combination index (first dimension slowest).
    pub fn loop_assignment(&self, index: u64) -> Option<ChoiceAssignment> {
        if index >= self.combinations {
            return None;
        }

        let mut digits = vec![0usize; self.dimensions.len()];
        let mut rest = index;
        for (i, dim) in self.dimensions.iter().enumerate().rev() {
            let radix = dim.values.len() as u64;
            digits[i] = (rest % radix) as usize;
            rest /= radix;
        }

        Some(
            self.dimensions
                .iter()
                .zip(digits)
                .map(|(dim, d)| (dim.name.clone(), dim.values[d].clone()))
                .collect(),
        )
    }

    fn next_in_loop(&mut self) -> Option<ChoiceAssignment> {
        let end = self
            .bounds
            .stop
            .map_or(self.combinations, |s| s.min(self.combinations));
        let index = self
            .bounds
            .start
            .checked_add(self.cursor.checked_mul(self.bounds.step)?)?;
        if index >= end {
            return None;
        }
        self.cursor += 1;
        self.loop_assignment(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn catalog() -> BTreeMap<String, ChoiceDescriptor> {
        let mut c = BTreeMap::new();
        c.insert("a".to_string(), ChoiceDescriptor::flag());
        c.insert("b".to_string(), ChoiceDescriptor::integer_range(1, 3, 1));
        c.insert("empty".to_string(), ChoiceDescriptor::default());
        c
    }

    fn selector(strategy: ExploreStrategy, bounds: LoopBounds) -> ChoiceSelector {
        let expanded = vec![vec!["a".to_string()], vec!["b".to_string(), "empty".to_string()]];
        ChoiceSelector::new(&expanded, &[], &catalog(), strategy, bounds).unwrap()
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("loop".parse::<ExploreStrategy>().unwrap(), ExploreStrategy::Loop);
        assert_eq!(
            "model-based".parse::<ExploreStrategy>().unwrap(),
            ExploreStrategy::Customized
        );
        let err = "paralel-loop".parse::<ExploreStrategy>().unwrap_err();
        assert!(err.to_string().contains("parallel-loop"));
    }

    #[test]
    fn test_loop_enumerates_product_once() {
        let mut sel = selector(ExploreStrategy::Loop, LoopBounds::default());
        let mut rng = RandomSource::seeded(0);
        let pipeline = PipelineDescription::default();
        let state = JsonMap::new();

        assert_eq!(sel.combinations(), 6);
        let mut seen = HashSet::new();
        for i in 0..6 {
            let s = sel.select(&mut rng, &pipeline, &state, i).unwrap();
            assert!(!s.exhausted);
            assert!(seen.insert(s.assignment.describe()));
        }
        assert!(sel.select(&mut rng, &pipeline, &state, 6).unwrap().exhausted);
        assert_eq!(sel.history().len(), 6);
    }

    #[test]
    fn test_loop_order_is_lexicographic() {
        let sel = selector(ExploreStrategy::Loop, LoopBounds::default());
        let first = sel.loop_assignment(0).unwrap();
        let second = sel.loop_assignment(1).unwrap();
        let fourth = sel.loop_assignment(3).unwrap();
        assert_eq!(first.get("a"), Some(&json!(false)));
        assert_eq!(first.get("b"), Some(&json!(1)));
        assert_eq!(second.get("b"), Some(&json!(2)));
        assert_eq!(fourth.get("a"), Some(&json!(true)));
        assert_eq!(fourth.get("b"), Some(&json!(1)));
        assert!(first.get("empty").is_none());
    }

    #[test]
    fn test_loop_bounds() {
        let bounds = LoopBounds {
            start: 1,
            stop: Some(5),
            step: 2,
        };
        let mut sel = selector(ExploreStrategy::Loop, bounds);
        let mut rng = RandomSource::seeded(0);
        let pipeline = PipelineDescription::default();
        let state = JsonMap::new();

        let a = sel.select(&mut rng, &pipeline, &state, 0).unwrap();
        let b = sel.select(&mut rng, &pipeline, &state, 1).unwrap();
        let c = sel.select(&mut rng, &pipeline, &state, 2).unwrap();
        assert_eq!(a.assignment, sel.loop_assignment(1).unwrap());
        assert_eq!(b.assignment, sel.loop_assignment(3).unwrap());
        assert!(c.exhausted);
    }

    #[test]
    fn test_random_is_reproducible() {
        let sel = selector(ExploreStrategy::Random, LoopBounds::default());
        let mut r1 = RandomSource::seeded(11);
        let mut r2 = RandomSource::seeded(11);
        for _ in 0..10 {
            assert_eq!(sel.random_assignment(&mut r1), sel.random_assignment(&mut r2));
        }
    }

    #[test]
    fn test_random_with_omission() {
        let expanded = vec![vec!["a".to_string(), "b".to_string()]];
        let policies = vec![DimensionSelectionPolicy {
            omit_probability: 1.0,
            ..Default::default()
        }];
        let sel = ChoiceSelector::new(
            &expanded,
            &policies,
            &catalog(),
            ExploreStrategy::Random,
            LoopBounds::default(),
        )
        .unwrap();
        let mut rng = RandomSource::seeded(5);
        assert!(sel.random_assignment(&mut rng).is_empty());
    }

    #[test]
    fn test_empty_space_yields_defaults_once() {
        let expanded = vec![vec![]];
        let mut sel = ChoiceSelector::new(
            &expanded,
            &[],
            &catalog(),
            ExploreStrategy::Random,
            LoopBounds::default(),
        )
        .unwrap();
        let mut rng = RandomSource::seeded(5);
        let pipeline = PipelineDescription::default();
        let state = JsonMap::new();

        let first = sel.select(&mut rng, &pipeline, &state, 0).unwrap();
        assert!(!first.exhausted);
        assert!(first.assignment.is_empty());
        assert!(sel.select(&mut rng, &pipeline, &state, 1).unwrap().exhausted);
        assert_eq!(sel.combinations(), 1);
    }

    #[test]
    fn test_unknown_dimension_is_contract_error() {
        let expanded = vec![vec!["missing".to_string()]];
        let err = ChoiceSelector::new(
            &expanded,
            &[],
            &catalog(),
            ExploreStrategy::Loop,
            LoopBounds::default(),
        )
        .err()
        .unwrap();
        assert!(err.is_contract());
    }

    struct Countdown(usize);

    impl ExplorationPlugin for Countdown {
        fn next(&mut self, context: &ExplorationContext<'_>) -> Option<ChoiceAssignment> {
            if self.0 == 0 {
                return None;
            }
            self.0 -= 1;
            let mut a = ChoiceAssignment::new();
            a.set("b", json!(context.history.len() + 1));
            Some(a)
        }
    }

    #[test]
    fn test_customized_delegates_to_plugin() {
        let mut sel = selector(ExploreStrategy::Customized, LoopBounds::default())
            .with_plugin(Box::new(Countdown(2)));
        let mut rng = RandomSource::seeded(0);
        let pipeline = PipelineDescription::default();
        let state = JsonMap::new();

        let first = sel.select(&mut rng, &pipeline, &state, 0).unwrap();
        let second = sel.select(&mut rng, &pipeline, &state, 1).unwrap();
        let third = sel.select(&mut rng, &pipeline, &state, 2).unwrap();
        assert_eq!(first.assignment.get("b"), Some(&json!(1)));
        assert_eq!(second.assignment.get("b"), Some(&json!(2)));
        assert!(third.exhausted);
    }

    #[test]
    fn test_customized_without_plugin_fails() {
        let mut sel = selector(ExploreStrategy::Customized, LoopBounds::default());
        let mut rng = RandomSource::seeded(0);
        let err = sel
            .select(&mut rng, &PipelineDescription::default(), &JsonMap::new(), 0)
            .unwrap_err();
        assert!(err.is_contract());
    }
}
