use std::collections::BTreeMap;

use crate::error::{Result, TunerError};
use crate::explore::constants::{NAMESPACE_ROOT, STORED_CHOICES_PREFIX};
use crate::explore::resolve_name;
use crate::models::{ChoiceAssignment, ChoiceDescriptor, JsonMap, Reaction, Solution};

/// Replays previously found solutions before free exploration starts.
///
/// Iteration `m` of the window replays the `m`-th point across all solutions
/// (solution by solution). In reference mode only iteration 0 is replayed,
/// from the first solution's reference choices.
#[derive(Debug, Clone, Default)]
pub struct SolutionReplayer {
    solutions: Vec<Solution>,
    reference: bool,
}

impl SolutionReplayer {
    pub fn new(solutions: Vec<Solution>, reference: bool) -> Self {
        Self {
            solutions,
            reference,
        }
    }

    /// Number of leading iterations driven by replay.
    pub fn window(&self) -> usize {
        match (self.solutions.is_empty(), self.reference) {
            (true, _) => 0,
            (false, true) => 1,
            (false, false) => self.solutions.len(),
        }
    }

    pub fn is_active(&self, iteration: usize) -> bool {
        iteration < self.window()
    }

    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }

    pub fn into_solutions(self) -> Vec<Solution> {
        self.solutions
    }

    /// `(solution, point)` replayed at `iteration`, if any.
    fn locate(&self, iteration: usize) -> Option<(usize, usize)> {
        self.solutions
            .iter()
            .enumerate()
            .flat_map(|(s, sol)| (0..sol.points.len()).map(move |p| (s, p)))
            .nth(iteration)
    }

    /// Assignment to replay at `iteration`, or `None` outside the window.
    pub fn assignment(
        &self,
        iteration: usize,
        catalog: &BTreeMap<String, ChoiceDescriptor>,
    ) -> Result<Option<ChoiceAssignment>> {
        if !self.is_active(iteration) {
            return Ok(None);
        }

        if self.reference {
            let solution = &self.solutions[0];
            return translate(&solution.ref_choices, &solution.ref_choices_order, catalog).map(Some);
        }

        match self.locate(iteration) {
            Some((s, p)) => {
                let point = &self.solutions[s].points[p];
                translate(&point.pruned_choices, &point.pruned_choices_order, catalog).map(Some)
            }
            None => Ok(Some(ChoiceAssignment::new())),
        }
    }

    /// Store how the target reacted to the configuration replayed at
    /// `iteration` on the matching solution point. In reference mode that is
    /// the first point. Returns `false` when there was no point to attach it to.
    pub fn record_reaction(&mut self, iteration: usize, reaction: Reaction) -> bool {
        if !self.is_active(iteration) {
            return false;
        }

        match self.locate(iteration) {
            Some((s, p)) => {
                self.solutions[s].points[p].reaction = Some(reaction);
                true
            }
            None => false,
        }
    }
}

/// Map a stored choice name into the live namespace.
///
/// `##choices#X` becomes `##X`, then resolves to whichever of `##X` or `X`
/// the catalog knows.
pub fn translate_key(key: &str, catalog: &BTreeMap<String, ChoiceDescriptor>) -> String {
    let Some(rest) = key.strip_prefix(STORED_CHOICES_PREFIX) else {
        return key.to_string();
    };

    resolve_name(&format!("{}{}", NAMESPACE_ROOT, rest), catalog)
}

fn translate(
    choices: &JsonMap,
    order: &[String],
    catalog: &BTreeMap<String, ChoiceDescriptor>,
) -> Result<ChoiceAssignment> {
    let mut assignment = ChoiceAssignment::new();

    for key in order {
        let value = choices.get(key).ok_or_else(|| {
            TunerError::contract(format!("stored solution has no value for choice '{}'", key))
        })?;
        assignment.set(translate_key(key, catalog), value.clone());
    }
    for (key, value) in choices {
        if !order.contains(key) {
            assignment.set(translate_key(key, catalog), value.clone());
        }
    }

    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SolutionPoint;
    use serde_json::json;

    fn catalog() -> BTreeMap<String, ChoiceDescriptor> {
        let mut c = BTreeMap::new();
        c.insert("##flags#O".to_string(), ChoiceDescriptor::default());
        c.insert("unroll".to_string(), ChoiceDescriptor::default());
        c
    }

    fn point(level: &str) -> SolutionPoint {
        SolutionPoint {
            pruned_choices: [("##choices#flags#O".to_string(), json!(level))]
                .into_iter()
                .collect(),
            pruned_choices_order: vec!["##choices#flags#O".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_translate_key() {
        let c = catalog();
        assert_eq!(translate_key("##choices#flags#O", &c), "##flags#O");
        assert_eq!(translate_key("##choices#unroll", &c), "unroll");
        assert_eq!(translate_key("##choices#other", &c), "##other");
        assert_eq!(translate_key("plain", &c), "plain");
    }

    #[test]
    fn test_window_walks_points_in_order() {
        let solutions = vec![
            Solution {
                points: vec![point("-O1"), point("-O2")],
                ..Default::default()
            },
            Solution {
                points: vec![point("-O3")],
                ..Default::default()
            },
        ];
        let replayer = SolutionReplayer::new(solutions, false);
        let c = catalog();

        assert_eq!(replayer.window(), 2);
        let first = replayer.assignment(0, &c).unwrap().unwrap();
        let second = replayer.assignment(1, &c).unwrap().unwrap();
        assert_eq!(first.get("##flags#O"), Some(&json!("-O1")));
        assert_eq!(second.get("##flags#O"), Some(&json!("-O2")));
        assert!(replayer.assignment(2, &c).unwrap().is_none());
    }

    #[test]
    fn test_fewer_points_than_solutions() {
        let solutions = vec![Solution::default(), Solution::default()];
        let mut replayer = SolutionReplayer::new(solutions, false);

        let a = replayer.assignment(1, &catalog()).unwrap().unwrap();
        assert!(a.is_empty());
        assert!(!replayer.record_reaction(1, Reaction::default()));
    }

    #[test]
    fn test_reaction_written_back() {
        let solutions = vec![Solution {
            points: vec![point("-O1")],
            ..Default::default()
        }];
        let mut replayer = SolutionReplayer::new(solutions, false);
        let reaction = Reaction {
            fail: true,
            fail_reason: "crash".into(),
            ..Default::default()
        };

        assert!(replayer.record_reaction(0, reaction.clone()));
        assert_eq!(replayer.solutions()[0].points[0].reaction, Some(reaction));
    }

    #[test]
    fn test_reference_mode() {
        let solutions = vec![
            Solution {
                ref_choices: [("##choices#unroll".to_string(), json!(4))].into_iter().collect(),
                ref_choices_order: vec!["##choices#unroll".into()],
                ..Default::default()
            },
            Solution::default(),
        ];
        let mut replayer = SolutionReplayer::new(solutions.clone(), true);

        assert_eq!(replayer.window(), 1);
        let a = replayer.assignment(0, &catalog()).unwrap().unwrap();
        assert_eq!(a.get("unroll"), Some(&json!(4)));

        // No point to attach the reaction to.
        assert!(!replayer.record_reaction(0, Reaction::default()));

        let mut with_point = solutions;
        with_point[0].points.push(point("-O1"));
        let mut replayer = SolutionReplayer::new(with_point, true);
        assert!(replayer.record_reaction(0, Reaction::default()));
        assert!(replayer.solutions()[0].points[0].reaction.is_some());
    }

    #[test]
    fn test_missing_value_is_contract_error() {
        let mut broken = point("-O1");
        broken.pruned_choices.clear();
        let replayer = SolutionReplayer::new(
            vec![Solution {
                points: vec![broken],
                ..Default::default()
            }],
            false,
        );
        assert!(replayer.assignment(0, &catalog()).unwrap_err().is_contract());
    }
}
