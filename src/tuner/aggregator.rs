use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::explore::constants::STATISTICAL_REPETITIONS_KEY;
use crate::models::{
    ChoiceAssignment, EvaluationRequest, IterationRecord, JsonMap, PipelineDescription,
    PipelineState, RepetitionState, TrialResult,
};
use crate::tuner::adapters::PipelineModule;
use crate::tuner::config::FailurePolicy;

/// Everything one iteration's repetitions produced.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// Schema, retained characteristics and repetition outcome. Descriptive
    /// fields (tags, pipeline, ...) are left for the caller to fill in.
    pub record: IterationRecord,
    pub state: PipelineState,
    pub meta: JsonMap,
    /// Output of the last repetition attempted.
    pub last: TrialResult,
}

impl Aggregate {
    pub fn failed(&self) -> bool {
        self.record.failed()
    }
}

/// Runs the statistical repetitions of one choice assignment.
pub struct StatAggregator<'a> {
    module: &'a dyn PipelineModule,
    repetitions: usize,
    failures: FailurePolicy,
}

impl<'a> StatAggregator<'a> {
    pub fn new(module: &'a dyn PipelineModule, repetitions: usize, failures: FailurePolicy) -> Self {
        Self {
            module,
            repetitions,
            failures,
        }
    }

    /// Repeat the evaluation, threading `state` through each call.
    ///
    /// Stops at the first failing repetition. The schema comes from the first
    /// retained repetition only.
    pub fn run(
        &self,
        pipeline: &PipelineDescription,
        choices: &ChoiceAssignment,
        mut state: PipelineState,
        mut meta: JsonMap,
        iteration: usize,
    ) -> Result<Aggregate> {
        let mut record = IterationRecord::default();
        let mut schema_taken = false;
        let mut outcome = RepetitionState::default();
        let mut last = TrialResult::default();

        for repetition in 0..self.repetitions {
            info!(
                "iteration {}: statistical repetition {} of {}",
                iteration + 1,
                repetition + 1,
                self.repetitions
            );

            let request = EvaluationRequest {
                pipeline,
                choices,
                state: state.clone(),
                meta: &meta,
                iteration,
                repetition,
            };
            let result = self.module.evaluate(&request)?;
            outcome.repetitions = repetition + 1;
            state = result.state.clone();

            if self.failures.retains(result.fail) {
                record.characteristics_list.push(result.characteristics.clone());
                if !schema_taken {
                    take_schema(&mut record, &result, choices);
                    schema_taken = true;
                }
                meta.extend(result.meta.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            if result.fail {
                outcome.fail = true;
                outcome.fail_reason = result.fail_reason.clone();
                warn!(
                    "iteration {} failed on repetition {}: {}",
                    iteration + 1,
                    repetition + 1,
                    result.fail_reason
                );
                last = result;
                break;
            }
            last = result;
        }

        if !schema_taken {
            record.choices = choices.to_map();
            record.choices_order = choices.order().to_vec();
        }
        record
            .features
            .insert(STATISTICAL_REPETITIONS_KEY.to_string(), Value::from(outcome.repetitions));
        record.pipeline_state = outcome;
        record.meta = meta.clone();

        Ok(Aggregate {
            record,
            state,
            meta,
            last,
        })
    }
}

fn take_schema(record: &mut IterationRecord, result: &TrialResult, choices: &ChoiceAssignment) {
    if result.choices.is_empty() {
        record.choices = choices.to_map();
        record.choices_order = choices.order().to_vec();
    } else {
        record.choices = result.choices.clone();
        record.choices_order = result.choices_order.clone();
    }
    record.choices_desc = result.choices_desc.clone();
    record.features = result.features.clone();
    record.features_desc = result.features_desc.clone();
    record.dependencies = result.dependencies.clone();
    record.characteristics_desc = result.characteristics_desc.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Fails on the given 0-based repetition; counts calls in its state.
    struct Flaky {
        fail_on: Option<usize>,
        calls: Mutex<Vec<usize>>,
    }

    impl Flaky {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                fail_on,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PipelineModule for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn prepare(&self, base: &PipelineDescription) -> Result<PipelineDescription> {
            Ok(base.clone())
        }

        fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<TrialResult> {
            self.calls.lock().unwrap().push(request.repetition);
            let seen = request.state.get("runs").and_then(Value::as_u64).unwrap_or(0);

            let mut result = if Some(request.repetition) == self.fail_on {
                TrialResult::failure("segfault")
            } else {
                let mut c = JsonMap::new();
                c.insert("time".into(), json!(10 + request.repetition));
                TrialResult::success(c)
            };
            result.state.insert("runs".into(), json!(seen + 1));
            result.features.insert("rep".into(), json!(request.repetition));
            Ok(result)
        }
    }

    fn choices() -> ChoiceAssignment {
        [("##flags#O".to_string(), json!("-O2"))].into_iter().collect()
    }

    #[test]
    fn test_all_repetitions_succeed() {
        let module = Flaky::new(None);
        let agg = StatAggregator::new(&module, 3, FailurePolicy::SuccessOnly);
        let out = agg
            .run(&PipelineDescription::default(), &choices(), JsonMap::new(), JsonMap::new(), 0)
            .unwrap();

        assert!(!out.failed());
        assert_eq!(out.record.characteristics_list.len(), 3);
        assert_eq!(out.state["runs"], json!(3));
        // Schema is frozen at the first repetition.
        assert_eq!(out.record.features["rep"], json!(0));
        assert_eq!(out.record.features[STATISTICAL_REPETITIONS_KEY], json!(3));
        assert_eq!(out.record.choices["##flags#O"], json!("-O2"));
        assert_eq!(out.record.choices_order, vec!["##flags#O"]);
    }

    #[test]
    fn test_stops_at_first_failure() {
        let module = Flaky::new(Some(1));
        let agg = StatAggregator::new(&module, 4, FailurePolicy::SuccessOnly);
        let out = agg
            .run(&PipelineDescription::default(), &choices(), JsonMap::new(), JsonMap::new(), 0)
            .unwrap();

        assert_eq!(module.calls(), vec![0, 1]);
        assert!(out.failed());
        assert_eq!(out.record.pipeline_state.repetitions, 2);
        assert_eq!(out.record.pipeline_state.fail_reason, "segfault");
        assert_eq!(out.record.characteristics_list.len(), 1);
        assert_eq!(out.record.features[STATISTICAL_REPETITIONS_KEY], json!(2));
        assert!(out.last.fail);
    }

    #[test]
    fn test_only_failed_retention() {
        let module = Flaky::new(Some(2));
        let agg = StatAggregator::new(&module, 4, FailurePolicy::OnlyFailed);
        let out = agg
            .run(&PipelineDescription::default(), &choices(), JsonMap::new(), JsonMap::new(), 0)
            .unwrap();

        assert_eq!(out.record.characteristics_list, vec![JsonMap::new()]);
        // Schema taken from the failed repetition, the first one retained.
        assert_eq!(out.record.features["rep"], json!(2));
    }

    #[test]
    fn test_nothing_retained_keeps_choices() {
        let module = Flaky::new(Some(0));
        let agg = StatAggregator::new(&module, 4, FailurePolicy::SuccessOnly);
        let out = agg
            .run(&PipelineDescription::default(), &choices(), JsonMap::new(), JsonMap::new(), 0)
            .unwrap();

        assert!(out.record.characteristics_list.is_empty());
        assert_eq!(out.record.choices["##flags#O"], json!("-O2"));
        assert_eq!(out.state["runs"], json!(1));
    }
}
