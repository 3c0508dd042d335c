#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};

use pipeline_autotune_rs::error::Result;
use pipeline_autotune_rs::models::{
    ChoiceDescriptor, EvaluationRequest, JsonMap, PipelineDescription, TrialResult,
};
use pipeline_autotune_rs::tuner::PipelineModule;

pub const LEVELS: [&str; 4] = ["-O0", "-O1", "-O2", "-O3"];

/// Toy compiler benchmark: faster and bigger with higher optimization levels.
#[derive(Default)]
pub struct ScriptedPipeline {
    calls: AtomicUsize,
    prepares: AtomicUsize,
    /// Optimization level that crashes.
    pub failing_level: Option<String>,
    /// Repetition (0-based) on which every trial fails.
    pub failing_repetition: Option<usize>,
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(level: &str) -> Self {
        Self {
            failing_level: Some(level.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_on_repetition(repetition: usize) -> Self {
        Self {
            failing_repetition: Some(repetition),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }
}

pub fn catalog() -> BTreeMap<String, ChoiceDescriptor> {
    let mut catalog = BTreeMap::new();
    catalog.insert(
        "##flags#O".to_string(),
        ChoiceDescriptor::with_values(LEVELS.iter().map(|l| json!(l)).collect())
            .tagged(&["opt"])
            .sorted(1.0),
    );
    catalog.insert(
        "##param#unroll".to_string(),
        ChoiceDescriptor::integer_range(1, 3, 1)
            .tagged(&["param"])
            .sorted(2.0),
    );
    catalog.insert(
        "##flags#lto".to_string(),
        ChoiceDescriptor::flag().tagged(&["opt", "link"]).sorted(3.0),
    );
    catalog
}

pub fn prepared_pipeline() -> PipelineDescription {
    PipelineDescription {
        ready: true,
        choices_desc: catalog(),
        ..Default::default()
    }
}

pub fn level_index(level: &str) -> f64 {
    LEVELS.iter().position(|l| *l == level).unwrap_or(0) as f64
}

impl PipelineModule for ScriptedPipeline {
    fn name(&self) -> &str {
        "bench"
    }

    fn prepare(&self, _base: &PipelineDescription) -> Result<PipelineDescription> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(prepared_pipeline())
    }

    fn evaluate(&self, request: &EvaluationRequest) -> Result<TrialResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let level = request
            .choices
            .get("##flags#O")
            .and_then(Value::as_str)
            .unwrap_or("-O0")
            .to_string();
        let unroll = request
            .choices
            .get("##param#unroll")
            .and_then(Value::as_i64)
            .unwrap_or(1);

        let mut state = request.state.clone();
        let runs = state.get("runs").and_then(Value::as_u64).unwrap_or(0);
        state.insert("runs".to_string(), json!(runs + 1));

        if self.failing_level.as_deref() == Some(level.as_str())
            || self.failing_repetition == Some(request.repetition)
        {
            let mut failed = TrialResult::failure(format!("{} crashed", level));
            failed.state = state;
            return Ok(failed);
        }

        let o = level_index(&level);
        let mut characteristics = JsonMap::new();
        characteristics.insert(
            "time".to_string(),
            json!(10.0 - 2.0 * o + (unroll - 2).abs() as f64 + 0.5 * request.repetition as f64),
        );
        characteristics.insert("size".to_string(), json!(100 + 20 * o as i64 + 5 * unroll));

        let mut result = TrialResult::success(characteristics);
        result.state = state;
        Ok(result)
    }
}
