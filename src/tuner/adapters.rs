use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::interface::prompts::closest_match;
use crate::models::{EvaluationRequest, FlatDict, IterationRecord, PipelineDescription, Point, TrialResult};

/// A black-box pipeline the tuner can prepare and evaluate.
///
/// `evaluate` must leave the request untouched and be safe to call again for
/// the next repetition. An `Err` is a protocol failure and aborts the run;
/// a failing trial is reported in-band through [`TrialResult::fail`].
pub trait PipelineModule: Send + Sync {
    fn name(&self) -> &str;

    fn uid(&self) -> &str {
        self.name()
    }

    fn is_pipeline(&self) -> bool {
        true
    }

    /// Build (or refresh) a pipeline description from `base`.
    fn prepare(&self, base: &PipelineDescription) -> Result<PipelineDescription>;

    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<TrialResult>;
}

/// Pipeline modules by name.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    modules: BTreeMap<String, Arc<dyn PipelineModule>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn PipelineModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn with(mut self, module: Arc<dyn PipelineModule>) -> Self {
        self.register(module);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Look up a module that is able to act as a pipeline.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn PipelineModule>> {
        let module = self.modules.get(name).ok_or_else(|| {
            let hint = closest_match(name, self.names())
                .map(|m| format!(" (did you mean '{}'?)", m))
                .unwrap_or_default();
            TunerError::contract(format!("unknown pipeline module '{}'{}", name, hint))
        })?;

        if !module.is_pipeline() {
            return Err(TunerError::contract(format!(
                "module '{}' is not a pipeline",
                name
            )));
        }
        Ok(Arc::clone(module))
    }
}

/// How a record is stored and summarized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPolicy {
    pub record_failed_only: bool,
    pub permanent: bool,
    /// Do not stamp recording time on the stored point.
    pub ignore_update: bool,
    pub process_multi_keys: Vec<String>,
    pub feature_keys: Vec<String>,
    pub skip_pipeline: bool,
    pub skip_desc: bool,
    pub skip_stat_analysis: bool,
}

/// What the recorder hands back for a stored point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedPoint {
    pub point_id: String,
    pub recorded_uid: String,
    /// Flat view of the first retained repetition.
    pub flat: FlatDict,
    /// Statistical summary over all retained repetitions.
    pub stat_analysis: FlatDict,
    pub flat_features: FlatDict,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointSelector {
    /// Points whose features agree with these (ignored keys aside).
    ByFlatFeatures(FlatDict),
    AllPoints,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointQuery {
    pub selector: PointSelector,
    /// Glob patterns of feature keys left out of the match.
    pub keys_to_ignore: Vec<String>,
    /// Restrict each returned flat dict to these keys; empty keeps all.
    pub requested_flat_keys: Vec<String>,
}

impl PointQuery {
    pub fn all() -> Self {
        Self {
            selector: PointSelector::AllPoints,
            keys_to_ignore: Vec::new(),
            requested_flat_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub points: Vec<Point>,
    pub permanent_points: Vec<Point>,
}

/// Persistent store of recorded points.
pub trait Recorder {
    fn add(&mut self, record: &IterationRecord, policy: &RecordPolicy) -> Result<RecordedPoint>;

    fn get(&self, query: &PointQuery) -> Result<PointSet>;

    fn delete(&mut self, ids: &[String]) -> Result<()>;
}
