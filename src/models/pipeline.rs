use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TunerError};
use crate::models::choice::{ChoiceAssignment, ChoiceDescriptor};

/// Generic JSON object used for characteristics, features, meta and state.
pub type JsonMap = BTreeMap<String, Value>;

/// Opaque evaluator state threaded from repetition to repetition.
pub type PipelineState = JsonMap;

/// Prepared pipeline description (the template every iteration starts from).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub fail: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fail_reason: String,

    /// Choice catalog keyed by dimension name.
    #[serde(default)]
    pub choices_desc: BTreeMap<String, ChoiceDescriptor>,

    /// Everything else the pipeline module keeps in its description.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl PipelineDescription {
    pub fn is_empty(&self) -> bool {
        self.choices_desc.is_empty() && self.extra.is_empty() && !self.ready
    }

    /// Deep-merge an update overlay into this description.
    pub fn merge(&mut self, overlay: &Value) -> Result<()> {
        if !overlay.is_object() {
            return Err(TunerError::contract("pipeline update must be a JSON object"));
        }
        let mut base = serde_json::to_value(&*self)?;
        merge_json(&mut base, overlay);
        *self = serde_json::from_value(base)
            .map_err(|e| TunerError::contract(format!("malformed pipeline after update: {}", e)))?;
        Ok(())
    }
}

/// Recursively merge `overlay` into `base`; non-object values replace.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Everything the pipeline module needs to run one repetition.
///
/// `state` is the caller's copy; the module hands back its successor in
/// [`TrialResult::state`].
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest<'a> {
    pub pipeline: &'a PipelineDescription,
    pub choices: &'a ChoiceAssignment,
    pub state: PipelineState,
    pub meta: &'a JsonMap,
    pub iteration: usize,
    pub repetition: usize,
}

/// Output of one statistical repetition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    #[serde(default)]
    pub characteristics: JsonMap,

    #[serde(default)]
    pub features: JsonMap,

    #[serde(default)]
    pub features_desc: JsonMap,

    #[serde(default)]
    pub dependencies: JsonMap,

    #[serde(default)]
    pub characteristics_desc: JsonMap,

    #[serde(default)]
    pub choices: JsonMap,

    #[serde(default)]
    pub choices_order: Vec<String>,

    #[serde(default)]
    pub choices_desc: JsonMap,

    #[serde(default)]
    pub meta: JsonMap,

    #[serde(default)]
    pub state: PipelineState,

    #[serde(default)]
    pub fail: bool,

    #[serde(default)]
    pub fail_reason: String,
}

impl TrialResult {
    pub fn success(characteristics: JsonMap) -> Self {
        Self {
            characteristics,
            ..Self::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            fail: true,
            fail_reason: reason.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overlay_is_deep() {
        let mut pipeline: PipelineDescription = serde_json::from_value(json!({
            "ready": true,
            "dataset": {"uoa": "a", "file": "x.txt"},
            "choices_desc": {"##flags#O": {"choice": ["-O1", "-O2"]}}
        }))
        .unwrap();

        pipeline.merge(&json!({"dataset": {"uoa": "b"}})).unwrap();

        assert_eq!(pipeline.extra["dataset"], json!({"uoa": "b", "file": "x.txt"}));
        assert!(pipeline.ready);
        assert_eq!(pipeline.choices_desc.len(), 1);
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let mut pipeline = PipelineDescription::default();
        let err = pipeline.merge(&json!([1, 2])).unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_trial_result_defaults_from_sparse_json() {
        let result: TrialResult =
            serde_json::from_value(json!({"characteristics": {"time": 1.5}})).unwrap();
        assert!(!result.fail);
        assert_eq!(result.characteristics["time"], json!(1.5));
        assert!(result.state.is_empty());
    }
}
