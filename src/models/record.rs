use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::pipeline::{JsonMap, PipelineDescription};

/// Flat `##section#key` view of a point.
pub type FlatDict = BTreeMap<String, Value>;

/// Outcome of the statistical repetitions of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepetitionState {
    /// Repetitions actually attempted.
    pub repetitions: usize,
    pub fail: bool,
    pub fail_reason: String,
}

/// All repetitions of one iteration, described for the recorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub tags: Vec<String>,
    pub subtags: Vec<String>,
    pub meta: JsonMap,

    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub record_dict: JsonMap,

    pub pipeline: PipelineDescription,
    pub pipeline_module: String,
    pub pipeline_uid: String,

    pub choices: JsonMap,
    pub choices_order: Vec<String>,
    pub choices_desc: JsonMap,
    pub features: JsonMap,
    pub features_desc: JsonMap,
    pub dependencies: JsonMap,
    pub characteristics_desc: JsonMap,

    /// Per-repetition characteristics, in repetition order.
    pub characteristics_list: Vec<JsonMap>,

    pub pipeline_state: RepetitionState,

    /// Reference flat point to compute improvements against.
    #[serde(default, skip_serializing_if = "FlatDict::is_empty")]
    pub dict_to_compare: FlatDict,
}

impl IterationRecord {
    pub fn failed(&self) -> bool {
        self.pipeline_state.fail
    }
}

/// A scored observation taking part in frontier filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub flat: FlatDict,
}

impl Point {
    pub fn new(id: impl Into<String>, flat: FlatDict) -> Self {
        Self {
            id: id.into(),
            flat,
        }
    }

    /// Numeric value of a flat key, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.flat.get(key).and_then(Value::as_f64)
    }

    /// Copy of this point restricted to `keys`.
    pub fn restricted_to(&self, keys: &[String]) -> Point {
        let flat = self
            .flat
            .iter()
            .filter(|(k, _)| keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Point::new(self.id.clone(), flat)
    }
}

/// Iteration kept for the failed-cases report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCase {
    pub iteration: usize,
    pub choices: JsonMap,
    pub choices_order: Vec<String>,
    pub features: JsonMap,
    pub characteristics: JsonMap,
    pub pipeline_state: RepetitionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_restriction() {
        let mut flat = FlatDict::new();
        flat.insert("##characteristics#time#min".into(), json!(1.0));
        flat.insert("##characteristics#size#min".into(), json!(10));
        flat.insert("##features#name#min".into(), json!("x"));
        let point = Point::new("p", flat);

        let restricted = point.restricted_to(&["##characteristics#size#min".to_string()]);
        assert_eq!(restricted.flat.len(), 1);
        assert_eq!(restricted.number("##characteristics#size#min"), Some(10.0));
        assert_eq!(point.number("##features#name#min"), None);
    }
}
