use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::explore::constants::MAX_DOMAIN_VALUES;

/// Value type of a choice dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceKind {
    Flag,
    Integer,
    Float,
    #[default]
    Text,
}

/// Catalog entry describing one tunable dimension.
///
/// The value domain is resolved from (in order): an explicit `choice` list,
/// an inclusive numeric `start..=stop` range stepped by `step`, or
/// `[false, true]` for flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDescriptor {
    #[serde(rename = "sort", default)]
    pub sort_order: f64,

    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,

    #[serde(rename = "type", default)]
    pub kind: ChoiceKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choice: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ChoiceDescriptor {
    /// Explicit list of values.
    pub fn with_values(values: Vec<Value>) -> Self {
        Self {
            choice: values,
            ..Self::default()
        }
    }

    /// Boolean on/off dimension.
    pub fn flag() -> Self {
        Self {
            kind: ChoiceKind::Flag,
            ..Self::default()
        }
    }

    /// Inclusive integer range.
    pub fn integer_range(start: i64, stop: i64, step: i64) -> Self {
        Self {
            kind: ChoiceKind::Integer,
            start: Some(start as f64),
            stop: Some(stop as f64),
            step: Some(step as f64),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort_order: f64) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// All values this dimension can take, in enumeration order.
    pub fn domain(&self) -> Vec<Value> {
        if !self.choice.is_empty() {
            return self.choice.clone();
        }

        if let (Some(start), Some(stop)) = (self.start, self.stop) {
            let step = self.step.unwrap_or(1.0);
            if step > 0.0 && start <= stop {
                let mut values = Vec::new();
                let tolerance = step * 1e-9;
                for i in 0..MAX_DOMAIN_VALUES {
                    let v = start + step * i as f64;
                    if v > stop + tolerance {
                        break;
                    }
                    values.push(self.numeric_value(v));
                }
                return values;
            }
        }

        if self.kind == ChoiceKind::Flag {
            return vec![Value::Bool(false), Value::Bool(true)];
        }

        Vec::new()
    }

    fn numeric_value(&self, v: f64) -> Value {
        match self.kind {
            ChoiceKind::Float => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::from(v.round() as i64),
        }
    }
}

/// Tag filter applied to one dimension group during expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionSelectionPolicy {
    /// Must carry all of these.
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,

    /// Must carry at least one of these (empty = no constraint).
    #[serde(rename = "anyTags", alias = "anytags", alias = "any_tags", default, deserialize_with = "tag_list")]
    pub any_tags: Vec<String>,

    /// Must carry none of these.
    #[serde(rename = "notTags", alias = "notags", alias = "not_tags", default, deserialize_with = "tag_list")]
    pub not_tags: Vec<String>,

    /// Probability of leaving a dimension unassigned under random exploration.
    #[serde(rename = "omitProbability", alias = "omit_probability", default)]
    pub omit_probability: f64,
}

impl DimensionSelectionPolicy {
    pub fn with_tags(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Whether a descriptor carrying `tags` passes this policy.
    pub fn admits(&self, tags: &[String]) -> bool {
        let has = |t: &String| tags.iter().any(|x| x == t);

        if !self.tags.iter().all(has) {
            return false;
        }
        if !self.any_tags.is_empty() && !self.any_tags.iter().any(has) {
            return false;
        }
        !self.not_tags.iter().any(has)
    }
}

/// Concrete dimension names per declared group.
pub type ExpandedChoiceOrder = Vec<Vec<String>>;

/// One concrete value per dimension for a single iteration, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceAssignment {
    order: Vec<String>,
    values: BTreeMap<String, Value>,
}

impl ChoiceAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a dimension value. Re-setting keeps the original position.
    pub fn set(&mut self, dimension: impl Into<String>, value: Value) {
        let dimension = dimension.into();
        if !self.values.contains_key(&dimension) {
            self.order.push(dimension.clone());
        }
        self.values.insert(dimension, value);
    }

    pub fn get(&self, dimension: &str) -> Option<&Value> {
        self.values.get(dimension)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }

    /// Compact one-line rendering for progress output.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "(defaults)".to_string();
        }
        self.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromIterator<(String, Value)> for ChoiceAssignment {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut assignment = ChoiceAssignment::new();
        for (k, v) in iter {
            assignment.set(k, v);
        }
        assignment
    }
}

/// Accept tags either as a list or as a comma-separated string.
pub(crate) fn tag_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        Joined(String),
        List(Vec<String>),
    }

    let raw = match Tags::deserialize(deserializer)? {
        Tags::Joined(s) => vec![s],
        Tags::List(v) => v,
    };

    Ok(raw
        .iter()
        .flat_map(|s| s.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_choices_win() {
        let desc = ChoiceDescriptor {
            choice: vec![json!("-O1"), json!("-O2")],
            start: Some(0.0),
            stop: Some(10.0),
            ..ChoiceDescriptor::default()
        };
        assert_eq!(desc.domain(), vec![json!("-O1"), json!("-O2")]);
    }

    #[test]
    fn test_integer_range_is_inclusive() {
        let desc = ChoiceDescriptor::integer_range(2, 8, 3);
        assert_eq!(desc.domain(), vec![json!(2), json!(5), json!(8)]);
    }

    #[test]
    fn test_float_range() {
        let desc = ChoiceDescriptor {
            kind: ChoiceKind::Float,
            start: Some(0.0),
            stop: Some(0.3),
            step: Some(0.1),
            ..ChoiceDescriptor::default()
        };
        assert_eq!(desc.domain().len(), 4);
    }

    #[test]
    fn test_flag_and_empty_domains() {
        assert_eq!(ChoiceDescriptor::flag().domain(), vec![json!(false), json!(true)]);
        assert!(ChoiceDescriptor::default().domain().is_empty());
    }

    #[test]
    fn test_policy_tag_logic() {
        let tags = vec!["cc".to_string(), "basic".to_string()];

        assert!(DimensionSelectionPolicy::with_tags(&["cc"]).admits(&tags));
        assert!(!DimensionSelectionPolicy::with_tags(&["cc", "experimental"]).admits(&tags));

        let any = DimensionSelectionPolicy {
            any_tags: vec!["experimental".into(), "basic".into()],
            ..Default::default()
        };
        assert!(any.admits(&tags));

        let not = DimensionSelectionPolicy {
            not_tags: vec!["basic".into()],
            ..Default::default()
        };
        assert!(!not.admits(&tags));
    }

    #[test]
    fn test_policy_accepts_comma_separated_tags() {
        let policy: DimensionSelectionPolicy =
            serde_json::from_value(json!({"tags": "cc, basic,", "notags": "x"})).unwrap();
        assert_eq!(policy.tags, vec!["cc", "basic"]);
        assert_eq!(policy.not_tags, vec!["x"]);
    }

    #[test]
    fn test_assignment_keeps_order() {
        let mut a = ChoiceAssignment::new();
        a.set("b", json!(1));
        a.set("a", json!(2));
        a.set("b", json!(3));
        assert_eq!(a.order(), &["b".to_string(), "a".to_string()]);
        assert_eq!(a.get("b"), Some(&json!(3)));
        assert_eq!(a.describe(), "b=3 a=2");
    }
}
