use serde::{Deserialize, Serialize};

use crate::models::pipeline::JsonMap;
use crate::models::record::FlatDict;

/// How the current target reacted to a replayed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub raw_flat: FlatDict,
    pub fail: bool,
    #[serde(default)]
    pub fail_reason: String,
}

/// One point of a previously found solution (a prior run's frontier).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionPoint {
    #[serde(default)]
    pub pruned_choices: JsonMap,

    #[serde(default)]
    pub pruned_choices_order: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<Reaction>,

    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Externally supplied known configuration(s) to replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub points: Vec<SolutionPoint>,

    #[serde(default)]
    pub ref_choices: JsonMap,

    #[serde(default)]
    pub ref_choices_order: Vec<String>,

    #[serde(flatten)]
    pub extra: JsonMap,
}
