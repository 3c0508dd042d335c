use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::models::Point;

/// One scoring key of a multi-objective frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierKey {
    pub name: String,

    /// Higher is better when set.
    #[serde(default)]
    pub reverse: bool,

    /// Improvement ratio a candidate must exceed to count as better.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
}

impl FrontierKey {
    pub fn lower(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reverse: false,
            margin: None,
        }
    }

    pub fn higher(name: impl Into<String>) -> Self {
        Self {
            reverse: true,
            ..Self::lower(name)
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = Some(margin);
        self
    }

    /// Whether `new` is a real improvement over `old` on this key.
    fn improves(&self, new: f64, old: f64) -> bool {
        let (num, den) = if self.reverse { (new, old) } else { (old, new) };
        if num > 0.0 && den > 0.0 {
            num / den > self.margin.unwrap_or(1.0)
        } else if self.reverse {
            new > old
        } else {
            new < old
        }
    }

    fn at_least_as_good(&self, new: f64, old: f64) -> bool {
        if self.reverse { new >= old } else { new <= old }
    }
}

/// Ordered scoring keys with direction and tolerance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierPolicy {
    pub keys: Vec<FrontierKey>,
}

impl FrontierPolicy {
    pub fn new(keys: Vec<FrontierKey>) -> Self {
        Self { keys }
    }

    /// Build from parallel lists. `reverse` and `margins` may be empty.
    pub fn from_parts(keys: &[String], reverse: &[bool], margins: &[Option<f64>]) -> Result<Self> {
        if !reverse.is_empty() && reverse.len() != keys.len() {
            return Err(TunerError::contract(format!(
                "frontier_keys_reverse has {} entries but there are {} frontier keys",
                reverse.len(),
                keys.len()
            )));
        }
        if !margins.is_empty() && margins.len() != keys.len() {
            return Err(TunerError::contract(format!(
                "frontier_margins has {} entries but there are {} frontier keys",
                margins.len(),
                keys.len()
            )));
        }

        let policy = Self::new(
            keys.iter()
                .enumerate()
                .map(|(i, name)| FrontierKey {
                    name: name.clone(),
                    reverse: reverse.get(i).copied().unwrap_or(false),
                    margin: margins.get(i).copied().flatten(),
                })
                .collect(),
        );
        policy.validate().map_err(|e| match e {
            TunerError::Filter(msg) => TunerError::Contract(msg),
            other => other,
        })?;
        Ok(policy)
    }

    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        for key in &self.keys {
            if let Some(margin) = key.margin {
                if !(margin.is_finite() && margin > 0.0) {
                    return Err(TunerError::Filter(format!(
                        "margin for frontier key '{}' must be positive, got {}",
                        key.name, margin
                    )));
                }
            }
        }
        Ok(())
    }

    /// How `candidate` relates to `other` over the comparable keys.
    pub fn relation(&self, candidate: &Point, other: &Point) -> Relation {
        let mut comparable = 0;
        let mut equal = true;
        let mut cand_covers = true;
        let mut cand_improves = false;
        let mut other_covers = true;
        let mut other_improves = false;

        for key in &self.keys {
            let (Some(c), Some(o)) = (candidate.number(&key.name), other.number(&key.name)) else {
                continue;
            };
            comparable += 1;
            equal &= c == o;
            cand_covers &= key.at_least_as_good(c, o);
            other_covers &= key.at_least_as_good(o, c);
            cand_improves |= key.improves(c, o);
            other_improves |= key.improves(o, c);
        }

        if comparable == 0 {
            Relation::Incomparable
        } else if equal {
            Relation::Tie
        } else if cand_covers && cand_improves {
            Relation::Dominates
        } else if other_covers && other_improves {
            Relation::Dominated
        } else {
            Relation::Incomparable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Dominates,
    Dominated,
    Tie,
    Incomparable,
}

/// Partition produced by [`filter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontierOutcome {
    /// Non-dominated points in insertion order, then the permanent points.
    pub kept: Vec<Point>,
    pub deleted: Vec<Point>,
}

impl FrontierOutcome {
    pub fn kept_ids(&self) -> Vec<String> {
        self.kept.iter().map(|p| p.id.clone()).collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.iter().map(|p| p.id.clone()).collect()
    }
}

/// Reduce `points` to the non-dominated subset.
///
/// A point is deleted when any other input point dominates it, or when it
/// ties an earlier point that survives (first seen wins). Dominance is not
/// transitive once points lack keys, so every point is checked against the
/// whole input rather than against the survivors. `permanent` points never
/// take part in the comparison and are always kept.
pub fn filter(points: &[Point], permanent: &[Point], policy: &FrontierPolicy) -> Result<FrontierOutcome> {
    policy.validate()?;

    let mut ids = HashSet::new();
    for point in points.iter().chain(permanent) {
        if !ids.insert(point.id.as_str()) {
            return Err(TunerError::Filter(format!("duplicate point id '{}'", point.id)));
        }
    }

    let dominated: Vec<bool> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            points
                .iter()
                .enumerate()
                .any(|(j, q)| i != j && policy.relation(q, p) == Relation::Dominates)
        })
        .collect();

    let mut deleted_flags = dominated;
    for i in 0..points.len() {
        if deleted_flags[i] {
            continue;
        }
        deleted_flags[i] = (0..i)
            .any(|j| !deleted_flags[j] && policy.relation(&points[i], &points[j]) == Relation::Tie);
    }

    let mut kept = Vec::new();
    let mut deleted = Vec::new();
    for (point, gone) in points.iter().zip(deleted_flags) {
        if gone {
            deleted.push(point.clone());
        } else {
            kept.push(point.clone());
        }
    }
    kept.extend(permanent.iter().cloned());

    Ok(FrontierOutcome { kept, deleted })
}
