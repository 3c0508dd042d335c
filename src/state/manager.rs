use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TunerError};
use crate::explore::compile_patterns;
use crate::explore::expander::matches_any;
use crate::models::{FlatDict, IterationRecord, Point};
use crate::state::persistence::{load_json, save_json};
use crate::tuner::adapters::{
    PointQuery, PointSelector, PointSet, RecordPolicy, RecordedPoint, Recorder,
};
use crate::tuner::stats::{self, StatOptions};

/// One point as kept in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub id: String,
    /// Statistical summary used for frontier comparison.
    pub flat: FlatDict,
    pub features: FlatDict,
    #[serde(default)]
    pub permanent: bool,
    pub description: Value,
}

/// JSON-file backed experiment entry holding recorded points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentStore {
    uid: String,
    points: Vec<StoredPoint>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ExperimentStore {
    /// In-memory store; `uid` defaults to a fresh UUID.
    pub fn new(uid: Option<String>) -> Self {
        Self {
            uid: uid.unwrap_or_else(|| Uuid::new_v4().to_string()),
            points: Vec::new(),
            path: None,
        }
    }

    /// Open the store at `path`, creating an empty one if the file is missing.
    /// Every change is written back to that file.
    pub fn open<P: AsRef<Path>>(path: P, uid: Option<String>) -> Result<Self> {
        let path = path.as_ref();
        let mut store = if path.exists() {
            let store: ExperimentStore = load_json(path)?;
            if let Some(uid) = uid.filter(|u| *u != store.uid) {
                return Err(TunerError::Recording(format!(
                    "store {} holds experiment '{}', not '{}'",
                    path.display(),
                    store.uid,
                    uid
                )));
            }
            store
        } else {
            Self::new(uid)
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[StoredPoint] {
        &self.points
    }

    pub fn point(&self, id: &str) -> Option<&StoredPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(path, self)
    }

    fn autosave(&self) -> Result<()> {
        match &self.path {
            Some(path) => self
                .save_to(path)
                .map_err(|e| TunerError::Recording(format!("cannot write {}: {}", path.display(), e))),
            None => Ok(()),
        }
    }

    fn describe(record: &IterationRecord, policy: &RecordPolicy) -> Result<Value> {
        let mut record = record.clone();
        if policy.skip_pipeline {
            record.pipeline = Default::default();
        }
        if policy.skip_desc {
            record.choices_desc.clear();
            record.features_desc.clear();
            record.characteristics_desc.clear();
        }

        let mut description = serde_json::to_value(&record)?;
        if !policy.ignore_update {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if let Value::Object(map) = &mut description {
                map.insert("recorded_at".into(), Value::from(secs));
            }
        }
        Ok(description)
    }
}

impl Recorder for ExperimentStore {
    fn add(&mut self, record: &IterationRecord, policy: &RecordPolicy) -> Result<RecordedPoint> {
        let samples = stats::record_samples(record);
        let options = StatOptions {
            process_multi_keys: compile_patterns(&policy.process_multi_keys)?,
            skip_stat_analysis: policy.skip_stat_analysis,
            dict_to_compare: record.dict_to_compare.clone(),
        };
        let stat_analysis = stats::multi_stat_analysis(&samples, &options);

        let feature_patterns = compile_patterns(&policy.feature_keys)?;
        let flat_features = stats::flat_features(&stats::record_features(record), &feature_patterns);

        let point = StoredPoint {
            id: Uuid::new_v4().to_string(),
            flat: stat_analysis.clone(),
            features: flat_features.clone(),
            permanent: policy.permanent,
            description: Self::describe(record, policy)?,
        };
        let point_id = point.id.clone();
        self.points.push(point);
        self.autosave()?;
        debug!("recorded point {} in experiment {}", point_id, self.uid);

        Ok(RecordedPoint {
            point_id,
            recorded_uid: self.uid.clone(),
            flat: samples.into_iter().next().unwrap_or_else(|| stats::record_features(record)),
            stat_analysis,
            flat_features,
        })
    }

    fn get(&self, query: &PointQuery) -> Result<PointSet> {
        let ignored = compile_patterns(&query.keys_to_ignore)?;
        let matches = |point: &StoredPoint| match &query.selector {
            PointSelector::AllPoints => true,
            PointSelector::ByFlatFeatures(wanted) => wanted
                .iter()
                .filter(|(k, _)| !matches_any(&ignored, k))
                .all(|(k, v)| point.features.get(k) == Some(v)),
        };
        let view = |point: &StoredPoint| {
            let flat = point.flat.clone();
            let p = Point::new(point.id.clone(), flat);
            if query.requested_flat_keys.is_empty() {
                p
            } else {
                p.restricted_to(&query.requested_flat_keys)
            }
        };

        let mut set = PointSet::default();
        for point in &self.points {
            if point.permanent {
                set.permanent_points.push(view(point));
            } else if matches(point) {
                set.points.push(view(point));
            }
        }
        Ok(set)
    }

    fn delete(&mut self, ids: &[String]) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| self.point(id).is_none()) {
            return Err(TunerError::Recording(format!("no recorded point '{}'", missing)));
        }
        self.points.retain(|p| !ids.contains(&p.id));
        self.autosave()
    }
}
