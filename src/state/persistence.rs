use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::models::{PipelineDescription, Solution};
use crate::tuner::config::TunerOptions;

/// Read a JSON document.
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a pretty-printed JSON document with sorted object keys.
pub fn save_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    // Going through `Value` sorts map keys.
    let value = serde_json::to_value(value)?;
    let json = serde_json::to_string_pretty(&value)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_pipeline<P: AsRef<Path>>(path: P) -> Result<PipelineDescription> {
    load_json(path)
}

pub fn save_pipeline<P: AsRef<Path>>(path: P, pipeline: &PipelineDescription) -> Result<()> {
    save_json(path, pipeline)
}

/// Load solutions from either a list or a single solution object.
pub fn load_solutions<P: AsRef<Path>>(path: P) -> Result<Vec<Solution>> {
    let value: Value = load_json(path)?;
    Ok(match value {
        Value::Array(_) => serde_json::from_value(value)?,
        single => vec![serde_json::from_value(single)?],
    })
}

pub fn save_solutions<P: AsRef<Path>>(path: P, solutions: &[Solution]) -> Result<()> {
    save_json(path, &solutions)
}

pub fn load_options<P: AsRef<Path>>(path: P) -> Result<TunerOptions> {
    load_json(path)
}

pub fn save_report<T: Serialize, P: AsRef<Path>>(path: P, report: &T) -> Result<()> {
    save_json(path, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChoiceDescriptor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_pipeline_roundtrip() {
        let mut pipeline = PipelineDescription {
            ready: true,
            ..Default::default()
        };
        pipeline
            .choices_desc
            .insert("##flags#O".into(), ChoiceDescriptor::flag().tagged(&["cc"]));

        let file = NamedTempFile::new().unwrap();
        save_pipeline(file.path(), &pipeline).unwrap();
        let reloaded = load_pipeline(file.path()).unwrap();
        assert_eq!(reloaded, pipeline);
    }

    #[test]
    fn test_solutions_accept_single_object() {
        let json = r###"{"points": [{"pruned_choices": {"##choices#x": 1}, "pruned_choices_order": ["##choices#x"]}]}"###;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let solutions = load_solutions(file.path()).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].points[0].pruned_choices_order, vec!["##choices#x"]);

        let out = NamedTempFile::new().unwrap();
        save_solutions(out.path(), &solutions).unwrap();
        assert_eq!(load_solutions(out.path()).unwrap(), solutions);
    }

    #[test]
    fn test_options_from_file() {
        let json = r#"{"module": "demo", "iterations": -1, "explore_type": "loop", "frontier_keys": ["t"]}"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let options = load_options(file.path()).unwrap();
        assert_eq!(options.module.as_deref(), Some("demo"));
        assert_eq!(options.iterations, Some(-1));
        assert_eq!(options.frontier_keys, vec!["t"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_pipeline("/nonexistent/pipeline.json").unwrap_err();
        assert!(matches!(err, crate::error::TunerError::Io(_)));
    }
}
