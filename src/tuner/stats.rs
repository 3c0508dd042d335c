use serde_json::{Number, Value};

use crate::explore::constants::{
    IMPROVEMENT_SUFFIX, NAMESPACE_ROOT, STAT_CENTER, STAT_MAX, STAT_MEAN, STAT_MIN, STAT_RANGE, STAT_REPEATS,
};
use crate::explore::expander::{matches_any, GlobPattern};
use crate::models::{FlatDict, IterationRecord, JsonMap};

/// Flatten `value` below `prefix` into `out`.
///
/// Object members become `prefix#key`, list elements `prefix@index`. Flattening
/// from the root prefix `#` yields the usual `##section#key` names.
pub fn flatten_into(value: &Value, prefix: &str, out: &mut FlatDict) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(v, &format!("{}#{}", prefix, k), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, &format!("{}@{}", prefix, i), out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

pub fn flatten(value: &Value) -> FlatDict {
    let mut out = FlatDict::new();
    flatten_into(value, "#", &mut out);
    out
}

/// Flatten a single section, e.g. `("characteristics", {...})`.
///
/// Member names already rooted at `##` are re-rooted under the section, so
/// the choice `##flags#O` becomes `##choices#flags#O`.
pub fn flatten_section(section: &str, map: &JsonMap) -> FlatDict {
    let mut out = FlatDict::new();
    for (k, v) in map {
        let k = k.strip_prefix(NAMESPACE_ROOT).unwrap_or(k);
        flatten_into(v, &format!("{}{}#{}", NAMESPACE_ROOT, section, k), &mut out);
    }
    out
}

/// Flat `##features#…`, `##choices#…` and `##choices_order@…` view of a record.
pub fn record_features(record: &IterationRecord) -> FlatDict {
    let mut out = flatten_section("features", &record.features);
    out.extend(flatten_section("choices", &record.choices));
    for (i, name) in record.choices_order.iter().enumerate() {
        out.insert(format!("##choices_order@{}", i), Value::String(name.clone()));
    }
    out
}

/// Keys of `flat` selected by `patterns`.
pub fn flat_features(flat: &FlatDict, patterns: &[GlobPattern]) -> FlatDict {
    flat.iter()
        .filter(|(k, _)| matches_any(patterns, k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// One flat dict per retained repetition: its characteristics plus the
/// iteration's features and choices.
pub fn record_samples(record: &IterationRecord) -> Vec<FlatDict> {
    let shared = record_features(record);
    record
        .characteristics_list
        .iter()
        .map(|characteristics| {
            let mut flat = flatten_section("characteristics", characteristics);
            flat.extend(shared.iter().map(|(k, v)| (k.clone(), v.clone())));
            flat
        })
        .collect()
}

/// How [`multi_stat_analysis`] treats the samples.
#[derive(Debug, Clone, Default)]
pub struct StatOptions {
    pub process_multi_keys: Vec<GlobPattern>,
    pub skip_stat_analysis: bool,
    pub dict_to_compare: FlatDict,
}

/// Merge per-repetition flat dicts into one statistical summary.
pub fn multi_stat_analysis(samples: &[FlatDict], options: &StatOptions) -> FlatDict {
    let mut out = FlatDict::new();

    let mut keys: Vec<&String> = samples.iter().flat_map(|s| s.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let values: Vec<&Value> = samples.iter().filter_map(|s| s.get(key)).collect();
        let Some(first) = values.first() else {
            continue;
        };

        if options.process_multi_keys.is_empty() || !matches_any(&options.process_multi_keys, key) {
            out.insert(key.clone(), (*first).clone());
            continue;
        }

        let numbers: Option<Vec<f64>> = values.iter().map(|v| v.as_f64()).collect();
        match numbers {
            Some(numbers) if !options.skip_stat_analysis => {
                summarize(key, &values, &numbers, &mut out);
            }
            _ => {
                out.insert(format!("{}{}", key, STAT_MIN), (*first).clone());
            }
        }
    }

    add_improvements(&mut out, &options.dict_to_compare);
    out
}

fn summarize(key: &str, values: &[&Value], numbers: &[f64], out: &mut FlatDict) {
    let (mut lo, mut hi) = (0, 0);
    for (i, n) in numbers.iter().enumerate() {
        if *n < numbers[lo] {
            lo = i;
        }
        if *n > numbers[hi] {
            hi = i;
        }
    }

    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let center = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;

    out.insert(format!("{}{}", key, STAT_MIN), values[lo].clone());
    out.insert(format!("{}{}", key, STAT_MAX), values[hi].clone());
    out.insert(format!("{}{}", key, STAT_MEAN), float(mean));
    out.insert(format!("{}{}", key, STAT_CENTER), float(center));
    out.insert(format!("{}{}", key, STAT_RANGE), float(numbers[hi] - numbers[lo]));
    out.insert(format!("{}{}", key, STAT_REPEATS), Value::from(numbers.len()));
}

/// `…#min_imp = reference / current` for every numeric `#min` key shared
/// with the reference point.
fn add_improvements(out: &mut FlatDict, reference: &FlatDict) {
    if reference.is_empty() {
        return;
    }

    let ratios: Vec<(String, Value)> = out
        .iter()
        .filter(|(k, _)| k.ends_with(STAT_MIN))
        .filter_map(|(k, v)| {
            let current = v.as_f64()?;
            let base = reference.get(k)?.as_f64()?;
            (current != 0.0).then(|| (format!("{}{}", k, IMPROVEMENT_SUFFIX), float(base / current)))
        })
        .collect();
    out.extend(ratios);
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::compile_patterns;
    use crate::explore::constants::DEFAULT_PROCESS_MULTI_KEYS;
    use assert_float_eq::assert_float_absolute_eq;
    use serde_json::json;

    fn options() -> StatOptions {
        StatOptions {
            process_multi_keys: compile_patterns(&DEFAULT_PROCESS_MULTI_KEYS).unwrap(),
            ..Default::default()
        }
    }

    fn sample(time: f64) -> FlatDict {
        let mut flat = FlatDict::new();
        flat.insert("##characteristics#time".into(), json!(time));
        flat.insert("##features#compiler".into(), json!("gcc"));
        flat.insert("##other#note".into(), json!("kept"));
        flat
    }

    #[test]
    fn test_flatten_naming() {
        let flat = flatten(&json!({
            "characteristics": {"time": 1.5, "sizes": [10, 20]},
            "features": {"os": {"name": "linux"}}
        }));
        assert_eq!(flat["##characteristics#time"], json!(1.5));
        assert_eq!(flat["##characteristics#sizes@1"], json!(20));
        assert_eq!(flat["##features#os#name"], json!("linux"));
    }

    #[test]
    fn test_numeric_summary() {
        let samples = vec![sample(3.0), sample(1.0), sample(2.0), sample(6.0)];
        let out = multi_stat_analysis(&samples, &options());

        assert_eq!(out["##characteristics#time#min"], json!(1.0));
        assert_eq!(out["##characteristics#time#max"], json!(6.0));
        assert_float_absolute_eq!(out["##characteristics#time#mean"].as_f64().unwrap(), 3.0, 1e-9);
        assert_float_absolute_eq!(out["##characteristics#time#center"].as_f64().unwrap(), 2.5, 1e-9);
        assert_float_absolute_eq!(out["##characteristics#time#range"].as_f64().unwrap(), 5.0, 1e-9);
        assert_eq!(out["##characteristics#time#repeats"], json!(4));
    }

    #[test]
    fn test_text_values_and_passthrough() {
        let out = multi_stat_analysis(&[sample(1.0)], &options());
        assert_eq!(out["##features#compiler#min"], json!("gcc"));
        assert!(!out.contains_key("##features#compiler#max"));
        assert_eq!(out["##other#note"], json!("kept"));
    }

    #[test]
    fn test_skip_stat_analysis_only_min() {
        let opts = StatOptions {
            skip_stat_analysis: true,
            ..options()
        };
        let out = multi_stat_analysis(&[sample(4.0), sample(2.0)], &opts);
        assert_eq!(out["##characteristics#time#min"], json!(4.0));
        assert!(!out.contains_key("##characteristics#time#mean"));
    }

    #[test]
    fn test_no_patterns_means_flatten_only() {
        let out = multi_stat_analysis(&[sample(4.0)], &StatOptions::default());
        assert_eq!(out["##characteristics#time"], json!(4.0));
        assert!(!out.contains_key("##characteristics#time#min"));
    }

    #[test]
    fn test_improvement_ratio() {
        let mut reference = FlatDict::new();
        reference.insert("##characteristics#time#min".into(), json!(8.0));
        let opts = StatOptions {
            dict_to_compare: reference,
            ..options()
        };

        let out = multi_stat_analysis(&[sample(2.0)], &opts);
        assert_float_absolute_eq!(
            out["##characteristics#time#min_imp"].as_f64().unwrap(),
            4.0,
            1e-9
        );
        assert!(!out.contains_key("##features#compiler#min_imp"));
    }

    #[test]
    fn test_record_samples() {
        let record = IterationRecord {
            features: [("os".to_string(), json!("linux"))].into_iter().collect(),
            choices: [("##flags#O".to_string(), json!("-O3"))].into_iter().collect(),
            choices_order: vec!["##flags#O".into()],
            characteristics_list: vec![
                [("time".to_string(), json!(1.0))].into_iter().collect(),
                [("time".to_string(), json!(2.0))].into_iter().collect(),
            ],
            ..Default::default()
        };

        let samples = record_samples(&record);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1]["##characteristics#time"], json!(2.0));
        assert_eq!(samples[0]["##features#os"], json!("linux"));
        assert_eq!(samples[0]["##choices#flags#O"], json!("-O3"));
        assert_eq!(samples[0]["##choices_order@0"], json!("##flags#O"));
    }
}
