use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::models::Point;
use crate::tuner::controller::TuningReport;

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Write points as CSV: one row per point, one column per flat key.
pub fn write_points_csv(points: &[Point], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    let keys: BTreeSet<&String> = points.iter().flat_map(|p| p.flat.keys()).collect();
    let mut header = vec!["id".to_string()];
    header.extend(keys.iter().map(|k| k.to_string()));
    wtr.write_record(&header)?;

    for point in points {
        let mut row = vec![point.id.clone()];
        row.extend(keys.iter().map(|k| cell(point.flat.get(*k))));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write the per-iteration trace of a run as CSV.
pub fn write_trace_csv(report: &TuningReport, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "iteration",
        "choices",
        "replayed",
        "skipped",
        "fail",
        "fail_reason",
        "repetitions",
    ])?;

    for trace in &report.trace {
        wtr.write_record([
            trace.iteration.to_string(),
            trace.choices.describe(),
            trace.replayed.to_string(),
            trace.skipped.to_string(),
            trace.fail.to_string(),
            trace.fail_reason.clone(),
            trace.repetitions.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
