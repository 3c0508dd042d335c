use serde_json::Value;

use crate::models::Point;
use crate::tuner::{IterationTrace, TuningReport};

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.4}", f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn trace_line(trace: &IterationTrace) -> String {
    let status = if trace.skipped {
        "skipped".to_string()
    } else if trace.fail {
        format!("FAILED ({})", trace.fail_reason)
    } else {
        format!("ok x{}", trace.repetitions)
    };
    let replay = if trace.replayed { " [replay]" } else { "" };
    format!(
        "{:>4}. {}{}  {}",
        trace.iteration,
        status,
        replay,
        trace.choices.describe()
    )
}

/// Display the outcome of a tuning run.
pub fn display_report(report: &TuningReport) {
    println!();
    println!("=== Tuning Run ===");
    println!();

    for trace in &report.trace {
        println!("{}", trace_line(trace));
    }

    println!();
    println!("--- Summary ---");
    println!("Status: {:?}", report.status);
    println!("Iterations: {}", report.iterations);
    println!("Evaluated: {}", report.evaluated());
    println!("Failed: {}", report.failures());
    if let Some(seed) = report.seed {
        println!("Seed: {}", seed);
    }
    if !report.recorded_info.recorded_uid.is_empty() {
        println!("Experiment: {}", report.recorded_info.recorded_uid);
    }
    if !report.recorded_info.deleted_points.is_empty() {
        println!(
            "Deleted in last iteration: {}",
            report.recorded_info.deleted_points.len()
        );
    }
    println!();

    if !report.frontier.is_empty() {
        display_points(&report.frontier, "Frontier");
    }
}

/// Display points with their flat values.
pub fn display_points(points: &[Point], title: &str) {
    if points.is_empty() {
        println!("{}: (none)", title);
        return;
    }

    println!();
    println!("=== {} ({} points) ===", title, points.len());
    println!();

    let max_key_len = points
        .iter()
        .flat_map(|p| p.flat.keys())
        .map(|k| k.len())
        .max()
        .unwrap_or(10);

    for point in points {
        println!("  {}", point.id);
        for (key, value) in &point.flat {
            println!(
                "    {:<width$}  {}",
                key,
                value_text(value),
                width = max_key_len
            );
        }
    }

    println!();
}
