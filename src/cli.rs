use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::{Result, TunerError};
use crate::explore::constants::DEFAULT_MAX_SETUP_ATTEMPTS;
use crate::state::{load_options, load_solutions};
use crate::tuner::TunerOptions;

/// autotune: explore the choice space of a black-box pipeline.
#[derive(Parser, Debug)]
#[command(name = "autotune")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an autotuning / design-space exploration session.
    Autotune(TuneArgs),

    /// Evaluate a pipeline once (a single-iteration autotune).
    Run(TuneArgs),

    /// Re-filter recorded points down to the frontier without evaluating.
    Filter(TuneArgs),

    /// Prepare a pipeline until it is ready and save its description.
    Setup(SetupArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TuneArgs {
    /// External pipeline program, run as `<cmd> prepare|evaluate`.
    #[arg(long)]
    pub pipeline_cmd: Option<String>,

    /// Name the pipeline module is registered under.
    #[arg(long, default_value = "pipeline")]
    pub module_name: String,

    /// JSON file with tuning options; flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Prepared pipeline description to start from.
    #[arg(long)]
    pub pipeline_file: Option<PathBuf>,

    /// Solutions to replay before exploring.
    #[arg(long)]
    pub solutions: Option<PathBuf>,

    /// Replay only the reference point of each solution.
    #[arg(long)]
    pub ref_solution: bool,

    /// Experiment store (JSON) used for recording.
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Write the frontier points as CSV.
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write the per-iteration trace as CSV.
    #[arg(long)]
    pub trace_csv: Option<PathBuf>,

    /// Save the full run report as JSON.
    #[arg(long)]
    pub save_to_file: Option<PathBuf>,

    /// Iterations to run (-1 for unbounded).
    #[arg(long, allow_negative_numbers = true)]
    pub iterations: Option<i64>,

    /// Statistical repetitions per iteration.
    #[arg(long)]
    pub repetitions: Option<i64>,

    /// First iteration (1-based) that is evaluated.
    #[arg(long)]
    pub start_from: Option<i64>,

    /// Random seed for reproducible exploration.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Exploration strategy (random, parallel-random, loop, parallel-loop).
    #[arg(long)]
    pub explore: Option<String>,

    /// Iterations dispatched together by parallel strategies.
    #[arg(long)]
    pub parallel_batch: Option<usize>,

    /// Dimension group, comma-separated; repeat for more groups.
    #[arg(long = "choices-order")]
    pub choices_order: Vec<String>,

    /// Record every iteration into the store.
    #[arg(long)]
    pub record: bool,

    /// Record failed iterations too.
    #[arg(long)]
    pub record_failed: bool,

    /// Record failed iterations only.
    #[arg(long)]
    pub record_only_failed: bool,

    /// Frontier key (lower is better unless reversed); repeatable.
    #[arg(long = "frontier-key")]
    pub frontier_keys: Vec<String>,

    /// Frontier key where higher is better; repeatable.
    #[arg(long = "frontier-reverse")]
    pub frontier_reverse: Vec<String>,

    /// Improvement margin as KEY=VALUE; repeatable.
    #[arg(long = "frontier-margin")]
    pub frontier_margins: Vec<String>,

    /// Experiment tags, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Seconds to wait before each evaluation.
    #[arg(long)]
    pub sleep: Option<f64>,

    /// Stop for confirmation after a failed iteration.
    #[arg(long)]
    pub pause_if_fail: bool,

    /// Collect failed iterations in the report.
    #[arg(long)]
    pub aggregate_failed_cases: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// External pipeline program, run as `<cmd> prepare`.
    #[arg(long)]
    pub pipeline_cmd: String,

    #[arg(long, default_value = "pipeline")]
    pub module_name: String,

    /// Where to save the prepared description.
    #[arg(long, default_value = "pipeline.json")]
    pub output: PathBuf,

    /// Prepare attempts before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_SETUP_ATTEMPTS)]
    pub max_attempts: usize,

    /// Overwrite an existing output file.
    #[arg(long)]
    pub force: bool,
}

impl TuneArgs {
    /// Options from `--config` (if any) with the flags applied on top.
    pub fn to_options(&self) -> Result<TunerOptions> {
        let mut options = match &self.config {
            Some(path) => load_options(path)?,
            None => TunerOptions::default(),
        };
        self.apply(&mut options)?;
        Ok(options)
    }

    pub fn apply(&self, options: &mut TunerOptions) -> Result<()> {
        if self.pipeline_cmd.is_some() {
            options.module = Some(self.module_name.clone());
        }
        if let Some(path) = &self.pipeline_file {
            options.pipeline_from_file = Some(path.clone());
        }
        if let Some(path) = &self.solutions {
            options.solutions = load_solutions(path)?;
        }
        options.ref_solution |= self.ref_solution;
        if let Some(path) = &self.save_to_file {
            options.save_to_file = Some(path.clone());
        }

        if self.iterations.is_some() {
            options.iterations = self.iterations;
        }
        if self.repetitions.is_some() {
            options.repetitions = self.repetitions;
        }
        if self.start_from.is_some() {
            options.start_from_iteration = self.start_from;
        }
        if self.seed.is_some() {
            options.seed = self.seed;
        }
        if let Some(explore) = &self.explore {
            options.explore_type = Some(explore.clone());
        }
        if self.parallel_batch.is_some() {
            options.parallel_batch = self.parallel_batch;
        }
        if !self.choices_order.is_empty() {
            options.choices_order = self
                .choices_order
                .iter()
                .map(|group| {
                    group
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .collect();
        }

        options.record |= self.record;
        options.record_failed |= self.record_failed;
        options.record_only_failed |= self.record_only_failed;

        self.apply_frontier(options)?;

        if !self.tags.is_empty() {
            options.tags = self.tags.clone();
        }
        if self.sleep.is_some() {
            options.sleep = self.sleep;
        }
        options.pause_if_fail |= self.pause_if_fail;
        options.aggregate_failed_cases |= self.aggregate_failed_cases;
        Ok(())
    }

    fn apply_frontier(&self, options: &mut TunerOptions) -> Result<()> {
        if self.frontier_keys.is_empty() && self.frontier_reverse.is_empty() {
            if !self.frontier_margins.is_empty() {
                return Err(TunerError::InvalidInput(
                    "--frontier-margin needs a --frontier-key or --frontier-reverse".into(),
                ));
            }
            return Ok(());
        }

        let mut margins = Vec::new();
        for entry in &self.frontier_margins {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                TunerError::InvalidInput(format!("margin '{}' is not KEY=VALUE", entry))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                TunerError::InvalidInput(format!("margin '{}' has a non-numeric value", entry))
            })?;
            margins.push((key.trim().to_string(), value));
        }

        let keys: Vec<(String, bool)> = self
            .frontier_keys
            .iter()
            .map(|k| (k.clone(), false))
            .chain(self.frontier_reverse.iter().map(|k| (k.clone(), true)))
            .collect();

        if let Some((unknown, _)) = margins
            .iter()
            .find(|(m, _)| !keys.iter().any(|(k, _)| k == m))
        {
            return Err(TunerError::InvalidInput(format!(
                "margin given for '{}', which is not a frontier key",
                unknown
            )));
        }

        options.frontier_keys = keys.iter().map(|(k, _)| k.clone()).collect();
        options.frontier_keys_reverse = keys.iter().map(|(_, r)| *r).collect();
        options.frontier_margins = keys
            .iter()
            .map(|(k, _)| margins.iter().find(|(m, _)| m == k).map(|(_, v)| *v))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_autotune_flags_map_to_options() {
        let cli = parse(&[
            "autotune",
            "autotune",
            "--pipeline-cmd",
            "./bench",
            "--iterations",
            "-1",
            "--explore",
            "loop",
            "--choices-order",
            "##flags#O, ##flags#unroll",
            "--choices-order",
            "##param#*",
            "--frontier-key",
            "##characteristics#time#min",
            "--frontier-reverse",
            "##characteristics#throughput#max",
            "--frontier-margin",
            "##characteristics#time#min=1.05",
        ]);
        let Command::Autotune(args) = cli.command else {
            panic!("expected autotune");
        };

        let options = args.to_options().unwrap();
        assert_eq!(options.module.as_deref(), Some("pipeline"));
        assert_eq!(options.iterations, Some(-1));
        assert_eq!(options.explore_type.as_deref(), Some("loop"));
        assert_eq!(
            options.choices_order,
            vec![
                vec!["##flags#O".to_string(), "##flags#unroll".to_string()],
                vec!["##param#*".to_string()],
            ]
        );
        assert_eq!(options.frontier_keys_reverse, vec![false, true]);
        assert_eq!(options.frontier_margins, vec![Some(1.05), None]);
    }

    #[test]
    fn test_margin_for_unknown_key_is_rejected() {
        let cli = parse(&[
            "autotune",
            "filter",
            "--frontier-key",
            "a",
            "--frontier-margin",
            "b=1.1",
        ]);
        let Command::Filter(args) = cli.command else {
            panic!("expected filter");
        };
        assert!(matches!(
            args.to_options().unwrap_err(),
            TunerError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_setup_defaults() {
        let cli = parse(&["autotune", "setup", "--pipeline-cmd", "./bench"]);
        let Command::Setup(args) = cli.command else {
            panic!("expected setup");
        };
        assert_eq!(args.max_attempts, DEFAULT_MAX_SETUP_ATTEMPTS);
        assert_eq!(args.output, PathBuf::from("pipeline.json"));
        assert_eq!(cli.log_level, "info");
    }
}
