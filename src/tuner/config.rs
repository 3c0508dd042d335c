use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, TunerError};
use crate::explore::constants::{
    DEFAULT_FEATURE_KEYS, DEFAULT_ITERATIONS, DEFAULT_PARALLEL_BATCH, DEFAULT_PROCESS_MULTI_KEYS,
    DEFAULT_REPETITIONS, DEFAULT_START_FROM_ITERATION,
};
use crate::explore::{ExploreStrategy, LoopBounds};
use crate::models::{
    DimensionSelectionPolicy, FlatDict, JsonMap, PipelineDescription, PipelineState, Solution,
};
use crate::tuner::frontier::FrontierPolicy;

/// Options as they arrive from a JSON file or the command line.
///
/// Every field is optional; [`TunerConfig::from_options`] fills defaults and
/// rejects anything inconsistent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerOptions {
    #[serde(alias = "data_uoa", alias = "module_uoa")]
    pub module: Option<String>,

    pub pipeline: Option<PipelineDescription>,
    pub pipeline_from_file: Option<PathBuf>,
    pub pipeline_update: Option<Value>,
    pub force_pipeline_update: bool,

    pub iterations: Option<i64>,
    pub start_from_iteration: Option<i64>,
    pub repetitions: Option<i64>,
    pub seed: Option<u64>,

    #[serde(alias = "strategy")]
    pub explore_type: Option<String>,

    // Legacy switches; each one selects its strategy and beats `explore_type`.
    pub random: bool,
    #[serde(rename = "loop")]
    pub loop_: bool,
    #[serde(rename = "parallel-loop")]
    pub parallel_loop: bool,
    #[serde(rename = "parallel-random")]
    pub parallel_random: bool,
    #[serde(rename = "machine-learning-based")]
    pub machine_learning_based: bool,
    #[serde(rename = "model-based")]
    pub model_based: bool,
    pub adaptive: bool,
    #[serde(rename = "plugin-based")]
    pub plugin_based: bool,
    pub customized: bool,

    pub start: Option<u64>,
    pub stop: Option<u64>,
    pub step: Option<u64>,

    pub choices_order: Vec<Vec<String>>,
    pub choices_selection: Vec<DimensionSelectionPolicy>,

    pub record: bool,
    pub record_uoa: Option<String>,
    pub record_failed: bool,
    pub record_only_failed: bool,
    pub record_permanent: bool,
    pub record_ignore_update: Option<bool>,
    pub skip_record_pipeline: bool,
    pub skip_record_desc: bool,
    pub skip_stat_analysis: bool,
    pub process_multi_keys: Option<Vec<String>>,
    pub features_keys_to_process: Option<Vec<String>>,

    pub frontier_keys: Vec<String>,
    pub frontier_keys_reverse: Vec<bool>,
    pub frontier_margins: Vec<Option<f64>>,
    pub frontier_features_keys_to_ignore: Vec<String>,

    pub only_filter: bool,

    pub solutions: Vec<Solution>,
    pub ref_solution: bool,

    pub save_to_file: Option<PathBuf>,

    pub pause_if_fail: bool,
    pub aggregate_failed_cases: bool,
    pub ask_enter_after_choices: bool,
    pub ask_enter_after_each_iteration: bool,
    pub skip_done: bool,

    /// Seconds to wait between selection and evaluation.
    pub sleep: Option<f64>,

    pub tags: Vec<String>,
    pub subtags: Vec<String>,
    pub meta: JsonMap,
    pub features: JsonMap,
    pub record_dict: JsonMap,
    pub flat_dict_for_improvements: FlatDict,
    pub state: PipelineState,

    pub parallel_batch: Option<usize>,
}

impl TunerOptions {
    /// Strategy after legacy switches are folded in.
    fn strategy(&self) -> Result<ExploreStrategy> {
        let legacy = if self.random {
            Some(ExploreStrategy::Random)
        } else if self.loop_ {
            Some(ExploreStrategy::Loop)
        } else if self.parallel_loop {
            Some(ExploreStrategy::ParallelLoop)
        } else if self.parallel_random {
            Some(ExploreStrategy::ParallelRandom)
        } else if self.machine_learning_based
            || self.model_based
            || self.adaptive
            || self.plugin_based
            || self.customized
        {
            Some(ExploreStrategy::Customized)
        } else {
            None
        };

        match (legacy, self.explore_type.as_deref()) {
            (Some(strategy), _) => Ok(strategy),
            (None, Some(name)) if !name.trim().is_empty() => name.parse(),
            _ => Ok(ExploreStrategy::default()),
        }
    }
}

/// How many iterations to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IterationBudget {
    Limited(usize),
    /// Stop only when the selector is exhausted.
    Unbounded,
}

impl IterationBudget {
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(IterationBudget::Unbounded),
            n if n >= 0 => Ok(IterationBudget::Limited(n as usize)),
            n => Err(TunerError::contract(format!(
                "iterations must be -1 (unbounded) or non-negative, got {}",
                n
            ))),
        }
    }

    pub fn reached(self, done: usize) -> bool {
        match self {
            IterationBudget::Limited(n) => done >= n,
            IterationBudget::Unbounded => false,
        }
    }

    pub fn remaining(self, done: usize) -> Option<usize> {
        match self {
            IterationBudget::Limited(n) => Some(n.saturating_sub(done)),
            IterationBudget::Unbounded => None,
        }
    }
}

/// Which repetitions (and iterations) are kept for recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    #[default]
    SuccessOnly,
    AlsoFailed,
    OnlyFailed,
}

impl FailurePolicy {
    pub fn from_flags(record_failed: bool, record_only_failed: bool) -> Self {
        match (record_failed, record_only_failed) {
            (_, true) => FailurePolicy::OnlyFailed,
            (true, false) => FailurePolicy::AlsoFailed,
            (false, false) => FailurePolicy::SuccessOnly,
        }
    }

    pub fn retains(self, failed: bool) -> bool {
        match self {
            FailurePolicy::SuccessOnly => !failed,
            FailurePolicy::AlsoFailed => true,
            FailurePolicy::OnlyFailed => failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub experiment_uoa: Option<String>,
    pub failures: FailurePolicy,
    pub permanent: bool,
    pub ignore_update: bool,
    pub skip_pipeline: bool,
    pub skip_desc: bool,
    pub skip_stat_analysis: bool,
    pub process_multi_keys: Vec<String>,
    pub feature_keys: Vec<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            experiment_uoa: None,
            failures: FailurePolicy::default(),
            permanent: false,
            ignore_update: true,
            skip_pipeline: false,
            skip_desc: false,
            skip_stat_analysis: false,
            process_multi_keys: DEFAULT_PROCESS_MULTI_KEYS.iter().map(|s| s.to_string()).collect(),
            feature_keys: DEFAULT_FEATURE_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Where the pipeline template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineSource {
    Inline(PipelineDescription),
    File(PathBuf),
    /// Ask the module to prepare one.
    Prepare,
}

/// Validated run configuration. Built once, then only read.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    pub module: Option<String>,
    pub pipeline: PipelineSource,
    pub pipeline_update: Option<Value>,
    pub force_pipeline_update: bool,

    pub budget: IterationBudget,
    /// 1-based; earlier iterations are selected but not evaluated.
    pub start_from_iteration: usize,
    pub repetitions: usize,
    pub seed: Option<u64>,

    pub strategy: ExploreStrategy,
    pub loop_bounds: LoopBounds,
    pub choices_order: Vec<Vec<String>>,
    pub choices_selection: Vec<DimensionSelectionPolicy>,
    pub parallel_batch: usize,

    pub recording: RecordingConfig,
    pub frontier: Option<FrontierPolicy>,
    pub frontier_features_keys_to_ignore: Vec<String>,
    pub only_filter: bool,

    pub solutions: Vec<Solution>,
    pub ref_solution: bool,

    pub save_to_file: Option<PathBuf>,
    pub pause_if_fail: bool,
    pub aggregate_failed_cases: bool,
    pub ask_enter_after_choices: bool,
    pub ask_enter_after_each_iteration: bool,
    pub skip_done: bool,
    pub sleep: Duration,

    pub tags: Vec<String>,
    pub subtags: Vec<String>,
    pub meta: JsonMap,
    pub features: JsonMap,
    pub record_dict: JsonMap,
    pub dict_to_compare: FlatDict,
    pub state: PipelineState,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            module: None,
            pipeline: PipelineSource::Prepare,
            pipeline_update: None,
            force_pipeline_update: false,
            budget: IterationBudget::Limited(DEFAULT_ITERATIONS as usize),
            start_from_iteration: DEFAULT_START_FROM_ITERATION as usize,
            repetitions: DEFAULT_REPETITIONS as usize,
            seed: None,
            strategy: ExploreStrategy::default(),
            loop_bounds: LoopBounds::default(),
            choices_order: Vec::new(),
            choices_selection: Vec::new(),
            parallel_batch: DEFAULT_PARALLEL_BATCH,
            recording: RecordingConfig::default(),
            frontier: None,
            frontier_features_keys_to_ignore: Vec::new(),
            only_filter: false,
            solutions: Vec::new(),
            ref_solution: false,
            save_to_file: None,
            pause_if_fail: false,
            aggregate_failed_cases: false,
            ask_enter_after_choices: false,
            ask_enter_after_each_iteration: false,
            skip_done: false,
            sleep: Duration::ZERO,
            tags: Vec::new(),
            subtags: Vec::new(),
            meta: JsonMap::new(),
            features: JsonMap::new(),
            record_dict: JsonMap::new(),
            dict_to_compare: FlatDict::new(),
            state: PipelineState::new(),
        }
    }
}

impl TunerConfig {
    pub fn from_options(options: &TunerOptions) -> Result<Self> {
        let module = options
            .module
            .as_ref()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if module.is_none() && !options.only_filter {
            return Err(TunerError::contract("no pipeline module specified"));
        }

        let pipeline = match (&options.pipeline_from_file, &options.pipeline) {
            (Some(path), _) => PipelineSource::File(path.clone()),
            (None, Some(p)) if !p.is_empty() => PipelineSource::Inline(p.clone()),
            _ => PipelineSource::Prepare,
        };

        if let Some(update) = &options.pipeline_update {
            if !update.is_object() {
                return Err(TunerError::contract("pipeline_update must be a JSON object"));
            }
        }

        let budget = if options.only_filter {
            IterationBudget::Limited(1)
        } else {
            IterationBudget::from_raw(options.iterations.unwrap_or(DEFAULT_ITERATIONS))?
        };

        let start_from_iteration = match options
            .start_from_iteration
            .unwrap_or(DEFAULT_START_FROM_ITERATION)
        {
            n if n >= 1 => n as usize,
            n => {
                return Err(TunerError::contract(format!(
                    "start_from_iteration is 1-based, got {}",
                    n
                )));
            }
        };

        let repetitions = match options.repetitions.unwrap_or(DEFAULT_REPETITIONS) {
            n if n >= 1 => n as usize,
            n => {
                return Err(TunerError::contract(format!(
                    "repetitions must be at least 1, got {}",
                    n
                )));
            }
        };

        let loop_bounds = LoopBounds {
            start: options.start.unwrap_or(0),
            stop: options.stop,
            step: options.step.unwrap_or(1),
        };
        if loop_bounds.step == 0 {
            return Err(TunerError::contract("step must be at least 1"));
        }

        for (g, policy) in options.choices_selection.iter().enumerate() {
            if !(0.0..=1.0).contains(&policy.omit_probability) {
                return Err(TunerError::contract(format!(
                    "omit probability of group {} must be within [0, 1], got {}",
                    g, policy.omit_probability
                )));
            }
        }

        let parallel_batch = match options.parallel_batch {
            Some(0) => return Err(TunerError::contract("parallel_batch must be at least 1")),
            Some(n) => n,
            None => DEFAULT_PARALLEL_BATCH,
        };

        if options.record_failed && options.record_only_failed {
            warn!("both record_failed and record_only_failed are set; recording only failed iterations");
        }

        let defaults = RecordingConfig::default();
        let recording = RecordingConfig {
            enabled: options.record,
            experiment_uoa: options.record_uoa.clone(),
            failures: FailurePolicy::from_flags(options.record_failed, options.record_only_failed),
            permanent: options.record_permanent,
            ignore_update: options.record_ignore_update.unwrap_or(true),
            skip_pipeline: options.skip_record_pipeline,
            skip_desc: options.skip_record_desc,
            skip_stat_analysis: options.skip_stat_analysis,
            process_multi_keys: options
                .process_multi_keys
                .clone()
                .unwrap_or(defaults.process_multi_keys),
            feature_keys: options
                .features_keys_to_process
                .clone()
                .unwrap_or(defaults.feature_keys),
        };

        let frontier = if options.frontier_keys.is_empty() {
            if !options.frontier_keys_reverse.is_empty() || !options.frontier_margins.is_empty() {
                return Err(TunerError::contract(
                    "frontier_keys_reverse/frontier_margins given without frontier_keys",
                ));
            }
            None
        } else {
            Some(FrontierPolicy::from_parts(
                &options.frontier_keys,
                &options.frontier_keys_reverse,
                &options.frontier_margins,
            )?)
        };

        let sleep = match options.sleep.unwrap_or(0.0) {
            s if s.is_finite() && s >= 0.0 => Duration::from_secs_f64(s),
            s => return Err(TunerError::contract(format!("sleep must be non-negative, got {}", s))),
        };

        Ok(Self {
            module,
            pipeline,
            pipeline_update: options.pipeline_update.clone(),
            force_pipeline_update: options.force_pipeline_update,
            budget,
            start_from_iteration,
            repetitions,
            seed: options.seed,
            strategy: options.strategy()?,
            loop_bounds,
            choices_order: options.choices_order.clone(),
            choices_selection: options.choices_selection.clone(),
            parallel_batch,
            recording,
            frontier,
            frontier_features_keys_to_ignore: options.frontier_features_keys_to_ignore.clone(),
            only_filter: options.only_filter,
            solutions: options.solutions.clone(),
            ref_solution: options.ref_solution,
            save_to_file: options.save_to_file.clone(),
            pause_if_fail: options.pause_if_fail,
            aggregate_failed_cases: options.aggregate_failed_cases,
            ask_enter_after_choices: options.ask_enter_after_choices,
            ask_enter_after_each_iteration: options.ask_enter_after_each_iteration,
            skip_done: options.skip_done,
            sleep,
            tags: options.tags.clone(),
            subtags: options.subtags.clone(),
            meta: options.meta.clone(),
            features: options.features.clone(),
            record_dict: options.record_dict.clone(),
            dict_to_compare: options.flat_dict_for_improvements.clone(),
            state: options.state.clone(),
        })
    }

    /// Whether iteration `m` (0-based) is evaluated.
    pub fn evaluates(&self, m: usize) -> bool {
        m + 1 >= self.start_from_iteration
    }
}
