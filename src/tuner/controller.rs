use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TunerError};
use crate::explore::{
    compile_patterns, effective_policies, expand, ChoiceSelector, ExplorationPlugin,
    ExploreStrategy, RandomSource,
};
use crate::interface::prompts::{NoPrompt, OperatorPrompt};
use crate::models::{
    ChoiceAssignment, FailedCase, FlatDict, IterationRecord, JsonMap, PipelineDescription,
    PipelineState, Point, Reaction, Solution, TrialResult,
};
use crate::state::{load_pipeline, save_report};
use crate::tuner::adapters::{
    PipelineModule, PipelineRegistry, PointQuery, PointSelector, RecordPolicy, Recorder,
};
use crate::tuner::aggregator::{Aggregate, StatAggregator};
use crate::tuner::config::{FailurePolicy, IterationBudget, PipelineSource, TunerConfig};
use crate::tuner::frontier::{self, FrontierOutcome};
use crate::tuner::replay::SolutionReplayer;
use crate::tuner::stats::{self, StatOptions};

/// Cooperative stop signal, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The iteration budget was used up.
    Completed,
    /// The selector ran out of choices first.
    Exhausted,
    Cancelled,
}

/// Point bookkeeping of the latest iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordedInfo {
    pub points: Vec<String>,
    pub deleted_points: Vec<String>,
    pub recorded_uid: String,
}

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationTrace {
    /// 1-based, as shown to the operator.
    pub iteration: usize,
    pub choices: ChoiceAssignment,
    pub replayed: bool,
    pub skipped: bool,
    pub fail: bool,
    pub fail_reason: String,
    pub repetitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    pub status: RunStatus,
    /// Iterations processed, skipped ones included.
    pub iterations: usize,
    pub seed: Option<u64>,
    pub last_iteration_output: Option<TrialResult>,
    pub last_stat_analysis: FlatDict,
    pub experiment_description: Option<IterationRecord>,
    pub recorded_info: RecordedInfo,
    /// Current non-dominated points (restricted to the frontier keys).
    pub frontier: Vec<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_cases: Option<Vec<FailedCase>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solutions: Option<Vec<Solution>>,
    pub state: PipelineState,
    pub trace: Vec<IterationTrace>,
}

impl TuningReport {
    fn new(seed: Option<u64>) -> Self {
        Self {
            status: RunStatus::Completed,
            iterations: 0,
            seed,
            last_iteration_output: None,
            last_stat_analysis: FlatDict::new(),
            experiment_description: None,
            recorded_info: RecordedInfo::default(),
            frontier: Vec::new(),
            failed_cases: None,
            solutions: None,
            state: PipelineState::new(),
            trace: Vec::new(),
        }
    }

    pub fn evaluated(&self) -> usize {
        self.trace.iter().filter(|t| !t.skipped).count()
    }

    pub fn failures(&self) -> usize {
        self.trace.iter().filter(|t| t.fail).count()
    }
}

/// An iteration after selection, before evaluation.
#[derive(Debug, Clone)]
struct Planned {
    iteration: usize,
    choices: ChoiceAssignment,
    replayed: bool,
    skipped: bool,
}

/// Mutable state carried from iteration to iteration.
struct RunState {
    state: PipelineState,
    meta: JsonMap,
    memory_frontier: Vec<Point>,
    failed_cases: Vec<FailedCase>,
    report: TuningReport,
}

/// Drives selection, evaluation, recording and filtering for a whole run.
pub struct IterationController<'a> {
    config: &'a TunerConfig,
    module: Option<Arc<dyn PipelineModule>>,
    recorder: Option<&'a mut dyn Recorder>,
    plugin: Option<Box<dyn ExplorationPlugin>>,
    prompt: Box<dyn OperatorPrompt + 'a>,
    cancel: CancelToken,
}

impl<'a> IterationController<'a> {
    /// Resolve the target module. Filter-only runs may go without one.
    pub fn new(config: &'a TunerConfig, registry: &PipelineRegistry) -> Result<Self> {
        let module = match &config.module {
            Some(name) => Some(registry.resolve(name)?),
            None if config.only_filter => None,
            None => return Err(TunerError::contract("no pipeline module specified")),
        };

        Ok(Self {
            config,
            module,
            recorder: None,
            plugin: None,
            prompt: Box::new(NoPrompt),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_recorder(mut self, recorder: &'a mut dyn Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_plugin(mut self, plugin: Box<dyn ExplorationPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn with_prompt(mut self, prompt: Box<dyn OperatorPrompt + 'a>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(mut self) -> Result<TuningReport> {
        let config = self.config;
        self.check_wiring()?;

        let mut rng = RandomSource::new(config.seed);
        if let Some(seed) = config.seed {
            info!("random seed: {}", seed);
        }

        let mut run = RunState {
            state: config.state.clone(),
            meta: config.meta.clone(),
            memory_frontier: Vec::new(),
            failed_cases: Vec::new(),
            report: TuningReport::new(config.seed),
        };

        let mut m = 0;
        let status = if config.only_filter {
            if !self.cancel.is_cancelled() && !config.budget.reached(0) {
                info!("filter-only run: reprocessing recorded points");
                self.update_frontier(&mut run, &FlatDict::new(), &FlatDict::new(), true)?;
                m = 1;
            }
            RunStatus::Completed
        } else {
            let module = self
                .module
                .clone()
                .ok_or_else(|| TunerError::contract("no pipeline module specified"))?;
            let template = self.prepare_template(module.as_ref())?;
            let mut selector = self.build_selector(&template)?;
            let mut replayer = SolutionReplayer::new(config.solutions.clone(), config.ref_solution);
            let stat_options = StatOptions {
                process_multi_keys: compile_patterns(&config.recording.process_multi_keys)?,
                skip_stat_analysis: config.recording.skip_stat_analysis,
                dict_to_compare: config.dict_to_compare.clone(),
            };

            let status = loop {
                if config.budget.reached(m) {
                    break RunStatus::Completed;
                }
                if self.cancel.is_cancelled() {
                    info!("run cancelled after {} iterations", m);
                    break RunStatus::Cancelled;
                }

                let batch = self.batch_size(m, &replayer);
                let mut planned = Vec::with_capacity(batch);
                let mut exhausted = false;
                for iteration in m..m + batch {
                    match self.plan(iteration, &mut selector, &replayer, &mut rng, &template, &run)? {
                        Some(p) => planned.push(p),
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }

                let outcomes = evaluate_batch(
                    module.as_ref(),
                    config,
                    &planned,
                    &template,
                    &run.state,
                    &run.meta,
                )?;
                for (p, aggregate) in planned.iter().zip(outcomes) {
                    self.finish(
                        p,
                        aggregate,
                        &template,
                        module.as_ref(),
                        &stat_options,
                        &mut replayer,
                        &mut run,
                    )?;
                }
                m += planned.len();

                if exhausted {
                    info!("All iterations are done!");
                    break RunStatus::Exhausted;
                }
            };

            let solutions = replayer.into_solutions();
            if !solutions.is_empty() {
                run.report.solutions = Some(solutions);
            }
            status
        };

        if m > 0 && !config.skip_done {
            info!("Done!");
        }

        let mut report = run.report;
        report.status = status;
        report.iterations = m;
        report.state = run.state;
        if config.aggregate_failed_cases {
            report.failed_cases = Some(run.failed_cases);
        }

        if let Some(path) = &config.save_to_file {
            save_report(path, &report)?;
            info!("report saved to {}", path.display());
        }
        Ok(report)
    }

    fn check_wiring(&self) -> Result<()> {
        let config = self.config;
        if config.recording.enabled && self.recorder.is_none() {
            return Err(TunerError::contract("recording requested but no recorder is attached"));
        }
        if !config.only_filter && config.strategy == ExploreStrategy::Customized && self.plugin.is_none() {
            return Err(TunerError::contract("customized exploration requires a plugin"));
        }
        Ok(())
    }

    /// Load or prepare the pipeline every iteration starts from.
    fn prepare_template(&self, module: &dyn PipelineModule) -> Result<PipelineDescription> {
        let config = self.config;
        let mut pipeline = match &config.pipeline {
            PipelineSource::Inline(p) => p.clone(),
            PipelineSource::File(path) => load_pipeline(path)?,
            PipelineSource::Prepare => PipelineDescription::default(),
        };

        let mut force = config.force_pipeline_update;
        if let Some(update) = &config.pipeline_update {
            pipeline.merge(update)?;
            force = true;
        }

        if pipeline.is_empty() || force {
            info!("preparing pipeline with module '{}'", module.name());
            pipeline = module.prepare(&pipeline)?;
        }

        if pipeline.fail {
            return Err(TunerError::contract(format!(
                "pipeline setup failed: {}",
                pipeline.fail_reason
            )));
        }
        if !pipeline.ready {
            return Err(TunerError::contract("pipeline is not ready"));
        }
        Ok(pipeline)
    }

    fn build_selector(&mut self, template: &PipelineDescription) -> Result<ChoiceSelector> {
        let config = self.config;
        let policies = effective_policies(&config.choices_order, &config.choices_selection);
        let expanded = expand(&config.choices_order, &policies, &template.choices_desc)?;
        for (g, group) in expanded.iter().enumerate() {
            debug!("dimension group {}: {:?}", g, group);
        }

        let mut selector = ChoiceSelector::new(
            &expanded,
            &policies,
            &template.choices_desc,
            config.strategy,
            config.loop_bounds,
        )?;
        if let Some(plugin) = self.plugin.take() {
            selector = selector.with_plugin(plugin);
        }
        info!(
            "exploring with '{}' over {} combinations",
            config.strategy,
            selector.combinations()
        );
        Ok(selector)
    }

    /// Iterations dispatched together starting at `m`.
    fn batch_size(&self, m: usize, replayer: &SolutionReplayer) -> usize {
        let config = self.config;
        if !config.strategy.is_parallel() || replayer.is_active(m) {
            return 1;
        }
        let remaining = config.budget.remaining(m).unwrap_or(config.parallel_batch);
        config.parallel_batch.min(remaining).max(1)
    }

    /// Choose the assignment for `iteration`; `None` once exhausted.
    fn plan(
        &mut self,
        iteration: usize,
        selector: &mut ChoiceSelector,
        replayer: &SolutionReplayer,
        rng: &mut RandomSource,
        template: &PipelineDescription,
        run: &RunState,
    ) -> Result<Option<Planned>> {
        let config = self.config;
        match config.budget {
            IterationBudget::Limited(n) => info!("pipeline iteration {} of {}", iteration + 1, n),
            IterationBudget::Unbounded => info!("pipeline iteration {}", iteration + 1),
        }

        let (choices, replayed) = match replayer.assignment(iteration, &template.choices_desc)? {
            Some(assignment) => {
                info!("checking pre-existing solution");
                (assignment, true)
            }
            None => {
                let selection = if config.strategy == ExploreStrategy::ParallelRandom {
                    let mut task_rng = rng.fork();
                    selector.select(&mut task_rng, template, &run.state, iteration)?
                } else {
                    selector.select(rng, template, &run.state, iteration)?
                };
                if selection.exhausted {
                    return Ok(None);
                }
                (selection.assignment, false)
            }
        };
        info!("choices: {}", choices.describe());

        if config.ask_enter_after_choices {
            self.prompt.pause("Press Enter to continue ...")?;
        }

        let skipped = !config.evaluates(iteration);
        if skipped {
            info!("(skipped by request)");
        } else if !config.sleep.is_zero() {
            thread::sleep(config.sleep);
        }

        Ok(Some(Planned {
            iteration,
            choices,
            replayed,
            skipped,
        }))
    }

    /// Record, filter and report one evaluated iteration.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        planned: &Planned,
        aggregate: Option<Aggregate>,
        template: &PipelineDescription,
        module: &dyn PipelineModule,
        stat_options: &StatOptions,
        replayer: &mut SolutionReplayer,
        run: &mut RunState,
    ) -> Result<()> {
        let config = self.config;
        let Some(aggregate) = aggregate else {
            run.report.trace.push(IterationTrace {
                iteration: planned.iteration + 1,
                choices: planned.choices.clone(),
                replayed: planned.replayed,
                skipped: true,
                fail: false,
                fail_reason: String::new(),
                repetitions: 0,
            });
            return Ok(());
        };

        run.state = aggregate.state;
        run.meta = aggregate.meta;
        run.report.recorded_info = RecordedInfo::default();

        let mut record = aggregate.record;
        record.tags = config.tags.clone();
        record.subtags = config.subtags.clone();
        record.record_dict = config.record_dict.clone();
        record.pipeline = template.clone();
        record.pipeline_module = module.name().to_string();
        record.pipeline_uid = module.uid().to_string();
        record.dict_to_compare = config.dict_to_compare.clone();
        for (k, v) in &config.features {
            record.features.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let failed = record.failed();
        let last = aggregate.last;
        if failed {
            warn!("iteration {} failed: {}", planned.iteration + 1, record.pipeline_state.fail_reason);
            if config.aggregate_failed_cases {
                run.failed_cases.push(FailedCase {
                    iteration: planned.iteration + 1,
                    choices: record.choices.clone(),
                    choices_order: record.choices_order.clone(),
                    features: record.features.clone(),
                    characteristics: last.characteristics.clone(),
                    pipeline_state: record.pipeline_state.clone(),
                });
            }
            if config.pause_if_fail {
                self.prompt.pause("Press Enter to continue ...")?;
            }
        }

        let mut stat_dict = FlatDict::new();
        let mut flat_features = FlatDict::new();
        if config.recording.enabled && config.recording.failures.retains(failed) {
            let recorder = self.recorder()?;
            info!("recording experiment ...");
            let started = Instant::now();
            let recorded = recorder.add(&record, &record_policy(config))?;
            info!("recorded successfully in {:.2} secs", started.elapsed().as_secs_f64());

            run.report.recorded_info.points.push(recorded.point_id);
            run.report.recorded_info.recorded_uid = recorded.recorded_uid;
            stat_dict = recorded.stat_analysis;
            flat_features = recorded.flat_features;
        }

        if !failed && stat_dict.is_empty() {
            stat_dict = stats::multi_stat_analysis(&stats::record_samples(&record), stat_options);
        }

        if planned.replayed {
            let reaction = Reaction {
                raw_flat: stat_dict.clone(),
                fail: failed,
                fail_reason: record.pipeline_state.fail_reason.clone(),
            };
            if replayer.record_reaction(planned.iteration, reaction) {
                info!("recorded reaction of pre-existing solution");
            }
        }

        if config.frontier.is_some() {
            self.update_frontier(run, &stat_dict, &flat_features, failed)?;
        }

        run.report.trace.push(IterationTrace {
            iteration: planned.iteration + 1,
            choices: planned.choices.clone(),
            replayed: planned.replayed,
            skipped: false,
            fail: failed,
            fail_reason: record.pipeline_state.fail_reason.clone(),
            repetitions: record.pipeline_state.repetitions,
        });
        run.report.last_iteration_output = Some(last);
        run.report.last_stat_analysis = stat_dict;
        run.report.experiment_description = Some(record);

        if config.ask_enter_after_each_iteration {
            self.prompt.pause("Press Enter to continue autotuning or DSE ...")?;
        }
        Ok(())
    }

    /// Keep only non-dominated points, deleting the rest from the recorder.
    fn update_frontier(
        &mut self,
        run: &mut RunState,
        stat_dict: &FlatDict,
        flat_features: &FlatDict,
        failed: bool,
    ) -> Result<()> {
        let config = self.config;
        let policy = config.frontier.clone().unwrap_or_default();
        let keys = policy.key_names();

        let outcome: FrontierOutcome = if config.recording.enabled {
            info!("reloading points to detect frontier ...");
            let query = if config.only_filter {
                PointQuery {
                    requested_flat_keys: keys,
                    ..PointQuery::all()
                }
            } else {
                PointQuery {
                    selector: PointSelector::ByFlatFeatures(flat_features.clone()),
                    keys_to_ignore: config.frontier_features_keys_to_ignore.clone(),
                    requested_flat_keys: keys,
                }
            };

            let recorder = self.recorder()?;
            let set = recorder.get(&query)?;
            let outcome = frontier::filter(&set.points, &set.permanent_points, &policy)?;
            if !outcome.deleted.is_empty() {
                recorder.delete(&outcome.deleted_ids())?;
            }
            outcome
        } else {
            if !failed && !config.only_filter {
                let point = Point::new(Uuid::new_v4().to_string(), stat_dict.clone());
                run.memory_frontier.push(point.restricted_to(&keys));
            }
            let outcome = frontier::filter(&run.memory_frontier, &[], &policy)?;
            run.memory_frontier = outcome.kept.clone();
            outcome
        };

        info!(
            "frontier: {} points kept, {} deleted",
            outcome.kept.len(),
            outcome.deleted.len()
        );
        run.report.recorded_info.points = outcome.kept_ids();
        run.report.recorded_info.deleted_points = outcome.deleted_ids();
        run.report.frontier = outcome.kept;
        Ok(())
    }

    fn recorder(&mut self) -> Result<&mut (dyn Recorder + 'a)> {
        self.recorder
            .as_deref_mut()
            .ok_or_else(|| TunerError::contract("recording requested but no recorder is attached"))
    }
}

fn record_policy(config: &TunerConfig) -> RecordPolicy {
    let recording = &config.recording;
    RecordPolicy {
        record_failed_only: recording.failures == FailurePolicy::OnlyFailed,
        permanent: recording.permanent,
        ignore_update: recording.ignore_update,
        process_multi_keys: recording.process_multi_keys.clone(),
        feature_keys: recording.feature_keys.clone(),
        skip_pipeline: recording.skip_pipeline,
        skip_desc: recording.skip_desc,
        skip_stat_analysis: recording.skip_stat_analysis,
    }
}

/// Run the repetitions of every planned, non-skipped iteration.
///
/// Each iteration works on its own copy of the template and of the state
/// at batch start. Batches of more than one iteration run on the rayon pool;
/// results come back in iteration order.
fn evaluate_batch(
    module: &dyn PipelineModule,
    config: &TunerConfig,
    planned: &[Planned],
    template: &PipelineDescription,
    state: &PipelineState,
    meta: &JsonMap,
) -> Result<Vec<Option<Aggregate>>> {
    let aggregator = StatAggregator::new(module, config.repetitions, config.recording.failures);
    let job = |p: &Planned| -> Result<Option<Aggregate>> {
        if p.skipped {
            return Ok(None);
        }
        let working = template.clone();
        aggregator
            .run(&working, &p.choices, state.clone(), meta.clone(), p.iteration)
            .map(Some)
    };

    if planned.len() > 1 {
        debug!("dispatching {} iterations in parallel", planned.len());
        planned.par_iter().map(&job).collect()
    } else {
        planned.iter().map(&job).collect()
    }
}

/// Prepare the pipeline repeatedly until the module reports it ready.
pub fn setup_pipeline(
    module: &dyn PipelineModule,
    base: &PipelineDescription,
    max_attempts: usize,
) -> Result<PipelineDescription> {
    let mut current = base.clone();
    for attempt in 1..=max_attempts {
        let prepared = module.prepare(&current)?;
        if prepared.fail {
            return Err(TunerError::contract(format!(
                "pipeline setup failed: {}",
                prepared.fail_reason
            )));
        }
        if prepared.ready {
            info!("pipeline ready after {} attempt(s)", attempt);
            return Ok(prepared);
        }
        debug!("pipeline not ready after attempt {}", attempt);
        current = prepared;
    }

    Err(TunerError::contract(format!(
        "pipeline is not ready after {} attempts",
        max_attempts
    )))
}
