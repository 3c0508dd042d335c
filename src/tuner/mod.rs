pub mod adapters;
pub mod aggregator;
pub mod command;
pub mod config;
pub mod controller;
pub mod frontier;
pub mod output;
pub mod replay;
pub mod stats;

pub use adapters::{
    PipelineModule, PipelineRegistry, PointQuery, PointSelector, PointSet, RecordPolicy,
    RecordedPoint, Recorder,
};
pub use aggregator::{Aggregate, StatAggregator};
pub use command::CommandPipeline;
pub use config::{
    FailurePolicy, IterationBudget, PipelineSource, RecordingConfig, TunerConfig, TunerOptions,
};
pub use controller::{
    setup_pipeline, CancelToken, IterationController, IterationTrace, RecordedInfo, RunStatus,
    TuningReport,
};
pub use frontier::{filter, FrontierKey, FrontierOutcome, FrontierPolicy, Relation};
pub use output::{write_points_csv, write_trace_csv};
pub use replay::{translate_key, SolutionReplayer};
pub use stats::{multi_stat_analysis, StatOptions};
