pub mod choice;
pub mod pipeline;
pub mod record;
pub mod solution;

pub use choice::{
    ChoiceAssignment, ChoiceDescriptor, ChoiceKind, DimensionSelectionPolicy, ExpandedChoiceOrder,
};
pub use pipeline::{
    merge_json, EvaluationRequest, JsonMap, PipelineDescription, PipelineState, TrialResult,
};
pub use record::{FailedCase, FlatDict, IterationRecord, Point, RepetitionState};
pub use solution::{Reaction, Solution, SolutionPoint};
