pub mod cli;
pub mod error;
pub mod explore;
pub mod interface;
pub mod models;
pub mod state;
pub mod tuner;

pub use error::{Result, TunerError};
pub use models::{ChoiceAssignment, ChoiceDescriptor, PipelineDescription, Point, TrialResult};
pub use tuner::{IterationController, TunerConfig, TunerOptions, TuningReport};
