mod manager;
mod persistence;

pub use manager::{ExperimentStore, StoredPoint};
pub use persistence::{
    load_json, load_options, load_pipeline, load_solutions, save_json, save_pipeline, save_report,
    save_solutions,
};
