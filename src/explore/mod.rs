pub mod constants;
pub mod expander;
pub mod random;
pub mod selector;

pub use expander::{
    compile_patterns, effective_policies, expand, is_glob, matches_any, resolve_name, GlobPattern,
};
pub use random::RandomSource;
pub use selector::{
    ChoiceSelector, ExplorationContext, ExplorationPlugin, ExploreStrategy, LoopBounds, Selection,
};
