/// Iteration budget when none is given (`-1` means unbounded).
pub const DEFAULT_ITERATIONS: i64 = 4;

/// Statistical repetitions per iteration when none is given.
pub const DEFAULT_REPETITIONS: i64 = 4;

/// First iteration (1-based) that is actually evaluated.
pub const DEFAULT_START_FROM_ITERATION: i64 = 1;

/// Iterations dispatched together by the parallel strategies.
pub const DEFAULT_PARALLEL_BATCH: usize = 4;

/// Prepare attempts made by `setup` before giving up.
pub const DEFAULT_MAX_SETUP_ATTEMPTS: usize = 10;

/// Upper bound on values generated from a numeric range.
pub const MAX_DOMAIN_VALUES: usize = 100_000;

// ─────────────────────────────────────────────────────────────────────────────
// Flat key namespace
// ─────────────────────────────────────────────────────────────────────────────

/// Root marker of the choice/flat-key namespace.
pub const NAMESPACE_ROOT: &str = "##";

/// Prefix stored solutions use for their choice keys.
pub const STORED_CHOICES_PREFIX: &str = "##choices#";

/// Feature key stamped with the number of repetitions attempted.
pub const STATISTICAL_REPETITIONS_KEY: &str = "statistical_repetitions";

/// Flat keys that get statistical analysis by default.
pub const DEFAULT_PROCESS_MULTI_KEYS: [&str; 3] =
    ["##characteristics#*", "##features#*", "##choices#*"];

/// Flat keys used to identify a point's features by default.
pub const DEFAULT_FEATURE_KEYS: [&str; 3] = ["##features#*", "##choices#*", "##choices_order*"];

/// Suffixes produced by statistical analysis.
pub const STAT_MIN: &str = "#min";
pub const STAT_MAX: &str = "#max";
pub const STAT_MEAN: &str = "#mean";
pub const STAT_CENTER: &str = "#center";
pub const STAT_RANGE: &str = "#range";
pub const STAT_REPEATS: &str = "#repeats";

/// Suffix appended to `#min` keys for improvement ratios.
pub const IMPROVEMENT_SUFFIX: &str = "_imp";
