//! # Scoring Primitives
//!
//! Compiled-in defaults and input limits for the scoring core.
//!
//! Every value here can be overridden by configuration except the input
//! limits, which bound the work a single task or configuration can cause.

/// Name of the metric that inherits registry default weights.
pub const DEFAULT_METRIC: &str = "default";

/// Weight a symbol gets when nothing else is configured.
pub const DEFAULT_SYMBOL_WEIGHT: f64 = 1.0;

/// Consolidation function used when a metric names none.
pub const DEFAULT_CONSOLIDATION: &str = "factor";

/// Growth factor that leaves repeated symbols unamplified.
pub const DEFAULT_GROW_FACTOR: f64 = 1.0;

/// Default required score ("flagged" threshold).
pub const DEFAULT_REQUIRED_SCORE: f64 = 15.0;

/// Default reject score.
pub const DEFAULT_REJECT_SCORE: f64 = 20.0;

/// Default bound on an asynchronous filter's external operation.
pub const DEFAULT_FILTER_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a symbol or composite name.
pub const MAX_SYMBOL_NAME_LENGTH: usize = 128;

/// Maximum number of options kept per symbol entry.
///
/// A filter that keeps re-inserting the same symbol cannot grow the entry
/// beyond this; further options are dropped, weight still accumulates.
pub const MAX_OPTIONS_PER_SYMBOL: usize = 32;

/// Maximum length of a composite expression source.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Maximum nesting of `(` and `!` in a composite expression.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Maximum number of lines kept in a task's message log.
pub const MAX_MESSAGE_LOG_LINES: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_ordered() {
        assert!(DEFAULT_REQUIRED_SCORE <= DEFAULT_REJECT_SCORE);
    }

    #[test]
    fn default_growth_is_neutral() {
        assert_eq!(DEFAULT_GROW_FACTOR, 1.0);
    }
}
