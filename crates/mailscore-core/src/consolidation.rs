//! # Metric Consolidation
//!
//! Reduces a metric result to its final score, compares it against the
//! metric's thresholds and selects an action.
//!
//! Consolidation functions are pluggable per metric and looked up by name in
//! a [`ConsolidationRegistry`] when the configuration snapshot is built.
//! A metric result is consolidated at most once; after that its verdict is
//! frozen and every later insert into it is a no-op.

use crate::metric::{Metric, MetricResult};
use crate::{Action, ScoreError, SymbolResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// CONSOLIDATION FUNCTIONS
// =============================================================================

/// A per-metric consolidation function.
pub trait Consolidate: Send + Sync + fmt::Debug {
    /// Name the function is registered under.
    fn name(&self) -> &str;

    /// Compute the final score from the triggered symbols.
    ///
    /// `running_score` is the incrementally maintained sum of entry weights.
    fn consolidate(
        &self,
        metric: &Metric,
        symbols: &BTreeMap<String, SymbolResult>,
        running_score: f64,
    ) -> f64;
}

/// Sums `weight x factor` over every entry (factor defaults to 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorConsolidation;

impl Consolidate for FactorConsolidation {
    fn name(&self) -> &str {
        "factor"
    }

    fn consolidate(
        &self,
        metric: &Metric,
        symbols: &BTreeMap<String, SymbolResult>,
        _running_score: f64,
    ) -> f64 {
        symbols
            .iter()
            .map(|(name, entry)| entry.weight * metric.factor(name))
            .sum()
    }
}

/// Uses the running score as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumConsolidation;

impl Consolidate for SumConsolidation {
    fn name(&self) -> &str {
        "sum"
    }

    fn consolidate(
        &self,
        _metric: &Metric,
        _symbols: &BTreeMap<String, SymbolResult>,
        running_score: f64,
    ) -> f64 {
        running_score
    }
}

/// Named consolidation functions available to metric configuration.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationRegistry {
    functions: BTreeMap<String, Arc<dyn Consolidate>>,
}

impl ConsolidationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `factor` and `sum`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .functions
            .insert("factor".to_string(), Arc::new(FactorConsolidation));
        registry
            .functions
            .insert("sum".to_string(), Arc::new(SumConsolidation));
        registry
    }

    /// Register a function under its own name.
    pub fn register(&mut self, function: Arc<dyn Consolidate>) -> Result<(), ScoreError> {
        let name = function.name().to_string();
        if self.functions.contains_key(&name) {
            return Err(ScoreError::InvalidConfig(format!(
                "consolidation function '{}' registered twice",
                name
            )));
        }
        self.functions.insert(name, function);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Consolidate>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

// =============================================================================
// VERDICT
// =============================================================================

/// Final, frozen outcome of one metric for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricVerdict {
    pub metric: String,
    pub score: f64,
    pub required_score: f64,
    pub reject_score: f64,
    /// `score >= required_score`.
    pub flagged: bool,
    /// The metric's action when `score >= reject_score`.
    pub action: Option<Action>,
    pub symbols: BTreeMap<String, SymbolResult>,
}

impl MetricVerdict {
    /// Short label for human output.
    #[must_use]
    pub fn disposition(&self) -> String {
        match (self.action, self.flagged) {
            (Some(action), _) => action.to_string(),
            (None, true) => "flagged".to_string(),
            (None, false) => "no action".to_string(),
        }
    }
}

// =============================================================================
// CONSOLIDATOR
// =============================================================================

/// Applies a metric's consolidation function exactly once per result.
pub struct Consolidator;

impl Consolidator {
    /// Consolidate a metric result.
    ///
    /// Sets the consolidated flag before returning. A second call fails with
    /// `AlreadyConsolidated`, which carries the earlier verdict unchanged.
    pub fn consolidate(result: &mut MetricResult) -> Result<MetricVerdict, ScoreError> {
        if let Some(previous) = result.verdict() {
            return Err(ScoreError::AlreadyConsolidated {
                metric: result.name().to_string(),
                previous: Box::new(previous.clone()),
            });
        }

        let metric = Arc::clone(result.metric());
        let score = metric
            .consolidation
            .consolidate(&metric, result.symbols(), result.score());

        let verdict = MetricVerdict {
            metric: metric.name.clone(),
            score,
            required_score: metric.required_score,
            reject_score: metric.reject_score,
            flagged: score >= metric.required_score,
            action: (score >= metric.reject_score).then_some(metric.action),
            symbols: result.symbols().clone(),
        };
        result.finalize(verdict.clone());
        Ok(verdict)
    }

    /// Consolidate, or return the frozen verdict if already done.
    pub fn consolidate_or_previous(result: &mut MetricResult) -> MetricVerdict {
        match Self::consolidate(result) {
            Ok(verdict) => verdict,
            Err(ScoreError::AlreadyConsolidated { previous, .. }) => *previous,
            Err(other) => {
                // consolidate() only ever fails with AlreadyConsolidated
                tracing::warn!(metric = result.name(), error = %other, "unexpected consolidation error");
                result.verdict().cloned().unwrap_or_else(|| MetricVerdict {
                    metric: result.name().to_string(),
                    score: 0.0,
                    required_score: result.metric().required_score,
                    reject_score: result.metric().reject_score,
                    flagged: false,
                    action: None,
                    symbols: BTreeMap::new(),
                })
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
