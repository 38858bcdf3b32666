//! # Metrics and the Task Result Set
//!
//! A [`Metric`] is a named scoring profile; a [`MetricResult`] is the per-task
//! accumulator for one metric; a [`ResultSet`] holds one result per metric
//! plus the task's diagnostic message log.
//!
//! Insertion keeps the running score incrementally: every insert adds exactly
//! the weight delta it applied, so the score always equals the sum of the
//! entry weights without ever re-summing them.

use crate::config::MetricConfig;
use crate::consolidation::{Consolidate, ConsolidationRegistry, FactorConsolidation, MetricVerdict};
use crate::primitives::{
    DEFAULT_GROW_FACTOR, DEFAULT_REJECT_SCORE, DEFAULT_REQUIRED_SCORE, MAX_MESSAGE_LOG_LINES,
    MAX_OPTIONS_PER_SYMBOL,
};
use crate::{Action, ScoreError, SymbolResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// METRIC DEFINITION
// =============================================================================

/// A named scoring profile.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub consolidation: Arc<dyn Consolidate>,
    /// Multiplier applied to the running growth factor on every repeat.
    pub grow_factor: f64,
    pub max_grow_factor: Option<f64>,
    pub required_score: f64,
    pub reject_score: f64,
    pub action: Action,
    symbols: BTreeMap<String, f64>,
    factors: BTreeMap<String, f64>,
}

impl Metric {
    /// Create a metric with default thresholds, no symbols and factor consolidation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consolidation: Arc::new(FactorConsolidation),
            grow_factor: DEFAULT_GROW_FACTOR,
            max_grow_factor: None,
            required_score: DEFAULT_REQUIRED_SCORE,
            reject_score: DEFAULT_REJECT_SCORE,
            action: Action::Reject,
            symbols: BTreeMap::new(),
            factors: BTreeMap::new(),
        }
    }

    /// Build a metric from its configuration table.
    pub fn from_config(
        name: &str,
        config: &MetricConfig,
        consolidations: &ConsolidationRegistry,
    ) -> Result<Self, ScoreError> {
        let consolidation = consolidations.get(&config.consolidation).ok_or_else(|| {
            ScoreError::UnknownConsolidation {
                metric: name.to_string(),
                function: config.consolidation.clone(),
            }
        })?;

        let metric = Self {
            name: name.to_string(),
            consolidation,
            grow_factor: config.grow_factor,
            max_grow_factor: config.max_grow_factor,
            required_score: config.required_score,
            reject_score: config.reject_score,
            action: config.action,
            symbols: config.symbols.clone(),
            factors: config.factors.clone(),
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Check the numeric invariants of the definition.
    pub fn validate(&self) -> Result<(), ScoreError> {
        let invalid = |what: String| -> Result<(), ScoreError> {
            Err(ScoreError::InvalidConfig(format!("metric {}: {}", self.name, what)))
        };

        if !self.grow_factor.is_finite() || self.grow_factor <= 0.0 {
            return invalid(format!("grow_factor must be positive, got {}", self.grow_factor));
        }
        if let Some(cap) = self.max_grow_factor {
            if !cap.is_finite() || cap < 1.0 {
                return invalid(format!("max_grow_factor must be >= 1, got {}", cap));
            }
        }
        if !self.required_score.is_finite() || !self.reject_score.is_finite() {
            return invalid("scores must be finite".to_string());
        }
        if self.reject_score < self.required_score {
            return invalid(format!(
                "reject_score {} is below required_score {}",
                self.reject_score, self.required_score
            ));
        }
        for (symbol, weight) in self.symbols.iter().chain(self.factors.iter()) {
            if !weight.is_finite() {
                return invalid(format!("weight of {} is not finite", symbol));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>, weight: f64) -> Self {
        self.symbols.insert(symbol.into(), weight);
        self
    }

    #[must_use]
    pub fn with_factor(mut self, symbol: impl Into<String>, factor: f64) -> Self {
        self.factors.insert(symbol.into(), factor);
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, required_score: f64, reject_score: f64) -> Self {
        self.required_score = required_score;
        self.reject_score = reject_score;
        self
    }

    #[must_use]
    pub fn with_grow_factor(mut self, grow_factor: f64, cap: Option<f64>) -> Self {
        self.grow_factor = grow_factor;
        self.max_grow_factor = cap;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn with_consolidation(mut self, consolidation: Arc<dyn Consolidate>) -> Self {
        self.consolidation = consolidation;
        self
    }

    /// Configured weight of a symbol, `None` if this metric ignores it.
    #[must_use]
    pub fn weight(&self, symbol: &str) -> Option<f64> {
        self.symbols.get(symbol).copied()
    }

    /// Consolidation multiplier of a symbol (1.0 unless configured).
    #[must_use]
    pub fn factor(&self, symbol: &str) -> f64 {
        self.factors.get(symbol).copied().unwrap_or(1.0)
    }

    /// The symbol -> weight table.
    #[must_use]
    pub fn symbols(&self) -> &BTreeMap<String, f64> {
        &self.symbols
    }

    /// Add a weight only if the symbol is not listed yet.
    pub(crate) fn seed_weight(&mut self, symbol: &str, weight: f64) {
        self.symbols.entry(symbol.to_string()).or_insert(weight);
    }

    /// Next value of a result's running growth factor.
    ///
    /// Capped by `max_grow_factor`; never becomes non-finite.
    fn next_grow_factor(&self, current: f64) -> f64 {
        let mut next = current * self.grow_factor;
        if let Some(cap) = self.max_grow_factor {
            next = next.min(cap);
        }
        if next.is_finite() { next } else { current }
    }
}

// =============================================================================
// METRIC RESULT
// =============================================================================

/// Outcome of inserting a symbol into one metric result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Insertion {
    /// First occurrence of the symbol.
    Inserted { delta: f64 },
    /// Repeat occurrence; growth applied.
    Accumulated { delta: f64 },
    /// The metric's weight table does not contain the symbol.
    Unrecognized,
    /// The metric is already consolidated; nothing changed.
    Finalized,
}

/// Per-task accumulator for one metric.
#[derive(Debug, Clone)]
pub struct MetricResult {
    metric: Arc<Metric>,
    score: f64,
    symbols: BTreeMap<String, SymbolResult>,
    grow_factor: f64,
    consolidated: bool,
    composites_resolved: bool,
    verdict: Option<MetricVerdict>,
}

impl MetricResult {
    #[must_use]
    pub fn new(metric: Arc<Metric>) -> Self {
        let grow_factor = metric
            .max_grow_factor
            .map_or(metric.grow_factor, |cap| metric.grow_factor.min(cap));
        Self {
            metric,
            score: 0.0,
            symbols: BTreeMap::new(),
            grow_factor,
            consolidated: false,
            composites_resolved: false,
            verdict: None,
        }
    }

    /// Insert or accumulate a symbol.
    ///
    /// `weight` multiplies the configured weight. The first occurrence stores
    /// the plain weight; each repeat adds `weight x current growth factor` and
    /// then advances the growth factor.
    pub fn insert(&mut self, symbol: &str, weight: f64, options: &[String]) -> Insertion {
        let Some(configured) = self.metric.weight(symbol) else {
            return Insertion::Unrecognized;
        };
        if self.consolidated {
            return Insertion::Finalized;
        }

        let base = configured * weight;
        let outcome = match self.symbols.get_mut(symbol) {
            Some(entry) => {
                let delta = base * self.grow_factor;
                entry.weight += delta;
                entry.count = entry.count.saturating_add(1);
                append_options(&mut entry.options, options);
                self.grow_factor = self.metric.next_grow_factor(self.grow_factor);
                Insertion::Accumulated { delta }
            }
            None => {
                let mut kept = Vec::with_capacity(options.len().min(MAX_OPTIONS_PER_SYMBOL));
                append_options(&mut kept, options);
                self.symbols
                    .insert(symbol.to_string(), SymbolResult::new(base, kept));
                Insertion::Inserted { delta: base }
            }
        };

        if let Insertion::Inserted { delta } | Insertion::Accumulated { delta } = outcome {
            self.score += delta;
        }
        outcome
    }

    #[must_use]
    pub fn metric(&self) -> &Arc<Metric> {
        &self.metric
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metric.name
    }

    /// Running (unconsolidated) score.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub fn symbols(&self) -> &BTreeMap<String, SymbolResult> {
        &self.symbols
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&SymbolResult> {
        self.symbols.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Current value of the evolving growth factor.
    #[must_use]
    pub fn grow_factor(&self) -> f64 {
        self.grow_factor
    }

    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        self.consolidated
    }

    #[must_use]
    pub fn composites_resolved(&self) -> bool {
        self.composites_resolved
    }

    /// The final verdict, once consolidated.
    #[must_use]
    pub fn verdict(&self) -> Option<&MetricVerdict> {
        self.verdict.as_ref()
    }

    pub(crate) fn mark_composites_resolved(&mut self) {
        self.composites_resolved = true;
    }

    /// Record the final verdict. The consolidated flag is never cleared.
    pub(crate) fn finalize(&mut self, verdict: MetricVerdict) {
        self.consolidated = true;
        self.verdict = Some(verdict);
    }
}

fn append_options(into: &mut Vec<String>, options: &[String]) {
    let room = MAX_OPTIONS_PER_SYMBOL.saturating_sub(into.len());
    into.extend(options.iter().take(room).cloned());
}

// =============================================================================
// RESULT SET
// =============================================================================

/// Which metrics an insertion targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Targets {
    /// Every metric whose weight table knows the symbol.
    #[default]
    All,
    /// Only the named metrics.
    Only(Vec<String>),
}

impl Targets {
    #[must_use]
    pub fn only(metric: impl Into<String>) -> Self {
        Self::Only(vec![metric.into()])
    }

    #[must_use]
    pub fn includes(&self, metric: &str) -> bool {
        match self {
            Targets::All => true,
            Targets::Only(names) => names.iter().any(|n| n == metric),
        }
    }
}

/// Summary of one `insert_result` call across metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InsertReport {
    /// Metrics whose score changed.
    pub applied: usize,
    /// Metrics that ignored the call because they were already final.
    pub finalized: usize,
    /// Total score delta applied across metrics.
    pub delta: f64,
}

/// Per-task mutable scoring state.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    metrics: BTreeMap<String, MetricResult>,
    messages: Vec<String>,
}

impl ResultSet {
    /// One empty result per configured metric.
    #[must_use]
    pub fn new(metrics: &BTreeMap<String, Arc<Metric>>) -> Self {
        Self {
            metrics: metrics
                .iter()
                .map(|(name, metric)| (name.clone(), MetricResult::new(Arc::clone(metric))))
                .collect(),
            messages: Vec::new(),
        }
    }

    /// Insert a symbol into every targeted metric that recognizes it.
    pub fn insert(
        &mut self,
        targets: &Targets,
        symbol: &str,
        weight: f64,
        options: &[String],
    ) -> InsertReport {
        let mut report = InsertReport::default();
        for (name, result) in self.metrics.iter_mut() {
            if !targets.includes(name) {
                continue;
            }
            match result.insert(symbol, weight, options) {
                Insertion::Inserted { delta } | Insertion::Accumulated { delta } => {
                    report.applied += 1;
                    report.delta += delta;
                }
                Insertion::Finalized => {
                    debug!(metric = %name, symbol, "late insertion ignored: metric already consolidated");
                    report.finalized += 1;
                }
                Insertion::Unrecognized => {}
            }
        }
        report
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&MetricResult> {
        self.metrics.get(name)
    }

    pub fn metric_mut(&mut self, name: &str) -> Option<&mut MetricResult> {
        self.metrics.get_mut(name)
    }

    /// Metric names in deterministic order.
    #[must_use]
    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricResult)> {
        self.metrics.iter()
    }

    /// Append a diagnostic line to the message log.
    pub fn log(&mut self, line: impl Into<String>) {
        if self.messages.len() < MAX_MESSAGE_LOG_LINES {
            self.messages.push(line.into());
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

// =============================================================================
// TESTS
// =============================================================================
