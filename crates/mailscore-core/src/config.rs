//! # Configuration Surface
//!
//! Serde model of the configuration the core consumes. Loading the document
//! from disk is the binary's job; the core only ever sees these values and
//! turns them into an immutable [`Generation`](crate::Generation).

use crate::filters::spf::SpfMechanism;
use crate::primitives::{
    DEFAULT_CONSOLIDATION, DEFAULT_FILTER_TIMEOUT_MS, DEFAULT_GROW_FACTOR, DEFAULT_REJECT_SCORE,
    DEFAULT_REQUIRED_SCORE, DEFAULT_SYMBOL_WEIGHT,
};
use crate::Action;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreConfig {
    pub scheduler: SchedulerConfig,
    pub metrics: BTreeMap<String, MetricConfig>,
    pub composites: BTreeMap<String, CompositeConfig>,
    pub spf: Option<SpfConfig>,
    pub rules: Vec<RuleConfig>,
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// When a suspended task's continuation guard may be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// The first async completion after the filter pass advances the chain.
    #[default]
    First,
    /// The chain advances once every async filter has completed.
    All,
}

impl ResumePolicy {
    /// Whether the chain may advance given the pending/complete counts.
    #[must_use]
    pub fn ready(self, outstanding: usize, completed: usize) -> bool {
        match self {
            ResumePolicy::First => outstanding == 0 || completed > 0,
            ResumePolicy::All => outstanding == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Bound on each asynchronous filter's external operation.
    pub timeout_ms: u64,
    pub resume: ResumePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_FILTER_TIMEOUT_MS,
            resume: ResumePolicy::First,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// One `[metrics.<name>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricConfig {
    pub consolidation: String,
    pub grow_factor: f64,
    /// Cap on the effective growth multiplier; `None` leaves it unbounded.
    pub max_grow_factor: Option<f64>,
    pub required_score: f64,
    pub reject_score: f64,
    pub action: Action,
    /// Symbol name -> configured weight.
    pub symbols: BTreeMap<String, f64>,
    /// Symbol name -> multiplier used by the factor consolidation.
    pub factors: BTreeMap<String, f64>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            consolidation: DEFAULT_CONSOLIDATION.to_string(),
            grow_factor: DEFAULT_GROW_FACTOR,
            max_grow_factor: None,
            required_score: DEFAULT_REQUIRED_SCORE,
            reject_score: DEFAULT_REJECT_SCORE,
            action: Action::Reject,
            symbols: BTreeMap::new(),
            factors: BTreeMap::new(),
        }
    }
}

// =============================================================================
// COMPOSITES
// =============================================================================

/// One `[composites.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeConfig {
    pub expression: String,
    /// Target metrics; empty means every metric.
    #[serde(default)]
    pub metrics: Vec<String>,
}

// =============================================================================
// MODULE OPTIONS
// =============================================================================

/// `[spf]` module options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpfConfig {
    pub symbol_allow: String,
    pub symbol_fail: String,
    pub symbol_softfail: String,
    /// Registry default weight of `symbol_fail`.
    pub weight: f64,
    /// Records served by the bundled static resolver, keyed by domain.
    pub records: BTreeMap<String, Vec<SpfAddrConfig>>,
}

impl Default for SpfConfig {
    fn default() -> Self {
        Self {
            symbol_allow: "R_SPF_ALLOW".to_string(),
            symbol_fail: "R_SPF_FAIL".to_string(),
            symbol_softfail: "R_SPF_SOFTFAIL".to_string(),
            weight: DEFAULT_SYMBOL_WEIGHT,
            records: BTreeMap::new(),
        }
    }
}

/// One address element of a configured SPF record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpfAddrConfig {
    pub addr: Ipv4Addr,
    #[serde(default = "default_mask")]
    pub mask: u8,
    #[serde(default)]
    pub mechanism: SpfMechanism,
    /// Text attached as the symbol option; defaults to `ip4:<addr>/<mask>`.
    #[serde(default)]
    pub spf_string: Option<String>,
}

fn default_mask() -> u8 {
    32
}

/// A `[[rules]]` entry: emit `symbol` when `header` contains `contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub symbol: String,
    pub header: String,
    pub contains: String,
    #[serde(default = "default_rule_weight")]
    pub weight: f64,
}

fn default_rule_weight() -> f64 {
    DEFAULT_SYMBOL_WEIGHT
}

// =============================================================================
// TESTS
// =============================================================================
