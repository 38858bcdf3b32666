//! # mailscore-core
//!
//! The scoring core of mailscore - THE LOGIC.
//!
//! A message is scored by running every registered filter against a task.
//! Filters emit weighted symbols; symbols are accumulated per metric;
//! composites derive further symbols once the chain is exhausted; each
//! metric is then consolidated into a score and a disposition.
//!
//! ## Architectural Constraints
//!
//! - No transport and no file I/O: configuration and messages arrive as values
//! - Configuration snapshots ([`Generation`]) are immutable and shared
//!   read-only by every task; reconfiguration swaps the whole snapshot
//! - Filters may suspend only at filter boundaries, on an external lookup
//! - Post-filter work runs exactly once per task, guarded by an atomic latch
//! - Deterministic iteration: registration order and `BTreeMap` everywhere

// =============================================================================
// MODULES
// =============================================================================

pub mod composite;
pub mod config;
pub mod consolidation;
pub mod filters;
pub mod generation;
pub mod metric;
pub mod primitives;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Action, Header, Message, ScoreError, SymbolResult};

// =============================================================================
// RE-EXPORTS: Scoring Engine
// =============================================================================

pub use composite::{Composite, CompositeResolver, Expr};
pub use config::{
    CompositeConfig, MetricConfig, ResumePolicy, RuleConfig, SchedulerConfig, ScoreConfig,
    SpfAddrConfig, SpfConfig,
};
pub use consolidation::{
    Consolidate, ConsolidationRegistry, Consolidator, FactorConsolidation, MetricVerdict,
    SumConsolidation,
};
pub use generation::{Engine, Generation, GenerationBuilder};
pub use metric::{InsertReport, Insertion, Metric, MetricResult, ResultSet, Targets};
pub use registry::{
    Emission, Filter, FilterKind, Flow, NativeFilter, Registration, ScriptedFilter,
    SymbolRegistry,
};
pub use scheduler::{ChainState, Scheduler};
pub use task::{ContinuationGuard, PendingFilter, ScanReport, Task};

// =============================================================================
// RE-EXPORTS: Bundled Filters
// =============================================================================

pub use filters::rules::HeaderRule;
pub use filters::spf::{
    SpfAddr, SpfFilter, SpfMechanism, SpfRecord, SpfResolver, SpfSymbols, StaticSpfResolver,
};
