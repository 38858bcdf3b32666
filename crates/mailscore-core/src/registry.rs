//! # Symbol Registry
//!
//! Maps symbol names to the filters that produce them.
//!
//! - Populated while a configuration snapshot is built, read-only afterwards
//! - Iterated in registration order, so filter side effects are reproducible
//! - Replaced as a whole on reconfiguration, never mutated in place

use crate::primitives::MAX_SYMBOL_NAME_LENGTH;
use crate::task::Task;
use crate::{Message, ScoreError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// FILTER CAPABILITY
// =============================================================================

/// How a filter is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Compiled-in check that inserts into the task directly.
    Native,
    /// Embedded script that returns emissions for the core to insert.
    Scripted,
}

/// What a filter did when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// All of the filter's symbols are already inserted.
    Completed,
    /// The filter handed a [`PendingFilter`](crate::PendingFilter) to an
    /// external collaborator and will finish later.
    Deferred,
}

/// A check run against every task.
pub trait Filter: Send + Sync {
    fn kind(&self) -> FilterKind;

    /// Run the check.
    ///
    /// An `Err` is logged by the scheduler and the filter contributes nothing;
    /// it never stops the remaining filters.
    fn invoke(&self, task: &Arc<Task>) -> Result<Flow, ScoreError>;
}

type NativeFn = dyn Fn(&Arc<Task>) -> Result<Flow, ScoreError> + Send + Sync;

/// A native filter backed by a closure.
#[derive(Clone)]
pub struct NativeFilter {
    check: Arc<NativeFn>,
}

impl NativeFilter {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Arc<Task>) -> Result<Flow, ScoreError> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFilter").finish_non_exhaustive()
    }
}

impl Filter for NativeFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Native
    }

    fn invoke(&self, task: &Arc<Task>) -> Result<Flow, ScoreError> {
        (self.check)(task)
    }
}

/// A symbol a scripted check wants inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub symbol: String,
    pub weight: f64,
    pub options: Vec<String>,
}

impl Emission {
    #[must_use]
    pub fn new(symbol: impl Into<String>, weight: f64) -> Self {
        Self {
            symbol: symbol.into(),
            weight,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

type ScriptFn = dyn Fn(&Message) -> Result<Vec<Emission>, String> + Send + Sync;

/// A scripted filter: sees only the message and returns emissions.
#[derive(Clone)]
pub struct ScriptedFilter {
    script: String,
    check: Arc<ScriptFn>,
}

impl ScriptedFilter {
    pub fn new<F>(script: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Message) -> Result<Vec<Emission>, String> + Send + Sync + 'static,
    {
        Self {
            script: script.into(),
            check: Arc::new(check),
        }
    }

    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }
}

impl fmt::Debug for ScriptedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedFilter")
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

impl Filter for ScriptedFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Scripted
    }

    fn invoke(&self, task: &Arc<Task>) -> Result<Flow, ScoreError> {
        let emissions = (self.check)(task.message()).map_err(|reason| ScoreError::FilterFailure {
            symbol: self.script.clone(),
            reason,
        })?;
        for emission in emissions {
            trace!(script = %self.script, symbol = %emission.symbol, "scripted emission");
            task.insert(&emission.symbol, emission.weight, &emission.options);
        }
        Ok(Flow::Completed)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// One registered symbol.
#[derive(Clone)]
pub struct Registration {
    pub symbol: String,
    /// Weight the `default` metric inherits when it does not list the symbol.
    pub weight: f64,
    pub filter: Arc<dyn Filter>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("symbol", &self.symbol)
            .field("weight", &self.weight)
            .field("kind", &self.filter.kind())
            .finish()
    }
}

/// Symbol name -> filter mapping in registration order.
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    entries: Vec<Registration>,
    index: BTreeMap<String, usize>,
}

impl SymbolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under a symbol name.
    ///
    /// Fails with `DuplicateSymbol` if the name is taken.
    pub fn register(
        &mut self,
        symbol: impl Into<String>,
        weight: f64,
        filter: Arc<dyn Filter>,
    ) -> Result<(), ScoreError> {
        let symbol = symbol.into();
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_NAME_LENGTH {
            return Err(ScoreError::InvalidConfig(format!(
                "symbol name length must be 1..={}, got {}",
                MAX_SYMBOL_NAME_LENGTH,
                symbol.len()
            )));
        }
        if !weight.is_finite() {
            return Err(ScoreError::InvalidConfig(format!(
                "default weight of {} is not finite",
                symbol
            )));
        }
        if self.index.contains_key(&symbol) {
            return Err(ScoreError::DuplicateSymbol(symbol));
        }

        self.index.insert(symbol.clone(), self.entries.len());
        self.entries.push(Registration {
            symbol,
            weight,
            filter,
        });
        Ok(())
    }

    /// Every registration, in registration order.
    #[must_use]
    pub fn lookup_all(&self) -> &[Registration] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Registration> {
        self.index.get(symbol).and_then(|&i| self.entries.get(i))
    }

    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
