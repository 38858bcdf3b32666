//! # Composite Resolution
//!
//! Composites are derived symbols computed from expressions over other
//! symbols once a task's filter chain is exhausted.
//!
//! - Dependencies are resolved before dependents (topological order fixed
//!   when the configuration snapshot is built)
//! - Cyclic composites are reported once as a configuration warning and
//!   evaluate to "not triggered" on every task
//! - Resolution runs at most once per metric result and never touches a
//!   consolidated metric

mod expr;

pub use expr::{CmpOp, Expr};

use crate::metric::{MetricResult, ResultSet, Targets};
use crate::primitives::{MAX_EXPRESSION_LENGTH, MAX_SYMBOL_NAME_LENGTH};
use crate::ScoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// A named derived symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub name: String,
    pub expression: Expr,
    /// Target metrics; empty means every metric.
    pub metrics: Vec<String>,
}

impl Composite {
    /// Parse a composite definition.
    pub fn parse(
        name: impl Into<String>,
        source: &str,
        metrics: Vec<String>,
    ) -> Result<Self, ScoreError> {
        let name = name.into();
        let invalid = |reason: String| ScoreError::InvalidExpression {
            composite: name.clone(),
            reason,
        };

        if name.is_empty() || name.len() > MAX_SYMBOL_NAME_LENGTH {
            return Err(invalid(format!("name length must be 1..={}", MAX_SYMBOL_NAME_LENGTH)));
        }
        if source.len() > MAX_EXPRESSION_LENGTH {
            return Err(invalid(format!(
                "expression longer than {} bytes",
                MAX_EXPRESSION_LENGTH
            )));
        }
        let expression = Expr::parse(source).map_err(invalid)?;

        Ok(Self {
            name,
            expression,
            metrics,
        })
    }

    #[must_use]
    pub fn targets(&self, metric: &str) -> bool {
        self.metrics.is_empty() || self.metrics.iter().any(|m| m == metric)
    }
}

/// Evaluates every configured composite against a task's results.
#[derive(Debug, Default)]
pub struct CompositeResolver {
    /// Non-cyclic composites in dependency order.
    ordered: Vec<Composite>,
    skipped: BTreeSet<String>,
    cycles: Vec<Vec<String>>,
    passes: AtomicU64,
}

impl CompositeResolver {
    /// Order composites by dependency and set cyclic ones aside.
    #[must_use]
    pub fn new(composites: Vec<Composite>) -> Self {
        let by_name: BTreeMap<&str, &Composite> =
            composites.iter().map(|c| (c.name.as_str(), c)).collect();
        let graph: BTreeMap<&str, Vec<&str>> = by_name
            .iter()
            .map(|(name, composite)| {
                let deps = composite
                    .expression
                    .symbols()
                    .into_iter()
                    .filter(|dep| by_name.contains_key(dep))
                    .collect();
                (*name, deps)
            })
            .collect();

        let mut components = Components::new(&graph);
        for name in graph.keys() {
            if !components.index.contains_key(name) {
                components.connect(*name);
            }
        }

        // Components come out dependencies first.
        let mut order = Vec::new();
        let mut cycles = Vec::new();
        let mut skipped = BTreeSet::new();
        for mut members in components.found {
            let looped = members.len() > 1
                || graph.get(members[0]).is_some_and(|deps| deps.contains(&members[0]));
            if !looped {
                order.push(members[0]);
                continue;
            }
            members.sort_unstable();
            let mut cycle: Vec<String> = members.iter().map(|n| (*n).to_string()).collect();
            cycle.push(cycle[0].clone());
            warn!(
                error = %ScoreError::CompositeCycle(cycle.clone()),
                "composites in a dependency cycle will be skipped"
            );
            skipped.extend(members.iter().map(|n| (*n).to_string()));
            cycles.push(cycle);
        }

        let ordered = order
            .into_iter()
            .filter_map(|name| by_name.get(name).map(|c| (*c).clone()))
            .collect();

        Self {
            ordered,
            skipped,
            cycles,
            passes: AtomicU64::new(0),
        }
    }

    /// Names of the evaluated composites, dependencies first.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.ordered.iter().map(|c| c.name.as_str()).collect()
    }

    /// Detected cycles, one per strongly connected group of composites.
    ///
    /// Members are sorted by name and the first is repeated to close the
    /// loop (`A -> B -> A`).
    #[must_use]
    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    #[must_use]
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skipped.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len() + self.skipped.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resolution passes run so far.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Composites that would be inserted into this metric result.
    ///
    /// Pure: the result is not modified. A composite that triggers is visible
    /// to composites evaluated after it, with its configured weight.
    #[must_use]
    pub fn evaluate(&self, result: &MetricResult) -> Vec<String> {
        let mut overlay: BTreeMap<&str, f64> = BTreeMap::new();
        let mut triggered = Vec::new();

        for composite in &self.ordered {
            if !composite.targets(result.name()) {
                continue;
            }
            let Some(weight) = result.metric().weight(&composite.name) else {
                continue;
            };
            let lookup = |symbol: &str| {
                overlay
                    .get(symbol)
                    .copied()
                    .or_else(|| result.symbol(symbol).map(|entry| entry.weight))
            };
            if composite.expression.eval(&lookup) {
                overlay.insert(&composite.name, weight);
                triggered.push(composite.name.clone());
            }
        }

        triggered
    }

    /// Insert every triggered composite into its metric results.
    ///
    /// Metrics that are consolidated or already resolved are left alone.
    /// Returns the number of composite insertions applied.
    pub fn resolve(&self, results: &mut ResultSet) -> usize {
        self.passes.fetch_add(1, Ordering::Relaxed);
        let mut inserted = 0;

        for metric in results.metric_names() {
            let triggered = match results.metric(&metric) {
                Some(result) if !result.is_consolidated() && !result.composites_resolved() => {
                    self.evaluate(result)
                }
                _ => continue,
            };

            for name in &self.skipped {
                debug!(composite = %name, metric = %metric, "composite skipped: dependency cycle");
            }

            let targets = Targets::only(metric.as_str());
            for name in &triggered {
                inserted += results.insert(&targets, name, 1.0, &[]).applied;
            }
            if let Some(result) = results.metric_mut(&metric) {
                result.mark_composites_resolved();
            }
        }

        inserted
    }
}

/// Tarjan's strongly connected components over the composite graph.
struct Components<'g, 'a> {
    graph: &'g BTreeMap<&'a str, Vec<&'a str>>,
    index: BTreeMap<&'a str, usize>,
    low: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    found: Vec<Vec<&'a str>>,
}

impl<'g, 'a> Components<'g, 'a> {
    fn new(graph: &'g BTreeMap<&'a str, Vec<&'a str>>) -> Self {
        Self {
            graph,
            index: BTreeMap::new(),
            low: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            found: Vec::new(),
        }
    }

    fn connect(&mut self, name: &'a str) {
        let index = self.index.len();
        self.index.insert(name, index);
        self.low.insert(name, index);
        self.stack.push(name);
        self.on_stack.insert(name);

        let graph = self.graph;
        for &dep in graph.get(name).into_iter().flatten() {
            let reached = match self.index.get(dep).copied() {
                None => {
                    self.connect(dep);
                    self.low.get(dep).copied()
                }
                Some(dep_index) if self.on_stack.contains(dep) => Some(dep_index),
                Some(_) => None,
            };
            if let (Some(reached), Some(low)) = (reached, self.low.get_mut(name)) {
                *low = (*low).min(reached);
            }
        }

        if self.low.get(name) != Some(&index) {
            return;
        }
        let mut members = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            members.push(member);
            if member == name {
                break;
            }
        }
        self.found.push(members);
    }
}

// =============================================================================
// TESTS
// =============================================================================
