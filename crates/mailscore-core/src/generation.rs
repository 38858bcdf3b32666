//! # Configuration Generations
//!
//! A [`Generation`] is an immutable configuration snapshot: the symbol
//! registry, the metric definitions, the composite resolver and the scheduler
//! options. Tasks hold the `Arc<Generation>` they were created with, so a
//! reload never changes the rules under a scan in flight.
//!
//! The [`Engine`] owns the current generation and swaps it atomically.

use crate::composite::{Composite, CompositeResolver};
use crate::config::{SchedulerConfig, ScoreConfig};
use crate::consolidation::ConsolidationRegistry;
use crate::filters::rules::HeaderRule;
use crate::filters::spf::{SpfFilter, SpfResolver, StaticSpfResolver};
use crate::metric::Metric;
use crate::primitives::DEFAULT_METRIC;
use crate::registry::{Filter, SymbolRegistry};
use crate::scheduler::{ChainState, Scheduler};
use crate::task::{ScanReport, Task};
use crate::{Message, ScoreError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::oneshot;
use tracing::{info, warn};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// GENERATION
// =============================================================================

/// Immutable configuration snapshot shared by every task that uses it.
#[derive(Debug)]
pub struct Generation {
    id: u64,
    registry: SymbolRegistry,
    metrics: BTreeMap<String, Arc<Metric>>,
    composites: CompositeResolver,
    scheduler: SchedulerConfig,
}

impl Generation {
    /// Build a generation straight from a configuration document.
    pub fn from_config(config: &ScoreConfig) -> Result<Self, ScoreError> {
        GenerationBuilder::from_config(config)?.build()
    }

    /// Monotonic identifier, unique within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> &BTreeMap<String, Arc<Metric>> {
        &self.metrics
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&Arc<Metric>> {
        self.metrics.get(name)
    }

    #[must_use]
    pub fn composites(&self) -> &CompositeResolver {
        &self.composites
    }

    #[must_use]
    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects registrations, metrics and composites, then validates them into
/// a [`Generation`].
#[derive(Debug, Default)]
pub struct GenerationBuilder {
    registry: SymbolRegistry,
    metrics: BTreeMap<String, Metric>,
    composites: Vec<Composite>,
    scheduler: SchedulerConfig,
}

impl GenerationBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder populated from a configuration document, using the static
    /// SPF resolver for the `[spf]` records.
    pub fn from_config(config: &ScoreConfig) -> Result<Self, ScoreError> {
        let resolver = match &config.spf {
            Some(spf) => Some(Arc::new(StaticSpfResolver::from_config(spf)?) as Arc<dyn SpfResolver>),
            None => None,
        };
        Self::from_config_with_resolver(config, resolver)
    }

    /// Builder populated from a configuration document with a caller-supplied
    /// SPF resolver. The resolver is ignored when `[spf]` is absent.
    pub fn from_config_with_resolver(
        config: &ScoreConfig,
        resolver: Option<Arc<dyn SpfResolver>>,
    ) -> Result<Self, ScoreError> {
        let mut builder = Self::new();
        builder.scheduler(config.scheduler);

        let consolidations = ConsolidationRegistry::with_builtins();
        for (name, metric) in &config.metrics {
            builder.metric(Metric::from_config(name, metric, &consolidations)?);
        }

        for (name, composite) in &config.composites {
            builder.composite(Composite::parse(
                name.as_str(),
                &composite.expression,
                composite.metrics.clone(),
            )?);
        }

        if let (Some(spf), Some(resolver)) = (&config.spf, resolver) {
            SpfFilter::new(spf, resolver).register(&mut builder)?;
        }

        for rule in &config.rules {
            HeaderRule::from_config(rule)?.register(&mut builder)?;
        }

        Ok(builder)
    }

    pub fn scheduler(&mut self, scheduler: SchedulerConfig) -> &mut Self {
        self.scheduler = scheduler;
        self
    }

    /// Register a filter. Fails with `DuplicateSymbol` if the name is taken.
    pub fn register(
        &mut self,
        symbol: impl Into<String>,
        weight: f64,
        filter: Arc<dyn Filter>,
    ) -> Result<&mut Self, ScoreError> {
        self.registry.register(symbol, weight, filter)?;
        Ok(self)
    }

    /// Add or replace a metric definition.
    pub fn metric(&mut self, metric: Metric) -> &mut Self {
        self.metrics.insert(metric.name.clone(), metric);
        self
    }

    pub fn composite(&mut self, composite: Composite) -> &mut Self {
        self.composites.push(composite);
        self
    }

    /// Validate everything and freeze it into a generation.
    ///
    /// The `default` metric always exists and inherits the registry default
    /// weight of every registered symbol it does not list itself.
    pub fn build(self) -> Result<Generation, ScoreError> {
        let Self {
            registry,
            mut metrics,
            composites,
            scheduler,
        } = self;

        if scheduler.timeout_ms == 0 {
            return Err(ScoreError::InvalidConfig(
                "scheduler.timeout_ms must be positive".to_string(),
            ));
        }

        let default = metrics
            .entry(DEFAULT_METRIC.to_string())
            .or_insert_with(|| Metric::new(DEFAULT_METRIC));
        for registration in registry.lookup_all() {
            default.seed_weight(&registration.symbol, registration.weight);
        }

        for metric in metrics.values() {
            metric.validate()?;
        }

        for composite in &composites {
            if let Some(unknown) = composite.metrics.iter().find(|m| !metrics.contains_key(*m)) {
                return Err(ScoreError::UnknownMetric(format!(
                    "{} (target of composite {})",
                    unknown, composite.name
                )));
            }
        }

        let generation = Generation {
            id: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            registry,
            metrics: metrics
                .into_iter()
                .map(|(name, metric)| (name, Arc::new(metric)))
                .collect(),
            composites: CompositeResolver::new(composites),
            scheduler,
        };

        info!(
            generation = generation.id,
            symbols = generation.registry.len(),
            metrics = generation.metrics.len(),
            composites = generation.composites.len(),
            "configuration generation built"
        );
        Ok(generation)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Holds the current generation and runs scans against it.
#[derive(Debug)]
pub struct Engine {
    current: RwLock<Arc<Generation>>,
}

impl Engine {
    #[must_use]
    pub fn new(generation: Generation) -> Self {
        Self {
            current: RwLock::new(Arc::new(generation)),
        }
    }

    pub fn from_config(config: &ScoreConfig) -> Result<Self, ScoreError> {
        Ok(Self::new(Generation::from_config(config)?))
    }

    /// The generation new tasks will use.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new generation; returns the one it replaced.
    ///
    /// Tasks already running keep the snapshot they started with.
    pub fn reload(&self, generation: Generation) -> Arc<Generation> {
        let next = Arc::new(generation);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        info!(from = current.id(), to = next.id(), "configuration reloaded");
        std::mem::replace(&mut *current, next)
    }

    /// Build a generation from `config` and swap it in.
    ///
    /// On error the current generation stays active.
    pub fn reload_config(&self, config: &ScoreConfig) -> Result<u64, ScoreError> {
        let generation = Generation::from_config(config)?;
        let id = generation.id();
        self.reload(generation);
        Ok(id)
    }

    /// Start a task without waiting for it.
    ///
    /// The receiver yields the report once the continuation ran.
    pub fn start(&self, message: Message) -> (Arc<Task>, ChainState, oneshot::Receiver<ScanReport>) {
        let (task, receiver) = Task::with_delivery(self.snapshot(), message);
        let state = Scheduler::run(&task);
        (task, state, receiver)
    }

    /// Scan a message and wait for its report.
    pub async fn scan(&self, message: Message) -> ScanReport {
        let (task, _, receiver) = self.start(message);
        match receiver.await {
            Ok(report) => report,
            Err(_) => {
                warn!(message_id = %task.message().id, "report channel closed before delivery");
                task.report().unwrap_or_else(|| ScanReport {
                    message_id: task.message().id.clone(),
                    verdicts: BTreeMap::new(),
                    messages: Vec::new(),
                })
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
