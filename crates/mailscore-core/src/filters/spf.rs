//! # SPF Check
//!
//! Looks up the sender domain's SPF record through an [`SpfResolver`] and
//! matches the connecting client address against it.
//!
//! The lookup is the one suspension point: the filter defers, spawns the
//! resolution with the scheduler timeout and inserts its symbol from the
//! completion. Addresses are walked in record order and the first network
//! containing the client decides the outcome:
//!
//! | mechanism           | symbol            |
//! |---------------------|-------------------|
//! | `fail`              | `symbol_fail`     |
//! | `softfail`/`neutral`| `symbol_softfail` |
//! | `pass`              | `symbol_allow`    |

use crate::config::{SpfAddrConfig, SpfConfig};
use crate::generation::GenerationBuilder;
use crate::registry::{Filter, FilterKind, Flow};
use crate::task::Task;
use crate::ScoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// RECORDS
// =============================================================================

/// Qualifier of an SPF address mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpfMechanism {
    Fail,
    SoftFail,
    Neutral,
    #[default]
    Pass,
}

/// One `ip4:` element of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfAddr {
    pub addr: Ipv4Addr,
    /// Prefix length, 0..=32.
    pub mask: u8,
    pub mechanism: SpfMechanism,
    /// Source text, attached as the symbol option.
    pub spf_string: String,
}

impl SpfAddr {
    pub fn new(addr: Ipv4Addr, mask: u8, mechanism: SpfMechanism) -> Result<Self, ScoreError> {
        if mask > 32 {
            return Err(ScoreError::InvalidConfig(format!(
                "spf mask of {} must be 0..=32, got {}",
                addr, mask
            )));
        }
        Ok(Self {
            addr,
            mask,
            mechanism,
            spf_string: format!("ip4:{}/{}", addr, mask),
        })
    }

    pub fn from_config(config: &SpfAddrConfig) -> Result<Self, ScoreError> {
        let mut addr = Self::new(config.addr, config.mask, config.mechanism)?;
        if let Some(text) = &config.spf_string {
            addr.spf_string = text.clone();
        }
        Ok(addr)
    }

    /// Whether `client` lies in this network. Mask 0 matches everything.
    #[must_use]
    pub fn matches(&self, client: Ipv4Addr) -> bool {
        let mask = if self.mask == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.mask))
        };
        u32::from(self.addr) & mask == u32::from(client) & mask
    }
}

/// A resolved record: the ordered address list of a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpfRecord {
    pub domain: String,
    pub addrs: Vec<SpfAddr>,
}

impl SpfRecord {
    /// First address element containing `client`.
    #[must_use]
    pub fn evaluate(&self, client: Ipv4Addr) -> Option<&SpfAddr> {
        self.addrs.iter().find(|addr| addr.matches(client))
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// External collaborator that fetches SPF records.
#[async_trait]
pub trait SpfResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<SpfRecord, ScoreError>;
}

/// Resolver answering from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticSpfResolver {
    records: BTreeMap<String, SpfRecord>,
}

impl StaticSpfResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver over the `[spf.records]` table.
    pub fn from_config(config: &SpfConfig) -> Result<Self, ScoreError> {
        let mut resolver = Self::new();
        for (domain, addrs) in &config.records {
            let addrs = addrs
                .iter()
                .map(SpfAddr::from_config)
                .collect::<Result<Vec<_>, _>>()?;
            resolver = resolver.with_record(SpfRecord {
                domain: domain.clone(),
                addrs,
            });
        }
        Ok(resolver)
    }

    #[must_use]
    pub fn with_record(mut self, record: SpfRecord) -> Self {
        self.records.insert(record.domain.to_ascii_lowercase(), record);
        self
    }
}

#[async_trait]
impl SpfResolver for StaticSpfResolver {
    async fn resolve(&self, domain: &str) -> Result<SpfRecord, ScoreError> {
        self.records
            .get(&domain.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ScoreError::FilterFailure {
                symbol: "spf".to_string(),
                reason: format!("no spf record for {}", domain),
            })
    }
}

// =============================================================================
// FILTER
// =============================================================================

/// Symbol names emitted per outcome class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfSymbols {
    pub allow: String,
    pub fail: String,
    pub softfail: String,
}

impl SpfSymbols {
    fn apply(&self, task: &Task, record: &SpfRecord, client: Ipv4Addr) {
        let Some(addr) = record.evaluate(client) else {
            trace!(message_id = %task.message().id, domain = %record.domain, "no spf element matched");
            return;
        };
        let (symbol, outcome) = match addr.mechanism {
            SpfMechanism::Fail => (&self.fail, "fail"),
            SpfMechanism::SoftFail | SpfMechanism::Neutral => (&self.softfail, "softfail"),
            SpfMechanism::Pass => (&self.allow, "allow"),
        };
        task.insert(symbol, 1.0, std::slice::from_ref(&addr.spf_string));
        task.log(format!("(SPF): spf {}", outcome));
    }
}

/// The SPF filter, registered against `symbol_fail`.
#[derive(Clone)]
pub struct SpfFilter {
    symbols: SpfSymbols,
    weight: f64,
    resolver: Arc<dyn SpfResolver>,
}

impl fmt::Debug for SpfFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpfFilter")
            .field("symbols", &self.symbols)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

impl SpfFilter {
    #[must_use]
    pub fn new(config: &SpfConfig, resolver: Arc<dyn SpfResolver>) -> Self {
        Self {
            symbols: SpfSymbols {
                allow: config.symbol_allow.clone(),
                fail: config.symbol_fail.clone(),
                softfail: config.symbol_softfail.clone(),
            },
            weight: config.weight,
            resolver,
        }
    }

    #[must_use]
    pub fn symbols(&self) -> &SpfSymbols {
        &self.symbols
    }

    pub fn register(self, builder: &mut GenerationBuilder) -> Result<(), ScoreError> {
        let symbol = self.symbols.fail.clone();
        let weight = self.weight;
        builder.register(symbol, weight, Arc::new(self))?;
        Ok(())
    }

    fn client(task: &Task) -> Option<Ipv4Addr> {
        match task.message().from_addr {
            Some(IpAddr::V4(addr)) if !addr.is_unspecified() && !addr.is_broadcast() => Some(addr),
            _ => None,
        }
    }
}

impl Filter for SpfFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Native
    }

    fn invoke(&self, task: &Arc<Task>) -> Result<Flow, ScoreError> {
        let message_id = task.message().id.clone();
        let Some(client) = Self::client(task) else {
            trace!(%message_id, "spf skipped: no usable ipv4 client address");
            return Ok(Flow::Completed);
        };
        let cannot_request = |detail: Option<String>| ScoreError::FilterFailure {
            symbol: self.symbols.fail.clone(),
            reason: match detail {
                Some(detail) => format!("cannot make spf request for [{}]: {}", message_id, detail),
                None => format!("cannot make spf request for [{}]", message_id),
            },
        };
        let Some(domain) = task.message().sender_domain() else {
            return Err(cannot_request(None));
        };

        let timeout = task.generation().scheduler().timeout();
        let resolver = Arc::clone(&self.resolver);
        let symbols = self.symbols.clone();
        task.defer(self.symbols.fail.as_str())
            .spawn(
                timeout,
                async move { resolver.resolve(&domain).await },
                move |task, record| symbols.apply(task, &record, client),
            )
            .map_err(|e| cannot_request(Some(e.to_string())))?;

        Ok(Flow::Deferred)
    }
}

// =============================================================================
// TESTS
// =============================================================================
