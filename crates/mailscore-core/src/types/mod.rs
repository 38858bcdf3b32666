//! # Core Type Definitions
//!
//! This module contains the value types shared by every stage of a scan:
//! - Message descriptor handed to filters (`Message`, `Header`)
//! - Per-symbol accumulator (`SymbolResult`)
//! - Metric actions (`Action`)
//! - Error types (`ScoreError`)
//!
//! ## Determinism Guarantees
//!
//! Everything that is iterated while scoring is keyed by `BTreeMap`, so two
//! scans of the same message against the same configuration visit symbols,
//! metrics and composites in the same order.

use crate::consolidation::MetricVerdict;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

// =============================================================================
// MESSAGE
// =============================================================================

/// A single message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The already-decomposed message a task scores.
///
/// Parsing raw mail into this shape happens outside the core; filters only
/// ever see this descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier used in logs.
    pub id: String,
    /// Address of the connecting client, if known.
    #[serde(default)]
    pub from_addr: Option<IpAddr>,
    /// SMTP envelope sender (`MAIL FROM`).
    #[serde(default)]
    pub envelope_from: Option<String>,
    /// Headers in message order.
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl Message {
    /// Create an empty message with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_from_addr(mut self, addr: IpAddr) -> Self {
        self.from_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_envelope_from(mut self, sender: impl Into<String>) -> Self {
        self.envelope_from = Some(sender.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// First header with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Domain part of the envelope sender, lowercased.
    ///
    /// A sender without `@` is treated as a bare domain.
    #[must_use]
    pub fn sender_domain(&self) -> Option<String> {
        let sender = self.envelope_from.as_deref()?.trim();
        let sender = sender.trim_start_matches('<').trim_end_matches('>');
        let domain = sender.rsplit_once('@').map_or(sender, |(_, d)| d);
        if domain.is_empty() {
            None
        } else {
            Some(domain.to_ascii_lowercase())
        }
    }
}

// =============================================================================
// SYMBOL RESULT
// =============================================================================

/// Accumulated state of one symbol inside one metric result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolResult {
    /// Accumulated weight (growth already applied).
    pub weight: f64,
    /// Options attached by the producing filters, in insertion order.
    pub options: Vec<String>,
    /// How many times the symbol was inserted.
    pub count: u32,
}

impl SymbolResult {
    #[must_use]
    pub fn new(weight: f64, options: Vec<String>) -> Self {
        Self {
            weight,
            options,
            count: 1,
        }
    }
}

// =============================================================================
// ACTION
// =============================================================================

/// Action a metric requests once its reject score is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Reject,
    SoftReject,
    RewriteSubject,
    AddHeader,
    Greylist,
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Reject => "reject",
            Action::SoftReject => "soft reject",
            Action::RewriteSubject => "rewrite subject",
            Action::AddHeader => "add header",
            Action::Greylist => "greylist",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while configuring or running scans.
///
/// Only configuration errors are fatal. Filter, composite and consolidation
/// errors are contained by the scheduler and logged; a task always produces
/// a report.
#[derive(Debug, Clone, Error)]
pub enum ScoreError {
    /// A symbol name was registered twice in one registry.
    #[error("Duplicate symbol: {0}")]
    DuplicateSymbol(String),

    /// A filter could not complete (e.g. could not start its lookup).
    #[error("Filter {symbol} failed: {reason}")]
    FilterFailure { symbol: String, reason: String },

    /// An asynchronous filter's external operation did not finish in time.
    #[error("External operation for {symbol} timed out after {timeout_ms} ms")]
    ExternalOperationTimeout { symbol: String, timeout_ms: u64 },

    /// Composites depend on each other in a cycle.
    #[error("Composite dependency cycle: {}", .0.join(" -> "))]
    CompositeCycle(Vec<String>),

    /// The metric result is final; carries the verdict computed earlier.
    #[error("Metric {metric} is already consolidated")]
    AlreadyConsolidated {
        metric: String,
        previous: Box<MetricVerdict>,
    },

    /// A composite expression could not be parsed.
    #[error("Invalid expression for composite {composite}: {reason}")]
    InvalidExpression { composite: String, reason: String },

    /// A metric name referenced by configuration does not exist.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// A metric names a consolidation function nobody registered.
    #[error("Unknown consolidation function '{function}' for metric {metric}")]
    UnknownConsolidation { metric: String, function: String },

    /// Any other malformed configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
