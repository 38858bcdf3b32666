//! # Header Rules
//!
//! `[[rules]]` entries: emit a symbol when a header contains a substring
//! (ASCII case-insensitive). Each rule runs as a scripted filter, so it only
//! returns emissions and never touches task state itself.

use crate::config::RuleConfig;
use crate::generation::GenerationBuilder;
use crate::registry::{Emission, ScriptedFilter};
use crate::{Message, ScoreError};
use std::sync::Arc;

/// A validated header rule.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRule {
    pub symbol: String,
    pub header: String,
    /// Lowercased needle.
    pub contains: String,
    pub weight: f64,
}

impl HeaderRule {
    pub fn from_config(config: &RuleConfig) -> Result<Self, ScoreError> {
        if config.header.is_empty() || config.contains.is_empty() {
            return Err(ScoreError::InvalidConfig(format!(
                "rule {}: header and contains must not be empty",
                config.symbol
            )));
        }
        Ok(Self {
            symbol: config.symbol.clone(),
            header: config.header.clone(),
            contains: config.contains.to_ascii_lowercase(),
            weight: config.weight,
        })
    }

    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        message
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(&self.header))
            .any(|h| h.value.to_ascii_lowercase().contains(&self.contains))
    }

    /// Wrap the rule in a scripted filter.
    #[must_use]
    pub fn into_filter(self) -> ScriptedFilter {
        let script = format!("{} contains \"{}\"", self.header, self.contains);
        ScriptedFilter::new(script, move |message| {
            Ok(if self.matches(message) {
                vec![Emission::new(self.symbol.as_str(), 1.0).with_option(self.header.as_str())]
            } else {
                Vec::new()
            })
        })
    }

    /// Register under the rule's symbol, with its weight as registry default.
    pub fn register(self, builder: &mut GenerationBuilder) -> Result<(), ScoreError> {
        let symbol = self.symbol.clone();
        let weight = self.weight;
        builder.register(symbol, weight, Arc::new(self.into_filter()))?;
        Ok(())
    }
}
