//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::{load_config, load_messages};
use crate::scan::scan_all;
use mailscore_core::{Engine, Generation, ScanReport, ScoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn print_json(value: &impl serde::Serialize) -> Result<(), ScoreError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ScoreError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// SCAN COMMAND
// =============================================================================

/// Score message descriptors and print their verdicts.
pub async fn cmd_scan(
    config: Option<&Path>,
    json_mode: bool,
    messages: &[PathBuf],
    workers: usize,
) -> Result<(), ScoreError> {
    let engine = Arc::new(Engine::from_config(&load_config(config)?)?);
    let messages = load_messages(messages)?;
    tracing::info!(messages = messages.len(), workers, "scanning");

    let reports = scan_all(engine, messages, workers).await;

    if json_mode {
        return print_json(&reports);
    }
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("Message {}", report.message_id);
    println!("==================");
    for verdict in report.verdicts.values() {
        println!(
            "{}: {:.2} / {:.2} / {:.2} -> {}",
            verdict.metric,
            verdict.score,
            verdict.required_score,
            verdict.reject_score,
            verdict.disposition()
        );
        for (name, entry) in &verdict.symbols {
            if entry.options.is_empty() {
                println!("  {} ({:.2})", name, entry.weight);
            } else {
                println!("  {} ({:.2}) [{}]", name, entry.weight, entry.options.join(", "));
            }
        }
    }
    for line in &report.messages {
        println!("  > {}", line);
    }
    println!();
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Build the configuration and describe the resulting generation.
pub fn cmd_check(config: Option<&Path>, json_mode: bool) -> Result<(), ScoreError> {
    let generation = Generation::from_config(&load_config(config)?)?;
    let registry = generation.registry();
    let composites = generation.composites();

    let symbols: Vec<serde_json::Value> = registry
        .lookup_all()
        .iter()
        .map(|r| {
            serde_json::json!({
                "symbol": r.symbol,
                "weight": r.weight,
                "kind": format!("{:?}", r.filter.kind()),
            })
        })
        .collect();

    if json_mode {
        let metrics: Vec<&String> = generation.metrics().keys().collect();
        return print_json(&serde_json::json!({
            "generation": generation.id(),
            "symbols": symbols,
            "metrics": metrics,
            "composite_order": composites.order(),
            "composite_cycles": composites.cycles(),
        }));
    }

    println!("Configuration OK");
    println!("==================");
    println!("Symbols ({}):", registry.len());
    for r in registry.lookup_all() {
        println!("  {} ({:.2}, {:?})", r.symbol, r.weight, r.filter.kind());
    }
    println!("Metrics ({}):", generation.metrics().len());
    for (name, metric) in generation.metrics() {
        println!(
            "  {}: required {:.2}, reject {:.2}, action {}, consolidation {}",
            name,
            metric.required_score,
            metric.reject_score,
            metric.action,
            metric.consolidation.name()
        );
    }
    println!("Composite order: {}", composites.order().join(", "));
    for cycle in composites.cycles() {
        println!("Composite cycle (skipped): {}", cycle.join(" -> "));
    }

    Ok(())
}
