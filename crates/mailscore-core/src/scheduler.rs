//! # Filter Scheduler
//!
//! Drives a task through its filter chain.
//!
//! ```text
//! run(task)
//!   -> invoke every registered filter (registration order)
//!   -> end of pass: resume policy satisfied? claim the guard
//!        won  -> run_remaining: composites -> consolidation -> report
//!        else -> Suspended; the deciding completion claims it later
//! ```
//!
//! Filter failures are logged and skipped; they never stop the chain.

use crate::consolidation::Consolidator;
use crate::registry::Flow;
use crate::task::{ScanReport, Task};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the chain stands after the filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// The post-filter stages ran and the report was delivered.
    Finished,
    /// Waiting on asynchronous filters.
    Suspended { outstanding: usize },
}

/// Stateless driver of the filter chain.
pub struct Scheduler;

impl Scheduler {
    /// Invoke every registered filter, then try to advance the chain.
    pub fn run(task: &Arc<Task>) -> ChainState {
        let generation = Arc::clone(task.generation());
        let message_id = task.message().id.as_str();
        let mut deferred = 0usize;

        for registration in generation.registry().lookup_all() {
            match registration.filter.invoke(task) {
                Ok(Flow::Completed) => {}
                Ok(Flow::Deferred) => deferred += 1,
                Err(e) => warn!(
                    message_id,
                    symbol = %registration.symbol,
                    error = %e,
                    "filter failed, continuing chain"
                ),
            }
        }

        debug!(
            message_id,
            filters = generation.registry().len(),
            deferred,
            "filter pass complete"
        );
        task.finish_pass()
    }

    /// Post-filter stages: composites, consolidation, delivery.
    ///
    /// Callers must hold the task's continuation guard.
    pub(crate) fn run_remaining(task: &Arc<Task>) -> ScanReport {
        let generation = task.generation();
        let report = task.with_results(|results| {
            let composites = generation.composites().resolve(results);

            let mut verdicts = BTreeMap::new();
            for name in results.metric_names() {
                if let Some(result) = results.metric_mut(&name) {
                    verdicts.insert(name, Consolidator::consolidate_or_previous(result));
                }
            }

            debug!(message_id = %task.message().id, composites, "post-filter stages done");
            ScanReport {
                message_id: task.message().id.clone(),
                verdicts,
                messages: results.messages().to_vec(),
            }
        });

        for verdict in report.verdicts.values() {
            info!(
                message_id = %report.message_id,
                metric = %verdict.metric,
                score = verdict.score,
                required = verdict.required_score,
                disposition = %verdict.disposition(),
                "metric consolidated"
            );
        }

        task.deliver(report.clone());
        report
    }
}

// =============================================================================
// TESTS
// =============================================================================
