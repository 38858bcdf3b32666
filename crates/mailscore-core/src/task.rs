//! # Task
//!
//! Per-message processing context.
//!
//! A task owns the result set for one message, the continuation guard and
//! the bookkeeping for filters that are waiting on external operations. It
//! keeps the configuration snapshot it was created with for its whole life,
//! so reconfiguration never affects a scan in flight.
//!
//! ## Continuation
//!
//! Filters that suspend receive a [`PendingFilter`]. Completing it (or
//! dropping it) reports back to the task; once the resume policy is
//! satisfied the completion tries the [`ContinuationGuard`]. Exactly one
//! caller wins the guard and runs the post-filter stages.

use crate::consolidation::{Consolidator, MetricVerdict};
use crate::generation::Generation;
use crate::metric::{InsertReport, ResultSet, Targets};
use crate::scheduler::{ChainState, Scheduler};
use crate::{Message, ScoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// CONTINUATION GUARD
// =============================================================================

/// Single-use latch ("saved") protecting the post-filter stages.
#[derive(Debug, Default)]
pub struct ContinuationGuard {
    saved: AtomicBool,
}

impl ContinuationGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically set the latch. `true` only for the first caller.
    pub fn try_claim(&self) -> bool {
        self.saved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.saved.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Progress {
    /// Every registered filter has been invoked.
    pass_done: bool,
    outstanding: usize,
    completed: usize,
}

// =============================================================================
// REPORT
// =============================================================================

/// What a finished task delivers to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub message_id: String,
    pub verdicts: BTreeMap<String, MetricVerdict>,
    /// Diagnostic lines written by filters, in order.
    pub messages: Vec<String>,
}

impl ScanReport {
    #[must_use]
    pub fn verdict(&self, metric: &str) -> Option<&MetricVerdict> {
        self.verdicts.get(metric)
    }

    #[must_use]
    pub fn score(&self, metric: &str) -> Option<f64> {
        self.verdicts.get(metric).map(|v| v.score)
    }
}

// =============================================================================
// TASK
// =============================================================================

/// Processing context for one message.
#[derive(Debug)]
pub struct Task {
    message: Message,
    generation: Arc<Generation>,
    results: Mutex<ResultSet>,
    guard: ContinuationGuard,
    progress: Mutex<Progress>,
    delivery: Mutex<Option<oneshot::Sender<ScanReport>>>,
    report: Mutex<Option<ScanReport>>,
}

impl Task {
    /// Create a task bound to a configuration snapshot.
    #[must_use]
    pub fn new(generation: Arc<Generation>, message: Message) -> Arc<Self> {
        let results = ResultSet::new(generation.metrics());
        Arc::new(Self {
            message,
            generation,
            results: Mutex::new(results),
            guard: ContinuationGuard::new(),
            progress: Mutex::new(Progress::default()),
            delivery: Mutex::new(None),
            report: Mutex::new(None),
        })
    }

    /// Create a task whose report is also sent over a channel.
    #[must_use]
    pub fn with_delivery(
        generation: Arc<Generation>,
        message: Message,
    ) -> (Arc<Self>, oneshot::Receiver<ScanReport>) {
        let (sender, receiver) = oneshot::channel();
        let task = Self::new(generation, message);
        *lock(&task.delivery) = Some(sender);
        (task, receiver)
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    /// Insert a symbol into the targeted metrics.
    ///
    /// Consolidated metrics ignore the call; that is reported in the
    /// returned summary, never as an error.
    pub fn insert_result(
        &self,
        targets: &Targets,
        symbol: &str,
        weight: f64,
        options: &[String],
    ) -> InsertReport {
        lock(&self.results).insert(targets, symbol, weight, options)
    }

    /// Insert a symbol into every metric that recognizes it.
    pub fn insert(&self, symbol: &str, weight: f64, options: &[String]) -> InsertReport {
        self.insert_result(&Targets::All, symbol, weight, options)
    }

    /// Append a line to the task's message log.
    pub fn log(&self, line: impl Into<String>) {
        lock(&self.results).log(line);
    }

    /// Copy of the current result set.
    #[must_use]
    pub fn results(&self) -> ResultSet {
        lock(&self.results).clone()
    }

    pub(crate) fn with_results<R>(&self, f: impl FnOnce(&mut ResultSet) -> R) -> R {
        f(&mut lock(&self.results))
    }

    /// Consolidate one metric of this task.
    pub fn consolidate(&self, metric: &str) -> Result<MetricVerdict, ScoreError> {
        let mut results = lock(&self.results);
        let result = results
            .metric_mut(metric)
            .ok_or_else(|| ScoreError::UnknownMetric(metric.to_string()))?;
        Consolidator::consolidate(result)
    }

    /// Register an outstanding asynchronous filter.
    pub fn defer(self: &Arc<Self>, symbol: impl Into<String>) -> PendingFilter {
        lock(&self.progress).outstanding += 1;
        PendingFilter {
            task: Arc::clone(self),
            symbol: symbol.into(),
            done: false,
        }
    }

    #[must_use]
    pub fn continuation_claimed(&self) -> bool {
        self.guard.is_claimed()
    }

    /// Number of deferred filters that have not completed yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        lock(&self.progress).outstanding
    }

    /// The final report, once the post-filter stages ran.
    #[must_use]
    pub fn report(&self) -> Option<ScanReport> {
        lock(&self.report).clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.report).is_some()
    }

    /// Called by the scheduler once every filter was invoked.
    pub(crate) fn finish_pass(self: &Arc<Self>) -> ChainState {
        let policy = self.generation.scheduler().resume;
        let (ready, outstanding) = {
            let mut progress = lock(&self.progress);
            progress.pass_done = true;
            (
                policy.ready(progress.outstanding, progress.completed),
                progress.outstanding,
            )
        };

        if ready && self.advance("scheduler") {
            ChainState::Finished
        } else {
            ChainState::Suspended { outstanding }
        }
    }

    fn on_completion(self: &Arc<Self>, symbol: &str) {
        let policy = self.generation.scheduler().resume;
        let ready = {
            let mut progress = lock(&self.progress);
            progress.outstanding = progress.outstanding.saturating_sub(1);
            progress.completed += 1;
            progress.pass_done && policy.ready(progress.outstanding, progress.completed)
        };

        if ready {
            self.advance(symbol);
        } else if self.guard.is_claimed() {
            debug!(message_id = %self.message.id, symbol, "late completion after chain advanced");
        }
    }

    /// Claim the continuation guard and, if won, run the post-filter stages.
    fn advance(self: &Arc<Self>, by: &str) -> bool {
        if self.guard.try_claim() {
            debug!(message_id = %self.message.id, by, "continuation claimed");
            Scheduler::run_remaining(self);
            true
        } else {
            debug!(message_id = %self.message.id, by, "continuation already claimed");
            false
        }
    }

    pub(crate) fn deliver(&self, report: ScanReport) {
        *lock(&self.report) = Some(report.clone());
        if let Some(sender) = lock(&self.delivery).take() {
            // The receiver may be gone if the caller stopped waiting.
            let _ = sender.send(report);
        }
    }
}

// =============================================================================
// PENDING FILTER
// =============================================================================

/// A filter suspended on an external operation.
///
/// Hand it to whatever notifies completion (a spawned future, a channel
/// consumer, a callback registry). Dropping it without calling
/// [`complete`](Self::complete) counts as a failed completion, so a task can
/// never be stalled by a lost handle.
#[derive(Debug)]
pub struct PendingFilter {
    task: Arc<Task>,
    symbol: String,
    done: bool,
}

impl PendingFilter {
    #[must_use]
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Report completion. Symbols should be inserted before calling this.
    pub fn complete(mut self, outcome: Result<(), ScoreError>) {
        if let Err(e) = &outcome {
            warn!(
                message_id = %self.task.message.id,
                symbol = %self.symbol,
                error = %e,
                "async filter completed with failure"
            );
        }
        self.finish();
    }

    /// Run `operation` on the current tokio runtime, bounded by `timeout`.
    ///
    /// On success `on_result` inserts the filter's symbols; on error or
    /// timeout the filter contributes nothing. Either way the completion path
    /// runs. Fails with `FilterFailure` when no runtime is available; the
    /// handle is released in that case.
    pub fn spawn<F, T, C>(self, timeout: Duration, operation: F, on_result: C) -> Result<(), ScoreError>
    where
        F: Future<Output = Result<T, ScoreError>> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(&Arc<Task>, T) + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let err = ScoreError::FilterFailure {
                    symbol: self.symbol.clone(),
                    reason: format!("no async runtime: {}", e),
                };
                let mut pending = self;
                pending.finish();
                return Err(err);
            }
        };

        let pending = self;
        handle.spawn(async move {
            match tokio::time::timeout(timeout, operation).await {
                Ok(Ok(value)) => {
                    on_result(&pending.task, value);
                    pending.complete(Ok(()));
                }
                Ok(Err(e)) => pending.complete(Err(e)),
                Err(_) => {
                    let err = ScoreError::ExternalOperationTimeout {
                        symbol: pending.symbol.clone(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    };
                    pending.complete(Err(err));
                }
            }
        });
        Ok(())
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.task.on_completion(&self.symbol);
    }
}

impl Drop for PendingFilter {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                message_id = %self.task.message.id,
                symbol = %self.symbol,
                "pending filter dropped without completion"
            );
            self.finish();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationBuilder;
    use crate::metric::Metric;

    fn generation() -> Arc<Generation> {
        let mut builder = GenerationBuilder::new();
        builder.metric(
            Metric::new("default")
                .with_symbol("A", 1.0)
                .with_thresholds(5.0, 10.0),
        );
        Arc::new(builder.build().expect("build"))
    }

    #[test]
    fn guard_is_single_use() {
        let guard = ContinuationGuard::new();
        assert!(!guard.is_claimed());
        assert!(guard.try_claim());
        assert!(!guard.try_claim());
        assert!(guard.is_claimed());
    }

    #[test]
    fn pass_without_pending_finishes() {
        let task = Task::new(generation(), Message::new("m1"));
        task.insert("A", 1.0, &[]);
        assert_eq!(task.finish_pass(), ChainState::Finished);
        let report = task.report().expect("report");
        assert_eq!(report.score("default"), Some(1.0));
    }

    #[test]
    fn completion_after_pass_advances_once() {
        let task = Task::new(generation(), Message::new("m1"));
        let first = task.defer("A");
        let second = task.defer("A");
        assert_eq!(task.finish_pass(), ChainState::Suspended { outstanding: 2 });
        assert!(!task.is_finished());

        first.task().insert("A", 1.0, &[]);
        first.complete(Ok(()));
        assert!(task.is_finished());

        // Late completion: insertion is a no-op, nothing re-runs.
        let report = second.task().insert("A", 1.0, &[]);
        assert_eq!(report.finalized, 1);
        second.complete(Ok(()));
        assert_eq!(task.report().and_then(|r| r.score("default")), Some(1.0));
        assert_eq!(task.generation().composites().passes(), 1);
    }

    #[test]
    fn dropped_pending_still_completes() {
        let task = Task::new(generation(), Message::new("m1"));
        let pending = task.defer("A");
        task.finish_pass();
        drop(pending);
        assert!(task.is_finished());
        assert_eq!(task.outstanding(), 0);
    }

    #[test]
    fn spawn_without_runtime_fails_and_releases() {
        let task = Task::new(generation(), Message::new("m1"));
        let pending = task.defer("A");
        let err = pending
            .spawn(Duration::from_millis(10), async { Ok(()) }, |_, ()| {})
            .expect_err("no runtime");
        assert!(matches!(err, ScoreError::FilterFailure { .. }));
        assert_eq!(task.outstanding(), 0);
        assert_eq!(task.finish_pass(), ChainState::Finished);
    }

    #[test]
    fn consolidate_unknown_metric() {
        let task = Task::new(generation(), Message::new("m1"));
        assert!(matches!(
            task.consolidate("missing"),
            Err(ScoreError::UnknownMetric(_))
        ));
    }

    #[tokio::test]
    async fn delivery_channel_receives_report() {
        let (task, receiver) = Task::with_delivery(generation(), Message::new("m2"));
        task.insert("A", 1.0, &[]);
        task.finish_pass();
        let report = receiver.await.expect("report");
        assert_eq!(report.message_id, "m2");
        assert_eq!(report.score("default"), Some(1.0));
    }
}
