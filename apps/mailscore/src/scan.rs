//! # Scan Pool
//!
//! Scans many messages concurrently against one engine. At most `workers`
//! tasks run at a time; reports come back in input order.

use mailscore_core::{Engine, Message, ScanReport};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Scan `messages` with at most `workers` in flight.
///
/// A scan that panics is logged and left out of the output.
pub async fn scan_all(engine: Arc<Engine>, messages: Vec<Message>, workers: usize) -> Vec<ScanReport> {
    let total = messages.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (index, message) in messages.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let sem = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return None,
            };
            Some((index, engine.scan(message).await))
        });
    }

    let mut slots: Vec<Option<ScanReport>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Some((index, report))) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(report);
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "scan task failed"),
        }
    }

    let reports: Vec<ScanReport> = slots.into_iter().flatten().collect();
    info!(scanned = reports.len(), total, "scan batch complete");
    reports
}
