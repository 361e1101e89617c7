//! TTL enforcement. One periodic sweep per registry rather than one
//! timer task per transfer, keeping task count flat under load while
//! preserving unconditional removal at the deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::TransferRegistry;

/// Spawn the background sweep for `registry`. Every `interval` it removes
/// each transfer older than the registry's TTL — downloaded or not,
/// in-flight uploads included. Runs until the handle is aborted.
pub fn spawn_expiry_sweeper(
    registry: Arc<TransferRegistry>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = registry.expired_ids(Utc::now()).await;
            if expired.is_empty() {
                continue;
            }
            debug!(count = expired.len(), "expiring transfers");
            for id in expired {
                registry.remove(&id).await;
            }
        }
    })
}
