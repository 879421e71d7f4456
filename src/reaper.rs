//! Background eviction of idle admission state.
//!
//! The decision path never frees per-identity state on its own (apart from
//! lazy block-entry eviction), so a process that sees many distinct
//! identities needs this task to keep the tables bounded.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::policy::AdmissionPolicy;

/// Spawn the reaper on the policy's configured sweep interval.
///
/// The task sweeps once immediately, then on every interval tick, and runs
/// until the handle is aborted. Dropping the handle detaches the task.
pub fn spawn_reaper(policy: Arc<AdmissionPolicy>) -> JoinHandle<()> {
    let interval = policy.config().sweep_interval;
    spawn_reaper_with_interval(policy, interval)
}

/// Spawn the reaper with an explicit interval.
pub fn spawn_reaper_with_interval(
    policy: Arc<AdmissionPolicy>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let summary = policy.sweep();
            tracing::trace!(
                clients = summary.clients,
                activity = summary.activity,
                blocks = summary.blocks,
                "reaper sweep finished"
            );
        }
    })
}
