//! Loading statistics and the periodic reporter behind the debug overlay.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::manager::LoadingPriorityManager;

/// Shortest sampling interval the reporter accepts
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingStats {
    /// Requests currently loading, across all domains
    pub total_loading: usize,
    /// Requests waiting for a slot, across all domains
    pub total_queued: usize,
    /// Loading count per domain (idle domains omitted)
    pub loading_by_domain: BTreeMap<String, usize>,
    /// Queue length per domain (empty queues omitted)
    pub queued_by_domain: BTreeMap<String, usize>,
    /// Limit in force when the snapshot was taken
    pub max_concurrent_per_domain: usize,
    pub sampled_at: DateTime<Utc>,
}

impl LoadingStats {
    pub(crate) fn empty(max_concurrent_per_domain: usize) -> Self {
        Self {
            total_loading: 0,
            total_queued: 0,
            loading_by_domain: BTreeMap::new(),
            queued_by_domain: BTreeMap::new(),
            max_concurrent_per_domain,
            sampled_at: Utc::now(),
        }
    }

    pub(crate) fn record_domain(&mut self, domain: &str, loading: usize, queued: usize) {
        if loading > 0 {
            self.loading_by_domain.insert(domain.to_string(), loading);
            self.total_loading += loading;
        }
        if queued > 0 {
            self.queued_by_domain.insert(domain.to_string(), queued);
            self.total_queued += queued;
        }
    }

    pub fn loading_for(&self, domain: &str) -> usize {
        self.loading_by_domain.get(domain).copied().unwrap_or(0)
    }

    pub fn queued_for(&self, domain: &str) -> usize {
        self.queued_by_domain.get(domain).copied().unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.total_loading == 0 && self.total_queued == 0
    }

    /// Equal apart from the sampling time
    pub fn same_counts(&self, other: &LoadingStats) -> bool {
        self.total_loading == other.total_loading
            && self.total_queued == other.total_queued
            && self.loading_by_domain == other.loading_by_domain
            && self.queued_by_domain == other.queued_by_domain
            && self.max_concurrent_per_domain == other.max_concurrent_per_domain
    }

    /// JSON form for a debug overlay
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Samples manager stats on an interval and publishes changes.
///
/// Subscribers are only woken when the counts actually change. Dropping
/// the reporter stops sampling.
pub struct StatsReporter {
    receiver: watch::Receiver<LoadingStats>,
    task: JoinHandle<()>,
}

impl StatsReporter {
    /// Start sampling `manager` every `interval` on the current runtime.
    /// Intervals shorter than [`MIN_SAMPLE_INTERVAL`] are raised to it.
    pub fn spawn(manager: Arc<LoadingPriorityManager>, interval: Duration) -> Self {
        let interval = interval.max(MIN_SAMPLE_INTERVAL);
        let (tx, rx) = watch::channel(manager.get_stats());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let stats = manager.get_stats();
                tx.send_if_modified(|current| {
                    if current.same_counts(&stats) {
                        false
                    } else {
                        *current = stats;
                        true
                    }
                });
            }
            log::debug!("Stats reporter stopped");
        });

        Self { receiver: rx, task }
    }

    /// Most recent published snapshot
    pub fn latest(&self) -> LoadingStats {
        self.receiver.borrow().clone()
    }

    /// Another receiver for a UI component to watch
    pub fn subscribe(&self) -> watch::Receiver<LoadingStats> {
        self.receiver.clone()
    }

    /// Wait until the counts change, then return the new snapshot
    pub async fn changed(&mut self) -> Option<LoadingStats> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
