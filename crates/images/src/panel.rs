use std::fmt::Write;

use crate::config::{ConfigUpdate, ManagerConfig};
use crate::manager::LoadingPriorityManager;
use crate::stats::LoadingStats;

/// Smallest value the concurrency slider offers
pub const SLIDER_MIN: usize = 2;
/// Largest value the concurrency slider offers
pub const SLIDER_MAX: usize = 12;

/// State of the image loading debug panel: a concurrency slider and a
/// dynamic priority toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPanelControls {
    max_concurrent: usize,
    dynamic_priority: bool,
}

impl DebugPanelControls {
    /// Panel initialised from the live configuration
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_per_domain.clamp(SLIDER_MIN, SLIDER_MAX),
            dynamic_priority: config.enable_dynamic_priority,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn dynamic_priority(&self) -> bool {
        self.dynamic_priority
    }

    /// Move the slider; values outside 2..=12 snap to the nearest end
    pub fn set_max_concurrent(&mut self, value: i64) {
        self.max_concurrent = value.clamp(SLIDER_MIN as i64, SLIDER_MAX as i64) as usize;
    }

    pub fn toggle_dynamic_priority(&mut self) {
        self.dynamic_priority = !self.dynamic_priority;
    }

    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            max_concurrent_per_domain: Some(self.max_concurrent as i64),
            enable_dynamic_priority: Some(self.dynamic_priority),
            ..ConfigUpdate::default()
        }
    }

    /// Push the panel state into the manager
    pub fn apply(&self, manager: &LoadingPriorityManager) {
        manager.update_config(self.to_update());
    }
}

/// One-line status text for the panel header, busiest domains first
pub fn summary(stats: &LoadingStats) -> String {
    let mut line = format!(
        "{} loading, {} queued (limit {}/domain)",
        stats.total_loading, stats.total_queued, stats.max_concurrent_per_domain
    );

    let mut domains: Vec<&String> = stats
        .loading_by_domain
        .keys()
        .chain(stats.queued_by_domain.keys())
        .collect();
    domains.sort();
    domains.dedup();
    domains.sort_by_key(|domain| {
        std::cmp::Reverse(stats.loading_for(domain.as_str()) + stats.queued_for(domain.as_str()))
    });

    for domain in domains {
        let _ = write!(
            line,
            "; {}: {}+{}",
            domain,
            stats.loading_for(domain),
            stats.queued_for(domain)
        );
    }
    line
}
