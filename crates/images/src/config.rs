//! Scheduler configuration.
//!
//! The live configuration is owned by the manager and changed through
//! [`ConfigUpdate`]. Out-of-range values are clamped, never rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of in-flight image requests per origin (browser-like limit)
pub const DEFAULT_MAX_CONCURRENT_PER_DOMAIN: usize = 6;

/// Default distance below the fold, in pixels, at which images become low priority
pub const DEFAULT_MEDIUM_DISTANCE_PX: f32 = 500.0;

/// Minimum spacing between two re-classification passes
pub const DEFAULT_REPRIORITIZE_INTERVAL_MS: u64 = 100;

/// Configuration for the loading priority manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum concurrent image loads per domain
    pub max_concurrent_per_domain: usize,
    /// Re-classify queued images when the viewport scrolls or resizes
    pub enable_dynamic_priority: bool,
    /// Minimum interval between re-classification passes, in milliseconds
    pub reprioritize_interval_ms: u64,
    /// Images closer than this to the fold are medium, farther ones low
    pub medium_distance_px: f32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_domain: DEFAULT_MAX_CONCURRENT_PER_DOMAIN,
            enable_dynamic_priority: true,
            reprioritize_interval_ms: DEFAULT_REPRIORITIZE_INTERVAL_MS,
            medium_distance_px: DEFAULT_MEDIUM_DISTANCE_PX,
        }
    }
}

impl ManagerConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let config: ManagerConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Interval between re-classification passes
    pub fn reprioritize_interval(&self) -> Duration {
        Duration::from_millis(self.reprioritize_interval_ms)
    }

    /// Clamp every field into its sane range
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_per_domain = self.max_concurrent_per_domain.max(1);
        if !self.medium_distance_px.is_finite() {
            self.medium_distance_px = DEFAULT_MEDIUM_DISTANCE_PX;
        }
        self.medium_distance_px = self.medium_distance_px.max(0.0);
        self
    }

    /// Merge a partial update into this configuration
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(max) = update.max_concurrent_per_domain {
            self.max_concurrent_per_domain = max.max(1) as usize;
        }
        if let Some(enabled) = update.enable_dynamic_priority {
            self.enable_dynamic_priority = enabled;
        }
        if let Some(interval) = update.reprioritize_interval_ms {
            self.reprioritize_interval_ms = interval;
        }
        if let Some(distance) = update.medium_distance_px {
            if distance.is_finite() {
                self.medium_distance_px = distance.max(0.0);
            }
        }
    }
}

/// Partial configuration accepted by `update_config`
///
/// The concurrency limit is signed so that values coming straight from a UI
/// control can be clamped instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub max_concurrent_per_domain: Option<i64>,
    pub enable_dynamic_priority: Option<bool>,
    pub reprioritize_interval_ms: Option<u64>,
    pub medium_distance_px: Option<f32>,
}

impl ConfigUpdate {
    /// Update only the per-domain concurrency limit
    pub fn max_concurrent(max: i64) -> Self {
        Self {
            max_concurrent_per_domain: Some(max),
            ..Self::default()
        }
    }

    /// Update only the dynamic priority switch
    pub fn dynamic_priority(enabled: bool) -> Self {
        Self {
            enable_dynamic_priority: Some(enabled),
            ..Self::default()
        }
    }
}
