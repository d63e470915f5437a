use std::time::{Duration, Instant};

/// Rate limiter for viewport-driven re-classification.
///
/// Runs are spaced at least `min_interval` apart (100ms by default). The
/// first change after a quiet period runs immediately; changes arriving
/// inside the interval collapse into one trailing run that becomes due once
/// the interval has passed.
#[derive(Debug, Clone)]
pub struct ReprioritizeThrottle {
    min_interval: Duration,
    last_run: Option<Instant>,
    pending: bool,
}

impl ReprioritizeThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: None,
            pending: false,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    fn ready(&self, now: Instant) -> bool {
        match self.last_run {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        }
    }

    /// Signal a layout change. Returns true if a pass should run now;
    /// otherwise the change is remembered for a trailing run.
    pub fn request(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.last_run = Some(now);
            self.pending = false;
            true
        } else {
            self.pending = true;
            false
        }
    }

    /// Returns true if a deferred pass is due now, consuming it
    pub fn take_pending(&mut self, now: Instant) -> bool {
        if self.pending && self.ready(now) {
            self.last_run = Some(now);
            self.pending = false;
            true
        } else {
            false
        }
    }

    /// Forget a deferred pass without running it
    pub fn cancel_pending(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// How long until the deferred pass becomes due, if one is waiting
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if !self.pending {
            return None;
        }
        let due = self.last_run.map_or(now, |last| last + self.min_interval);
        Some(due.saturating_duration_since(now))
    }
}

impl Default for ReprioritizeThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_REPRIORITIZE_INTERVAL_MS))
    }
}
