//! Per-domain admission control.
//!
//! Each origin gets its own in-flight counter and wait queue. Domains never
//! share budget: a saturated CDN does not hold back images from another host.

use std::collections::{BTreeMap, HashMap};

use crate::config::DEFAULT_MAX_CONCURRENT_PER_DOMAIN;
use crate::priority::Priority;
use crate::request::ImageHandle;

/// Queue position: priority tier first, then registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct QueueKey {
    pub priority: Priority,
    pub seq: u64,
}

impl QueueKey {
    pub fn new(priority: Priority, seq: u64) -> Self {
        Self { priority, seq }
    }
}

/// Concurrency state of a single domain
#[derive(Debug, Default)]
pub(crate) struct DomainState {
    /// Requests admitted and not yet released
    pub loading: usize,
    /// Waiting requests, best first
    pub queue: BTreeMap<QueueKey, ImageHandle>,
}

/// Tracks in-flight and queued image requests for every domain seen so far
#[derive(Debug)]
pub(crate) struct DomainTracker {
    domains: HashMap<String, DomainState>,
    max_concurrent: usize,
}

impl Default for DomainTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_PER_DOMAIN)
    }
}

impl DomainTracker {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            domains: HashMap::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Change the limit for future admissions. Requests already loading are
    /// left alone even if they now exceed it.
    pub fn set_limit(&mut self, max_concurrent: usize) {
        self.max_concurrent = max_concurrent.max(1);
    }

    fn state_mut(&mut self, domain: &str) -> &mut DomainState {
        if !self.domains.contains_key(domain) {
            log::debug!("Tracking new image domain {}", domain);
        }
        self.domains.entry(domain.to_string()).or_default()
    }

    /// True if another request for `domain` may start now
    pub fn can_admit(&self, domain: &str) -> bool {
        self.loading(domain) < self.max_concurrent
    }

    /// Take a slot on `domain`. Returns false (and takes nothing) when full.
    pub fn admit(&mut self, domain: &str) -> bool {
        if !self.can_admit(domain) {
            return false;
        }
        self.state_mut(domain).loading += 1;
        true
    }

    /// Give back a slot on `domain`
    pub fn release(&mut self, domain: &str) {
        let state = self.state_mut(domain);
        if state.loading == 0 {
            log::warn!("Release on idle domain {}", domain);
            return;
        }
        state.loading -= 1;
    }

    /// Pop the best queued request if `domain` has room, taking its slot
    pub fn next_admissible(&mut self, domain: &str) -> Option<ImageHandle> {
        if !self.can_admit(domain) {
            return None;
        }
        let state = self.domains.get_mut(domain)?;
        let (_, handle) = state.queue.pop_first()?;
        state.loading += 1;
        Some(handle)
    }

    /// Queue a request behind everything of equal or better priority
    pub fn enqueue(&mut self, domain: &str, key: QueueKey, handle: ImageHandle) {
        self.state_mut(domain).queue.insert(key, handle);
    }

    /// Drop a queued request; false if it was not queued
    pub fn remove_queued(&mut self, domain: &str, key: QueueKey) -> bool {
        self.domains
            .get_mut(domain)
            .map_or(false, |state| state.queue.remove(&key).is_some())
    }

    /// Move a queued request to a new tier, keeping its registration order
    pub fn requeue(&mut self, domain: &str, key: QueueKey, priority: Priority) -> bool {
        let Some(state) = self.domains.get_mut(domain) else {
            return false;
        };
        match state.queue.remove(&key) {
            Some(handle) => {
                state.queue.insert(QueueKey::new(priority, key.seq), handle);
                true
            }
            None => false,
        }
    }

    pub fn loading(&self, domain: &str) -> usize {
        self.domains.get(domain).map_or(0, |state| state.loading)
    }

    pub fn queued(&self, domain: &str) -> usize {
        self.domains.get(domain).map_or(0, |state| state.queue.len())
    }

    /// Domains that currently have queued work
    pub fn domains_with_queue(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|(_, state)| !state.queue.is_empty())
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DomainState)> {
        self.domains.iter()
    }
}
