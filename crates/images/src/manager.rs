//! The loading priority manager.
//!
//! One manager is created by the application root and shared (`Arc`) with
//! every image component. All scheduling decisions happen synchronously
//! under a single lock; fetches are started and events dispatched only
//! after that lock is released, so a fetcher may complete synchronously.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::config::{ConfigUpdate, ManagerConfig};
use crate::domain::{DomainTracker, QueueKey};
use crate::error::LoadError;
use crate::fetcher::ImageFetcher;
use crate::layout::Viewport;
use crate::priority::{Priority, PriorityClassifier};
use crate::request::{ImageHandle, ImageRegistration, ImageRequest, ImageTicket, LoadOutcome, RequestState};
use crate::stats::LoadingStats;
use crate::throttle::ReprioritizeThrottle;

/// Lifecycle notifications for observers (debug overlays, analytics)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImageEvent {
    Queued {
        handle: ImageHandle,
        domain: String,
        priority: Priority,
    },
    Admitted {
        handle: ImageHandle,
        domain: String,
        priority: Priority,
    },
    Loaded {
        handle: ImageHandle,
        domain: String,
    },
    Failed {
        handle: ImageHandle,
        domain: String,
        error: String,
    },
    Cancelled {
        handle: ImageHandle,
        domain: String,
    },
    Reprioritized {
        handle: ImageHandle,
        from: Priority,
        to: Priority,
    },
}

/// Work collected under the lock and carried out after it is released
#[derive(Default)]
struct Effects {
    starts: Vec<(ImageHandle, Url)>,
    events: Vec<ImageEvent>,
}

struct TrackedRequest {
    request: ImageRequest,
    /// Explicit priorities from the caller are never re-classified
    pinned: bool,
}

struct ManagerState {
    config: ManagerConfig,
    classifier: PriorityClassifier,
    tracker: DomainTracker,
    requests: HashMap<ImageHandle, TrackedRequest>,
    next_seq: u64,
    viewport: Viewport,
    throttle: ReprioritizeThrottle,
}

impl ManagerState {
    fn new(config: ManagerConfig, viewport: Viewport) -> Self {
        Self {
            classifier: PriorityClassifier::new(config.medium_distance_px),
            tracker: DomainTracker::new(config.max_concurrent_per_domain),
            throttle: ReprioritizeThrottle::new(config.reprioritize_interval()),
            requests: HashMap::new(),
            next_seq: 0,
            viewport,
            config,
        }
    }

    /// Admit queued requests on `domain` while it has room
    fn pump(&mut self, domain: &str, effects: &mut Effects) {
        while let Some(handle) = self.tracker.next_admissible(domain) {
            let Some(entry) = self.requests.get_mut(&handle) else {
                // queue and registry disagree; give the slot back
                log::warn!("Queued image {} has no request record", handle);
                self.tracker.release(domain);
                continue;
            };

            let request = &mut entry.request;
            request.transition(RequestState::Loading);
            log::debug!(
                "Admitting queued image {} on {} ({} priority, waited {:?})",
                handle,
                domain,
                request.priority,
                request.registered_at.elapsed()
            );
            effects.starts.push((handle, request.url.clone()));
            effects.events.push(ImageEvent::Admitted {
                handle,
                domain: domain.to_string(),
                priority: request.priority,
            });
        }
    }

    fn pump_all(&mut self, effects: &mut Effects) {
        for domain in self.tracker.domains_with_queue() {
            self.pump(&domain, effects);
        }
    }

    /// Re-classify every queued request that follows layout
    fn reprioritize(&mut self, effects: &mut Effects) -> usize {
        let mut changed = 0;
        let classifier = self.classifier;
        let viewport = self.viewport;

        for entry in self.requests.values_mut() {
            let request = &mut entry.request;
            // loading requests are never demoted back into a queue
            if entry.pinned || request.state != RequestState::Queued || request.element.is_none() {
                continue;
            }

            let rect = request.element().and_then(|element| element.bounding_rect());
            let priority = classifier.classify_rect(rect, &viewport);
            if priority == request.priority {
                continue;
            }

            let key = QueueKey::new(request.priority, request.seq);
            if self.tracker.requeue(&request.domain, key, priority) {
                effects.events.push(ImageEvent::Reprioritized {
                    handle: request.handle,
                    from: request.priority,
                    to: priority,
                });
                request.priority = priority;
                changed += 1;
            }
        }

        if changed > 0 {
            log::debug!("Re-prioritized {} queued images", changed);
        }
        changed
    }

    fn stats(&self) -> LoadingStats {
        let mut stats = LoadingStats::empty(self.config.max_concurrent_per_domain);
        for (domain, state) in self.tracker.iter() {
            stats.record_domain(domain, state.loading, state.queue.len());
        }
        stats
    }
}

/// Central coordinator for image loads
pub struct LoadingPriorityManager {
    state: Mutex<ManagerState>,
    fetcher: Arc<dyn ImageFetcher>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ImageEvent>>>,
}

impl LoadingPriorityManager {
    /// Create a manager with a default-sized viewport
    pub fn new(config: ManagerConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::with_viewport(config, fetcher, Viewport::default())
    }

    pub fn with_viewport(config: ManagerConfig, fetcher: Arc<dyn ImageFetcher>, viewport: Viewport) -> Self {
        let config = config.normalized();
        log::info!(
            "Image loading manager ready: {} concurrent per domain, dynamic priority {}",
            config.max_concurrent_per_domain,
            if config.enable_dynamic_priority { "on" } else { "off" }
        );
        Self {
            state: Mutex::new(ManagerState::new(config, viewport)),
            fetcher,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for the application root: a manager ready to share
    pub fn shared(config: ManagerConfig, fetcher: Arc<dyn ImageFetcher>) -> Arc<Self> {
        Arc::new(Self::new(config, fetcher))
    }

    /// Register an image and either start it now or queue it.
    ///
    /// The fetch itself only begins on admission, which is what defers
    /// low priority images behind the ones near the fold.
    pub fn register_image(&self, registration: ImageRegistration) -> ImageTicket {
        let (tx, rx) = oneshot::channel();
        let handle = ImageHandle::new();
        let mut effects = Effects::default();

        {
            let mut state = self.state.lock();
            let pinned = registration.priority.is_some();
            let priority = registration.priority.unwrap_or_else(|| {
                let rect = registration.element.as_ref().and_then(|element| element.bounding_rect());
                state.classifier.classify_rect(rect, &state.viewport)
            });

            let seq = state.next_seq;
            state.next_seq += 1;

            let mut request = ImageRequest::new(
                handle,
                registration.url,
                priority,
                seq,
                registration.element.as_ref(),
                tx,
            );
            let domain = request.domain.clone();

            if state.tracker.admit(&domain) {
                request.transition(RequestState::Loading);
                log::debug!("Loading image {} on {} immediately ({} priority)", handle, domain, priority);
                effects.starts.push((handle, request.url.clone()));
                effects.events.push(ImageEvent::Admitted { handle, domain, priority });
            } else {
                state.tracker.enqueue(&domain, QueueKey::new(priority, seq), handle);
                log::debug!(
                    "Queued image {} on {} ({} priority, {} waiting)",
                    handle,
                    domain,
                    priority,
                    state.tracker.queued(&domain)
                );
                effects.events.push(ImageEvent::Queued { handle, domain, priority });
            }

            state.requests.insert(handle, TrackedRequest { request, pinned });
        }

        self.dispatch(effects);
        ImageTicket { handle, completion: rx }
    }

    /// Forget an image, typically because its component unmounted.
    ///
    /// A queued request leaves without side effects. A loading request
    /// frees its slot; the fetch already in flight is not aborted. Returns
    /// false when the handle is unknown, so repeated calls are harmless.
    pub fn unregister_image(&self, handle: ImageHandle) -> bool {
        let mut effects = Effects::default();

        {
            let mut state = self.state.lock();
            let Some(entry) = state.requests.remove(&handle) else {
                return false;
            };
            let mut request = entry.request;
            let domain = request.domain.clone();

            match request.state {
                RequestState::Queued => {
                    state
                        .tracker
                        .remove_queued(&domain, QueueKey::new(request.priority, request.seq));
                }
                RequestState::Loading => {
                    state.tracker.release(&domain);
                    state.pump(&domain, &mut effects);
                }
                RequestState::Done | RequestState::Failed => {}
            }

            log::debug!("Unregistered image {} ({:?})", handle, request.state);
            request.resolve(LoadOutcome::Cancelled);
            effects.events.push(ImageEvent::Cancelled { handle, domain });
        }

        self.dispatch(effects);
        true
    }

    /// Report the end of a fetch. Success and failure both release the
    /// slot and advance the queue. Unknown handles are ignored.
    pub fn complete(&self, handle: ImageHandle, result: Result<(), LoadError>) -> bool {
        let mut effects = Effects::default();

        {
            let mut state = self.state.lock();
            let loading = state
                .requests
                .get(&handle)
                .map_or(false, |entry| entry.request.state == RequestState::Loading);
            if !loading {
                log::debug!("Ignoring completion for untracked image {}", handle);
                return false;
            }

            let Some(entry) = state.requests.remove(&handle) else {
                return false;
            };
            let mut request = entry.request;
            let domain = request.domain.clone();

            match result {
                Ok(()) => {
                    request.transition(RequestState::Done);
                    request.resolve(LoadOutcome::Loaded);
                    effects.events.push(ImageEvent::Loaded {
                        handle,
                        domain: domain.clone(),
                    });
                }
                Err(error) => {
                    log::debug!("Image {} on {} failed: {}", handle, domain, error);
                    request.transition(RequestState::Failed);
                    effects.events.push(ImageEvent::Failed {
                        handle,
                        domain: domain.clone(),
                        error: error.to_string(),
                    });
                    request.resolve(LoadOutcome::Failed(error));
                }
            }

            state.tracker.release(&domain);
            state.pump(&domain, &mut effects);
        }

        self.dispatch(effects);
        true
    }

    /// Merge new settings into the live config.
    ///
    /// A lower limit never interrupts loads already running; it only holds
    /// back new admissions until the domain drains below it. A higher limit
    /// admits waiting images right away.
    pub fn update_config(&self, update: ConfigUpdate) {
        let mut effects = Effects::default();

        {
            let mut state = self.state.lock();
            state.config.apply(&update);

            let config = state.config.clone();
            state.tracker.set_limit(config.max_concurrent_per_domain);
            state.classifier = PriorityClassifier::new(config.medium_distance_px);
            state.throttle.set_min_interval(config.reprioritize_interval());
            if !config.enable_dynamic_priority {
                state.throttle.cancel_pending();
            }
            log::info!(
                "Image loading config updated: {} concurrent per domain, dynamic priority {}",
                config.max_concurrent_per_domain,
                if config.enable_dynamic_priority { "on" } else { "off" }
            );

            state.pump_all(&mut effects);
        }

        self.dispatch(effects);
    }

    /// Snapshot of current loading and queue counts
    pub fn get_stats(&self) -> LoadingStats {
        self.state.lock().stats()
    }

    /// Record a scroll or resize. Returns how many queued images changed tier.
    pub fn update_viewport(&self, viewport: Viewport) -> usize {
        self.update_viewport_at(viewport, Instant::now())
    }

    /// As [`update_viewport`](Self::update_viewport), with an explicit clock
    pub fn update_viewport_at(&self, viewport: Viewport, now: Instant) -> usize {
        let mut effects = Effects::default();
        let changed = {
            let mut state = self.state.lock();
            state.viewport = viewport;
            if state.config.enable_dynamic_priority && state.throttle.request(now) {
                state.reprioritize(&mut effects)
            } else {
                0
            }
        };

        self.dispatch(effects);
        changed
    }

    /// Layout changed without a viewport change (content above shifted)
    pub fn layout_changed(&self) -> usize {
        let viewport = self.viewport();
        self.update_viewport(viewport)
    }

    /// Run a deferred re-classification if one is due
    pub fn flush_reprioritization(&self) -> usize {
        self.flush_reprioritization_at(Instant::now())
    }

    pub fn flush_reprioritization_at(&self, now: Instant) -> usize {
        let mut effects = Effects::default();
        let changed = {
            let mut state = self.state.lock();
            let due = state.throttle.take_pending(now);
            if due && state.config.enable_dynamic_priority {
                state.reprioritize(&mut effects)
            } else {
                0
            }
        };

        self.dispatch(effects);
        changed
    }

    /// Time until a deferred re-classification is due, if one is waiting
    pub fn reprioritization_due_in(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.config.enable_dynamic_priority {
            return None;
        }
        state.throttle.time_until_due(Instant::now())
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ImageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn state_of(&self, handle: ImageHandle) -> Option<RequestState> {
        self.state.lock().requests.get(&handle).map(|entry| entry.request.state)
    }

    pub fn priority_of(&self, handle: ImageHandle) -> Option<Priority> {
        self.state.lock().requests.get(&handle).map(|entry| entry.request.priority)
    }

    pub fn config(&self) -> ManagerConfig {
        self.state.lock().config.clone()
    }

    pub fn viewport(&self) -> Viewport {
        self.state.lock().viewport
    }

    fn dispatch(&self, effects: Effects) {
        if !effects.events.is_empty() {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| effects.events.iter().all(|event| tx.send(event.clone()).is_ok()));
        }

        for (handle, url) in effects.starts {
            self.fetcher.fetch(handle, &url);
        }
    }
}

impl std::fmt::Debug for LoadingPriorityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.get_stats();
        f.debug_struct("LoadingPriorityManager")
            .field("total_loading", &stats.total_loading)
            .field("total_queued", &stats.total_queued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::ManualFetcher;
    use crate::layout::{ElementRect, LayoutBox};

    const CDN: &str = "img.example.com";

    fn manager(max: usize) -> (LoadingPriorityManager, Arc<ManualFetcher>) {
        let fetcher = Arc::new(ManualFetcher::new());
        let config = ManagerConfig {
            max_concurrent_per_domain: max,
            ..ManagerConfig::default()
        };
        let manager = LoadingPriorityManager::with_viewport(config, fetcher.clone(), Viewport::new(1024.0, 800.0));
        (manager, fetcher)
    }

    fn image(name: &str, priority: Priority) -> ImageRegistration {
        ImageRegistration::parse(&format!("https://{}/{}.jpg", CDN, name))
            .unwrap()
            .with_priority(priority)
    }

    #[test]
    fn test_register_admits_until_limit() {
        let (manager, fetcher) = manager(2);

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));
        let c = manager.register_image(image("c", Priority::Low));

        assert_eq!(manager.state_of(a.handle), Some(RequestState::Loading));
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Loading));
        assert_eq!(manager.state_of(c.handle), Some(RequestState::Queued));
        assert_eq!(fetcher.started_count(), 2);

        let stats = manager.get_stats();
        assert_eq!(stats.total_loading, 2);
        assert_eq!(stats.total_queued, 1);
    }

    #[test]
    fn test_complete_advances_queue() {
        let (manager, fetcher) = manager(1);

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::Low));
        fetcher.take_started();

        assert!(manager.complete(a.handle, Ok(())));
        assert_eq!(manager.state_of(a.handle), None);
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Loading));

        let started = fetcher.take_started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, b.handle);
    }

    #[test]
    fn test_failure_releases_slot() {
        let (manager, _fetcher) = manager(1);

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));

        assert!(manager.complete(a.handle, Err(LoadError::HttpStatus(404))));
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Loading));
        assert_eq!(manager.get_stats().total_loading, 1);
    }

    #[test]
    fn test_completion_for_queued_or_unknown_is_ignored() {
        let (manager, _fetcher) = manager(1);

        let _a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));

        assert!(!manager.complete(b.handle, Ok(())));
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Queued));
        assert!(!manager.complete(ImageHandle::new(), Ok(())));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (manager, _fetcher) = manager(1);

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));

        assert!(manager.unregister_image(a.handle));
        assert!(!manager.unregister_image(a.handle));
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Loading));

        let stats = manager.get_stats();
        assert_eq!(stats.total_loading, 1);
        assert_eq!(stats.total_queued, 0);

        // completion of the abandoned fetch arrives later
        assert!(!manager.complete(a.handle, Ok(())));
        assert_eq!(manager.get_stats().total_loading, 1);
    }

    #[test]
    fn test_unregister_queued_has_no_side_effects() {
        let (manager, fetcher) = manager(1);

        let _a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::Low));
        fetcher.take_started();

        assert!(manager.unregister_image(b.handle));
        assert_eq!(fetcher.started_count(), 0);

        let stats = manager.get_stats();
        assert_eq!(stats.total_loading, 1);
        assert_eq!(stats.total_queued, 0);
    }

    #[test]
    fn test_auto_priority_uses_layout() {
        let (manager, _fetcher) = manager(6);

        let above: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(100.0)));
        let near: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(1000.0)));
        let far: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(4000.0)));
        let detached: Arc<LayoutBox> = Arc::new(LayoutBox::detached());

        let url = |n: &str| ImageRegistration::parse(&format!("https://{}/{}.jpg", CDN, n)).unwrap();
        let t_above = manager.register_image(url("a").with_element(above));
        let t_near = manager.register_image(url("b").with_element(near));
        let t_far = manager.register_image(url("c").with_element(far));
        let t_detached = manager.register_image(url("d").with_element(detached));
        let t_none = manager.register_image(url("e"));

        assert_eq!(manager.priority_of(t_above.handle), Some(Priority::High));
        assert_eq!(manager.priority_of(t_near.handle), Some(Priority::Medium));
        assert_eq!(manager.priority_of(t_far.handle), Some(Priority::Low));
        assert_eq!(manager.priority_of(t_detached.handle), Some(Priority::Medium));
        assert_eq!(manager.priority_of(t_none.handle), Some(Priority::Medium));
    }

    #[test]
    fn test_raising_limit_admits_waiting() {
        let (manager, _fetcher) = manager(1);

        let _a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));
        let c = manager.register_image(image("c", Priority::High));

        manager.update_config(ConfigUpdate::max_concurrent(3));
        assert_eq!(manager.state_of(b.handle), Some(RequestState::Loading));
        assert_eq!(manager.state_of(c.handle), Some(RequestState::Loading));
        assert_eq!(manager.config().max_concurrent_per_domain, 3);
    }

    #[test]
    fn test_reprioritize_reorders_queue() {
        let (manager, fetcher) = manager(1);
        let start = Instant::now();

        let blocker = manager.register_image(image("blocker", Priority::High));
        let first: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let second: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(3000.0)));

        let url = |n: &str| ImageRegistration::parse(&format!("https://{}/{}.jpg", CDN, n)).unwrap();
        let t_first = manager.register_image(url("first").with_element(first.clone()));
        let t_second = manager.register_image(url("second").with_element(second.clone()));
        assert_eq!(manager.priority_of(t_first.handle), Some(Priority::Low));

        // scroll so that `second` sits right at the fold
        first.scroll_by(2500.0);
        second.scroll_by(2500.0);
        let changed = manager.update_viewport_at(Viewport::new(1024.0, 800.0), start);
        assert_eq!(changed, 1);
        assert_eq!(manager.priority_of(t_second.handle), Some(Priority::High));
        assert_eq!(manager.priority_of(t_first.handle), Some(Priority::Low));

        fetcher.take_started();
        manager.complete(blocker.handle, Ok(()));
        assert_eq!(fetcher.take_started()[0].0, t_second.handle);
    }

    #[test]
    fn test_reprioritize_skips_pinned_and_loading() {
        let (manager, _fetcher) = manager(1);
        let start = Instant::now();

        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let loading = manager.register_image(image("a", Priority::Low).with_element(element.clone()));
        let pinned = manager.register_image(image("b", Priority::Low).with_element(element.clone()));

        element.set_rect(ElementRect::at(0.0));
        assert_eq!(manager.update_viewport_at(Viewport::new(1024.0, 800.0), start), 0);
        assert_eq!(manager.priority_of(loading.handle), Some(Priority::Low));
        assert_eq!(manager.priority_of(pinned.handle), Some(Priority::Low));
        assert_eq!(manager.state_of(loading.handle), Some(RequestState::Loading));
    }

    #[test]
    fn test_reprioritize_throttled_and_flushed() {
        let (manager, _fetcher) = manager(1);
        let start = Instant::now();

        let _blocker = manager.register_image(image("blocker", Priority::High));
        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let url = ImageRegistration::parse("https://img.example.com/x.jpg").unwrap();
        let ticket = manager.register_image(url.with_element(element.clone()));

        assert_eq!(manager.update_viewport_at(Viewport::new(1024.0, 800.0), start), 0);

        element.set_rect(ElementRect::at(900.0));
        let soon = start + Duration::from_millis(20);
        assert_eq!(manager.update_viewport_at(Viewport::new(1024.0, 800.0), soon), 0);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Low));

        assert_eq!(manager.flush_reprioritization_at(start + Duration::from_millis(50)), 0);
        assert_eq!(manager.flush_reprioritization_at(start + Duration::from_millis(100)), 1);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Medium));
    }

    #[test]
    fn test_dynamic_priority_disabled() {
        let (manager, _fetcher) = manager(1);
        manager.update_config(ConfigUpdate::dynamic_priority(false));

        let _blocker = manager.register_image(image("blocker", Priority::High));
        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let url = ImageRegistration::parse("https://img.example.com/x.jpg").unwrap();
        let ticket = manager.register_image(url.with_element(element.clone()));

        element.set_rect(ElementRect::at(0.0));
        assert_eq!(manager.update_viewport(Viewport::new(1024.0, 800.0)), 0);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Low));
    }

    #[test]
    fn test_disabling_dynamic_priority_drops_deferred_pass() {
        let (manager, _fetcher) = manager(1);
        let start = Instant::now();

        let _blocker = manager.register_image(image("blocker", Priority::High));
        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let url = ImageRegistration::parse("https://img.example.com/x.jpg").unwrap();
        let ticket = manager.register_image(url.with_element(element.clone()));

        manager.update_viewport_at(Viewport::new(1024.0, 800.0), start);
        element.set_rect(ElementRect::at(0.0));
        manager.update_viewport_at(Viewport::new(1024.0, 800.0), start + Duration::from_millis(10));
        assert!(manager.reprioritization_due_in().is_some());

        manager.update_config(ConfigUpdate::dynamic_priority(false));
        assert_eq!(manager.reprioritization_due_in(), None);

        for step in 0..5u64 {
            let later = start + Duration::from_millis(150 + step * 50);
            assert_eq!(manager.flush_reprioritization_at(later), 0);
            assert_eq!(manager.reprioritization_due_in(), None);
        }
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Low));

        // re-enabling starts from a clean throttle state
        manager.update_config(ConfigUpdate::dynamic_priority(true));
        assert_eq!(manager.reprioritization_due_in(), None);
        let later = start + Duration::from_secs(1);
        assert_eq!(manager.update_viewport_at(Viewport::new(1024.0, 800.0), later), 1);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::High));
    }

    #[test]
    fn test_layout_changed_reclassifies_at_current_viewport() {
        let (manager, _fetcher) = manager(1);

        let _blocker = manager.register_image(image("blocker", Priority::High));
        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let url = ImageRegistration::parse("https://img.example.com/x.jpg").unwrap();
        let ticket = manager.register_image(url.with_element(element.clone()));
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Low));

        // content above the image collapsed; the viewport itself did not move
        element.set_rect(ElementRect::at(1000.0));
        assert_eq!(manager.layout_changed(), 1);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Medium));
        assert_eq!(manager.viewport(), Viewport::new(1024.0, 800.0));
    }

    #[test]
    fn test_dropped_element_falls_back_to_medium() {
        let (manager, _fetcher) = manager(1);
        let start = Instant::now();

        let _blocker = manager.register_image(image("blocker", Priority::High));
        let element: Arc<LayoutBox> = Arc::new(LayoutBox::with_rect(ElementRect::at(5000.0)));
        let url = ImageRegistration::parse("https://img.example.com/x.jpg").unwrap();
        let ticket = manager.register_image(url.with_element(element.clone()));

        drop(element);
        assert_eq!(manager.update_viewport_at(Viewport::new(1024.0, 800.0), start), 1);
        assert_eq!(manager.priority_of(ticket.handle), Some(Priority::Medium));
    }

    #[tokio::test]
    async fn test_completion_futures() {
        let (manager, _fetcher) = manager(1);

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::High));
        let c = manager.register_image(image("c", Priority::High));
        let (a_handle, b_handle, c_handle) = (a.handle, b.handle, c.handle);

        manager.complete(a_handle, Ok(()));
        manager.complete(b_handle, Err(LoadError::Network("reset".to_string())));
        manager.unregister_image(c_handle);

        assert_eq!(a.wait().await, LoadOutcome::Loaded);
        assert_eq!(b.wait().await, LoadOutcome::Failed(LoadError::Network("reset".to_string())));
        assert_eq!(c.wait().await, LoadOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_event_stream() {
        let (manager, _fetcher) = manager(1);
        let mut events = manager.subscribe();

        let a = manager.register_image(image("a", Priority::High));
        let b = manager.register_image(image("b", Priority::Low));
        manager.complete(a.handle, Ok(()));

        let domain = CDN.to_string();
        let expected = vec![
            ImageEvent::Admitted { handle: a.handle, domain: domain.clone(), priority: Priority::High },
            ImageEvent::Queued { handle: b.handle, domain: domain.clone(), priority: Priority::Low },
            ImageEvent::Loaded { handle: a.handle, domain: domain.clone() },
            ImageEvent::Admitted { handle: b.handle, domain: domain.clone(), priority: Priority::Low },
        ];
        for event in expected {
            assert_eq!(events.recv().await, Some(event));
        }
    }
}
