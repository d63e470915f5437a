use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use crate::error::LoadError;
use crate::layout::ElementGeometry;
use crate::priority::Priority;

/// Domain key used for URLs without a host (data:, blob:, file:)
pub const LOCAL_DOMAIN: &str = "(local)";

/// Opaque key for a registered image, returned at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageHandle(Uuid);

impl ImageHandle {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0.simple())
    }
}

/// Lifecycle of an image request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting for a free slot on its domain
    Queued,
    /// Admitted; the fetch has been started
    Loading,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl RequestState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Queued, RequestState::Loading)
                | (RequestState::Loading, RequestState::Done)
                | (RequestState::Loading, RequestState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }
}

/// How a registered image request ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The image finished loading
    Loaded,
    /// The load failed; the slot was still released
    Failed(LoadError),
    /// The request was unregistered (or the manager went away) before it finished
    Cancelled,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded)
    }
}

/// What a component hands to the manager when it mounts an image
#[derive(Clone)]
pub struct ImageRegistration {
    pub url: Url,
    /// Explicit priority; `None` lets the classifier decide from layout
    pub priority: Option<Priority>,
    pub element: Option<Arc<dyn ElementGeometry>>,
}

impl ImageRegistration {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            priority: None,
            element: None,
        }
    }

    /// Parse `src` and build a registration for it
    pub fn parse(src: &str) -> Result<Self, LoadError> {
        Ok(Self::new(Url::parse(src)?))
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_element(mut self, element: Arc<dyn ElementGeometry>) -> Self {
        self.element = Some(element);
        self
    }
}

impl fmt::Debug for ImageRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegistration")
            .field("url", &self.url.as_str())
            .field("priority", &self.priority)
            .field("has_element", &self.element.is_some())
            .finish()
    }
}

/// Returned by registration: the handle plus a future for the outcome
#[derive(Debug)]
pub struct ImageTicket {
    pub handle: ImageHandle,
    pub completion: oneshot::Receiver<LoadOutcome>,
}

impl ImageTicket {
    /// Wait for the request to finish
    pub async fn wait(self) -> LoadOutcome {
        self.completion.await.unwrap_or(LoadOutcome::Cancelled)
    }
}

/// Scheduler-side record of one registered image
pub(crate) struct ImageRequest {
    pub handle: ImageHandle,
    pub url: Url,
    pub domain: String,
    pub priority: Priority,
    pub state: RequestState,
    /// Registration order, used as the FIFO tie-break within a tier
    pub seq: u64,
    pub registered_at: Instant,
    /// The UI layer owns the element; only a weak link is kept here
    pub element: Option<Weak<dyn ElementGeometry>>,
    pub completion: Option<oneshot::Sender<LoadOutcome>>,
}

impl ImageRequest {
    pub fn new(
        handle: ImageHandle,
        url: Url,
        priority: Priority,
        seq: u64,
        element: Option<&Arc<dyn ElementGeometry>>,
        completion: oneshot::Sender<LoadOutcome>,
    ) -> Self {
        let domain = domain_of(&url);
        Self {
            handle,
            url,
            domain,
            priority,
            state: RequestState::Queued,
            seq,
            registered_at: Instant::now(),
            element: element.map(Arc::downgrade),
            completion: Some(completion),
        }
    }

    /// Move to `next`, refusing illegal transitions
    pub fn transition(&mut self, next: RequestState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            log::warn!("Ignoring illegal transition {:?} -> {:?} for {}", self.state, next, self.handle);
            false
        }
    }

    /// Current element geometry, if the element is still alive
    pub fn element(&self) -> Option<Arc<dyn ElementGeometry>> {
        self.element.as_ref().and_then(Weak::upgrade)
    }

    /// Resolve the completion future; later calls do nothing
    pub fn resolve(&mut self, outcome: LoadOutcome) {
        if let Some(tx) = self.completion.take() {
            // the component may have stopped listening
            let _ = tx.send(outcome);
        }
    }
}

/// Concurrency partition key for a URL: its host, lowercased
pub fn domain_of(url: &Url) -> String {
    match url.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => LOCAL_DOMAIN.to_string(),
    }
}
