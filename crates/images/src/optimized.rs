//! Image component glue: picking a source size and retrying failed loads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LoadError;
use crate::layout::ElementGeometry;
use crate::manager::LoadingPriorityManager;
use crate::priority::Priority;
use crate::request::{ImageHandle, ImageRegistration, LoadOutcome};

/// Renditions a listing photo is published in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Thumbnail,
    Small,
    Medium,
    Large,
    Original,
}

impl ImageSize {
    /// Nominal pixel width of the rendition; `None` for the original
    pub fn nominal_width(self) -> Option<u32> {
        match self {
            ImageSize::Thumbnail => Some(150),
            ImageSize::Small => Some(400),
            ImageSize::Medium => Some(800),
            ImageSize::Large => Some(1200),
            ImageSize::Original => None,
        }
    }
}

/// URLs of one image, organised by size
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSources {
    sources: BTreeMap<ImageSize, Url>,
}

impl ImageSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, size: ImageSize, url: Url) -> Self {
        self.sources.insert(size, url);
        self
    }

    pub fn get(&self, size: ImageSize) -> Option<&Url> {
        self.sources.get(&size)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Smallest rendition covering `container_width` CSS pixels at the
    /// given pixel ratio; the largest available one if none does.
    pub fn select(&self, container_width: f32, device_pixel_ratio: f32) -> Option<&Url> {
        let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        let needed = (container_width.max(0.0) * ratio).ceil();

        self.sources
            .iter()
            .find(|(size, _)| match size.nominal_width() {
                Some(width) => width as f32 >= needed,
                None => true,
            })
            .or_else(|| self.sources.iter().next_back())
            .map(|(_, url)| url)
    }
}

/// Retry schedule for failed loads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// A successfully loaded image
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedImage {
    pub url: Url,
    /// Total registrations made, the successful one included
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Unregisters on drop, so an abandoned load frees its slot
struct RegistrationGuard<'a> {
    manager: &'a LoadingPriorityManager,
    handle: ImageHandle,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.manager.unregister_image(self.handle);
    }
}

/// An image as a component renders it: sources by size, an optional
/// priority override, its element, and how to retry
#[derive(Clone)]
pub struct OptimizedImage {
    pub sources: ImageSources,
    pub priority: Option<Priority>,
    pub element: Option<Arc<dyn ElementGeometry>>,
    pub retry: RetryPolicy,
}

impl OptimizedImage {
    pub fn new(sources: ImageSources) -> Self {
        Self {
            sources,
            priority: None,
            element: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_element(mut self, element: Arc<dyn ElementGeometry>) -> Self {
        self.element = Some(element);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the best-fitting rendition through the manager.
    ///
    /// Every attempt is a fresh registration, so a retry queues behind
    /// whatever is waiting on its domain. Dropping the future unregisters
    /// the current attempt.
    pub async fn load(
        &self,
        manager: &LoadingPriorityManager,
        container_width: f32,
        device_pixel_ratio: f32,
    ) -> Result<LoadedImage, LoadError> {
        let url = self
            .sources
            .select(container_width, device_pixel_ratio)
            .cloned()
            .ok_or(LoadError::NoSources)?;

        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let mut registration = ImageRegistration::new(url.clone());
            registration.priority = self.priority;
            registration.element = self.element.clone();

            let ticket = manager.register_image(registration);
            let guard = RegistrationGuard {
                manager,
                handle: ticket.handle,
            };
            let outcome = ticket.completion.await.unwrap_or(LoadOutcome::Cancelled);
            drop(guard);

            match outcome {
                LoadOutcome::Loaded => {
                    return Ok(LoadedImage {
                        url,
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    });
                }
                LoadOutcome::Cancelled => return Err(LoadError::Cancelled),
                LoadOutcome::Failed(error) => {
                    if !error.is_retryable() || attempt >= self.retry.max_retries {
                        log::debug!("Giving up on {} after {} attempts: {}", url, attempt + 1, error);
                        return Err(error);
                    }

                    let delay = self.retry.delay_for(attempt);
                    log::debug!("Retrying {} in {:?} (attempt {}): {}", url, delay, attempt + 2, error);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for OptimizedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedImage")
            .field("sources", &self.sources)
            .field("priority", &self.priority)
            .field("has_element", &self.element.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Load a set of images (e.g. a listing gallery) concurrently, results in input order
pub async fn load_gallery(
    manager: &LoadingPriorityManager,
    images: &[OptimizedImage],
    container_width: f32,
    device_pixel_ratio: f32,
) -> Vec<Result<LoadedImage, LoadError>> {
    join_all(
        images
            .iter()
            .map(|image| image.load(manager, container_width, device_pixel_ratio)),
    )
    .await
}
