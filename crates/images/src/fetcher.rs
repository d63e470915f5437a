//! Starting the actual network load for admitted images.
//!
//! The manager never performs IO itself. On admission it calls an
//! [`ImageFetcher`], and whoever performs the load reports back through
//! [`LoadingPriorityManager::complete`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::mpsc;
use url::Url;

use crate::error::LoadError;
use crate::manager::LoadingPriorityManager;
use crate::request::ImageHandle;

/// Starts loads for admitted requests. Fire-and-forget: completion is
/// reported separately. Called without any manager lock held.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, handle: ImageHandle, url: &Url);
}

/// Result of one fetch, on its way back to the manager
#[derive(Debug, Clone)]
pub struct Completion {
    pub handle: ImageHandle,
    pub result: Result<(), LoadError>,
}

/// Records admissions and leaves the loading to the host.
///
/// Used when the UI layer performs the fetch itself (assigning the source
/// on a real image element) and when driving the scheduler by hand.
#[derive(Debug, Default)]
pub struct ManualFetcher {
    started: Mutex<Vec<(ImageHandle, Url)>>,
}

impl ManualFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the loads started since the last call, oldest first
    pub fn take_started(&self) -> Vec<(ImageHandle, Url)> {
        std::mem::take(&mut *self.started.lock())
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().len()
    }
}

impl ImageFetcher for ManualFetcher {
    fn fetch(&self, handle: ImageHandle, url: &Url) {
        self.started.lock().push((handle, url.clone()));
    }
}

/// Options for HTTP image loading
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Timeout for an individual image, headers and body included
    pub request_timeout: Duration,
    /// User-Agent header, reqwest's default when `None`
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Loads images over HTTP on the tokio runtime it was created in
pub struct HttpImageFetcher {
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
    completions: mpsc::UnboundedSender<Completion>,
    options: FetchOptions,
}

impl HttpImageFetcher {
    /// Create a fetcher and the receiving end of its completions.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: FetchOptions) -> Result<(Self, mpsc::UnboundedReceiver<Completion>), LoadError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LoadError::Network(format!("no tokio runtime: {}", e)))?;

        let mut builder = reqwest::Client::builder().timeout(options.request_timeout);
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder.build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                client,
                runtime,
                completions: tx,
                options,
            },
            rx,
        ))
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, handle: ImageHandle, url: &Url) {
        let client = self.client.clone();
        let completions = self.completions.clone();
        let timeout = self.options.request_timeout;
        let url = url.clone();

        self.runtime.spawn(async move {
            let result = fetch_image(&client, &url, timeout).await;
            match &result {
                Ok(()) => log::debug!("Loaded image {}", url),
                Err(e) => log::debug!("Failed to load image {}: {}", url, e),
            }
            if completions.send(Completion { handle, result }).is_err() {
                log::debug!("Completion for {} dropped, no driver running", handle);
            }
        });
    }
}

/// Whether a Content-Type header value names an image
pub fn is_image_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|mime| mime.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

async fn fetch_image(client: &reqwest::Client, url: &Url, timeout: Duration) -> Result<(), LoadError> {
    let load = async {
        let response = client.get(url.clone()).header(ACCEPT, "image/*").send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::HttpStatus(status.as_u16()));
        }

        // servers that omit the header get the benefit of the doubt
        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !is_image_content_type(content_type) {
                return Err(LoadError::NotAnImage(content_type.to_string()));
            }
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(LoadError::Decode("empty body".to_string()));
        }
        Ok::<(), LoadError>(())
    };

    match tokio::time::timeout(timeout, load).await {
        Ok(Err(LoadError::Timeout(_))) | Err(_) => Err(LoadError::Timeout(timeout)),
        Ok(result) => result,
    }
}

/// Feed fetch completions back into the manager until every sender is gone
pub async fn drive_completions(
    manager: Arc<LoadingPriorityManager>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
) {
    while let Some(completion) = completions.recv().await {
        manager.complete(completion.handle, completion.result);
    }
    log::debug!("Image completion driver stopped");
}
