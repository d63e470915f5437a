//! Viewport-aware image loading for the estate marketplace frontend.
//!
//! Listing pages render dozens of photos. This crate decides which of them
//! load first: images near the fold are classified high priority, and every
//! image origin gets its own concurrency budget so a busy CDN queues its
//! own requests instead of stalling the page.

pub mod config;
mod domain;
pub mod error;
pub mod fetcher;
pub mod layout;
pub mod listener;
pub mod manager;
pub mod optimized;
pub mod panel;
pub mod priority;
pub mod request;
pub mod stats;
pub mod throttle;

/// Re-export common types for easier usage
pub use config::{ConfigUpdate, ManagerConfig};
pub use error::LoadError;
pub use fetcher::{drive_completions, Completion, FetchOptions, HttpImageFetcher, ImageFetcher, ManualFetcher};
pub use layout::{ElementGeometry, ElementRect, LayoutBox, Viewport};
pub use listener::spawn_viewport_listener;
pub use manager::{ImageEvent, LoadingPriorityManager};
pub use optimized::{load_gallery, ImageSize, ImageSources, LoadedImage, OptimizedImage, RetryPolicy};
pub use panel::DebugPanelControls;
pub use priority::{calculate_priority, Priority, PriorityClassifier};
pub use request::{domain_of, ImageHandle, ImageRegistration, ImageTicket, LoadOutcome, RequestState};
pub use stats::{LoadingStats, StatsReporter};
pub use throttle::ReprioritizeThrottle;
