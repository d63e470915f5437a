//! Layout information the scheduler reads but never owns.
//!
//! Rectangles are viewport-relative, the way a bounding client rect is: a
//! `top` of 0 means the element starts at the top edge of the visible area.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Visible area of the page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Bounding rectangle of a rendered element, relative to the viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

impl ElementRect {
    pub fn new(top: f32, left: f32, width: f32, height: f32) -> Self {
        Self { top, left, width, height }
    }

    /// A rect at `top` with no size, enough for classification
    pub fn at(top: f32) -> Self {
        Self::new(top, 0.0, 0.0, 0.0)
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    /// Distance from the element's top edge to the bottom of the viewport.
    /// Zero or negative means the element is at or above the fold.
    pub fn distance_below_fold(&self, viewport: &Viewport) -> f32 {
        self.top - viewport.height
    }
}

/// Something rendered whose position can be measured.
///
/// Implemented by the UI layer for its image elements. `None` means the
/// element is not attached to a document and has no layout yet.
pub trait ElementGeometry: Send + Sync {
    fn bounding_rect(&self) -> Option<ElementRect>;
}

/// Element geometry driven by explicit updates from a layout pass
#[derive(Debug, Default)]
pub struct LayoutBox {
    rect: RwLock<Option<ElementRect>>,
}

impl LayoutBox {
    /// A box that has not been laid out yet
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_rect(rect: ElementRect) -> Self {
        Self {
            rect: RwLock::new(Some(rect)),
        }
    }

    /// Record the latest layout result (e.g. after a scroll)
    pub fn set_rect(&self, rect: ElementRect) {
        *self.rect.write() = Some(rect);
    }

    /// Element removed from the document
    pub fn detach(&self) {
        *self.rect.write() = None;
    }

    /// Shift the box vertically, as scrolling the page by `dy` does
    pub fn scroll_by(&self, dy: f32) {
        if let Some(rect) = self.rect.write().as_mut() {
            rect.top -= dy;
        }
    }
}

impl ElementGeometry for LayoutBox {
    fn bounding_rect(&self) -> Option<ElementRect> {
        *self.rect.read()
    }
}
