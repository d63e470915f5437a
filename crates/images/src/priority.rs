use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MEDIUM_DISTANCE_PX;
use crate::layout::{ElementGeometry, ElementRect, Viewport};

/// Image loading priority tiers
///
/// Ordering follows queue precedence: `High < Medium < Low`, so the smallest
/// value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// At or above the fold
    High = 0,
    /// Just below the fold, or position unknown
    Medium = 1,
    /// Far below the fold
    Low = 2,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Classifies elements by how far below the fold they start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityClassifier {
    /// Distance (px) below the fold at which images drop to low priority
    pub medium_distance_px: f32,
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        Self {
            medium_distance_px: DEFAULT_MEDIUM_DISTANCE_PX,
        }
    }
}

impl PriorityClassifier {
    pub fn new(medium_distance_px: f32) -> Self {
        Self { medium_distance_px }
    }

    /// Priority for a measured rect; unmeasured elements are medium
    pub fn classify_rect(&self, rect: Option<ElementRect>, viewport: &Viewport) -> Priority {
        let Some(rect) = rect else {
            return Priority::Medium;
        };

        let distance = rect.distance_below_fold(viewport);
        if distance <= 0.0 {
            Priority::High
        } else if distance < self.medium_distance_px {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Priority for an element, reading its current layout
    pub fn calculate_priority(&self, element: &dyn ElementGeometry, viewport: &Viewport) -> Priority {
        self.classify_rect(element.bounding_rect(), viewport)
    }
}

/// Classify with the default 500px threshold
pub fn calculate_priority(element: &dyn ElementGeometry, viewport: &Viewport) -> Priority {
    PriorityClassifier::default().calculate_priority(element, viewport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutBox;

    fn viewport() -> Viewport {
        Viewport::new(1024.0, 800.0)
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_classifier_boundaries() {
        let classifier = PriorityClassifier::default();
        let vp = viewport();

        // exactly at the fold
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(800.0)), &vp), Priority::High);
        // above the fold and scrolled past
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(10.0)), &vp), Priority::High);
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(-2000.0)), &vp), Priority::High);

        assert_eq!(classifier.classify_rect(Some(ElementRect::at(801.0)), &vp), Priority::Medium);
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(1299.0)), &vp), Priority::Medium);

        assert_eq!(classifier.classify_rect(Some(ElementRect::at(1300.0)), &vp), Priority::Low);
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(9000.0)), &vp), Priority::Low);
    }

    #[test]
    fn test_detached_element_is_medium() {
        let element = LayoutBox::detached();
        assert_eq!(calculate_priority(&element, &viewport()), Priority::Medium);
    }

    #[test]
    fn test_custom_threshold() {
        let classifier = PriorityClassifier::new(100.0);
        let vp = viewport();

        assert_eq!(classifier.classify_rect(Some(ElementRect::at(899.0)), &vp), Priority::Medium);
        assert_eq!(classifier.classify_rect(Some(ElementRect::at(900.0)), &vp), Priority::Low);
    }

    #[test]
    fn test_priority_serde_names() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }
}
