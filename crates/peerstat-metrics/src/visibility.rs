//! Viewport visibility and rising-edge detection.
//!
//! A chart is counted as viewed once per visible period: the detector turns the
//! continuous "inside the viewport" level into a single event on the transition
//! from hidden to visible.

use serde::{Deserialize, Serialize};

/// Bounding box of an element, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl Rect {
    pub const fn new(top: f64, left: f64, bottom: f64, right: f64) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    /// Whether the whole rectangle lies inside the viewport.
    ///
    /// All four sides are checked; an element clipped horizontally is not visible.
    pub fn is_within(&self, viewport: &Viewport) -> bool {
        self.top >= 0.0
            && self.left >= 0.0
            && self.bottom <= viewport.height
            && self.right <= viewport.width
    }
}

/// Size of the visible area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub height: f64,
    pub width: f64,
}

impl Viewport {
    pub const fn new(height: f64, width: f64) -> Self {
        Self { height, width }
    }
}

/// Rising-edge detector over a visibility signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityEdgeDetector {
    visible: bool,
}

impl VisibilityEdgeDetector {
    pub const fn new() -> Self {
        Self { visible: false }
    }

    /// Last observed level.
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Record the current level and report whether it just became visible.
    pub fn observe(&mut self, currently_visible: bool) -> bool {
        let became_visible = !self.visible && currently_visible;
        self.visible = currently_visible;
        became_visible
    }

    /// Convenience wrapper combining the bounds check with [`observe`](Self::observe).
    pub fn observe_rect(&mut self, rect: &Rect, viewport: &Viewport) -> bool {
        self.observe(rect.is_within(viewport))
    }
}
