//! Orientation context
//!
//! Devices do not reliably honour the requested orientation, so the
//! requested and delivered geometry are compared after acquisition.

use crate::capture::traits::{FrameSize, ViewportSize};
use serde::Serialize;

/// Snapshot of the viewport taken once per acquisition attempt.
///
/// `wants_portrait_capture` implies `is_narrow_viewport`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationContext {
    pub viewport_aspect: f64,
    pub is_narrow_viewport: bool,
    pub wants_portrait_capture: bool,
}

impl OrientationContext {
    pub fn from_viewport(viewport: ViewportSize, narrow_width: u32) -> Self {
        let viewport_aspect = FrameSize::new(viewport.width, viewport.height).aspect();
        let is_narrow_viewport = viewport.width < narrow_width;
        Self {
            viewport_aspect,
            is_narrow_viewport,
            wants_portrait_capture: is_narrow_viewport && viewport_aspect < 1.0,
        }
    }

    /// Capture size to request: short side across for portrait-wanting viewports
    pub fn target_size(&self, long_side: u32, short_side: u32) -> FrameSize {
        if self.wants_portrait_capture {
            FrameSize::new(short_side, long_side)
        } else {
            FrameSize::new(long_side, short_side)
        }
    }

    /// Delivered geometry contradicts the requested orientation
    pub fn is_inverted(&self, delivered: FrameSize) -> bool {
        let aspect = delivered.aspect();
        (self.wants_portrait_capture && aspect > 1.0) || (!self.wants_portrait_capture && aspect < 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_portrait_viewport_wants_portrait() {
        let ctx = OrientationContext::from_viewport(ViewportSize::new(390, 844), 768);
        assert!(ctx.is_narrow_viewport);
        assert!(ctx.wants_portrait_capture);
        assert_eq!(ctx.target_size(640, 360), FrameSize::new(360, 640));
    }

    #[test]
    fn test_narrow_landscape_viewport_wants_landscape() {
        let ctx = OrientationContext::from_viewport(ViewportSize::new(700, 400), 768);
        assert!(ctx.is_narrow_viewport);
        assert!(!ctx.wants_portrait_capture);
        assert_eq!(ctx.target_size(640, 360), FrameSize::new(640, 360));
    }

    #[test]
    fn test_wide_portrait_viewport_wants_landscape() {
        // Tall desktop windows still capture landscape
        let ctx = OrientationContext::from_viewport(ViewportSize::new(900, 1200), 768);
        assert!(!ctx.is_narrow_viewport);
        assert!(!ctx.wants_portrait_capture);
    }

    #[test]
    fn test_inversion() {
        let portrait = OrientationContext::from_viewport(ViewportSize::new(390, 844), 768);
        assert!(portrait.is_inverted(FrameSize::new(640, 360)));
        assert!(!portrait.is_inverted(FrameSize::new(360, 640)));
        assert!(!portrait.is_inverted(FrameSize::new(480, 480)));

        let landscape = OrientationContext::from_viewport(ViewportSize::new(1440, 900), 768);
        assert!(landscape.is_inverted(FrameSize::new(360, 640)));
        assert!(!landscape.is_inverted(FrameSize::new(640, 360)));
    }
}
