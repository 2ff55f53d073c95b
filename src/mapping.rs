//! Conversion between frame pixels and screen coordinates under letterboxed scaling.
//!
//! Frame space has its origin at the top-left with y pointing down. Screen space has its origin
//! at the bottom-left of the viewport with y pointing up. The frame is scaled uniformly until it
//! covers the full width or the full height of the screen, whichever keeps its aspect ratio, and
//! is centered on the other axis.

use nalgebra::Point2;

use crate::frame::Viewport;

/// Stateless frame/screen coordinate mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    frame_width: f32,
    frame_height: f32,
    screen_width: f32,
    screen_height: f32,
    normalized_width: f32,
    normalized_height: f32,
}

impl CoordinateMapper {
    pub fn new(frame_width: f32, frame_height: f32, viewport: Viewport) -> Self {
        let (screen_width, screen_height) = (viewport.width, viewport.height);
        let frame_aspect = ratio(frame_width, frame_height);
        let screen_aspect = ratio(screen_width, screen_height);

        let (normalized_width, normalized_height) = if screen_aspect >= frame_aspect {
            (screen_width, ratio(screen_width, frame_aspect))
        } else {
            (screen_height * frame_aspect, screen_height)
        };

        Self {
            frame_width,
            frame_height,
            screen_width,
            screen_height,
            normalized_width,
            normalized_height,
        }
    }

    /// Maps a frame pixel to the screen point it is displayed at.
    pub fn frame_to_screen(&self, point: Point2<f32>) -> Point2<f32> {
        let scaled_x = ratio(point.x, self.frame_width) * self.normalized_width;
        let scaled_y = self.normalized_height
            - ratio(point.y, self.frame_height) * self.normalized_height;

        Point2::new(
            scaled_x - (self.normalized_width - self.screen_width) / 2.0,
            scaled_y - (self.normalized_height - self.screen_height) / 2.0,
        )
    }

    /// Maps a screen point back to the frame pixel displayed under it.
    pub fn screen_to_frame(&self, point: Point2<f32>) -> Point2<f32> {
        let offset_x = point.x + (self.normalized_width - self.screen_width) / 2.0;
        let offset_y = point.y + (self.normalized_height - self.screen_height) / 2.0;

        Point2::new(
            ratio(offset_x, self.normalized_width) * self.frame_width,
            self.frame_height - ratio(offset_y, self.normalized_height) * self.frame_height,
        )
    }
}

#[inline]
fn ratio(num: f32, den: f32) -> f32 {
    if den != 0.0 { num / den } else { 0.0 }
}
