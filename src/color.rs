//! Color spaces, color ranges and range calibration from a sampled region.

mod calibrate;

pub use calibrate::ColorCalibrator;

use opencv::imgproc;
use serde::{Deserialize, Serialize};

/// The color space a segmentation tracker thresholds in.
///
/// Both use OpenCV's 8-bit channel encodings: HSV hue is in `[0, 180)` with saturation and value
/// in `[0, 255]`; Lab lightness is scaled to `[0, 255]` and `a`/`b` are offset by 128.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Hsv,
    Lab,
}

impl ColorSpace {
    /// Inclusive upper limit of each channel.
    pub(crate) fn channel_max(self) -> [f32; 3] {
        match self {
            ColorSpace::Hsv => [180.0, 255.0, 255.0],
            ColorSpace::Lab => [255.0, 255.0, 255.0],
        }
    }

    /// `cvt_color` code converting RGB or RGBA into this space.
    pub fn conversion_code(self) -> i32 {
        match self {
            ColorSpace::Hsv => imgproc::COLOR_RGB2HSV,
            ColorSpace::Lab => imgproc::COLOR_RGB2Lab,
        }
    }

    /// Histogram range of the first channel (hue or lightness), upper bound exclusive.
    pub(crate) fn first_channel_range(self) -> [f32; 2] {
        match self {
            ColorSpace::Hsv => [0.0, 180.0],
            ColorSpace::Lab => [0.0, 256.0],
        }
    }
}

/// Segmentation bounds derived from a calibration sample.
///
/// Computed once per calibration request and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub hsv_lower: [f32; 3],
    pub hsv_upper: [f32; 3],
    pub lab_lower: [f32; 3],
    pub lab_upper: [f32; 3],
    /// Mean RGB color of the sample, for UI feedback.
    pub rgb_average: [u8; 3],
}

impl ColorRange {
    /// Returns the `(lower, upper)` bounds for `space`.
    pub fn bounds(&self, space: ColorSpace) -> ([f32; 3], [f32; 3]) {
        match space {
            ColorSpace::Hsv => (self.hsv_lower, self.hsv_upper),
            ColorSpace::Lab => (self.lab_lower, self.lab_upper),
        }
    }
}
