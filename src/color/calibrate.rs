//! Color range calibration from a circular frame sample.

use nalgebra::Point2;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ColorRange, ColorSpace};
use crate::error::CalibrationError;
use crate::frame::Frame;

/// Derives a segmentation-ready [`ColorRange`] from the pixels inside a circle.
///
/// Each channel is bounded by the samples at the 1/3 and 2/3 rank positions, which discards the
/// outer thirds (mostly background at the circle's edge). Hue-like channels (H, a, b) are then
/// widened additively, magnitude channels (S, V, L) multiplicatively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorCalibrator {
    /// Added to / subtracted from hue-like channel bounds.
    pub additive_padding: f32,
    /// Divides the lower and multiplies the upper bound of magnitude channels.
    pub multiplicative_padding: f32,
}

impl Default for ColorCalibrator {
    fn default() -> Self {
        Self {
            additive_padding: 10.0,
            multiplicative_padding: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Padding {
    Additive,
    Multiplicative,
}

impl ColorCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples all pixels within `radius` of `center` (frame space) and computes their range.
    pub fn calibrate(
        &self,
        frame: &Frame<'_>,
        center: Point2<f32>,
        radius: u32,
    ) -> Result<ColorRange, CalibrationError> {
        if radius == 0 {
            return Err(CalibrationError::InvalidRadius);
        }
        let r = radius as f32;
        let (width, height) = (frame.width() as f32, frame.height() as f32);

        let min_x = (center.x - r).max(0.0).round() as i64;
        let max_x = (center.x + r).min(width).round() as i64;
        let min_y = (center.y - r).max(0.0).round() as i64;
        let max_y = (center.y + r).min(height).round() as i64;
        let (cx, cy) = (center.x as i64, center.y as i64);

        let mut samples: Vec<u8> = Vec::new();
        let mut rgb_total = [0.0f64; 3];

        for y in min_y..max_y {
            for x in min_x..max_x {
                let (dx, dy) = ((x - cx) as f32, (y - cy) as f32);
                if (dx * dx + dy * dy).sqrt() > r {
                    continue;
                }
                let [red, green, blue, _] = frame.pixel(x as u32, y as u32);
                samples.extend_from_slice(&[red, green, blue]);
                for (total, value) in rgb_total.iter_mut().zip([red, green, blue]) {
                    *total += value as f64;
                }
            }
        }

        let count = samples.len() / 3;
        if count == 0 {
            return Err(CalibrationError::EmptySample {
                x: center.x,
                y: center.y,
                radius,
            });
        }

        // One row of sampled pixels, converted in bulk.
        let row = Mat::from_slice(&samples)?.reshape(3, 1)?.try_clone()?;
        let mut hsv = channels(&row, ColorSpace::Hsv)?;
        let mut lab = channels(&row, ColorSpace::Lab)?;

        let (hsv_lower, hsv_upper) = self.space_bounds(
            ColorSpace::Hsv,
            &mut hsv,
            [Padding::Additive, Padding::Multiplicative, Padding::Multiplicative],
        );
        let (lab_lower, lab_upper) = self.space_bounds(
            ColorSpace::Lab,
            &mut lab,
            [Padding::Multiplicative, Padding::Additive, Padding::Additive],
        );
        let rgb_average = rgb_total.map(|total| (total / count as f64).round() as u8);

        log::debug!(
            "calibrated {count} pixels around ({:.1}, {:.1}): hsv {hsv_lower:?}..{hsv_upper:?}, lab {lab_lower:?}..{lab_upper:?}",
            center.x,
            center.y,
        );

        Ok(ColorRange {
            hsv_lower,
            hsv_upper,
            lab_lower,
            lab_upper,
            rgb_average,
        })
    }

    fn space_bounds(
        &self,
        space: ColorSpace,
        samples: &mut [Vec<f32>; 3],
        padding: [Padding; 3],
    ) -> ([f32; 3], [f32; 3]) {
        let max = space.channel_max();
        let mut lower = [0.0; 3];
        let mut upper = [0.0; 3];
        for c in 0..3 {
            let (lo, hi) = self.padded_bounds(&mut samples[c], padding[c]);
            lower[c] = lo.clamp(0.0, max[c]);
            upper[c] = hi.clamp(0.0, max[c]);
        }
        (lower, upper)
    }

    fn padded_bounds(&self, values: &mut [f32], padding: Padding) -> (f32, f32) {
        values.sort_unstable_by(f32::total_cmp);

        // |----------|x--------x|----------|
        let third = values.len() / 3;
        let min = values[third];
        let max = values[third * 2];

        match padding {
            Padding::Additive => (min - self.additive_padding, max + self.additive_padding),
            Padding::Multiplicative => (
                min / self.multiplicative_padding,
                max * self.multiplicative_padding,
            ),
        }
    }
}

/// Converts a row of RGB pixels into `space` and splits it into per-channel values.
fn channels(row: &Mat, space: ColorSpace) -> opencv::Result<[Vec<f32>; 3]> {
    let mut converted = Mat::default();
    imgproc::cvt_color_def(row, &mut converted, space.conversion_code())?;
    let mut out: [Vec<f32>; 3] = Default::default();
    for px in converted.data_bytes()?.chunks_exact(3) {
        for (channel, &value) in out.iter_mut().zip(px) {
            channel.push(value as f32);
        }
    }
    Ok(out)
}
