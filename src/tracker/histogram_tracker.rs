//! Single-hand tracking by histogram back-projection and CamShift.

use nalgebra::Point2;
use opencv::core::{self, Mat, Rect, TermCriteria, TermCriteria_Type, Vector};
use opencv::prelude::*;
use opencv::{imgproc, video};
use serde::{Deserialize, Serialize};

use super::threshold_tracker::ColorSegmenter;
use super::{HandTracker, frame_point_to_world};
use crate::color::{ColorRange, ColorSpace};
use crate::error::TrackerError;
use crate::frame::{CameraView, Frame, HandTransform};

/// Configuration for the [`HistogramTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub color_space: ColorSpace,
    /// Assumed distance from the camera to the hand, in world units.
    pub hand_depth: f32,
    /// Bins of the first-channel histogram.
    pub histogram_bins: i32,
    pub max_iterations: i32,
    pub epsilon: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Hsv,
            hand_depth: 0.5,
            histogram_bins: 180,
            max_iterations: 10,
            epsilon: 1.0,
        }
    }
}

impl HistogramConfig {
    fn criteria(&self) -> opencv::Result<TermCriteria> {
        TermCriteria::new(
            TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
            self.max_iterations,
            self.epsilon,
        )
    }
}

#[derive(Debug)]
enum Phase {
    /// Waiting for a frame to build the reference histogram from.
    Seeding,
    Tracking { histogram: Mat, window: Rect },
}

/// Follows the largest blob of the calibrated color.
///
/// The first frame after calibration seeds a hue (or lightness) histogram from the blob and
/// yields no hand. Later frames are back-projected against that histogram and the search window
/// is moved to the new mode with CamShift.
#[derive(Debug)]
pub struct HistogramTracker {
    config: HistogramConfig,
    segmenter: ColorSegmenter,
    probability: Mat,
    range: Option<ColorRange>,
    phase: Phase,
    initialized: bool,
}

impl HistogramTracker {
    pub fn new(config: HistogramConfig) -> Self {
        let segmenter = ColorSegmenter::new(config.color_space);
        Self {
            config,
            segmenter,
            probability: Mat::default(),
            range: None,
            phase: Phase::Seeding,
            initialized: false,
        }
    }

    pub fn config(&self) -> &HistogramConfig {
        &self.config
    }

    /// Current search window, once a histogram has been seeded.
    pub fn window(&self) -> Option<Rect> {
        match &self.phase {
            Phase::Seeding => None,
            Phase::Tracking { window, .. } => Some(*window),
        }
    }

    fn channels(&self) -> Vector<i32> {
        Vector::from_slice(&[0])
    }

    fn ranges(&self) -> Vector<f32> {
        Vector::from_slice(&self.config.color_space.first_channel_range())
    }

    fn seed(&mut self, frame: &Frame<'_>, range: &ColorRange) -> opencv::Result<()> {
        let mut largest: Option<(f64, Rect)> = None;
        for contour in self.segmenter.segment(frame, range)? {
            let area = imgproc::contour_area_def(&contour)?;
            if largest.is_none_or(|(best, _)| area > best) {
                largest = Some((area, imgproc::bounding_rect(&contour)?));
            }
        }
        let Some((_, roi)) = largest else {
            log::trace!("histogram tracker: nothing to seed from");
            return Ok(());
        };

        let mut images = Vector::<Mat>::new();
        images.push(Mat::roi(self.segmenter.smoothed(), roi)?.try_clone()?);
        let mask = Mat::roi(self.segmenter.mask(), roi)?.try_clone()?;

        let mut counts = Mat::default();
        imgproc::calc_hist_def(
            &images,
            &self.channels(),
            &mask,
            &mut counts,
            &Vector::from_slice(&[self.config.histogram_bins]),
            &self.ranges(),
        )?;
        let mut histogram = Mat::default();
        core::normalize(
            &counts,
            &mut histogram,
            0.0,
            255.0,
            core::NORM_MINMAX,
            -1,
            &Mat::default(),
        )?;

        log::debug!(
            "{:?} histogram seeded from {}x{} region at ({}, {})",
            self.segmenter.color_space(),
            roi.width,
            roi.height,
            roi.x,
            roi.y
        );
        self.phase = Phase::Tracking {
            histogram,
            window: roi,
        };
        Ok(())
    }

    /// Moves the search window onto the back-projected blob and returns its center.
    fn follow(&mut self, frame: &Frame<'_>) -> opencv::Result<Option<Point2<f32>>> {
        let criteria = self.config.criteria()?;
        let (channels, ranges) = (self.channels(), self.ranges());
        let Phase::Tracking { histogram, window } = &mut self.phase else {
            return Ok(None);
        };

        let mut images = Vector::<Mat>::new();
        images.push(self.segmenter.convert(frame)?.try_clone()?);
        imgproc::calc_back_project(
            &images,
            &channels,
            &*histogram,
            &mut self.probability,
            &ranges,
            1.0,
        )?;

        let region = video::cam_shift(&self.probability, window, criteria)?;
        if region.size.width <= 0.0 || region.size.height <= 0.0 {
            log::trace!("histogram tracker: no probability mass near the window");
            return Ok(None);
        }
        if window.width <= 0 || window.height <= 0 {
            log::debug!("histogram tracker window collapsed, reseeding");
            self.phase = Phase::Seeding;
        }
        Ok(Some(Point2::new(region.center.x, region.center.y)))
    }
}

impl HandTracker for HistogramTracker {
    fn initialize(&mut self, frame_width: u32, frame_height: u32) -> Result<(), TrackerError> {
        self.initialized = true;
        log::debug!(
            "{:?} histogram tracker initialized for {frame_width}x{frame_height}",
            self.config.color_space
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn hand_positions(
        &mut self,
        frame: &Frame<'_>,
        camera: &CameraView,
        _time: f64,
    ) -> Vec<HandTransform> {
        if !self.initialized {
            return Vec::new();
        }
        let Some(range) = self.range else {
            log::trace!("histogram tracker has no color range yet");
            return Vec::new();
        };

        let center = if matches!(self.phase, Phase::Seeding) {
            self.seed(frame, &range).map(|()| None)
        } else {
            self.follow(frame)
        };
        match center {
            Ok(Some(center)) => {
                let position = frame_point_to_world(frame, camera, center, self.config.hand_depth);
                vec![HandTransform::new(position)]
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("histogram tracking failed, skipping frame: {e}");
                Vec::new()
            }
        }
    }

    fn set_threshold_colors(&mut self, range: &ColorRange) {
        self.range = Some(*range);
        self.phase = Phase::Seeding;
        log::debug!("histogram tracker will reseed on the next frame");
    }

    fn dispose(&mut self) {
        if self.initialized {
            self.segmenter.release();
            self.probability = Mat::default();
            self.phase = Phase::Seeding;
            self.initialized = false;
            log::debug!("histogram tracker disposed");
        }
    }
}
