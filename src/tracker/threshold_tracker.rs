//! Color segmentation tracking: threshold, dilate and pick the largest blobs.

use nalgebra::Point2;
use opencv::core::{Mat, Point, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::{HandTracker, frame_point_to_world};
use crate::color::{ColorRange, ColorSpace};
use crate::error::TrackerError;
use crate::frame::{CameraView, Frame, HandTransform};

/// Outer boundary of one blob, as returned by `find_contours`.
pub(crate) type Contour = Vector<Point>;

/// Configuration for the [`ColorThresholdTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub color_space: ColorSpace,
    /// Assumed distance from the camera to the hand, in world units.
    pub hand_depth: f32,
    /// Maximum number of hands reported per frame.
    pub max_contours: usize,
    /// Contours smaller than this (in pixels) are noise.
    pub min_contour_area: f64,
    /// Contours smaller than this fraction of the largest contour are noise.
    pub min_contour_area_fraction: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Hsv,
            hand_depth: 0.5,
            max_contours: 2,
            min_contour_area: 100.0,
            min_contour_area_fraction: 0.2,
        }
    }
}

/// Scratch images and steps shared by the color based trackers.
#[derive(Debug)]
pub(crate) struct ColorSegmenter {
    color_space: ColorSpace,
    converted: Mat,
    blurred: Mat,
    mask: Mat,
    dilated: Mat,
}

impl ColorSegmenter {
    pub(crate) fn new(color_space: ColorSpace) -> Self {
        Self {
            color_space,
            converted: Mat::default(),
            blurred: Mat::default(),
            mask: Mat::default(),
            dilated: Mat::default(),
        }
    }

    pub(crate) fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Converts `frame` into the segmentation color space.
    pub(crate) fn convert(&mut self, frame: &Frame<'_>) -> opencv::Result<&Mat> {
        frame.convert_into(self.color_space.conversion_code(), &mut self.converted)?;
        Ok(&self.converted)
    }

    /// Masks the pixels of `frame` inside `range` and returns the outer contours of the mask.
    ///
    /// Afterwards [`Self::mask`] and [`Self::smoothed`] hold the dilated mask and the blurred
    /// image the mask was computed from.
    pub(crate) fn segment(
        &mut self,
        frame: &Frame<'_>,
        range: &ColorRange,
    ) -> opencv::Result<Vector<Contour>> {
        self.convert(frame)?;
        imgproc::blur_def(&self.converted, &mut self.blurred, Size::new(3, 3))?;

        let (lower, upper) = range.bounds(self.color_space);
        opencv::core::in_range(
            &self.blurred,
            &to_scalar(lower),
            &to_scalar(upper),
            &mut self.mask,
        )?;
        imgproc::dilate_def(&self.mask, &mut self.dilated, &Mat::default())?;

        let mut contours = Vector::<Contour>::new();
        imgproc::find_contours_def(
            &self.dilated,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
        )?;
        Ok(contours)
    }

    pub(crate) fn mask(&self) -> &Mat {
        &self.dilated
    }

    pub(crate) fn smoothed(&self) -> &Mat {
        &self.blurred
    }

    pub(crate) fn release(&mut self) {
        *self = Self::new(self.color_space);
    }
}

fn to_scalar([a, b, c]: [f32; 3]) -> Scalar {
    Scalar::new(a as f64, b as f64, c as f64, 0.0)
}

/// Area-weighted centroid of a contour, `None` for contours without area.
pub(crate) fn centroid(contour: &Contour) -> opencv::Result<Option<Point2<f32>>> {
    let m = imgproc::moments_def(contour)?;
    if m.m00.abs() < f64::EPSILON {
        return Ok(None);
    }
    Ok(Some(Point2::new((m.m10 / m.m00) as f32, (m.m01 / m.m00) as f32)))
}

/// Tracks up to `max_contours` hands as the largest blobs of the calibrated color.
///
/// Every frame is processed independently; hands carry no identity across frames.
#[derive(Debug)]
pub struct ColorThresholdTracker {
    config: ThresholdConfig,
    segmenter: ColorSegmenter,
    range: Option<ColorRange>,
    initialized: bool,
}

impl ColorThresholdTracker {
    pub fn new(config: ThresholdConfig) -> Self {
        let segmenter = ColorSegmenter::new(config.color_space);
        Self {
            config,
            segmenter,
            range: None,
            initialized: false,
        }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn color_range(&self) -> Option<&ColorRange> {
        self.range.as_ref()
    }

    /// Keeps the contours large enough in absolute terms and relative to the largest one, largest
    /// first.
    fn select(&self, contours: Vector<Contour>) -> opencv::Result<Vec<(f64, Contour)>> {
        let mut scored = Vec::with_capacity(contours.len());
        for contour in contours {
            scored.push((imgproc::contour_area_def(&contour)?, contour));
        }
        let max_area = scored.iter().map(|(a, _)| *a).fold(0.0, f64::max);
        let floor = self
            .config
            .min_contour_area
            .max(max_area * self.config.min_contour_area_fraction);

        scored.retain(|(area, _)| *area >= floor);
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.config.max_contours);
        Ok(scored)
    }

    fn locate(&mut self, frame: &Frame<'_>, range: &ColorRange) -> opencv::Result<Vec<Point2<f32>>> {
        let contours = self.segmenter.segment(frame, range)?;
        let found = contours.len();
        let mut centers = Vec::new();
        for (_, contour) in self.select(contours)? {
            if let Some(center) = centroid(&contour)? {
                centers.push(center);
            }
        }
        log::trace!("threshold tracker: {found} contours, {} hands", centers.len());
        Ok(centers)
    }
}

impl HandTracker for ColorThresholdTracker {
    fn initialize(&mut self, frame_width: u32, frame_height: u32) -> Result<(), TrackerError> {
        self.initialized = true;
        log::debug!(
            "{:?} threshold tracker initialized for {frame_width}x{frame_height}",
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
            log::trace!("threshold tracker has no color range yet");
            return Vec::new();
        };

        let centers = match self.locate(frame, &range) {
            Ok(centers) => centers,
            Err(e) => {
                log::warn!("color segmentation failed, skipping frame: {e}");
                return Vec::new();
            }
        };
        centers
            .into_iter()
            .map(|center| {
                let position = frame_point_to_world(frame, camera, center, self.config.hand_depth);
                HandTransform::new(position)
            })
            .collect()
    }

    fn set_threshold_colors(&mut self, range: &ColorRange) {
        log::debug!(
            "threshold tracker bounds set to {:?}",
            range.bounds(self.config.color_space)
        );
        self.range = Some(*range);
    }

    fn dispose(&mut self) {
        if self.initialized {
            self.segmenter.release();
            self.initialized = false;
            log::debug!("threshold tracker disposed");
        }
    }
}
