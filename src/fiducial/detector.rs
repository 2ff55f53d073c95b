//! ArUco marker detection on grayscale frames.

use nalgebra::{Point2, Vector2};
use opencv::core::{Mat, Point2f, Vector};
use opencv::imgproc;
use opencv::objdetect::{self, ArucoDetector, CornerRefineMethod, PredefinedDictionaryType};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// A marker found in one frame.
///
/// Corners are in frame pixels, ordered clockwise starting from the marker's own top-left
/// corner regardless of how the marker is rotated in the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedMarker {
    pub id: u32,
    pub corners: [Point2<f32>; 4],
}

impl DetectedMarker {
    pub fn center(&self) -> Point2<f32> {
        let sum = self
            .corners
            .iter()
            .fold(Vector2::zeros(), |acc, c| acc + c.coords);
        Point2::from(sum / 4.0)
    }
}

/// Finds fiducial markers in a frame.
pub trait MarkerDetector {
    fn detect(&mut self, frame: &Frame<'_>) -> opencv::Result<Vec<DetectedMarker>>;
}

/// Tuning knobs forwarded to OpenCV's ArUco detector. Defaults match OpenCV's.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Smallest and largest adaptive threshold window, in pixels.
    pub adaptive_thresh_win_size_min: i32,
    pub adaptive_thresh_win_size_max: i32,
    /// How much darker than the local mean a pixel must be to count as marker ink.
    pub adaptive_thresh_constant: f64,
    /// Contour length limits relative to the larger frame dimension.
    pub min_marker_perimeter_rate: f64,
    pub max_marker_perimeter_rate: f64,
    /// Polygon approximation tolerance relative to the contour length.
    pub polygonal_approx_accuracy_rate: f64,
    /// Quads with a corner closer than this to the frame edge are dropped.
    pub min_distance_to_border: i32,
    pub max_erroneous_bits_in_border_rate: f64,
    pub error_correction_rate: f64,
    /// Refine corners to sub-pixel accuracy.
    pub subpixel_corners: bool,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_constant: 7.0,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            polygonal_approx_accuracy_rate: 0.03,
            min_distance_to_border: 3,
            max_erroneous_bits_in_border_rate: 0.35,
            error_correction_rate: 0.6,
            subpixel_corners: false,
        }
    }
}

impl DetectorParams {
    fn to_opencv(self) -> opencv::Result<objdetect::DetectorParameters> {
        let mut params = objdetect::DetectorParameters::default()?;
        params.set_adaptive_thresh_win_size_min(self.adaptive_thresh_win_size_min);
        params.set_adaptive_thresh_win_size_max(self.adaptive_thresh_win_size_max);
        params.set_adaptive_thresh_constant(self.adaptive_thresh_constant);
        params.set_min_marker_perimeter_rate(self.min_marker_perimeter_rate);
        params.set_max_marker_perimeter_rate(self.max_marker_perimeter_rate);
        params.set_polygonal_approx_accuracy_rate(self.polygonal_approx_accuracy_rate);
        params.set_min_distance_to_border(self.min_distance_to_border);
        params.set_max_erroneous_bits_in_border_rate(self.max_erroneous_bits_in_border_rate);
        params.set_error_correction_rate(self.error_correction_rate);
        let refine = if self.subpixel_corners {
            CornerRefineMethod::CORNER_REFINE_SUBPIX
        } else {
            CornerRefineMethod::CORNER_REFINE_NONE
        };
        params.set_corner_refinement_method(refine as i32);
        Ok(params)
    }
}

/// The classic ArUco dictionary: 1024 markers of 5x5 bits.
fn classic_dictionary() -> opencv::Result<objdetect::Dictionary> {
    objdetect::get_predefined_dictionary(PredefinedDictionaryType::DICT_ARUCO_ORIGINAL)
}

/// Detects markers of the classic ArUco dictionary.
pub struct ArucoMarkerDetector {
    detector: ArucoDetector,
    gray: Mat,
}

impl ArucoMarkerDetector {
    pub fn new(params: &DetectorParams) -> opencv::Result<Self> {
        let mut detector = ArucoDetector::new_def()?;
        detector.set_dictionary(&classic_dictionary()?)?;
        detector.set_detector_parameters(&params.to_opencv()?)?;
        Ok(Self {
            detector,
            gray: Mat::default(),
        })
    }
}

impl MarkerDetector for ArucoMarkerDetector {
    fn detect(&mut self, frame: &Frame<'_>) -> opencv::Result<Vec<DetectedMarker>> {
        frame.convert_into(imgproc::COLOR_RGBA2GRAY, &mut self.gray)?;

        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        self.detector
            .detect_markers_def(&self.gray, &mut corners, &mut ids)?;

        let mut found = Vec::with_capacity(ids.len());
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if id < 0 || quad.len() != 4 {
                continue;
            }
            let corner = |i: usize| -> opencv::Result<Point2<f32>> {
                let p = quad.get(i)?;
                Ok(Point2::new(p.x, p.y))
            };
            found.push(DetectedMarker {
                id: id as u32,
                corners: [corner(0)?, corner(1)?, corner(2)?, corner(3)?],
            });
        }
        Ok(found)
    }
}
