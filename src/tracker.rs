//! Interchangeable hand trackers behind one capability trait.

mod histogram_tracker;
mod marker_tracker;
mod neural_tracker;
mod nms;
mod rect;
mod threshold_tracker;
mod track_history;
mod track_state;

pub use histogram_tracker::{HistogramConfig, HistogramTracker};
pub use marker_tracker::{MarkerTracker, MarkerTrackerConfig};
pub use neural_tracker::{NeuralDetectorConfig, NeuralDetectorTracker};
pub use nms::{DetectionCandidate, NonMaxSuppression};
pub use rect::Rect;
pub use threshold_tracker::{ColorThresholdTracker, ThresholdConfig};
pub use track_history::{HISTORY_CAPACITY, HistoryEntry, MarkerHistory, TrackHistory};
pub use track_state::TrackState;

use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::color::{ColorRange, ColorSpace};
use crate::error::TrackerError;
use crate::frame::{CameraView, Frame, HandTransform};
use crate::mapping::CoordinateMapper;

/// A hand tracking algorithm driven one frame at a time.
pub trait HandTracker {
    /// Prepares the tracker for frames of the given size. On error the tracker stays
    /// uninitialized.
    fn initialize(&mut self, frame_width: u32, frame_height: u32) -> Result<(), TrackerError>;

    fn is_initialized(&self) -> bool;

    /// Processes one frame captured at `time` (seconds) and returns the tracked hands.
    ///
    /// Never fails: an unconfigured or uninitialized tracker, or a frame the tracker cannot make
    /// sense of, yields no hands.
    fn hand_positions(
        &mut self,
        frame: &Frame<'_>,
        camera: &CameraView,
        time: f64,
    ) -> Vec<HandTransform>;

    /// Sets the color range to segment hands with. Ignored by trackers that do not use color.
    fn set_threshold_colors(&mut self, _range: &ColorRange) {}

    /// Releases scratch buffers and models. Disposing twice is a no-op.
    fn dispose(&mut self);
}

/// The tracker a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackerKind {
    Marker(MarkerTrackerConfig),
    ThresholdHsv,
    ThresholdLab,
    HistogramHsv,
    HistogramLab,
    NeuralDetector(NeuralDetectorConfig),
}

impl Default for TrackerKind {
    fn default() -> Self {
        TrackerKind::Marker(MarkerTrackerConfig::default())
    }
}

impl TrackerKind {
    pub fn build(&self) -> Box<dyn HandTracker> {
        match self {
            TrackerKind::Marker(config) => Box::new(MarkerTracker::new(config.clone())),
            TrackerKind::ThresholdHsv => Box::new(ColorThresholdTracker::new(ThresholdConfig {
                color_space: ColorSpace::Hsv,
                ..Default::default()
            })),
            TrackerKind::ThresholdLab => Box::new(ColorThresholdTracker::new(ThresholdConfig {
                color_space: ColorSpace::Lab,
                ..Default::default()
            })),
            TrackerKind::HistogramHsv => Box::new(HistogramTracker::new(HistogramConfig {
                color_space: ColorSpace::Hsv,
                ..Default::default()
            })),
            TrackerKind::HistogramLab => Box::new(HistogramTracker::new(HistogramConfig {
                color_space: ColorSpace::Lab,
                ..Default::default()
            })),
            TrackerKind::NeuralDetector(config) => {
                Box::new(NeuralDetectorTracker::new(config.clone()))
            }
        }
    }
}

/// Places a frame pixel `depth` units in front of `camera`, going through screen space.
pub(crate) fn frame_point_to_world(
    frame: &Frame<'_>,
    camera: &CameraView,
    point: Point2<f32>,
    depth: f32,
) -> Vector3<f32> {
    let mapper = CoordinateMapper::new(frame.width() as f32, frame.height() as f32, camera.viewport);
    camera.screen_to_world(mapper.frame_to_screen(point), depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Viewport;

    #[test]
    fn every_kind_builds_an_uninitialized_tracker() {
        let kinds = [
            TrackerKind::default(),
            TrackerKind::ThresholdHsv,
            TrackerKind::ThresholdLab,
            TrackerKind::HistogramHsv,
            TrackerKind::HistogramLab,
            TrackerKind::NeuralDetector(NeuralDetectorConfig::default()),
        ];
        for kind in kinds {
            assert!(!kind.build().is_initialized(), "{kind:?}");
        }
    }

    #[test]
    fn frame_center_lands_on_view_axis() {
        let data = vec![0u8; 64 * 48 * 4];
        let frame = Frame::new(&data, 64, 48).unwrap();
        let camera = CameraView::new(Viewport::new(640.0, 480.0));
        let p = frame_point_to_world(&frame, &camera, Point2::new(32.0, 24.0), 0.5);
        assert!(p.x.abs() < 1e-5 && p.y.abs() < 1e-5);
        assert!((p.z - 0.5).abs() < 1e-5);
    }
}
