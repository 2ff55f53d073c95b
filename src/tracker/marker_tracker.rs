//! Fiducial marker tracking with occlusion recovery.

use std::collections::HashSet;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::track_history::TrackHistory;
use super::{HandTracker, frame_point_to_world};
use crate::error::TrackerError;
use crate::fiducial::{
    ArucoMarkerDetector, CameraIntrinsics, DetectorParams, MarkerDetector, MarkerObservation,
};
use crate::frame::{CameraView, Frame, HandTransform};

/// Configuration for the [`MarkerTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerTrackerConfig {
    /// Printed marker side length in meters.
    pub marker_length: f32,
    /// Minimum movement for a detection to be recorded as a new sample.
    pub history_epsilon: f32,
    /// Consecutive predictions after which a marker is considered lost.
    pub untrusted_ceiling: u32,
    pub detector: DetectorParams,
}

impl Default for MarkerTrackerConfig {
    fn default() -> Self {
        Self {
            marker_length: 0.05,
            history_epsilon: 1e-4,
            untrusted_ceiling: 10,
            detector: DetectorParams::default(),
        }
    }
}

/// Tracks fiducial markers, one hand per marker id.
///
/// Markers that drop out of view keep being reported at an extrapolated position until their
/// untrusted streak exceeds the configured ceiling.
pub struct MarkerTracker {
    config: MarkerTrackerConfig,
    /// Created on initialization unless one was injected.
    detector: Option<Box<dyn MarkerDetector>>,
    intrinsics: Option<CameraIntrinsics>,
    history: TrackHistory,
}

impl MarkerTracker {
    /// Tracker over the classic ArUco dictionary.
    pub fn new(config: MarkerTrackerConfig) -> Self {
        let history = TrackHistory::new(config.history_epsilon, config.untrusted_ceiling);
        Self {
            config,
            detector: None,
            intrinsics: None,
            history,
        }
    }

    pub fn with_detector(config: MarkerTrackerConfig, detector: Box<dyn MarkerDetector>) -> Self {
        let mut tracker = Self::new(config);
        tracker.detector = Some(detector);
        tracker
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    fn observe_frame(
        &mut self,
        frame: &Frame<'_>,
        intrinsics: &CameraIntrinsics,
    ) -> Vec<MarkerObservation> {
        let Some(detector) = self.detector.as_mut() else {
            return Vec::new();
        };
        let detections = match detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("marker detection failed: {e}");
                return Vec::new();
            }
        };

        let length = self.config.marker_length as f64;
        let mut observations = Vec::with_capacity(detections.len());
        for marker in &detections {
            match MarkerObservation::from_detection(marker, length, intrinsics) {
                Ok(Some(observation)) => observations.push(observation),
                Ok(None) => log::trace!("no pose for marker {}", marker.id),
                Err(e) => log::warn!("pose estimation failed for marker {}: {e}", marker.id),
            }
        }
        observations
    }

    fn to_transform(
        &self,
        observation: &MarkerObservation,
        frame: &Frame<'_>,
        camera: &CameraView,
    ) -> HandTransform {
        let depth = observation.pose.translation.z as f32;
        let position = frame_point_to_world(frame, camera, observation.center, depth);

        let (roll, pitch, yaw) = observation.pose.rotation.euler_angles();
        // Camera frame is y-down and right-handed; the scene is y-up.
        let local = Vector3::new(
            -roll.to_degrees() as f32,
            pitch.to_degrees() as f32,
            -yaw.to_degrees() as f32,
        );
        HandTransform::with_rotation(position, local + camera.orientation)
    }
}

impl HandTracker for MarkerTracker {
    fn initialize(&mut self, frame_width: u32, frame_height: u32) -> Result<(), TrackerError> {
        if self.detector.is_none() {
            self.detector = Some(Box::new(ArucoMarkerDetector::new(&self.config.detector)?));
        }
        self.intrinsics = Some(CameraIntrinsics::from_frame_size(frame_width, frame_height));
        log::debug!("marker tracker initialized for {frame_width}x{frame_height}");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.intrinsics.is_some()
    }

    fn hand_positions(
        &mut self,
        frame: &Frame<'_>,
        camera: &CameraView,
        time: f64,
    ) -> Vec<HandTransform> {
        let Some(intrinsics) = self.intrinsics else {
            return Vec::new();
        };

        let observations = self.observe_frame(frame, &intrinsics);

        let mut seen = HashSet::with_capacity(observations.len());
        for observation in &observations {
            let transform = self.to_transform(observation, frame, camera);
            self.history.observe(observation.id, transform, time);
            seen.insert(observation.id);
        }

        let missing: Vec<u32> = self
            .history
            .ids()
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        for id in missing {
            self.history.predict(id, time);
        }

        log::trace!(
            "marker tracker: {} detected, {} known",
            observations.len(),
            self.history.ids().len()
        );
        self.history.latest_transforms().map(|(_, t)| t).collect()
    }

    fn dispose(&mut self) {
        if self.intrinsics.take().is_some() {
            self.history.clear();
            log::debug!("marker tracker disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiducial::DetectedMarker;
    use crate::frame::Viewport;
    use crate::tracker::TrackState;
    use nalgebra::Point2;

    /// Replays a fixed list of detections per call.
    struct Scripted {
        ticks: Vec<Vec<DetectedMarker>>,
        next: usize,
    }

    impl MarkerDetector for Scripted {
        fn detect(&mut self, _frame: &Frame<'_>) -> opencv::Result<Vec<DetectedMarker>> {
            let out = self.ticks.get(self.next).cloned().unwrap_or_default();
            self.next += 1;
            Ok(out)
        }
    }

    fn square(id: u32, cx: f32, cy: f32, half: f32) -> DetectedMarker {
        DetectedMarker {
            id,
            corners: [
                Point2::new(cx - half, cy - half),
                Point2::new(cx + half, cy - half),
                Point2::new(cx + half, cy + half),
                Point2::new(cx - half, cy + half),
            ],
        }
    }

    fn tracker(ticks: Vec<Vec<DetectedMarker>>) -> MarkerTracker {
        let mut tracker = MarkerTracker::with_detector(
            MarkerTrackerConfig::default(),
            Box::new(Scripted { ticks, next: 0 }),
        );
        tracker.initialize(640, 480).unwrap();
        tracker
    }

    #[test]
    fn uninitialized_tracker_reports_nothing() {
        let mut tracker = MarkerTracker::new(MarkerTrackerConfig::default());
        let data = vec![255u8; 8 * 8 * 4];
        let frame = Frame::new(&data, 8, 8).unwrap();
        let camera = CameraView::new(Viewport::new(8.0, 8.0));
        assert!(tracker.hand_positions(&frame, &camera, 0.0).is_empty());
    }

    #[test]
    fn initialize_builds_the_aruco_detector() {
        let mut tracker = MarkerTracker::new(MarkerTrackerConfig::default());
        assert!(tracker.detector.is_none());
        tracker.initialize(64, 48).unwrap();
        assert!(tracker.detector.is_some());

        let data = vec![255u8; 64 * 48 * 4];
        let frame = Frame::new(&data, 64, 48).unwrap();
        let camera = CameraView::new(Viewport::new(64.0, 48.0));
        assert!(tracker.hand_positions(&frame, &camera, 0.0).is_empty());
    }

    #[test]
    fn detected_marker_is_placed_at_its_depth() {
        let mut tracker = tracker(vec![vec![square(3, 320.0, 240.0, 40.0)]]);
        let data = vec![0u8; 640 * 480 * 4];
        let frame = Frame::new(&data, 640, 480).unwrap();
        let camera = CameraView::new(Viewport::new(640.0, 480.0));

        let hands = tracker.hand_positions(&frame, &camera, 0.0);
        assert_eq!(hands.len(), 1);
        // 80 px wide at f = 640 for a 5 cm marker puts it 40 cm away.
        let p = hands[0].position;
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
        assert!((p.z - 0.4).abs() < 1e-3, "depth {}", p.z);
        assert_eq!(tracker.history().state(3), TrackState::Trusted);
    }

    #[test]
    fn facing_marker_rotation_is_in_world_space() {
        let mut tracker = tracker(vec![vec![square(1, 320.0, 240.0, 40.0)]]);
        let data = vec![0u8; 640 * 480 * 4];
        let frame = Frame::new(&data, 640, 480).unwrap();
        let camera = CameraView::new(Viewport::new(640.0, 480.0))
            .with_orientation(Vector3::new(0.0, 30.0, 0.0));

        let hands = tracker.hand_positions(&frame, &camera, 0.0);
        let r = hands[0].rotation;
        // A marker facing the camera is flipped half a turn about x.
        assert!((r.x.abs() - 180.0).abs() < 0.5, "{r:?}");
        assert!((r.y - 30.0).abs() < 0.5, "{r:?}");
        assert!(r.z.abs() < 0.5, "{r:?}");
    }

    #[test]
    fn missing_marker_is_predicted_then_lost() {
        let mut ticks: Vec<Vec<DetectedMarker>> = (0..3)
            .map(|i| vec![square(5, 200.0 + 20.0 * i as f32, 240.0, 40.0)])
            .collect();
        ticks.extend(std::iter::repeat_n(Vec::new(), 12));
        let mut tracker = tracker(ticks);

        let data = vec![0u8; 640 * 480 * 4];
        let frame = Frame::new(&data, 640, 480).unwrap();
        let camera = CameraView::new(Viewport::new(640.0, 480.0));

        let mut last_x = f32::NEG_INFINITY;
        for t in 0..3 {
            let hands = tracker.hand_positions(&frame, &camera, t as f64);
            last_x = hands[0].position.x;
        }
        for t in 3..14 {
            let hands = tracker.hand_positions(&frame, &camera, t as f64);
            assert_eq!(hands.len(), 1, "tick {t}");
            assert!(hands[0].position.x > last_x);
            last_x = hands[0].position.x;
        }
        assert!(tracker.hand_positions(&frame, &camera, 14.0).is_empty());
        assert_eq!(tracker.history().state(5), TrackState::Undetected);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut tracker = tracker(Vec::new());
        tracker.dispose();
        assert!(!tracker.is_initialized());
        tracker.dispose();
        assert!(!tracker.is_initialized());
    }
}
