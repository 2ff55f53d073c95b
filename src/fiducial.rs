//! Square fiducial markers: detection and pose.

mod detector;
mod pose;

pub use detector::{ArucoMarkerDetector, DetectedMarker, DetectorParams, MarkerDetector};
pub use pose::{CameraIntrinsics, Pose, estimate_pose, marker_object_points};

use nalgebra::Point2;

/// One marker seen in the current frame, with its pose relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerObservation {
    pub id: u32,
    pub center: Point2<f32>,
    pub pose: Pose,
}

impl MarkerObservation {
    /// Estimates the pose of a detection. Returns `None` if no pose fits the quad.
    pub fn from_detection(
        marker: &DetectedMarker,
        marker_length: f64,
        intrinsics: &CameraIntrinsics,
    ) -> opencv::Result<Option<Self>> {
        let Some(pose) = estimate_pose(&marker.corners, marker_length, intrinsics)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            id: marker.id,
            center: marker.center(),
            pose,
        }))
    }
}
