//! Real-time hand and fiducial marker tracking.
//!
//! A [`TrackingSession`] feeds RGBA frames to one [`HandTracker`] and returns the world-space
//! [`HandTransform`] of every hand found:
//!
//! - [`MarkerTracker`] follows printed fiducial markers and keeps predicting briefly occluded
//!   ones.
//! - [`ColorThresholdTracker`] segments hands by a calibrated color.
//! - [`HistogramTracker`] follows one hand by color histogram back-projection.
//! - [`NeuralDetectorTracker`] runs a YOLO-style detection network.

pub mod color;
pub mod error;
pub mod fiducial;
pub mod frame;
pub mod integration;
pub mod mapping;
pub mod tracker;

pub use color::{ColorCalibrator, ColorRange, ColorSpace};
pub use error::{CalibrationError, FrameError, InferenceError, TrackerError};
pub use fiducial::{ArucoMarkerDetector, DetectedMarker, MarkerDetector};
pub use frame::{CameraView, Frame, HandTransform, Viewport};
pub use integration::{DetectionNetwork, FrameRateMonitor, SessionConfig, TrackingSession};
pub use mapping::CoordinateMapper;
pub use tracker::{
    ColorThresholdTracker, DetectionCandidate, HandTracker, HistogramConfig, HistogramTracker,
    MarkerTracker, MarkerTrackerConfig, NeuralDetectorConfig, NeuralDetectorTracker,
    NonMaxSuppression, Rect, ThresholdConfig, TrackHistory, TrackState, TrackerKind,
};

#[cfg(feature = "onnx")]
pub use integration::OnnxNetwork;

#[cfg(feature = "burn-backend")]
pub use integration::{BurnModel, BurnNetwork};
