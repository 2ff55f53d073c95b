//! Error types shared across the crate.

use thiserror::Error;

/// A frame buffer did not describe a valid RGBA image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("frame buffer holds {got} bytes, expected {expected} for {width}x{height} RGBA")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
}

/// Color calibration could not produce a range.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration radius must be greater than zero")]
    InvalidRadius,
    #[error("sample circle at ({x:.1}, {y:.1}) with radius {radius} covers no pixels")]
    EmptySample { x: f32, y: f32, radius: u32 },
    #[error("color conversion of the sample failed: {0}")]
    Conversion(#[from] opencv::Error),
}

/// Errors surfaced while setting up a tracker.
///
/// A tracker that returned one of these from `initialize` stays uninitialized.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to load detection model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("failed to load class labels from {path}: {source}")]
    LabelLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no inference backend available for {0} (enable the `onnx` feature or inject a network)")]
    NoBackend(String),
    #[error(transparent)]
    Vision(#[from] opencv::Error),
    #[error("tracker is not initialized")]
    NotInitialized,
    #[error(transparent)]
    InvalidFrame(#[from] FrameError),
}

/// A forward pass failed or produced tensors the decoder cannot read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("output tensor {index} has {cols} columns, need at least {min}")]
    ShapeMismatch {
        index: usize,
        cols: usize,
        min: usize,
    },
    #[error("input tensor shape {got:?} does not match network input {expected:?}")]
    InputShape {
        expected: [usize; 4],
        got: [usize; 4],
    },
    #[error("inference backend error: {0}")]
    Backend(String),
    #[error("frame preprocessing failed: {0}")]
    Preprocess(String),
}

impl From<opencv::Error> for InferenceError {
    fn from(e: opencv::Error) -> Self {
        InferenceError::Preprocess(e.to_string())
    }
}
