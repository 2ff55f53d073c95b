//! Inference backend seam for the neural detector.

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView4};

use crate::error::{InferenceError, TrackerError};
use crate::tracker::NeuralDetectorConfig;

/// An object detection network.
///
/// Implement this trait to run the [`NeuralDetectorTracker`](crate::tracker::NeuralDetectorTracker)
/// on any inference runtime.
///
/// # Example
///
/// ```ignore
/// use handtrack_rs::{DetectionNetwork, InferenceError};
/// use ndarray::{Array2, ArrayView4};
///
/// struct MyNetwork { /* ... */ }
///
/// impl DetectionNetwork for MyNetwork {
///     fn input_size(&self) -> (usize, usize) {
///         (416, 416)
///     }
///
///     fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<Array2<f32>>, InferenceError> {
///         // Run inference, one row per candidate box
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionNetwork {
    /// Input tensor `(width, height)` in pixels.
    fn input_size(&self) -> (usize, usize);

    /// Runs one forward pass.
    ///
    /// # Arguments
    /// * `input` - `[1, 3, height, width]` RGB tensor with values in `[0, 1]`
    ///
    /// # Returns
    /// One matrix per detection layer, one row per candidate:
    /// `[cx, cy, w, h, ..., class scores]` with the box relative to the input.
    fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<Array2<f32>>, InferenceError>;
}

/// Reads class names, one per non-empty line.
pub fn load_labels(path: &Path) -> Result<Vec<String>, TrackerError> {
    let text = fs::read_to_string(path).map_err(|source| TrackerError::LabelLoad {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Loads the network described by `config` with the compiled-in backend.
#[cfg(feature = "onnx")]
pub fn load_network(config: &NeuralDetectorConfig) -> Result<Box<dyn DetectionNetwork>, TrackerError> {
    let network = super::OnnxNetwork::load(
        &config.model_path,
        config.input_width,
        config.input_height,
    )?;
    Ok(Box::new(network))
}

/// Loads the network described by `config` with the compiled-in backend.
#[cfg(not(feature = "onnx"))]
pub fn load_network(config: &NeuralDetectorConfig) -> Result<Box<dyn DetectionNetwork>, TrackerError> {
    Err(TrackerError::NoBackend(
        config.model_path.display().to_string(),
    ))
}

/// Checks that `input` is a single `[1, 3, height, width]` image.
pub(crate) fn check_input(
    input: &ArrayView4<'_, f32>,
    width: usize,
    height: usize,
) -> Result<(), InferenceError> {
    let expected = [1, 3, height, width];
    let got: [usize; 4] = input.dim().into();
    if got != expected {
        return Err(InferenceError::InputShape { expected, got });
    }
    Ok(())
}
