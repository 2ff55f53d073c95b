//! Burn inference backend for the neural detector.
//!
//! This module provides a `BurnNetwork` that implements `DetectionNetwork`
//! for hand detection models built with the Burn framework.
//!
//! # Example
//!
//! ```ignore
//! use handtrack_rs::{BurnModel, BurnNetwork, NeuralDetectorConfig, NeuralDetectorTracker};
//! use burn::backend::NdArray;
//!
//! // Implement BurnModel for your detection model
//! struct MyYoloModel { /* ... */ }
//!
//! impl BurnModel<NdArray> for MyYoloModel {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 4>) -> Vec<burn::tensor::Tensor<NdArray, 2>> {
//!         // Run inference
//!     }
//! }
//!
//! let model = MyYoloModel::load("model.bin");
//! let network = BurnNetwork::new(model, Default::default());
//! let tracker = NeuralDetectorTracker::with_network(NeuralDetectorConfig::default(), Box::new(network));
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use ndarray::{Array2, ArrayView4};

use super::network::{DetectionNetwork, check_input};
use crate::error::InferenceError;

/// Trait for Burn-based detection models.
///
/// Implement this trait for your specific model architecture.
pub trait BurnModel<B: Backend>: Send + Sync {
    /// Run forward pass on the input tensor.
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape [1, 3, height, width], values in [0, 1]
    ///
    /// # Returns
    /// One `[rows, columns]` tensor per detection layer.
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 2>>;

    /// Get the expected input size (width, height).
    fn input_size(&self) -> (usize, usize) {
        (416, 416) // Default YOLOv3 input size
    }
}

/// Burn-based hand detection network implementing `DetectionNetwork`.
pub struct BurnNetwork<B: Backend, M: BurnModel<B>> {
    model: M,
    device: B::Device,
}

impl<B: Backend, M: BurnModel<B>> BurnNetwork<B, M> {
    /// Create a new Burn network with the given model and device.
    pub fn new(model: M, device: B::Device) -> Self {
        Self { model, device }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Copies the input into a Burn tensor on the configured device.
    fn to_tensor(&self, input: &ArrayView4<'_, f32>) -> Tensor<B, 4> {
        let (batch, channels, height, width) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
            batch, channels, height, width,
        ])
    }

    /// Converts one output layer back into a row-major matrix.
    fn to_matrix(output: Tensor<B, 2>) -> Result<Array2<f32>, InferenceError> {
        let [rows, cols] = output.dims();
        let values = output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Backend(format!("{e:?}")))?;
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| InferenceError::Backend(e.to_string()))
    }
}

impl<B: Backend, M: BurnModel<B>> DetectionNetwork for BurnNetwork<B, M> {
    fn input_size(&self) -> (usize, usize) {
        self.model.input_size()
    }

    fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<Array2<f32>>, InferenceError> {
        let (width, height) = self.model.input_size();
        check_input(&input, width, height)?;

        let tensor = self.to_tensor(&input);
        self.model
            .forward(tensor)
            .into_iter()
            .map(Self::to_matrix)
            .collect()
    }
}
