//! ONNX inference backend built on `tract`.
//!
//! Darknet YOLO weights can be exported to ONNX and run through this backend unchanged: every
//! output of the graph is flattened to a `[rows, columns]` matrix, one row per candidate box.
//!
//! # Example
//!
//! ```ignore
//! use handtrack_rs::{NeuralDetectorConfig, NeuralDetectorTracker, OnnxNetwork};
//!
//! let network = OnnxNetwork::load("yolo-hand.onnx".as_ref(), 416, 416)?;
//! let tracker = NeuralDetectorTracker::with_network(NeuralDetectorConfig::default(), Box::new(network));
//! ```

use std::path::Path;

use ndarray::{Array2, ArrayView4};
use tract_onnx::prelude::{
    Datum, Framework, Graph, InferenceModelExt, SimplePlan, Tensor, TypedFact, TypedOp, tvec,
};

use super::network::{DetectionNetwork, check_input};
use crate::error::{InferenceError, TrackerError};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// An optimized ONNX graph with a fixed `[1, 3, height, width]` input.
pub struct OnnxNetwork {
    plan: Plan,
    width: usize,
    height: usize,
}

impl OnnxNetwork {
    pub fn load(path: &Path, width: usize, height: usize) -> Result<Self, TrackerError> {
        let model_error = |reason: String| TrackerError::ModelLoad {
            path: path.display().to_string(),
            reason,
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.with_input_fact(0, f32::fact([1, 3, height, width]).into()))
            .and_then(|model| model.into_optimized())
            .and_then(SimplePlan::new)
            .map_err(|e| model_error(e.to_string()))?;

        log::debug!(
            "loaded ONNX detector {} ({} outputs)",
            path.display(),
            plan.model().outputs.len()
        );
        Ok(Self {
            plan,
            width,
            height,
        })
    }
}

impl DetectionNetwork for OnnxNetwork {
    fn input_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<Array2<f32>>, InferenceError> {
        check_input(&input, self.width, self.height)?;
        let backend = |e: tract_onnx::prelude::TractError| InferenceError::Backend(e.to_string());

        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(&[1, 3, self.height, self.width], &data).map_err(backend)?;
        let outputs = self.plan.run(tvec!(tensor.into())).map_err(backend)?;

        outputs
            .iter()
            .map(|output| {
                let shape = output.shape();
                let cols = shape.last().copied().unwrap_or(0);
                let rows = if cols == 0 { 0 } else { output.len() / cols };
                let values = output.as_slice::<f32>().map_err(backend)?;
                Array2::from_shape_vec((rows, cols), values.to_vec())
                    .map_err(|e| InferenceError::Backend(e.to_string()))
            })
            .collect()
    }
}
