//! CNN hand detection with per-class non-maximum suppression.

use std::path::PathBuf;

use ndarray::{Array2, Array4, s};
use opencv::core::{self, Mat, Size, Vec3f};
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::nms::{DetectionCandidate, NonMaxSuppression};
use super::rect::Rect;
use super::{HandTracker, frame_point_to_world};
use crate::error::{InferenceError, TrackerError};
use crate::frame::{CameraView, Frame, HandTransform};
use crate::integration::{DetectionNetwork, load_labels, load_network};

/// Configuration for the [`NeuralDetectorTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralDetectorConfig {
    pub model_path: PathBuf,
    /// Class names, one per line. Without a file the single class is `hand`.
    pub labels_path: Option<PathBuf>,
    pub input_width: usize,
    pub input_height: usize,
    /// Rows whose best class score does not exceed this are dropped.
    pub confidence_threshold: f32,
    /// IoU above which the less confident of two same-class boxes is suppressed.
    pub nms_threshold: f32,
    /// Column of the first class score in each output row.
    pub score_offset: usize,
    /// Assumed distance from the camera to the hand, in world units.
    pub hand_depth: f32,
}

impl Default for NeuralDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/hand-yolov3-tiny.onnx"),
            labels_path: None,
            input_width: 416,
            input_height: 416,
            confidence_threshold: 0.3,
            nms_threshold: NonMaxSuppression::DEFAULT_IOU_THRESHOLD,
            score_offset: 5,
            hand_depth: 0.5,
        }
    }
}

/// Detects hands with a YOLO-style network.
///
/// Every frame is resized to the network input, run through the network, and each output row
/// above the confidence threshold becomes a candidate. Networks with several detection layers
/// see the same hand more than once, so their candidates go through class-aware NMS. Hands are
/// reported most confident first.
pub struct NeuralDetectorTracker {
    config: NeuralDetectorConfig,
    network: Option<Box<dyn DetectionNetwork>>,
    labels: Vec<String>,
    nms: NonMaxSuppression,
    scratch: BlobScratch,
    input: Array4<f32>,
    initialized: bool,
}

impl NeuralDetectorTracker {
    /// Tracker that loads its network from `config.model_path` on initialization.
    pub fn new(config: NeuralDetectorConfig) -> Self {
        let nms = NonMaxSuppression::new(config.confidence_threshold, config.nms_threshold);
        Self {
            config,
            network: None,
            labels: Vec::new(),
            nms,
            scratch: BlobScratch::default(),
            input: Array4::zeros((1, 3, 0, 0)),
            initialized: false,
        }
    }

    /// Tracker running an already constructed network.
    pub fn with_network(config: NeuralDetectorConfig, network: Box<dyn DetectionNetwork>) -> Self {
        let mut tracker = Self::new(config);
        tracker.network = Some(network);
        tracker
    }

    pub fn config(&self) -> &NeuralDetectorConfig {
        &self.config
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Runs the network on `frame` and returns the surviving candidates, most confident first.
    pub fn detect(&mut self, frame: &Frame<'_>) -> Result<Vec<DetectionCandidate>, InferenceError> {
        let Some(network) = self.network.as_mut() else {
            return Ok(Vec::new());
        };
        let (width, height) = network.input_size();
        blob_from_image(frame, width, height, &mut self.scratch, &mut self.input)?;

        let outputs = network.forward(self.input.view())?;
        let candidates = decode(
            &outputs,
            self.config.score_offset,
            self.config.confidence_threshold,
            frame.width() as f32,
            frame.height() as f32,
        )?;

        let mut kept = if outputs.len() > 1 {
            self.nms.process(&candidates)
        } else {
            candidates
        };
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(kept)
    }

    fn label(&self, class_id: usize) -> &str {
        self.labels.get(class_id).map_or("?", String::as_str)
    }
}

impl HandTracker for NeuralDetectorTracker {
    fn initialize(&mut self, frame_width: u32, frame_height: u32) -> Result<(), TrackerError> {
        let labels = match &self.config.labels_path {
            Some(path) => load_labels(path)?,
            None => vec!["hand".to_string()],
        };
        if self.network.is_none() {
            self.network = Some(load_network(&self.config)?);
        }
        self.labels = labels;
        self.initialized = true;
        log::debug!(
            "neural detector initialized for {frame_width}x{frame_height} with classes {:?}",
            self.labels
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
        let detections = match self.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("hand detection failed, skipping frame: {e}");
                return Vec::new();
            }
        };

        for d in &detections {
            log::trace!("{} {:.2} at {:?}", self.label(d.class_id), d.confidence, d.rect);
        }
        detections
            .iter()
            .map(|d| {
                let (cx, cy) = d.rect.center();
                let position = frame_point_to_world(
                    frame,
                    camera,
                    nalgebra::Point2::new(cx, cy),
                    self.config.hand_depth,
                );
                HandTransform::new(position)
            })
            .collect()
    }

    fn dispose(&mut self) {
        if self.initialized {
            self.network = None;
            self.scratch = BlobScratch::default();
            self.input = Array4::zeros((1, 3, 0, 0));
            self.initialized = false;
            log::debug!("neural detector disposed");
        }
    }
}

#[derive(Default)]
struct BlobScratch {
    rgb: Mat,
    resized: Mat,
    scaled: Mat,
}

/// Resizes `frame` bilinearly to `width` x `height` into a `[1, 3, height, width]` tensor scaled
/// to `[0, 1]`.
fn blob_from_image(
    frame: &Frame<'_>,
    width: usize,
    height: usize,
    scratch: &mut BlobScratch,
    dst: &mut Array4<f32>,
) -> opencv::Result<()> {
    frame.convert_into(imgproc::COLOR_RGBA2RGB, &mut scratch.rgb)?;
    imgproc::resize(
        &scratch.rgb,
        &mut scratch.resized,
        Size::new(width as i32, height as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    scratch
        .resized
        .convert_to(&mut scratch.scaled, core::CV_32FC3, 1.0 / 255.0, 0.0)?;

    if dst.dim() != (1, 3, height, width) {
        *dst = Array4::zeros((1, 3, height, width));
    }
    for (i, px) in scratch.scaled.data_typed::<Vec3f>()?.iter().enumerate() {
        let (y, x) = (i / width, i % width);
        for c in 0..3 {
            dst[[0, c, y, x]] = px[c];
        }
    }
    Ok(())
}

/// Turns raw output rows into frame-space candidates.
///
/// Each row is `[cx, cy, w, h, ...]` relative to the input, with class scores starting at
/// `score_offset`. Rows whose best score does not exceed `threshold` are dropped.
pub(crate) fn decode(
    outputs: &[Array2<f32>],
    score_offset: usize,
    threshold: f32,
    frame_width: f32,
    frame_height: f32,
) -> Result<Vec<DetectionCandidate>, InferenceError> {
    let min = score_offset.max(4) + 1;
    let mut candidates = Vec::new();
    for (index, output) in outputs.iter().enumerate() {
        if output.nrows() > 0 && output.ncols() < min {
            return Err(InferenceError::ShapeMismatch {
                index,
                cols: output.ncols(),
                min,
            });
        }
        for row in output.rows() {
            let scores = row.slice(s![score_offset..]);
            let Some((class_id, &confidence)) = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            else {
                continue;
            };
            if confidence > threshold {
                let rect = Rect::from_normalized_center(
                    row[0],
                    row[1],
                    row[2],
                    row[3],
                    frame_width,
                    frame_height,
                );
                candidates.push(DetectionCandidate::new(class_id, confidence, rect));
            }
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Viewport;
    use crate::frame::test_util::paint;
    use ndarray::{ArrayView4, array};

    /// Replays fixed output layers and records the input it was given.
    struct FixedOutputs {
        layers: Vec<Array2<f32>>,
        last_input: Option<Array4<f32>>,
    }

    impl FixedOutputs {
        fn boxed(layers: Vec<Array2<f32>>) -> Box<dyn DetectionNetwork> {
            Box::new(Self {
                layers,
                last_input: None,
            })
        }
    }

    impl DetectionNetwork for FixedOutputs {
        fn input_size(&self) -> (usize, usize) {
            (8, 8)
        }

        fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<Array2<f32>>, InferenceError> {
            self.last_input = Some(input.to_owned());
            Ok(self.layers.clone())
        }
    }

    fn run(layers: Vec<Array2<f32>>) -> (NeuralDetectorTracker, Vec<HandTransform>) {
        let mut tracker =
            NeuralDetectorTracker::with_network(NeuralDetectorConfig::default(), FixedOutputs::boxed(layers));
        tracker.initialize(100, 100).unwrap();
        let data = vec![255u8; 100 * 100 * 4];
        let frame = Frame::new(&data, 100, 100).unwrap();
        let camera = CameraView::new(Viewport::new(100.0, 100.0));
        let hands = tracker.hand_positions(&frame, &camera, 0.0);
        (tracker, hands)
    }

    #[test]
    fn rows_below_threshold_are_dropped() {
        let layer = array![
            [0.5, 0.5, 0.2, 0.2, 0.9, 0.8],
            [0.2, 0.2, 0.1, 0.1, 0.9, 0.3],
        ];
        let (_, hands) = run(vec![layer]);
        assert_eq!(hands.len(), 1);
    }

    #[test]
    fn decode_scales_to_frame() {
        let layer = array![[0.25, 0.5, 0.1, 0.2, 1.0, 0.1, 0.7]];
        let candidates = decode(&[layer], 5, 0.3, 200.0, 100.0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 1);
        assert_eq!(candidates[0].rect, Rect::new(40.0, 40.0, 20.0, 20.0));
    }

    #[test]
    fn score_offset_four_reads_scores_after_box() {
        let layer = array![[0.5, 0.5, 0.2, 0.2, 0.6]];
        let candidates = decode(&[layer], 4, 0.3, 10.0, 10.0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, 0.6);
    }

    #[test]
    fn narrow_output_is_a_shape_error() {
        let layer = array![[0.5, 0.5, 0.2]];
        assert_eq!(
            decode(&[layer], 5, 0.3, 10.0, 10.0),
            Err(InferenceError::ShapeMismatch {
                index: 0,
                cols: 3,
                min: 6
            })
        );
    }

    #[test]
    fn malformed_output_yields_no_hands() {
        let (tracker, hands) = run(vec![array![[0.5, 0.5]]]);
        assert!(hands.is_empty());
        assert!(tracker.is_initialized());
    }

    #[test]
    fn overlapping_boxes_across_layers_collapse() {
        let a = array![[0.5, 0.5, 0.4, 0.4, 1.0, 0.6]];
        let b = array![[0.52, 0.5, 0.4, 0.4, 1.0, 0.9]];
        let (mut tracker, hands) = run(vec![a, b]);
        assert_eq!(hands.len(), 1);

        let data = vec![255u8; 100 * 100 * 4];
        let frame = Frame::new(&data, 100, 100).unwrap();
        let kept = tracker.detect(&frame).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn single_layer_skips_suppression() {
        let layer = array![
            [0.5, 0.5, 0.4, 0.4, 1.0, 0.6],
            [0.52, 0.5, 0.4, 0.4, 1.0, 0.9],
        ];
        let (mut tracker, hands) = run(vec![layer]);
        assert_eq!(hands.len(), 2);

        let data = vec![255u8; 100 * 100 * 4];
        let frame = Frame::new(&data, 100, 100).unwrap();
        let confidences: Vec<f32> = tracker.detect(&frame).unwrap().iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.6]);
    }

    #[test]
    fn different_classes_survive_full_overlap() {
        let a = array![[0.5, 0.5, 0.4, 0.4, 1.0, 0.8, 0.0]];
        let b = array![[0.5, 0.5, 0.4, 0.4, 1.0, 0.0, 0.7]];
        let (_, hands) = run(vec![a, b]);
        assert_eq!(hands.len(), 2);
    }

    #[test]
    fn default_labels_name_a_single_hand_class() {
        let (tracker, _) = run(Vec::new());
        assert_eq!(tracker.labels(), ["hand".to_string()]);
    }

    #[test]
    fn blob_is_resized_and_normalized() {
        // Red, with yellow on the right half.
        let data = paint(4, 4, [255, 0, 0], &[(2, 0, 2, 4, [255, 255, 0])]);
        let frame = Frame::new(&data, 4, 4).unwrap();
        let mut blob = Array4::zeros((1, 3, 0, 0));
        blob_from_image(&frame, 2, 2, &mut BlobScratch::default(), &mut blob).unwrap();

        assert_eq!(blob.dim(), (1, 3, 2, 2));
        assert!(blob.slice(s![0, 0, .., ..]).iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!((blob[[0, 1, 0, 0]] - 0.0).abs() < 1e-6);
        assert!((blob[[0, 1, 0, 1]] - 1.0).abs() < 1e-6);
        assert!(blob.slice(s![0, 2, .., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn uninitialized_without_backend() {
        let mut tracker = NeuralDetectorTracker::new(NeuralDetectorConfig::default());
        if cfg!(not(feature = "onnx")) {
            assert!(matches!(tracker.initialize(10, 10), Err(TrackerError::NoBackend(_))));
        } else {
            assert!(tracker.initialize(10, 10).is_err());
        }
        assert!(!tracker.is_initialized());
    }
}
