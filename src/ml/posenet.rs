//! ONNX PoseNet backend
//!
//! Runs a PoseNet-style single-person model through ONNX Runtime. The model takes
//! an NHWC image in [-1, 1] and produces keypoint heatmaps plus per-cell
//! offsets; decoding picks the strongest heatmap cell for each keypoint.

use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView3};

use super::{EstimatorError, Keypoint, KeypointLabel, PoseModel, PoseNet, ESTIMATOR_ORDER};
use crate::camera::{VideoFrame, VideoSource};

/// Keypoints produced by the model (COCO order)
pub const NUM_KEYPOINTS: usize = 17;

/// Model file looked up in the models directory
pub const MODEL_FILE_NAME: &str = "posenet.onnx";

/// Heatmap channel of a tracked keypoint
fn channel(label: KeypointLabel) -> usize {
    match label {
        KeypointLabel::Nose => 0,
        KeypointLabel::LeftEye => 1,
        KeypointLabel::RightEye => 2,
    }
}

/// Loader for the ONNX model file
pub struct OnnxPoseModel {
    model_path: PathBuf,
    intra_threads: usize,
}

impl OnnxPoseModel {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads: 2,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl PoseModel for OnnxPoseModel {
    type Net = OnnxPoseNet;

    async fn load(&self, resolution_factor: f32) -> Result<OnnxPoseNet, EstimatorError> {
        if !self.model_path.exists() {
            return Err(EstimatorError::ModelNotFound(self.model_path.clone()));
        }

        let session = ort::session::Session::builder()
            .map_err(|e| EstimatorError::Load(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| EstimatorError::Load(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&self.model_path)
            .map_err(|e| EstimatorError::Load(e.to_string()))?;

        log::info!(
            "Loaded pose model from {:?} (resolution factor {})",
            self.model_path,
            resolution_factor
        );

        Ok(OnnxPoseNet {
            session,
            resolution_factor,
        })
    }
}

/// Loaded PoseNet session
pub struct OnnxPoseNet {
    session: ort::session::Session,
    resolution_factor: f32,
}

impl PoseNet for OnnxPoseNet {
    async fn estimate_single_pose<V: VideoSource>(
        &mut self,
        video: &V,
        score_threshold: f32,
        flip_horizontal: bool,
        output_stride: u32,
    ) -> Result<Vec<Keypoint>, EstimatorError> {
        let frame = video.current_frame().ok_or(EstimatorError::NoFrame)?;

        let input_width =
            valid_input_resolution(frame.width as f32 * self.resolution_factor, output_stride);
        let input_height =
            valid_input_resolution(frame.height as f32 * self.resolution_factor, output_stride);

        let (heatmaps, offsets) = self.run(&frame, input_width, input_height)?;
        let parts = decode_single_pose(heatmaps.view(), offsets.view(), output_stride)?;

        let keypoints = to_keypoints(
            &parts,
            (frame.width, frame.height),
            (input_width, input_height),
            score_threshold,
            flip_horizontal,
        );

        Ok(keypoints)
    }
}

impl OnnxPoseNet {
    /// Run the model, returning (heatmaps, offsets) without the batch axis
    fn run(
        &mut self,
        frame: &VideoFrame,
        input_width: usize,
        input_height: usize,
    ) -> Result<(ndarray::Array3<f32>, ndarray::Array3<f32>), EstimatorError> {
        let input = preprocess_frame_nhwc(frame, input_width, input_height);

        let input_array = Array4::from_shape_vec((1, input_height, input_width, 3), input)
            .map_err(|e| EstimatorError::Inference(format!("Failed to create input array: {}", e)))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| EstimatorError::Inference(format!("Failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| EstimatorError::Inference(e.to_string()))?;

        let mut heatmaps = None;
        let mut offsets = None;

        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| EstimatorError::BadOutput(format!("{}: {}", name, e)))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            if dims.len() != 4 {
                continue;
            }

            let array = ndarray::Array3::from_shape_vec((dims[1], dims[2], dims[3]), data.to_vec())
                .map_err(|e| EstimatorError::BadOutput(format!("{}: {}", name, e)))?;

            match dims[3] {
                NUM_KEYPOINTS => heatmaps = Some(array),
                n if n == NUM_KEYPOINTS * 2 => offsets = Some(array),
                _ => {}
            }
        }

        match (heatmaps, offsets) {
            (Some(h), Some(o)) => Ok((h, o)),
            _ => Err(EstimatorError::BadOutput(
                "model must output heatmaps and offsets".to_string(),
            )),
        }
    }
}

/// Map decoded parts back to video pixels as tracked keypoints in
/// [`ESTIMATOR_ORDER`].
///
/// Each keypoint under `score_threshold` is reported with a score of 0.
pub fn to_keypoints(
    parts: &[DecodedPart],
    frame_size: (u32, u32),
    input_size: (usize, usize),
    score_threshold: f32,
    flip_horizontal: bool,
) -> Vec<Keypoint> {
    let (frame_width, frame_height) = frame_size;
    let scale_x = frame_width as f32 / input_size.0 as f32;
    let scale_y = frame_height as f32 / input_size.1 as f32;

    ESTIMATOR_ORDER
        .iter()
        .map(|&label| {
            let part = parts[channel(label)];
            let mut x = part.x * scale_x;
            if flip_horizontal {
                x = frame_width as f32 - 1.0 - x;
            }
            let score = if part.score >= score_threshold {
                part.score
            } else {
                0.0
            };
            Keypoint::new(label, score, x, part.y * scale_y)
        })
        .collect()
}

/// Snap a requested input size to one the model grid accepts
pub fn valid_input_resolution(size: f32, output_stride: u32) -> usize {
    let stride = output_stride.max(1) as usize;
    let cells = (size.max(0.0) as usize / stride).max(1);
    cells * stride + 1
}

/// Resize an RGBA frame to NHWC float in [-1, 1]
fn preprocess_frame_nhwc(frame: &VideoFrame, target_width: usize, target_height: usize) -> Vec<f32> {
    let mut output = vec![0.0f32; target_width * target_height * 3];

    let x_ratio = frame.width as f32 / target_width as f32;
    let y_ratio = frame.height as f32 / target_height as f32;

    for y in 0..target_height {
        for x in 0..target_width {
            let [r, g, b, _] = frame.pixel((x as f32 * x_ratio) as u32, (y as f32 * y_ratio) as u32);

            let out_idx = (y * target_width + x) * 3;
            output[out_idx] = r as f32 / 127.5 - 1.0;
            output[out_idx + 1] = g as f32 / 127.5 - 1.0;
            output[out_idx + 2] = b as f32 / 127.5 - 1.0;
        }
    }

    output
}

/// A decoded keypoint in model input coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedPart {
    pub score: f32,
    pub x: f32,
    pub y: f32,
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Decode one pose from heatmap logits `[h, w, K]` and offsets `[h, w, 2K]`
pub fn decode_single_pose(
    heatmaps: ArrayView3<f32>,
    offsets: ArrayView3<f32>,
    output_stride: u32,
) -> Result<Vec<DecodedPart>, EstimatorError> {
    let (height, width, parts) = heatmaps.dim();
    if offsets.dim() != (height, width, parts * 2) {
        return Err(EstimatorError::BadOutput(format!(
            "offsets shape {:?} does not match heatmaps {:?}",
            offsets.dim(),
            heatmaps.dim()
        )));
    }
    if height == 0 || width == 0 || parts < NUM_KEYPOINTS {
        return Err(EstimatorError::BadOutput(format!(
            "heatmaps shape {:?} too small",
            heatmaps.dim()
        )));
    }

    let stride = output_stride as f32;
    let decoded = (0..parts)
        .map(|k| {
            let mut best = (0, 0);
            let mut best_value = f32::NEG_INFINITY;
            for y in 0..height {
                for x in 0..width {
                    let v = heatmaps[[y, x, k]];
                    if v > best_value {
                        best_value = v;
                        best = (y, x);
                    }
                }
            }

            let (y, x) = best;
            DecodedPart {
                score: sigmoid(best_value),
                x: x as f32 * stride + offsets[[y, x, k + parts]],
                y: y as f32 * stride + offsets[[y, x, k]],
            }
        })
        .collect();

    Ok(decoded)
}
