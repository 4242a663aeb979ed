//! Pose estimation interface
//!
//! The render loop only sees [`PoseModel`] and [`PoseNet`]; the ONNX backend in
//! [`posenet`] is one implementation, tests provide their own.

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::camera::VideoSource;

pub mod posenet;

pub use posenet::{OnnxPoseModel, OnnxPoseNet};

/// Errors raised while loading or running the estimator
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Pose model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("Failed to load pose model: {0}")]
    Load(String),
    #[error("No video frame available")]
    NoFrame,
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    BadOutput(String),
}

/// Tracked facial keypoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeypointLabel {
    Nose,
    LeftEye,
    RightEye,
}

/// Order of the first three keypoints in every estimate
pub const ESTIMATOR_ORDER: [KeypointLabel; 3] = [
    KeypointLabel::Nose,
    KeypointLabel::RightEye,
    KeypointLabel::LeftEye,
];

/// Pixel position in video coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One detected keypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub label: KeypointLabel,
    /// Confidence in [0, 1]
    pub score: f32,
    pub position: Position,
}

impl Keypoint {
    pub fn new(label: KeypointLabel, score: f32, x: f32, y: f32) -> Self {
        Self {
            label,
            score,
            position: Position { x, y },
        }
    }
}

/// Loader for a pose network
pub trait PoseModel {
    type Net: PoseNet;

    /// Load the network at the given input resolution factor
    fn load(&self, resolution_factor: f32)
        -> impl Future<Output = Result<Self::Net, EstimatorError>>;
}

/// A loaded single-person pose network
pub trait PoseNet {
    /// Estimate the pose in the current frame of `video`.
    ///
    /// The first three keypoints follow [`ESTIMATOR_ORDER`].
    fn estimate_single_pose<V: VideoSource>(
        &mut self,
        video: &V,
        score_threshold: f32,
        flip_horizontal: bool,
        output_stride: u32,
    ) -> impl Future<Output = Result<Vec<Keypoint>, EstimatorError>>;
}
