//! Frame render loop
//!
//! Each invocation estimates the pose in the current video frame, redraws the
//! overlay and asks the scheduler for the next display refresh. The host calls
//! [`RenderLoop::run_frame`] again when that refresh arrives.
//!
//! A failed estimate is not retried: the loop moves to [`LoopState::Halted`] and
//! never schedules another frame.

use thiserror::Error;

use crate::camera::VideoSource;
use crate::ml::{EstimatorError, PoseNet};
use crate::overlay::{draw_pose, to_canvas_space, to_display_order, Canvas2d};
use crate::profile::DeviceProfile;

/// Mirrored input is never requested
const FLIP_HORIZONTAL: bool = false;

/// Requests the next display refresh
pub trait FrameScheduler {
    fn request_animation_frame(&mut self);
}

/// Render loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Not invoked yet
    #[default]
    Idle,
    /// Waiting on the estimator
    Estimating,
    /// Redrawing the overlay
    Drawing,
    /// Waiting for the next refresh
    Scheduled,
    /// Stopped after a failure, nothing is scheduled
    Halted,
}

/// Errors that stop the loop
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Pose estimation failed: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("Estimate has {0} keypoints, need at least 3")]
    IncompletePose(usize),
    #[error("Render loop has halted")]
    Halted,
}

/// Self-rescheduling estimate/draw cycle
pub struct RenderLoop<V, N, C, S> {
    video: V,
    net: N,
    canvas: C,
    scheduler: S,
    profile: DeviceProfile,
    /// Video pixels to canvas pixels
    display_scale: (f32, f32),
    state: LoopState,
    frames_rendered: u64,
}

impl<V, N, C, S> RenderLoop<V, N, C, S>
where
    V: VideoSource,
    N: PoseNet,
    C: Canvas2d,
    S: FrameScheduler,
{
    pub fn new(video: V, net: N, canvas: C, scheduler: S, profile: DeviceProfile) -> Self {
        Self {
            video,
            net,
            canvas,
            scheduler,
            profile,
            display_scale: (1.0, 1.0),
            state: LoopState::Idle,
            frames_rendered: 0,
        }
    }

    /// Scale applied to estimated positions before drawing
    pub fn with_display_scale(mut self, scale: (f32, f32)) -> Self {
        self.display_scale = scale;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Whether the host should invoke the loop on the next refresh
    pub fn is_scheduled(&self) -> bool {
        self.state == LoopState::Scheduled
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn video(&self) -> &V {
        &self.video
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Run one estimate/draw cycle and schedule the next one.
    ///
    /// Returns the number of glyphs drawn.
    pub async fn run_frame(&mut self) -> Result<usize, LoopError> {
        if self.state == LoopState::Halted {
            return Err(LoopError::Halted);
        }

        self.state = LoopState::Estimating;
        let estimate = self
            .net
            .estimate_single_pose(
                &self.video,
                self.profile.score_threshold,
                FLIP_HORIZONTAL,
                self.profile.output_stride,
            )
            .await;

        let keypoints = match estimate {
            Ok(keypoints) => keypoints,
            Err(e) => {
                self.state = LoopState::Halted;
                return Err(e.into());
            }
        };

        let Some(ordered) = to_display_order(&keypoints) else {
            self.state = LoopState::Halted;
            return Err(LoopError::IncompletePose(keypoints.len()));
        };

        self.state = LoopState::Drawing;
        let drawn = draw_pose(&mut self.canvas, &to_canvas_space(ordered, self.display_scale));
        self.frames_rendered += 1;

        self.scheduler.request_animation_frame();
        self.state = LoopState::Scheduled;

        Ok(drawn)
    }
}
