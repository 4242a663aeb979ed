//! Startup sequence
//!
//! Acquires the camera, prepares the overlay canvas, loads the estimator and
//! makes the first render loop invocation. A camera failure is the one error
//! handled here: it is reported through the message element and nothing else
//! starts.

use thiserror::Error;

use crate::camera::{load_video, CaptureConstraints, MediaDevices, VideoElement};
use crate::ml::{EstimatorError, PoseModel};
use crate::overlay::{Canvas2d, Font, GLYPH_SIZE};
use crate::profile::DeviceProfile;
use crate::render_loop::{FrameScheduler, LoopError, RenderLoop};

/// Shown when the camera cannot be acquired
pub const CAMERA_BLOCKED_MESSAGE: &str = "Is your camera blocked? Please unblock and reload.";

/// Text element used for the error message
#[derive(Debug, Clone, Default)]
pub struct MessageElement {
    text_content: String,
}

impl MessageElement {
    pub fn text_content(&self) -> &str {
        &self.text_content
    }

    pub fn set_text_content(&mut self, text: &str) {
        self.text_content = text.to_string();
    }
}

/// Failures after the camera was acquired
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Loop(#[from] LoopError),
}

/// Outcome of a successful startup
pub enum Startup<V, N, C, S> {
    /// The loop ran its first frame and is scheduled
    Running(RenderLoop<V, N, C, S>),
    /// The camera was refused; the message element says so
    CameraBlocked,
}

/// Bring up the camera and the render loop
pub async fn start<D, M, C, S>(
    devices: &D,
    model: &M,
    profile: DeviceProfile,
    video: VideoElement<D::Stream>,
    mut canvas: C,
    scheduler: S,
    error_message: &mut MessageElement,
) -> Result<Startup<VideoElement<D::Stream>, M::Net, C, S>, StartupError>
where
    D: MediaDevices,
    M: PoseModel,
    C: Canvas2d,
    S: FrameScheduler,
{
    let (client_width, client_height) = (video.client_width(), video.client_height());
    let constraints = CaptureConstraints::for_profile(&profile, client_width, client_height);
    log::info!(
        "Requesting camera: {}",
        serde_json::to_string(&constraints).unwrap_or_default()
    );

    let video = match load_video(video, devices, &constraints).await {
        Ok(video) => video,
        Err(e) => {
            log::error!("{}", e);
            error_message.set_text_content(CAMERA_BLOCKED_MESSAGE);
            return Ok(Startup::CameraBlocked);
        }
    };

    canvas.set_size(client_width, client_height);
    canvas.set_font(Font::sans_serif(GLYPH_SIZE));

    let net = model.load(profile.resolution_factor).await?;

    let display_scale = video.display_scale();
    log::debug!("Overlay scale {:?}", display_scale);
    let mut render_loop =
        RenderLoop::new(video, net, canvas, scheduler, profile).with_display_scale(display_scale);
    render_loop.run_frame().await?;

    Ok(Startup::Running(render_loop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::tests::{MetadataDelivery, MockDevices};
    use crate::ml::Keypoint;
    use crate::overlay::{DrawCommand, OverlayCanvas, GLYPHS};
    use crate::render_loop::tests::{estimate, CountingScheduler, ScriptedNet};
    use crate::render_loop::LoopState;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Scheduler whose request count outlives the startup call
    struct SharedScheduler(Rc<Cell<usize>>);

    impl FrameScheduler for SharedScheduler {
        fn request_animation_frame(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    /// Hands out one pre-scripted net, remembering the requested factor
    struct ScriptedModel {
        net: RefCell<Option<ScriptedNet>>,
        fail: bool,
        loaded_with: RefCell<Option<f32>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<Vec<Keypoint>, EstimatorError>>) -> Self {
            Self {
                net: RefCell::new(Some(ScriptedNet::new(script))),
                fail: false,
                loaded_with: RefCell::new(None),
            }
        }
    }

    impl PoseModel for ScriptedModel {
        type Net = ScriptedNet;

        async fn load(&self, resolution_factor: f32) -> Result<ScriptedNet, EstimatorError> {
            *self.loaded_with.borrow_mut() = Some(resolution_factor);
            if self.fail {
                return Err(EstimatorError::Load("corrupt model".to_string()));
            }
            self.net
                .borrow_mut()
                .take()
                .ok_or_else(|| EstimatorError::Load("already loaded".to_string()))
        }
    }

    #[test]
    fn test_camera_denied_shows_message_and_never_schedules() {
        let devices = MockDevices::denying();
        let model = ScriptedModel::new(vec![Ok(estimate(0.9, 0.9, 0.9))]);
        let mut message = MessageElement::default();
        let frame_requests = Rc::new(Cell::new(0));

        let startup = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::DESKTOP,
            VideoElement::new(640, 480),
            OverlayCanvas::new(0, 0),
            SharedScheduler(frame_requests.clone()),
            &mut message,
        ))
        .unwrap();

        assert!(matches!(startup, Startup::CameraBlocked));
        assert_eq!(frame_requests.get(), 0);
        assert_eq!(
            message.text_content(),
            "Is your camera blocked? Please unblock and reload."
        );
        // The model was never loaded
        assert!(model.loaded_with.borrow().is_none());
    }

    #[test]
    fn test_camera_without_metadata_counts_as_blocked() {
        let devices = MockDevices::granting(MetadataDelivery::Never);
        let model = ScriptedModel::new(vec![]);
        let mut message = MessageElement::default();

        let startup = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::MOBILE,
            VideoElement::new(640, 480),
            OverlayCanvas::new(0, 0),
            CountingScheduler::default(),
            &mut message,
        ))
        .unwrap();

        assert!(matches!(startup, Startup::CameraBlocked));
        assert_eq!(message.text_content(), CAMERA_BLOCKED_MESSAGE);
    }

    #[test]
    fn test_end_to_end_draws_confident_keypoints() {
        let devices = MockDevices::granting(MetadataDelivery::Immediate);
        // nose 0.9 at (100,100), right eye 0.5 at (120,90), left eye 0.95 at (80,90)
        let model = ScriptedModel::new(vec![Ok(estimate(0.9, 0.5, 0.95))]);
        let mut message = MessageElement::default();

        let startup = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::DESKTOP,
            VideoElement::new(640, 480),
            OverlayCanvas::new(0, 0),
            CountingScheduler::default(),
            &mut message,
        ))
        .unwrap();

        let Startup::Running(render_loop) = startup else {
            panic!("expected the render loop to start");
        };

        assert!(message.text_content().is_empty());
        assert_eq!(*model.loaded_with.borrow(), Some(0.75));
        assert_eq!(render_loop.state(), LoopState::Scheduled);
        assert_eq!(render_loop.scheduler().requests, 1);

        let canvas = render_loop.canvas();
        assert_eq!((canvas.width(), canvas.height()), (640, 480));
        assert_eq!(canvas.font(), Font::sans_serif(32.0));

        let drawn: Vec<_> = canvas
            .commands()
            .iter()
            .map(|c| match c {
                DrawCommand::Text { text, x, y, .. } => (text.clone(), *x, *y),
            })
            .collect();
        assert_eq!(
            drawn,
            vec![
                (GLYPHS[0].to_string(), 100.0 - 16.0, 100.0 + 16.0),
                (GLYPHS[1].to_string(), 80.0 - 16.0, 90.0 + 16.0),
            ]
        );
    }

    #[test]
    fn test_overlay_scaled_from_stream_to_client_size() {
        // Stream metadata is 640x480, shown at 1280x960
        let devices = MockDevices::granting(MetadataDelivery::Immediate);
        let model = ScriptedModel::new(vec![Ok(estimate(0.9, 0.1, 0.9))]);
        let mut message = MessageElement::default();

        let startup = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::DESKTOP,
            VideoElement::new(1280, 960),
            OverlayCanvas::new(0, 0),
            CountingScheduler::default(),
            &mut message,
        ))
        .unwrap();

        let Startup::Running(render_loop) = startup else {
            panic!("expected the render loop to start");
        };
        let canvas = render_loop.canvas();
        assert_eq!((canvas.width(), canvas.height()), (1280, 960));

        let drawn: Vec<_> = canvas
            .commands()
            .iter()
            .map(|c| match c {
                DrawCommand::Text { x, y, .. } => (*x, *y),
            })
            .collect();
        assert_eq!(drawn, vec![(200.0 - 16.0, 200.0 + 16.0), (160.0 - 16.0, 180.0 + 16.0)]);
    }

    #[test]
    fn test_model_load_failure_propagates() {
        let devices = MockDevices::granting(MetadataDelivery::Immediate);
        let mut model = ScriptedModel::new(vec![]);
        model.fail = true;
        let mut message = MessageElement::default();

        let result = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::MOBILE,
            VideoElement::new(640, 480),
            OverlayCanvas::new(0, 0),
            CountingScheduler::default(),
            &mut message,
        ));

        assert!(matches!(result, Err(StartupError::Estimator(EstimatorError::Load(_)))));
        assert_eq!(*model.loaded_with.borrow(), Some(0.5));
        assert!(message.text_content().is_empty());
    }

    #[test]
    fn test_first_frame_failure_propagates() {
        let devices = MockDevices::granting(MetadataDelivery::Immediate);
        let model = ScriptedModel::new(vec![Err(EstimatorError::NoFrame)]);
        let mut message = MessageElement::default();

        let result = pollster::block_on(start(
            &devices,
            &model,
            DeviceProfile::DESKTOP,
            VideoElement::new(640, 480),
            OverlayCanvas::new(0, 0),
            CountingScheduler::default(),
            &mut message,
        ));

        assert!(matches!(
            result,
            Err(StartupError::Loop(LoopError::Estimator(EstimatorError::NoFrame)))
        ));
    }
}
