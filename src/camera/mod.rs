//! Camera stream acquisition
//!
//! Mirrors the browser media model: a [`MediaDevices`] backend hands out live
//! [`MediaStream`]s, which get bound to a [`VideoElement`]. [`load_video`] only
//! resolves once the bound stream has reported its frame dimensions.

use std::future::Future;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::profile::DeviceProfile;

pub mod native;

pub use native::{CameraStream, NativeMediaDevices};

/// Errors that can occur while acquiring the camera
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Camera access denied: {0}")]
    PermissionDenied(String),
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Stream ended before metadata was available")]
    StreamEnded,
}

/// Which camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
}

/// Video part of the capture request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub facing_mode: FacingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Desired camera stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: VideoConstraints,
}

impl CaptureConstraints {
    /// Build the request for a profile and the client size of the target surface.
    ///
    /// Mobile devices leave the resolution up to the camera.
    pub fn for_profile(profile: &DeviceProfile, client_width: u32, client_height: u32) -> Self {
        let (width, height) = if profile.is_mobile() {
            (None, None)
        } else {
            (Some(client_width), Some(client_height))
        };

        Self {
            audio: false,
            video: VideoConstraints {
                facing_mode: FacingMode::User,
                width,
                height,
            },
        }
    }
}

/// A single decoded camera frame
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

impl VideoFrame {
    /// RGBA value at pixel coordinates, clamped to the frame
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let idx = ((y * self.width + x) * 4) as usize;
        match self.data.get(idx..idx + 4) {
            Some(px) => [px[0], px[1], px[2], px[3]],
            None => [0, 0, 0, 0],
        }
    }
}

/// Dimensions reported once a stream can produce frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
}

/// One-shot "metadata ready" listener
pub type MetadataListener = Box<dyn FnOnce(StreamMetadata) + Send>;

/// A live video stream
pub trait MediaStream {
    /// Register the metadata listener. It fires at most once; if metadata is
    /// already known it fires immediately. Dropping it unfired means the stream
    /// ended first.
    fn on_loaded_metadata(&mut self, listener: MetadataListener);

    /// Newest complete frame, if any
    fn latest_frame(&self) -> Option<VideoFrame>;
}

/// Camera access backend
pub trait MediaDevices {
    type Stream: MediaStream;

    /// Request a stream matching `constraints`
    fn get_user_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> impl Future<Output = Result<Self::Stream, AcquireError>>;
}

/// Anything the estimator can read frames from
pub trait VideoSource {
    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Video surface with a bindable stream source
pub struct VideoElement<S> {
    client_width: u32,
    client_height: u32,
    src_object: Option<S>,
    metadata: Option<StreamMetadata>,
}

impl<S: MediaStream> VideoElement<S> {
    /// Create an unbound surface with the given on-screen size
    pub fn new(client_width: u32, client_height: u32) -> Self {
        Self {
            client_width,
            client_height,
            src_object: None,
            metadata: None,
        }
    }

    pub fn client_width(&self) -> u32 {
        self.client_width
    }

    pub fn client_height(&self) -> u32 {
        self.client_height
    }

    /// Bind a stream, replacing any previous one
    pub fn set_src_object(&mut self, stream: S) {
        self.src_object = Some(stream);
        self.metadata = None;
    }

    pub fn src_object(&self) -> Option<&S> {
        self.src_object.as_ref()
    }

    /// Stream dimensions, known once metadata has loaded
    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.metadata
    }

    /// Factors mapping stream pixels onto the on-screen surface.
    ///
    /// (1, 1) until metadata with a non-zero size has loaded.
    pub fn display_scale(&self) -> (f32, f32) {
        match self.metadata {
            Some(StreamMetadata { width, height }) if width > 0 && height > 0 => (
                self.client_width as f32 / width as f32,
                self.client_height as f32 / height as f32,
            ),
            _ => (1.0, 1.0),
        }
    }
}

impl<S: MediaStream> VideoSource for VideoElement<S> {
    fn current_frame(&self) -> Option<VideoFrame> {
        self.src_object.as_ref()?.latest_frame()
    }
}

/// Acquire a camera stream, bind it to `element` and wait for its metadata
pub async fn load_video<D: MediaDevices>(
    mut element: VideoElement<D::Stream>,
    devices: &D,
    constraints: &CaptureConstraints,
) -> Result<VideoElement<D::Stream>, AcquireError> {
    let stream = devices.get_user_media(constraints).await?;
    element.set_src_object(stream);

    let (tx, rx) = oneshot::channel();
    if let Some(stream) = element.src_object.as_mut() {
        stream.on_loaded_metadata(Box::new(move |metadata| {
            let _ = tx.send(metadata);
        }));
    }

    let metadata = rx.await.map_err(|_| AcquireError::StreamEnded)?;
    log::info!("Video metadata loaded: {}x{}", metadata.width, metadata.height);
    element.metadata = Some(metadata);

    Ok(element)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// How a mock stream delivers its metadata
    #[derive(Clone, Copy)]
    pub(crate) enum MetadataDelivery {
        Immediate,
        Delayed(Duration),
        Never,
    }

    pub(crate) struct MockStream {
        pub metadata: StreamMetadata,
        pub delivery: MetadataDelivery,
        pub frame: Option<VideoFrame>,
    }

    impl MediaStream for MockStream {
        fn on_loaded_metadata(&mut self, listener: MetadataListener) {
            let metadata = self.metadata;
            match self.delivery {
                MetadataDelivery::Immediate => listener(metadata),
                MetadataDelivery::Delayed(delay) => {
                    std::thread::spawn(move || {
                        std::thread::sleep(delay);
                        listener(metadata);
                    });
                }
                MetadataDelivery::Never => drop(listener),
            }
        }

        fn latest_frame(&self) -> Option<VideoFrame> {
            self.frame.clone()
        }
    }

    pub(crate) fn test_frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame {
            data: vec![128; (width * height * 4) as usize],
            width,
            height,
            frame_number: 0,
            timestamp: Instant::now(),
        }
    }

    /// Mock camera backend: either grants a stream or rejects
    pub(crate) struct MockDevices {
        pub grant: bool,
        pub delivery: MetadataDelivery,
        pub requests: Arc<AtomicUsize>,
        pub last_constraints: parking_lot::Mutex<Option<CaptureConstraints>>,
    }

    impl MockDevices {
        pub(crate) fn granting(delivery: MetadataDelivery) -> Self {
            Self {
                grant: true,
                delivery,
                requests: Arc::new(AtomicUsize::new(0)),
                last_constraints: parking_lot::Mutex::new(None),
            }
        }

        pub(crate) fn denying() -> Self {
            Self {
                grant: false,
                ..Self::granting(MetadataDelivery::Immediate)
            }
        }
    }

    impl MediaDevices for MockDevices {
        type Stream = MockStream;

        async fn get_user_media(
            &self,
            constraints: &CaptureConstraints,
        ) -> Result<MockStream, AcquireError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *self.last_constraints.lock() = Some(constraints.clone());
            if !self.grant {
                return Err(AcquireError::PermissionDenied("NotAllowedError".to_string()));
            }
            Ok(MockStream {
                metadata: StreamMetadata {
                    width: 640,
                    height: 480,
                },
                delivery: self.delivery,
                frame: Some(test_frame(640, 480)),
            })
        }
    }

    #[test]
    fn test_mobile_constraints_omit_size() {
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::MOBILE, 800, 600);
        assert!(!constraints.audio);
        assert_eq!(constraints.video.facing_mode, FacingMode::User);
        assert_eq!(constraints.video.width, None);
        assert_eq!(constraints.video.height, None);

        let json = serde_json::to_string(&constraints).unwrap();
        assert_eq!(json, r#"{"audio":false,"video":{"facingMode":"user"}}"#);
    }

    #[test]
    fn test_desktop_constraints_use_client_size() {
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::DESKTOP, 800, 600);
        assert_eq!(constraints.video.width, Some(800));
        assert_eq!(constraints.video.height, Some(600));

        let json = serde_json::to_string(&constraints).unwrap();
        assert_eq!(
            json,
            r#"{"audio":false,"video":{"facingMode":"user","width":800,"height":600}}"#
        );
    }

    #[test]
    fn test_load_video_binds_stream_and_metadata() {
        let devices = MockDevices::granting(MetadataDelivery::Immediate);
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::DESKTOP, 1280, 720);
        let element = VideoElement::new(1280, 720);
        assert!(element.src_object().is_none());
        assert_eq!(element.display_scale(), (1.0, 1.0));

        let video = pollster::block_on(load_video(element, &devices, &constraints)).unwrap();

        assert!(video.src_object().is_some());
        assert_eq!(
            video.metadata(),
            Some(StreamMetadata {
                width: 640,
                height: 480
            })
        );
        assert_eq!(video.current_frame().map(|f| f.width), Some(640));
        assert_eq!(video.display_scale(), (2.0, 1.5));
        assert_eq!(devices.last_constraints.lock().as_ref(), Some(&constraints));
    }

    #[test]
    fn test_load_video_waits_for_late_metadata() {
        let devices = MockDevices::granting(MetadataDelivery::Delayed(Duration::from_millis(30)));
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::MOBILE, 1280, 720);

        let started = Instant::now();
        let video =
            pollster::block_on(load_video(VideoElement::new(1280, 720), &devices, &constraints))
                .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(video.metadata().is_some());
    }

    #[test]
    fn test_load_video_fails_without_metadata() {
        let devices = MockDevices::granting(MetadataDelivery::Never);
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::DESKTOP, 640, 480);

        let result =
            pollster::block_on(load_video(VideoElement::new(640, 480), &devices, &constraints));
        assert!(matches!(result, Err(AcquireError::StreamEnded)));
    }

    #[test]
    fn test_load_video_propagates_denial() {
        let devices = MockDevices::denying();
        let constraints = CaptureConstraints::for_profile(&DeviceProfile::DESKTOP, 640, 480);

        let result =
            pollster::block_on(load_video(VideoElement::new(640, 480), &devices, &constraints));
        assert!(matches!(result, Err(AcquireError::PermissionDenied(_))));
        assert_eq!(devices.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pixel_is_clamped() {
        let mut frame = test_frame(2, 2);
        frame.data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(frame.pixel(1, 1), [1, 2, 3, 4]);
        assert_eq!(frame.pixel(10, 10), [1, 2, 3, 4]);
    }
}
