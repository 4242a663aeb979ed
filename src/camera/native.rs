//! Native camera backend
//!
//! Captures frames with nokhwa on a background thread and keeps the newest ones
//! in a small ring of slots for the render thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{
    AcquireError, CaptureConstraints, MediaDevices, MediaStream, MetadataListener,
    StreamMetadata, VideoConstraints, VideoFrame,
};

const REQUESTED_FPS: u32 = 30;

/// Failed reads tolerated before the first frame arrives
const MAX_STARTUP_FAILURES: u32 = 100;

/// Camera access through the operating system's capture API
pub struct NativeMediaDevices {
    camera_index: u32,
    pool_size: usize,
}

impl NativeMediaDevices {
    /// `pool_size` is the number of frame slots kept by each stream
    pub fn new(camera_index: u32, pool_size: usize) -> Self {
        Self {
            camera_index,
            pool_size: pool_size.max(1),
        }
    }
}

impl MediaDevices for NativeMediaDevices {
    type Stream = CameraStream;

    async fn get_user_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<CameraStream, AcquireError> {
        if constraints.audio {
            log::warn!("Audio capture is not supported, ignoring");
        }
        CameraStream::open(self.camera_index, &constraints.video, self.pool_size).await
    }
}

/// Metadata handshake state shared with the capture thread
#[derive(Default)]
struct MetadataState {
    ready: Option<StreamMetadata>,
    listener: Option<MetadataListener>,
    /// Capture stopped; metadata will never arrive
    ended: bool,
}

impl MetadataState {
    /// Keep `listener` until metadata is known.
    ///
    /// Returns it with the metadata when that is already available. A stream
    /// that has ended drops the listener.
    fn register(&mut self, listener: MetadataListener) -> Option<(MetadataListener, StreamMetadata)> {
        if self.ended {
            return None;
        }
        match self.ready {
            Some(metadata) => Some((listener, metadata)),
            None => {
                self.listener = Some(listener);
                None
            }
        }
    }

    /// Record the stream size, handing back a waiting listener
    fn mark_ready(&mut self, metadata: StreamMetadata) -> Option<MetadataListener> {
        self.ready = Some(metadata);
        self.listener.take()
    }

    /// Drop any waiting listener and refuse new ones
    fn end(&mut self) {
        self.ended = true;
        self.listener = None;
    }
}

/// Counts failed reads until the stream delivers its first frame
struct StartupFailures {
    count: u32,
    limit: u32,
    streaming: bool,
}

impl StartupFailures {
    fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit,
            streaming: false,
        }
    }

    /// Record a failed read. Returns true once the stream should be abandoned.
    fn record(&mut self) -> bool {
        if self.streaming {
            return false;
        }
        self.count += 1;
        self.count >= self.limit
    }

    fn first_frame(&mut self) {
        self.streaming = true;
    }
}

/// Live camera stream
pub struct CameraStream {
    /// Frame ring, one slot per pooled frame
    frames: Arc<Vec<Mutex<Option<VideoFrame>>>>,
    /// Write index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Frames captured so far
    frame_count: Arc<AtomicU64>,
    metadata: Arc<Mutex<MetadataState>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Start the capture thread and wait until the camera is open
    async fn open(
        camera_index: u32,
        video: &VideoConstraints,
        pool_size: usize,
    ) -> Result<Self, AcquireError> {
        let frames: Arc<Vec<Mutex<Option<VideoFrame>>>> =
            Arc::new((0..pool_size).map(|_| Mutex::new(None)).collect());
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let frame_count = Arc::new(AtomicU64::new(0));
        let metadata = Arc::new(Mutex::new(MetadataState::default()));
        let running = Arc::new(AtomicBool::new(true));

        let (open_tx, open_rx) = oneshot::channel();
        let shared = CaptureShared {
            frames: frames.clone(),
            latest_frame_idx: latest_frame_idx.clone(),
            frame_count: frame_count.clone(),
            metadata: metadata.clone(),
            running: running.clone(),
        };
        let requested = requested_format(video);

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_thread(camera_index, requested, shared, open_tx))
            .map_err(|e| {
                AcquireError::DeviceUnavailable(format!("Failed to spawn capture thread: {}", e))
            })?;

        let mut stream = Self {
            frames,
            latest_frame_idx,
            frame_count,
            metadata,
            running,
            thread_handle: Some(thread_handle),
        };

        match open_rx.await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.stop();
                Err(e)
            }
            Err(_) => {
                stream.stop();
                Err(AcquireError::DeviceUnavailable(
                    "Capture thread exited before opening the camera".to_string(),
                ))
            }
        }
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl MediaStream for CameraStream {
    fn on_loaded_metadata(&mut self, listener: MetadataListener) {
        let ready = self.metadata.lock().register(listener);
        if let Some((listener, metadata)) = ready {
            listener(metadata);
        }
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        if self.frame_count() == 0 {
            return None;
        }
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % self.frames.len() as u64) as usize;
        self.frames[slot].lock().clone()
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State handed to the capture thread
struct CaptureShared {
    frames: Arc<Vec<Mutex<Option<VideoFrame>>>>,
    latest_frame_idx: Arc<AtomicU64>,
    frame_count: Arc<AtomicU64>,
    metadata: Arc<Mutex<MetadataState>>,
    running: Arc<AtomicBool>,
}

/// Map the requested size onto a nokhwa format request
fn requested_format(video: &VideoConstraints) -> RequestedFormat<'static> {
    match (video.width, video.height) {
        (Some(width), Some(height)) => {
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::MJPEG,
                REQUESTED_FPS,
            )))
        }
        _ => RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution),
    }
}

fn classify_open_error(error: NokhwaError) -> AcquireError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        AcquireError::PermissionDenied(message)
    } else {
        AcquireError::DeviceUnavailable(message)
    }
}

fn open_camera(camera_index: u32, requested: RequestedFormat<'static>) -> Result<Camera, AcquireError> {
    let index = CameraIndex::Index(camera_index);

    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Requested camera format unavailable: {:?}", e);

            // Let the driver pick whatever it supports
            let fallback = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
            Camera::new(index, fallback).map_err(classify_open_error)?
        }
    };

    camera.open_stream().map_err(classify_open_error)?;
    Ok(camera)
}

/// Camera capture thread
fn capture_thread(
    camera_index: u32,
    requested: RequestedFormat<'static>,
    shared: CaptureShared,
    open_tx: oneshot::Sender<Result<(), AcquireError>>,
) {
    log::info!("Starting camera capture thread (camera {})", camera_index);

    let mut camera = match open_camera(camera_index, requested) {
        Ok(camera) => camera,
        Err(e) => {
            log::error!("Failed to open camera {}: {}", camera_index, e);
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    log::info!(
        "Camera opened: {} ({}x{})",
        camera.info().human_name(),
        camera.resolution().width(),
        camera.resolution().height()
    );
    let _ = open_tx.send(Ok(()));

    let pool_size = shared.frames.len() as u64;
    let mut write_idx: u64 = 0;
    let mut failures = StartupFailures::new(MAX_STARTUP_FAILURES);

    while shared.running.load(Ordering::Acquire) {
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Failed to capture frame: {:?}", e);
                if failures.record() {
                    log::error!("Camera {} produced no frames, giving up", camera_index);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
        };

        let image = match frame.decode_image::<RgbAFormat>() {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Failed to decode frame: {:?}", e);
                if failures.record() {
                    log::error!("Camera {} produced no decodable frames, giving up", camera_index);
                    break;
                }
                continue;
            }
        };
        failures.first_frame();

        let width = frame.resolution().width();
        let height = frame.resolution().height();
        let frame_number = shared.frame_count.load(Ordering::Relaxed);

        let slot = (write_idx % pool_size) as usize;
        *shared.frames[slot].lock() = Some(VideoFrame {
            data: image.into_raw(),
            width,
            height,
            frame_number,
            timestamp: Instant::now(),
        });
        shared.latest_frame_idx.store(write_idx, Ordering::Release);
        shared.frame_count.fetch_add(1, Ordering::Release);
        write_idx = write_idx.wrapping_add(1);

        if frame_number == 0 {
            let metadata = StreamMetadata { width, height };
            let listener = shared.metadata.lock().mark_ready(metadata);
            if let Some(listener) = listener {
                listener(metadata);
            }
        }
    }

    shared.running.store(false, Ordering::Release);
    shared.metadata.lock().end();

    if let Err(e) = camera.stop_stream() {
        log::warn!("Failed to stop camera stream: {:?}", e);
    }
    log::info!("Camera capture thread stopped");
}
