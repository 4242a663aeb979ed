//! Window host
//!
//! Runs the startup sequence inside the eframe creation callback, then drives
//! the render loop from egui repaints. The camera image is painted as a texture
//! and the overlay canvas is replayed on top of it.

use std::path::PathBuf;
use std::time::Duration;

use egui::{Align2, Color32, ColorImage, FontId, Pos2, Rect, TextureHandle, TextureOptions, Vec2};

use crate::camera::{CameraStream, NativeMediaDevices, VideoElement, VideoSource};
use crate::config::AppConfig;
use crate::ml::posenet::MODEL_FILE_NAME;
use crate::ml::{OnnxPoseModel, OnnxPoseNet};
use crate::overlay::{Canvas2d, DrawCommand, FontFamily, OverlayCanvas};
use crate::profile::DeviceProfile;
use crate::render_loop::{FrameScheduler, RenderLoop};
use crate::session::{self, MessageElement, Startup};

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

/// Video refresh interval once the loop no longer requests repaints
const IDLE_VIDEO_REFRESH: Duration = Duration::from_millis(33);

/// Requests the next frame through egui's repaint signal
pub struct RepaintScheduler {
    ctx: egui::Context,
}

impl RepaintScheduler {
    pub fn new(ctx: egui::Context) -> Self {
        Self { ctx }
    }
}

impl FrameScheduler for RepaintScheduler {
    fn request_animation_frame(&mut self) {
        self.ctx.request_repaint();
    }
}

type NativeRenderLoop =
    RenderLoop<VideoElement<CameraStream>, OnnxPoseNet, OverlayCanvas, RepaintScheduler>;

/// What the window is showing
enum AppState {
    Running(Box<NativeRenderLoop>),
    CameraBlocked,
    /// Startup failed after the camera was acquired
    Failed,
}

/// Main application
pub struct FacemojiApp {
    state: AppState,
    error_message: MessageElement,
    video_texture: Option<TextureHandle>,
    last_video_frame: Option<u64>,
}

impl FacemojiApp {
    /// Acquire the camera, load the model and start the render loop
    pub fn new(cc: &eframe::CreationContext<'_>, config: &AppConfig, profile: DeviceProfile) -> Self {
        let devices = NativeMediaDevices::new(config.camera_index, profile.max_pool_size);

        // A missing model surfaces when it is loaded, after the camera
        let model_path = config.resolve_model_path().unwrap_or_else(|e| {
            log::warn!("{}", e);
            PathBuf::from("models").join(MODEL_FILE_NAME)
        });
        let model = OnnxPoseModel::new(model_path);

        let mut error_message = MessageElement::default();
        let startup = pollster::block_on(session::start(
            &devices,
            &model,
            profile,
            VideoElement::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            OverlayCanvas::default(),
            RepaintScheduler::new(cc.egui_ctx.clone()),
            &mut error_message,
        ));

        let state = match startup {
            Ok(Startup::Running(render_loop)) => {
                log::info!("Render loop started");
                AppState::Running(Box::new(render_loop))
            }
            Ok(Startup::CameraBlocked) => AppState::CameraBlocked,
            Err(e) => {
                log::error!("Startup failed: {}", e);
                AppState::Failed
            }
        };

        Self {
            state,
            error_message,
            video_texture: None,
            last_video_frame: None,
        }
    }

    /// Upload the newest camera frame if it changed
    fn update_video_texture(&mut self, ctx: &egui::Context) {
        let AppState::Running(render_loop) = &self.state else {
            return;
        };
        let Some(frame) = render_loop.video().current_frame() else {
            return;
        };
        if self.last_video_frame == Some(frame.frame_number) {
            return;
        }

        let image = ColorImage::from_rgba_unmultiplied(
            [frame.width as usize, frame.height as usize],
            &frame.data,
        );
        match &mut self.video_texture {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.video_texture = Some(ctx.load_texture("webcam", image, TextureOptions::LINEAR));
            }
        }
        self.last_video_frame = Some(frame.frame_number);
    }
}

/// Replay the overlay canvas into `rect`
fn paint_overlay(painter: &egui::Painter, rect: Rect, canvas: &OverlayCanvas) {
    if canvas.width() == 0 || canvas.height() == 0 {
        return;
    }
    let scale = Vec2::new(
        rect.width() / canvas.width() as f32,
        rect.height() / canvas.height() as f32,
    );

    for command in canvas.commands() {
        match command {
            DrawCommand::Text { text, x, y, font } => {
                let family = match font.family {
                    FontFamily::SansSerif => egui::FontFamily::Proportional,
                };
                painter.text(
                    rect.min + Vec2::new(x * scale.x, y * scale.y),
                    Align2::LEFT_BOTTOM,
                    text,
                    FontId::new(font.size_px * scale.y, family),
                    Color32::WHITE,
                );
            }
        }
    }
}

impl eframe::App for FacemojiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let AppState::Running(render_loop) = &mut self.state {
            if render_loop.is_scheduled() {
                if let Err(e) = pollster::block_on(render_loop.run_frame()) {
                    log::error!("Render loop stopped: {}", e);
                }
            }
            // The camera keeps playing after the loop stops
            if !render_loop.is_scheduled() {
                ctx.request_repaint_after(IDLE_VIDEO_REFRESH);
            }
        }

        self.update_video_texture(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::default().fill(Color32::BLACK))
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                let painter = ui.painter();

                match &self.state {
                    AppState::Running(render_loop) => {
                        if let Some(texture) = &self.video_texture {
                            painter.image(
                                texture.id(),
                                rect,
                                Rect::from_min_max(Pos2::new(0.0, 0.0), Pos2::new(1.0, 1.0)),
                                Color32::WHITE,
                            );
                        }
                        paint_overlay(painter, rect, render_loop.canvas());
                    }
                    AppState::CameraBlocked => {
                        painter.text(
                            rect.center(),
                            Align2::CENTER_CENTER,
                            self.error_message.text_content(),
                            FontId::proportional(20.0),
                            Color32::from_gray(220),
                        );
                    }
                    AppState::Failed => {}
                }
            });
    }
}
