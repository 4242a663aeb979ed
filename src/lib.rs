//! facemoji - emoji overlay on live facial keypoints
//!
//! Captures the webcam, estimates nose and eye positions with a pose model every
//! display refresh, and draws emoji over them.

pub mod app;
pub mod camera;
pub mod config;
pub mod ml;
pub mod overlay;
pub mod profile;
pub mod render_loop;
pub mod session;

pub use app::FacemojiApp;
