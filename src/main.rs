//! facemoji - Main Entry Point

use facemoji::app::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use facemoji::config::AppConfig;
use facemoji::profile::DeviceProfile;
use facemoji::FacemojiApp;

const WINDOW_TITLE: &str = "facemoji";

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("facemoji v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    let profile = DeviceProfile::detect();
    log::info!("Device profile: {:?}", profile);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([DEFAULT_WIDTH as f32, DEFAULT_HEIGHT as f32])
            .with_title(WINDOW_TITLE),
        vsync: true,
        ..Default::default()
    };

    eframe::run_native(
        WINDOW_TITLE,
        native_options,
        Box::new(move |cc| Ok(Box::new(FacemojiApp::new(cc, &config, profile)))),
    )
    .map_err(|e| anyhow::anyhow!("Event loop error: {}", e))
}
