//! Device profile
//!
//! Classifies the client once at startup as mobile or desktop. The profile fixes
//! every numeric detection parameter for the lifetime of the session.

/// User agent fragments that mark a handheld device.
const MOBILE_MARKERS: [&str; 4] = ["android", "iphone", "ipad", "ipod"];

/// Device class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

/// Detection parameters derived from the device class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    /// Device class this profile was derived from
    pub class: DeviceClass,
    /// Fraction of the video resolution fed to the model
    pub resolution_factor: f32,
    /// Minimum keypoint score reported by the estimator
    pub score_threshold: f32,
    /// Model output stride in pixels
    pub output_stride: u32,
    /// Number of frame slots in the capture ring
    pub max_pool_size: usize,
}

impl DeviceProfile {
    pub const MOBILE: Self = Self {
        class: DeviceClass::Mobile,
        resolution_factor: 0.5,
        score_threshold: 0.2,
        output_stride: 32,
        max_pool_size: 2,
    };

    pub const DESKTOP: Self = Self {
        class: DeviceClass::Desktop,
        resolution_factor: 0.75,
        score_threshold: 0.75,
        output_stride: 8,
        max_pool_size: 3,
    };

    /// Classify the machine we are running on
    pub fn detect() -> Self {
        Self::from_user_agent(&platform_user_agent())
    }

    /// Classify a user agent string
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
            Self::MOBILE
        } else {
            Self::DESKTOP
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.class == DeviceClass::Mobile
    }
}

/// Build a user agent string describing the host platform
pub fn platform_user_agent() -> String {
    let platform = match std::env::consts::OS {
        "android" => "Linux; Android",
        "ios" => "iPhone; CPU iPhone OS",
        "macos" => "Macintosh",
        "windows" => "Windows NT",
        other => other,
    };
    format!(
        "{}/{} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        platform,
        std::env::consts::ARCH
    )
}
