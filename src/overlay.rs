//! Emoji overlay drawing
//!
//! [`Canvas2d`] is the 2D surface the render loop draws on. [`OverlayCanvas`]
//! implements it as a display list that the window paints over the video.

use std::fmt;

use crate::ml::{Keypoint, KeypointLabel};

/// Glyph font size in pixels
pub const GLYPH_SIZE: f32 = 32.0;

/// Keypoints at or below this confidence are not drawn
pub const DRAW_THRESHOLD: f32 = 0.8;

/// Order in which tracked keypoints are drawn
pub const DISPLAY_ORDER: [KeypointLabel; 3] = [
    KeypointLabel::Nose,
    KeypointLabel::LeftEye,
    KeypointLabel::RightEye,
];

/// Glyph for each slot of [`DISPLAY_ORDER`]
pub const GLYPHS: [&str; 3] = ["🍩", "🦅", "🦅"];

/// Generic font family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFamily {
    SansSerif,
}

/// Text font
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Font {
    pub size_px: f32,
    pub family: FontFamily,
}

impl Font {
    pub fn sans_serif(size_px: f32) -> Self {
        Self {
            size_px,
            family: FontFamily::SansSerif,
        }
    }
}

impl Default for Font {
    fn default() -> Self {
        Self::sans_serif(10.0)
    }
}

impl fmt::Display for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.family {
            FontFamily::SansSerif => "sans-serif",
        };
        write!(f, "{}px {}", self.size_px, family)
    }
}

/// 2D drawing surface
pub trait Canvas2d {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn set_size(&mut self, width: u32, height: u32);
    fn set_font(&mut self, font: Font);
    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
    /// Draw text with its baseline-left corner at (x, y)
    fn fill_text(&mut self, text: &str, x: f32, y: f32);
}

/// Recorded drawing operation
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Text {
        text: String,
        x: f32,
        y: f32,
        font: Font,
    },
}

/// Display-list canvas
#[derive(Debug, Clone, Default)]
pub struct OverlayCanvas {
    width: u32,
    height: u32,
    font: Font,
    commands: Vec<DrawCommand>,
}

impl OverlayCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn font(&self) -> Font {
        self.font
    }

    /// Commands currently on the canvas, in draw order
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }
}

impl Canvas2d for OverlayCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn set_size(&mut self, width: u32, height: u32) {
        // Resizing resets the surface
        self.width = width;
        self.height = height;
        self.commands.clear();
    }

    fn set_font(&mut self, font: Font) {
        self.font = font;
    }

    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let (x1, y1) = (x + width, y + height);
        if x <= 0.0 && y <= 0.0 && x1 >= self.width as f32 && y1 >= self.height as f32 {
            // Glyphs anchored off the edge still overlap the surface
            self.commands.clear();
            return;
        }
        self.commands.retain(|command| match command {
            DrawCommand::Text { x: tx, y: ty, .. } => {
                !(*tx >= x && *tx < x1 && *ty >= y && *ty < y1)
            }
        });
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            x,
            y,
            font: self.font,
        });
    }
}

/// Reorder estimator output (nose, right eye, left eye) into [`DISPLAY_ORDER`]
pub fn to_display_order(keypoints: &[Keypoint]) -> Option<[Keypoint; 3]> {
    match keypoints {
        [nose, right_eye, left_eye, ..] => Some([*nose, *left_eye, *right_eye]),
        _ => None,
    }
}

/// Map keypoints from video pixels onto the canvas
pub fn to_canvas_space(keypoints: [Keypoint; 3], scale: (f32, f32)) -> [Keypoint; 3] {
    keypoints.map(|mut keypoint| {
        keypoint.position.x *= scale.0;
        keypoint.position.y *= scale.1;
        keypoint
    })
}

/// Where a glyph is drawn so it centers on `keypoint`
pub fn glyph_origin(keypoint: &Keypoint) -> (f32, f32) {
    (
        keypoint.position.x - GLYPH_SIZE / 2.0,
        keypoint.position.y + GLYPH_SIZE / 2.0,
    )
}

/// Clear the canvas and draw a glyph for each confident keypoint.
///
/// `keypoints` must already be in display order. Returns the number of glyphs
/// drawn.
pub fn draw_pose<C: Canvas2d>(canvas: &mut C, keypoints: &[Keypoint; 3]) -> usize {
    let (width, height) = (canvas.width() as f32, canvas.height() as f32);
    canvas.clear_rect(0.0, 0.0, width, height);

    let mut drawn = 0;
    for (index, keypoint) in keypoints.iter().enumerate() {
        if keypoint.score > DRAW_THRESHOLD {
            let (x, y) = glyph_origin(keypoint);
            canvas.fill_text(GLYPHS[index], x, y);
            drawn += 1;
        }
    }
    drawn
}
