//! Ink Surface Layer
//!
//! Captures pointer strokes into an RGB raster of dark ink on white paper.
//! Consumers never read the live raster; they take an [`InkFrame`] snapshot.

pub mod frame;

use anyhow::{Context, Result};
use image::RgbImage;
use imageproc::drawing::draw_filled_circle_mut;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub use frame::{InkFrame, INK, PAPER};

/// A single pen stroke as a polyline in surface coordinates
pub type Stroke = Vec<[f32; 2]>;

/// Drawing surface configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Width and height of the square surface in pixels
    pub size: u32,
    /// Pen width in pixels
    pub stroke_width: f32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            size: 256,
            stroke_width: 18.0,
        }
    }
}

/// Read-side contract the recognizer needs from a drawing surface
pub trait DrawingSurface: Send + Sync {
    /// Capture an owned copy of the current raster
    fn snapshot(&self) -> InkFrame;
    /// Erase all ink
    fn clear(&self);
}

/// A surface shared between the input side and the recognizer
pub type SharedSurface = Arc<RwLock<InkSurface>>;

/// Accumulates strokes until cleared
#[derive(Debug, Clone)]
pub struct InkSurface {
    canvas: RgbImage,
    stroke_width: f32,
    strokes: Vec<Stroke>,
    drawing: bool,
}

impl InkSurface {
    /// Create a blank surface
    pub fn new(config: SurfaceConfig) -> Self {
        Self {
            canvas: RgbImage::from_pixel(config.size, config.size, PAPER),
            stroke_width: config.stroke_width,
            strokes: Vec::new(),
            drawing: false,
        }
    }

    /// Seed a surface with an existing drawing
    pub fn from_image(image: RgbImage, stroke_width: f32) -> Self {
        Self {
            canvas: image,
            stroke_width,
            strokes: Vec::new(),
            drawing: false,
        }
    }

    /// Wrap the surface for sharing with a recognizer
    pub fn into_shared(self) -> SharedSurface {
        Arc::new(RwLock::new(self))
    }

    /// Surface dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Strokes drawn since the last clear
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Begin a stroke. Nothing is inked until the pen moves.
    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.drawing = true;
        self.strokes.push(vec![[x, y]]);
    }

    /// Extend the current stroke, inking the new segment
    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if !self.drawing {
            return;
        }
        let Some(stroke) = self.strokes.last_mut() else {
            return;
        };
        let from = stroke.last().copied().unwrap_or([x, y]);
        stroke.push([x, y]);
        stamp_segment(&mut self.canvas, from, [x, y], self.stroke_width);
    }

    /// End the current stroke
    pub fn pointer_up(&mut self) {
        self.drawing = false;
    }

    /// Replay recorded strokes as pointer events
    pub fn replay(&mut self, strokes: &[Stroke]) {
        for stroke in strokes {
            let Some((first, rest)) = stroke.split_first() else {
                continue;
            };
            self.pointer_down(first[0], first[1]);
            for point in rest {
                self.pointer_move(point[0], point[1]);
            }
            self.pointer_up();
        }
        debug!("Replayed {} strokes", strokes.len());
    }

    /// Erase all ink and stroke history
    pub fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = PAPER;
        }
        self.strokes.clear();
        self.drawing = false;
    }

    /// Capture an owned copy of the raster
    pub fn snapshot(&self) -> InkFrame {
        InkFrame::new(self.canvas.clone())
    }
}

impl DrawingSurface for RwLock<InkSurface> {
    fn snapshot(&self) -> InkFrame {
        self.read().snapshot()
    }

    fn clear(&self) {
        self.write().clear();
    }
}

/// Radius of the pen disc for a given stroke width
///
/// The pen is a hard-edged disc `2 * radius + 1` pixels across, so an 18 px
/// width inks 19 px with no anti-aliased fringe. A browser canvas draws the
/// same stroke 18 px wide with soft edges. After the ink is scaled into a
/// 20 px box the difference is under one model pixel.
pub fn pen_radius(width: f32) -> i32 {
    (width / 2.0).round().max(0.0) as i32
}

/// Draw a round-capped segment by stamping pen discs along it
fn stamp_segment(canvas: &mut RgbImage, from: [f32; 2], to: [f32; 2], width: f32) {
    let radius = pen_radius(width);
    let dx = to[0] - from[0];
    let dy = to[1] - from[1];
    let length = (dx * dx + dy * dy).sqrt();
    // Half-pixel steps keep the stroke edge free of scallops
    let steps = (length * 2.0).ceil().max(1.0) as usize;

    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let cx = (from[0] + dx * t).round() as i32;
        let cy = (from[1] + dy * t).round() as i32;
        draw_filled_circle_mut(canvas, (cx, cy), radius, INK);
    }
}

/// Load recorded strokes from a JSON file (`[[[x, y], ...], ...]`)
pub fn load_strokes(path: &Path) -> Result<Vec<Stroke>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stroke file: {:?}", path))?;
    let strokes: Vec<Stroke> =
        serde_json::from_str(&content).context("Stroke file is not valid JSON")?;
    Ok(strokes)
}

/// Save strokes to a JSON file
pub fn save_strokes(strokes: &[Stroke], path: &Path) -> Result<()> {
    let content = serde_json::to_string(strokes)?;
    std::fs::write(path, content)?;
    Ok(())
}
