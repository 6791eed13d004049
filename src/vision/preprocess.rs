//! Tensor conversion for the digit model
//!
//! Maps the final intensity canvas to the NCHW float tensor the model reads.

use image::GrayImage;
use ndarray::{Array2, Array4, Axis};

use crate::config::Normalization;

/// Normalized model input of shape (1, 1, height, width)
///
/// Built fresh for each request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct InkTensor {
    data: Array4<f32>,
}

impl InkTensor {
    /// Tensor shape as [batch, channel, height, width]
    pub fn shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.data.dim();
        [n, c, h, w]
    }

    /// Row-major flattened values
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Value at canvas position (x, y)
    #[cfg(test)]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.data.get([0, 0, y, x]).copied()
    }
}

/// Map one 0..=255 intensity to model range
pub fn normalize_intensity(intensity: u8, norm: &Normalization) -> f32 {
    (intensity as f32 / 255.0 - norm.mean) / norm.std
}

/// Convert an intensity canvas to a normalized NCHW tensor (batch size 1)
pub fn canvas_to_tensor(canvas: &GrayImage, norm: &Normalization) -> InkTensor {
    let (width, height) = canvas.dimensions();
    let plane = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        normalize_intensity(canvas.get_pixel(x as u32, y as u32).0[0], norm)
    });

    InkTensor {
        data: plane.insert_axis(Axis(0)).insert_axis(Axis(0)),
    }
}
