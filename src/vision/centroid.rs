//! Center-of-mass recentering
//!
//! The model assumes digits whose intensity centroid sits at the canvas
//! center. Moving the content there makes the tensor independent of where
//! on the surface the user drew.

use image::{GrayImage, Luma};
use tracing::debug;

use super::round_half_up;

/// Intensity-weighted mean position in canvas pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

/// Output of the recentering stage
#[derive(Debug, Clone)]
pub struct Recentered {
    /// Shifted canvas, same resolution as the input
    pub image: GrayImage,
    /// Centroid before shifting; `None` for a blank canvas
    pub centroid: Option<Centroid>,
    /// Applied shift (dx, dy)
    pub shift: (i32, i32),
}

/// Centroid using the pixel-center convention, `None` if there is no mass
pub fn intensity_centroid(image: &GrayImage) -> Option<Centroid> {
    let mut sum_w = 0.0f64;
    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;

    for (x, y, pixel) in image.enumerate_pixels() {
        let w = pixel.0[0] as f64;
        if w > 0.0 {
            sum_w += w;
            sum_x += (x as f64 + 0.5) * w;
            sum_y += (y as f64 + 0.5) * w;
        }
    }

    if sum_w == 0.0 {
        return None;
    }

    Some(Centroid {
        x: sum_x / sum_w,
        y: sum_y / sum_w,
    })
}

/// Integer shift that moves `centroid` onto the geometric center
///
/// The target is `(size - 1) / 2`, 13.5 on a 28-wide canvas.
pub fn centering_shift(centroid: Centroid, width: u32, height: u32) -> (i32, i32) {
    let center_x = (width as f64 - 1.0) / 2.0;
    let center_y = (height as f64 - 1.0) / 2.0;
    (
        round_half_up(center_x - centroid.x) as i32,
        round_half_up(center_y - centroid.y) as i32,
    )
}

/// Translate content by (dx, dy) onto a background-filled canvas, clipping at the edges
pub fn shift_image(image: &GrayImage, dx: i32, dy: i32, background: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut shifted = GrayImage::from_pixel(width, height, Luma([background]));

    for (x, y, pixel) in image.enumerate_pixels() {
        let tx = x as i64 + dx as i64;
        let ty = y as i64 + dy as i64;
        if tx >= 0 && ty >= 0 && tx < width as i64 && ty < height as i64 {
            shifted.put_pixel(tx as u32, ty as u32, *pixel);
        }
    }

    shifted
}

/// Shift the canvas so its intensity centroid lands on the center
///
/// A blank canvas has no centroid and is returned unchanged.
pub fn recenter(image: &GrayImage, background: u8) -> Recentered {
    let Some(centroid) = intensity_centroid(image) else {
        debug!("Blank canvas, skipping recenter");
        return Recentered {
            image: image.clone(),
            centroid: None,
            shift: (0, 0),
        };
    };

    let (width, height) = image.dimensions();
    let (dx, dy) = centering_shift(centroid, width, height);
    debug!(
        "Centroid ({:.3}, {:.3}), shifting by ({}, {})",
        centroid.x, centroid.y, dx, dy
    );

    let image = if (dx, dy) == (0, 0) {
        image.clone()
    } else {
        shift_image(image, dx, dy, background)
    };

    Recentered {
        image,
        centroid: Some(centroid),
        shift: (dx, dy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas_with_block(x0: u32, y0: u32, size: u32) -> GrayImage {
        let mut image = GrayImage::new(28, 28);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                image.put_pixel(x, y, Luma([255]));
            }
        }
        image
    }

    #[test]
    fn test_blank_canvas_is_noop() {
        let image = GrayImage::new(28, 28);
        assert!(intensity_centroid(&image).is_none());

        let result = recenter(&image, 0);
        assert_eq!(result.shift, (0, 0));
        assert!(result.centroid.is_none());
        assert_eq!(result.image, image);
    }

    #[test]
    fn test_centroid_uses_pixel_centers() {
        let mut image = GrayImage::new(28, 28);
        image.put_pixel(0, 0, Luma([10]));
        let c = intensity_centroid(&image).unwrap();
        assert_eq!((c.x, c.y), (0.5, 0.5));
    }

    #[test]
    fn test_centroid_is_intensity_weighted() {
        let mut image = GrayImage::new(28, 28);
        image.put_pixel(2, 4, Luma([100]));
        image.put_pixel(6, 4, Luma([255]));
        let c = intensity_centroid(&image).unwrap();
        // (2.5 * 100 + 6.5 * 255) / 355
        assert!((c.x - (2.5 * 100.0 + 6.5 * 255.0) / 355.0).abs() < 1e-9);
        assert!((c.y - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_off_center_block_is_moved_to_center() {
        let image = canvas_with_block(2, 3, 4);
        let result = recenter(&image, 0);

        // centroid (4.0, 5.0) -> shift (10, 9)
        assert_eq!(result.shift, (10, 9));
        let c = intensity_centroid(&result.image).unwrap();
        assert!((c.x - 13.5).abs() <= 0.5);
        assert!((c.y - 13.5).abs() <= 0.5);
    }

    #[test]
    fn test_recenter_is_idempotent() {
        let image = canvas_with_block(1, 17, 5);
        let first = recenter(&image, 0);
        let second = recenter(&first.image, 0);
        assert_eq!(second.shift, (0, 0));
        assert_eq!(second.image, first.image);
    }

    #[test]
    fn test_half_pixel_offset_rounds_up() {
        // Even-sized block centered on 14.0: 13.5 - 14.0 = -0.5 rounds to 0
        let image = canvas_with_block(12, 12, 4);
        let c = intensity_centroid(&image).unwrap();
        assert_eq!((c.x, c.y), (14.0, 14.0));
        assert_eq!(recenter(&image, 0).shift, (0, 0));
    }

    #[test]
    fn test_centered_centroid_needs_no_shift() {
        let centroid = Centroid { x: 13.5, y: 13.5 };
        assert_eq!(centering_shift(centroid, 28, 28), (0, 0));
    }

    #[test]
    fn test_shift_rounds_halves_up() {
        // 13.5 - 13.0 = 0.5 rounds to 1; 13.5 - 14.0 = -0.5 rounds to 0
        let centroid = Centroid { x: 13.0, y: 14.0 };
        assert_eq!(centering_shift(centroid, 28, 28), (1, 0));
    }

    #[test]
    fn test_shift_clips_silently() {
        let image = canvas_with_block(0, 0, 3);
        let shifted = shift_image(&image, -2, 26, 7);

        assert_eq!(shifted.dimensions(), (28, 28));
        // Column 2 of rows 0 and 1 lands at (0, 26) and (0, 27)
        assert_eq!(shifted.get_pixel(0, 26).0[0], 255);
        assert_eq!(shifted.get_pixel(0, 27).0[0], 255);
        assert_eq!(shifted.pixels().filter(|p| p.0[0] == 255).count(), 2);
        // Every source cell is copied, including its zero background
        assert_eq!(shifted.get_pixel(1, 26).0[0], 0);
        assert_eq!(shifted.get_pixel(25, 27).0[0], 0);
        // Cells no source cell maps onto keep the fill
        assert_eq!(shifted.get_pixel(26, 26).0[0], 7);
        assert_eq!(shifted.get_pixel(27, 27).0[0], 7);
        assert!((0..26).all(|y| shifted.get_pixel(13, y).0[0] == 7));
    }

    #[test]
    fn test_shift_fills_background() {
        let image = canvas_with_block(10, 10, 2);
        let shifted = shift_image(&image, 5, 0, 0);
        assert_eq!(shifted.get_pixel(10, 10).0[0], 0);
        assert_eq!(shifted.get_pixel(15, 10).0[0], 255);
    }
}
