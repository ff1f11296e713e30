//! Image preprocessing for the packaging detector
//!
//! Handles letterbox resizing, normalization, and tensor conversion for the
//! ONNX detection model.

use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

/// Gray value used for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Geometry of a letterboxed image, needed to map detections back to the
/// source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source-to-square scale factor
    pub scale: f32,
    /// Horizontal padding added on the left
    pub pad_x: u32,
    /// Vertical padding added on the top
    pub pad_y: u32,
}

impl Letterbox {
    /// Map a point from model-input coordinates back to source coordinates.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Resize into a size×size square with aspect preserved and gray padding,
/// returning an NCHW tensor normalized to [0, 1].
pub fn letterbox_tensor(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale) as u32).max(1);
    let new_h = ((height as f32 * scale) as u32).max(1);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]));
    image::imageops::overlay(&mut canvas, &resized, i64::from(pad_x), i64::from(pad_y));

    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
        }
    }

    let letterbox = Letterbox { scale, pad_x, pad_y };
    (tensor, letterbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_letterbox_tensor_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([10, 20, 30])));
        let (tensor, lb) = letterbox_tensor(&img, 64);

        assert_eq!(tensor.dim(), (1, 3, 64, 64));
        // Wide image: full width used, vertical padding added.
        assert_eq!(lb.pad_x, 0);
        assert!(lb.pad_y > 0);
        assert!((lb.scale - 0.32).abs() < 0.001);
    }

    #[test]
    fn test_letterbox_padding_value() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 16, Rgb([255, 255, 255])));
        let (tensor, lb) = letterbox_tensor(&img, 64);

        // Top-left corner lies inside the padded band.
        assert!(lb.pad_y > 0);
        let padded = tensor[[0, 0, 0, 0]];
        assert!((padded - f32::from(PAD_VALUE) / 255.0).abs() < 0.01);

        // Center row carries image content.
        let center = tensor[[0, 0, 32, 32]];
        assert!((center - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_letterbox_roundtrip_mapping() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([0, 0, 0])));
        let (_, lb) = letterbox_tensor(&img, 64);

        // A point at the model-input center of the content maps back near the
        // source center.
        let (sx, sy) = lb.to_source(32.0, 32.0);
        assert!((sx - 100.0).abs() < 4.0);
        assert!((sy - 50.0).abs() < 4.0);
    }
}
