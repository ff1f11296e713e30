//! Image loading and normalization
//!
//! Decodes raw image bytes into a canonical color image with any embedded
//! EXIF orientation applied. Also provides the optional binarization step
//! used to sharpen low-contrast packaging photos before OCR.

use exif::{In, Tag};
use image::{DynamicImage, GrayImage};
use imageproc::contrast::adaptive_threshold;
use imageproc::filter::gaussian_blur_f32;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Failure to turn input bytes into an image. Fatal for the affected image
/// only; batch processing continues past it.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read image file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or malformed image data: {0}")]
    Malformed(#[from] image::ImageError),
}

/// Load and normalize an image from disk.
pub fn load_image(path: &Path) -> Result<DynamicImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}

/// Decode image bytes and apply any stored EXIF orientation.
///
/// Missing or unreadable orientation metadata leaves the image unchanged;
/// only undecodable pixel data is an error.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    let image = image::load_from_memory(bytes)?;

    let oriented = match exif_orientation(bytes) {
        Some(3) => image.rotate180(),
        Some(6) => image.rotate90(),
        Some(8) => image.rotate270(),
        Some(other) => {
            if other != 1 {
                debug!("ignoring unsupported EXIF orientation value {other}");
            }
            image
        }
        None => image,
    };

    Ok(oriented)
}

/// Read the EXIF orientation tag, if any.
fn exif_orientation(bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

/// Binarize an image for OCR: grayscale, light blur, adaptive threshold.
///
/// Mirrors the enhancement pass used on washed-out photos. The region
/// detector always works on the untouched color image.
pub fn enhance_for_ocr(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let blurred = gaussian_blur_f32(&gray, 1.5);
    adaptive_threshold(&blurred, 11)
}

/// File extensions accepted when scanning a batch directory.
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Whether a file extension (without the dot) names a supported image format.
pub fn is_valid_image_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 180, 160]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_png_roundtrip() {
        let bytes = png_bytes(40, 30);
        let image = decode_image(&bytes).unwrap();
        assert_eq!(image.width(), 40);
        assert_eq!(image.height(), 30);
    }

    #[test]
    fn test_decode_without_exif_is_unchanged() {
        // PNG carries no EXIF orientation; dimensions must survive as-is.
        let bytes = png_bytes(64, 16);
        let image = decode_image(&bytes).unwrap();
        assert_eq!((image.width(), image.height()), (64, 16));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_image(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = load_image(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(DecodeError::Read { .. })));
    }

    #[test]
    fn test_enhance_preserves_dimensions() {
        let bytes = png_bytes(50, 20);
        let image = decode_image(&bytes).unwrap();
        let enhanced = enhance_for_ocr(&image);
        assert_eq!(enhanced.dimensions(), (50, 20));
    }

    #[test]
    fn test_image_extensions() {
        assert!(is_valid_image_extension("jpg"));
        assert!(is_valid_image_extension("JPEG"));
        assert!(is_valid_image_extension("png"));
        assert!(is_valid_image_extension("webp"));
        assert!(!is_valid_image_extension("gif"));
        assert!(!is_valid_image_extension("txt"));
    }
}
