//! Packaging region detection
//!
//! Two detectors behind one outcome type: a learned ONNX box detector used
//! when its model file is present, and a contour-based geometric method that
//! is always available. The region detector chains them so that a valid
//! input image always yields a usable crop, worst case the input itself.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::rect::Rect;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::Path;
use tracing::{debug, info, warn};

use super::preprocess::letterbox_tensor;
use super::Detection;
use crate::config::DetectionSettings;

/// Canny thresholds for the geometric fallback.
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Learned packaging detector backed by a YOLO-style ONNX model.
///
/// Expects the common single-tensor output layout `[1, N, 5 + classes]`
/// with rows of `[cx, cy, w, h, objectness, class scores...]` in
/// letterboxed input coordinates.
pub struct OnnxBoxDetector {
    session: Session,
    input_size: u32,
    confidence_threshold: f32,
}

impl OnnxBoxDetector {
    /// Load the detector from an ONNX file.
    pub fn load(model_path: &Path, input_size: u32, confidence_threshold: f32) -> Result<Self> {
        info!("loading packaging detector from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load packaging detector model")?;

        Ok(Self {
            session,
            input_size,
            confidence_threshold,
        })
    }

    /// Run inference and return the single best detection, if any.
    ///
    /// Confidence ties are broken by larger box area so the choice does not
    /// depend on the model's row order.
    pub fn best_detection(&mut self, image: &DynamicImage) -> Result<Option<Detection>> {
        let (width, height) = image.dimensions();
        let (tensor, letterbox) = letterbox_tensor(image, self.input_size);

        let input_ref: TensorRef<f32> = TensorRef::from_array_view(&tensor)?;
        let output_array = {
            let outputs = self
                .session
                .run(inputs![input_ref])
                .map_err(|e| anyhow::anyhow!("Detector inference failed: {e}"))?;

            let output_tensor = outputs[0].try_extract_array::<f32>()?;
            output_tensor
                .into_owned()
                .into_dimensionality::<ndarray::Ix3>()
                .map_err(|e| anyhow::anyhow!("Unexpected detector output shape: {e}"))?
        };

        let rows = output_array.shape()[1];
        let cols = output_array.shape()[2];
        if cols < 5 {
            anyhow::bail!("detector output rows too short: {cols} values");
        }

        let mut best: Option<Detection> = None;

        for row in 0..rows {
            let objectness = output_array[[0, row, 4]];

            // Fold class probabilities into the score (single-class models
            // just carry objectness).
            let (class_id, class_score) = if cols > 5 {
                (5..cols)
                    .map(|c| (c - 5, output_array[[0, row, c]]))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .unwrap_or((0, 1.0))
            } else {
                (0, 1.0)
            };
            let confidence = objectness * class_score;

            if confidence < self.confidence_threshold {
                continue;
            }

            let cx = output_array[[0, row, 0]];
            let cy = output_array[[0, row, 1]];
            let w = output_array[[0, row, 2]];
            let h = output_array[[0, row, 3]];

            let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

            let candidate = Detection {
                x1: x1.max(0.0) as u32,
                y1: y1.max(0.0) as u32,
                x2: x2.max(1.0) as u32,
                y2: y2.max(1.0) as u32,
                confidence: Some(confidence),
                class_id: Some(class_id),
            }
            .clamped(width, height);

            let better = match &best {
                None => true,
                Some(current) => {
                    let current_conf = current.confidence.unwrap_or(0.0);
                    confidence > current_conf
                        || (confidence == current_conf && candidate.area() > current.area())
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        Ok(best)
    }
}

/// Geometric fallback: blur, edge-detect, and take the external contour with
/// the largest bounding box. Boxes covering less than `min_area_ratio` of the
/// image are treated as noise.
pub fn contour_fallback(image: &DynamicImage, min_area_ratio: f32) -> Option<Detection> {
    let (width, height) = image.dimensions();

    let gray = image.to_luma8();
    let blurred = gaussian_blur_f32(&gray, 1.5);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);

    let contours = find_contours::<u32>(&edges);

    let mut best: Option<Detection> = None;
    for contour in &contours {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }

        let min_x = contour.points.iter().map(|p| p.x).min()?;
        let max_x = contour.points.iter().map(|p| p.x).max()?;
        let min_y = contour.points.iter().map(|p| p.y).min()?;
        let max_y = contour.points.iter().map(|p| p.y).max()?;

        let candidate = Detection {
            x1: min_x,
            y1: min_y,
            x2: max_x + 1,
            y2: max_y + 1,
            confidence: None,
            class_id: None,
        };

        if best.map_or(true, |b| candidate.area() > b.area()) {
            best = Some(candidate);
        }
    }

    let detection = best?;
    let image_area = u64::from(width) * u64::from(height);
    let ratio = detection.area() as f64 / image_area as f64;

    if ratio < f64::from(min_area_ratio) {
        debug!(
            "largest contour box covers only {:.1}% of the image, treating as noise",
            ratio * 100.0
        );
        return None;
    }

    debug!("contour box covers {:.1}% of the image", ratio * 100.0);
    Some(detection.clamped(width, height))
}

/// Result of an annotated detection pass.
pub struct RegionOutcome {
    /// The cropped region fed to recognition (input image when nothing was
    /// detected)
    pub image: DynamicImage,
    /// The located box, if any
    pub detection: Option<Detection>,
    /// Source image with the box drawn, for observability
    pub overlay: RgbImage,
}

/// Packaging region detector with learned-then-geometric fallback.
pub struct RegionDetector {
    settings: DetectionSettings,
    model: Option<OnnxBoxDetector>,
}

impl RegionDetector {
    /// Create a detector, loading the learned model when configured and
    /// present. A missing or unloadable model downgrades to fallback-only
    /// operation; it never fails construction.
    pub fn new(settings: DetectionSettings, model_path: Option<&Path>) -> Self {
        let model = if settings.use_model {
            match model_path {
                Some(path) if path.exists() => {
                    match OnnxBoxDetector::load(path, settings.input_size, settings.confidence_threshold) {
                        Ok(detector) => Some(detector),
                        Err(e) => {
                            warn!("failed to load packaging detector: {e:#}");
                            None
                        }
                    }
                }
                _ => None,
            }
        } else {
            None
        };

        if model.is_none() {
            info!("packaging detector not loaded, using contour fallback only");
        }

        Self { settings, model }
    }

    /// Locate the packaging box, learned detector first.
    fn locate(&mut self, image: &DynamicImage) -> Option<Detection> {
        if let Some(model) = &mut self.model {
            match model.best_detection(image) {
                Ok(Some(detection)) => {
                    debug!(
                        "learned detector found box ({}, {})-({}, {}) confidence {:?}",
                        detection.x1, detection.y1, detection.x2, detection.y2, detection.confidence
                    );
                    return Some(detection);
                }
                Ok(None) => debug!("learned detector found no boxes, trying contour fallback"),
                Err(e) => warn!("learned detector failed ({e:#}), trying contour fallback"),
            }
        }

        contour_fallback(image, self.settings.min_area_ratio)
    }

    /// Return the sub-image most likely to contain the packaging.
    ///
    /// Never fails for a valid image: when nothing usable is detected the
    /// input is returned unchanged.
    pub fn detect(&mut self, image: &DynamicImage) -> DynamicImage {
        match self.locate(image) {
            Some(detection) => crop_to(image, detection),
            None => image.clone(),
        }
    }

    /// Like [`detect`](Self::detect), additionally returning the detection
    /// record and an overlay rendering. The cropped result is identical to
    /// what `detect` would produce.
    pub fn detect_annotated(&mut self, image: &DynamicImage) -> RegionOutcome {
        let detection = self.locate(image);
        let cropped = match detection {
            Some(det) => crop_to(image, det),
            None => image.clone(),
        };

        let mut overlay = image.to_rgb8();
        if let Some(det) = detection {
            let rect = Rect::at(det.x1 as i32, det.y1 as i32).of_size(det.width(), det.height());
            draw_hollow_rect_mut(&mut overlay, rect, Rgb([255, 0, 0]));
            // Thicken the outline so it survives thumbnail rendering.
            if det.width() > 4 && det.height() > 4 {
                let inner = Rect::at(det.x1 as i32 + 1, det.y1 as i32 + 1)
                    .of_size(det.width() - 2, det.height() - 2);
                draw_hollow_rect_mut(&mut overlay, inner, Rgb([255, 0, 0]));
            }
        }

        RegionOutcome {
            image: cropped,
            detection,
            overlay,
        }
    }
}

/// Crop an image to a detection box, clamped to the image bounds.
fn crop_to(image: &DynamicImage, detection: Detection) -> DynamicImage {
    let (width, height) = image.dimensions();
    let det = detection.clamped(width, height);
    image.crop_imm(det.x1, det.y1, det.width(), det.height())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn image_with_rect(
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> DynamicImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([10, 10, 10]));
        for yy in y..(y + h) {
            for xx in x..(x + w) {
                img.put_pixel(xx, yy, Rgb([240, 240, 240]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn fallback_only(min_area_ratio: f32) -> RegionDetector {
        let settings = DetectionSettings {
            use_model: false,
            min_area_ratio,
            ..Default::default()
        };
        RegionDetector::new(settings, None)
    }

    #[test]
    fn test_contour_fallback_finds_large_rectangle() {
        let image = image_with_rect(200, 200, 40, 50, 120, 100);
        let detection = contour_fallback(&image, 0.10).expect("rectangle should be detected");

        assert!(detection.width() >= 110 && detection.width() <= 130);
        assert!(detection.height() >= 90 && detection.height() <= 110);
        assert!(detection.confidence.is_none());
        assert!(detection.class_id.is_none());
    }

    #[test]
    fn test_contour_fallback_rejects_small_box() {
        // 30x30 box in a 200x200 image is ~2% of the area.
        let image = image_with_rect(200, 200, 10, 10, 30, 30);
        assert!(contour_fallback(&image, 0.10).is_none());
    }

    #[test]
    fn test_contour_fallback_uniform_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 80, Rgb([128, 128, 128])));
        assert!(contour_fallback(&image, 0.10).is_none());
    }

    #[test]
    fn test_detect_crops_to_region() {
        let image = image_with_rect(200, 200, 40, 50, 120, 100);
        let mut detector = fallback_only(0.10);

        let cropped = detector.detect(&image);
        assert!(cropped.width() <= image.width());
        assert!(cropped.height() <= image.height());
        assert!(cropped.width() < image.width());
    }

    #[test]
    fn test_detect_returns_input_when_nothing_found() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 90, Rgb([55, 55, 55])));
        let mut detector = fallback_only(0.10);

        let result = detector.detect(&image);
        assert_eq!((result.width(), result.height()), (120, 90));
    }

    #[test]
    fn test_detect_never_produces_empty_image() {
        for (w, h) in [(1, 1), (5, 400), (400, 5)] {
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([0, 0, 0])));
            let mut detector = fallback_only(0.10);
            let result = detector.detect(&image);
            assert!(result.width() >= 1);
            assert!(result.height() >= 1);
        }
    }

    #[test]
    fn test_annotated_matches_plain_detect() {
        let image = image_with_rect(200, 200, 40, 50, 120, 100);

        let mut detector = fallback_only(0.10);
        let plain = detector.detect(&image);

        let mut detector = fallback_only(0.10);
        let outcome = detector.detect_annotated(&image);

        assert_eq!(outcome.image.dimensions(), plain.dimensions());
        assert_eq!(outcome.overlay.dimensions(), (200, 200));
        assert!(outcome.detection.is_some());
    }

    #[test]
    fn test_missing_model_file_downgrades_quietly() {
        let settings = DetectionSettings::default();
        let mut detector =
            RegionDetector::new(settings, Some(Path::new("/nonexistent/packaging.onnx")));

        let image = image_with_rect(200, 200, 40, 50, 120, 100);
        let cropped = detector.detect(&image);
        assert!(cropped.width() <= 200);
    }
}
