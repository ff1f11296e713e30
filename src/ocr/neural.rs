//! Neural OCR backend
//!
//! PaddleOCR-style two-stage recognition via ONNX Runtime: a DBNet detection
//! model finds text regions, a CRNN recognition model reads each region, and
//! a greedy CTC decoder turns the output into text. Only enabled when the
//! models and dictionary for the requested language are present on disk.

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::morphology::dilate;
use ndarray::{Array4, ArrayView2};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

use super::{OcrEngine, OcrError};
use crate::lang::LanguageTag;
use crate::vision::{ModelKind, ModelManager};

/// Detection input is capped at this side length and padded to multiples
/// of 32, as the DBNet export expects.
const DET_MAX_SIDE: f32 = 960.0;
/// Probability threshold for the detection mask.
const DET_THRESH: f32 = 0.3;
/// Mean mask score a box must reach to be kept.
const BOX_THRESH: f32 = 0.5;
/// Expansion ratio applied to detected boxes before cropping.
const UNCLIP_RATIO: f32 = 1.6;
/// ImageNet normalization used by the detection model.
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Recognition input geometry (PP-OCRv4: fixed height, dynamic width).
const REC_HEIGHT: u32 = 48;
const REC_MAX_WIDTH: u32 = 640;

/// A detected text region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy)]
struct TextBox {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Two-stage neural OCR engine for one language.
pub struct NeuralOcr {
    det_session: Session,
    rec_session: Session,
    characters: Vec<String>,
}

impl NeuralOcr {
    /// Load the detection and recognition models plus the character
    /// dictionary for a language from the model cache.
    pub fn create(models: &ModelManager, tag: LanguageTag) -> Result<Box<dyn OcrEngine>, OcrError> {
        let det_session = load_session(&models.model_path(ModelKind::TextDetection))?;
        let rec_session = load_session(&models.model_path(ModelKind::TextRecognition(tag)))?;
        let characters = load_character_dict(&models.model_path(ModelKind::Dictionary(tag)))?;

        debug!(
            "neural OCR ready for {tag}: {} dictionary entries",
            characters.len()
        );

        Ok(Box::new(Self {
            det_session,
            rec_session,
            characters,
        }))
    }

    /// Find text regions, sorted into reading order.
    fn detect_boxes(&mut self, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
        let (src_w, src_h) = image.dimensions();
        let (tensor, mask_w, mask_h) = preprocess_detection(image);

        let input_ref: TensorRef<f32> = TensorRef::from_array_view(&tensor)
            .map_err(|e| OcrError::Recognition(format!("detection input failed: {e}")))?;
        let pred = {
            let outputs = self
                .det_session
                .run(inputs![input_ref])
                .map_err(|e| OcrError::Recognition(format!("detection inference failed: {e}")))?;
            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| OcrError::Recognition(format!("detection output failed: {e}")))?;
            output
                .into_owned()
                .into_dimensionality::<ndarray::Ix4>()
                .map_err(|e| OcrError::Recognition(format!("unexpected detection shape: {e}")))?
        };

        // Probability map -> binary mask.
        let pred_2d = pred.index_axis(ndarray::Axis(0), 0);
        let pred_2d = pred_2d.index_axis(ndarray::Axis(0), 0);

        let mut mask = GrayImage::new(mask_w, mask_h);
        for y in 0..mask_h as usize {
            for x in 0..mask_w as usize {
                let val = if pred_2d[[y, x]] > DET_THRESH { 255u8 } else { 0u8 };
                mask.put_pixel(x as u32, y as u32, Luma([val]));
            }
        }
        let mask = dilate(&mask, imageproc::distance_transform::Norm::L1, 1);

        let mut boxes = Vec::new();
        for contour in find_contours::<u32>(&mask) {
            if contour.points.is_empty() {
                continue;
            }

            let min_x = contour.points.iter().map(|p| p.x).min().unwrap_or(0);
            let max_x = contour.points.iter().map(|p| p.x).max().unwrap_or(0);
            let min_y = contour.points.iter().map(|p| p.y).min().unwrap_or(0);
            let max_y = contour.points.iter().map(|p| p.y).max().unwrap_or(0);

            let box_w = (max_x - min_x) as f32;
            let box_h = (max_y - min_y) as f32;
            if box_w.min(box_h) < 3.0 {
                continue;
            }

            if box_mean_score(&pred_2d, min_x, min_y, max_x, max_y) < BOX_THRESH {
                continue;
            }

            // Expand the box the way DBNet post-processing unclips polygons,
            // simplified to the axis-aligned case.
            let offset = box_w * box_h * UNCLIP_RATIO / (2.0 * (box_w + box_h));
            let ex1 = (min_x as f32 - offset).max(0.0);
            let ey1 = (min_y as f32 - offset).max(0.0);
            let ex2 = (max_x as f32 + offset).min(mask_w as f32 - 1.0);
            let ey2 = (max_y as f32 + offset).min(mask_h as f32 - 1.0);

            // Scale back to source coordinates.
            let sx = src_w as f32 / mask_w as f32;
            let sy = src_h as f32 / mask_h as f32;
            let x1 = (ex1 * sx).clamp(0.0, (src_w - 1) as f32) as u32;
            let y1 = (ey1 * sy).clamp(0.0, (src_h - 1) as f32) as u32;
            let x2 = (ex2 * sx).clamp(0.0, (src_w - 1) as f32) as u32;
            let y2 = (ey2 * sy).clamp(0.0, (src_h - 1) as f32) as u32;

            if x2 <= x1 + 2 || y2 <= y1 + 2 {
                continue;
            }

            boxes.push(TextBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            });
        }

        Ok(sort_reading_order(boxes))
    }

    /// Recognize the text inside one region.
    fn recognize_region(&mut self, region: &DynamicImage) -> Result<String, OcrError> {
        let (w, h) = region.dimensions();
        if w == 0 || h == 0 {
            return Ok(String::new());
        }

        let target_w = ((REC_HEIGHT as f32 * w as f32 / h as f32).ceil() as u32)
            .clamp(8, REC_MAX_WIDTH);
        let resized = region
            .resize_exact(target_w, REC_HEIGHT, image::imageops::FilterType::CatmullRom)
            .to_rgb8();

        // Normalize to [-1, 1].
        let mut tensor =
            Array4::<f32>::zeros((1, 3, REC_HEIGHT as usize, target_w as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) / 255.0 - 0.5) / 0.5;
            }
        }

        let input_ref: TensorRef<f32> = TensorRef::from_array_view(&tensor)
            .map_err(|e| OcrError::Recognition(format!("recognition input failed: {e}")))?;
        let pred = {
            let outputs = self
                .rec_session
                .run(inputs![input_ref])
                .map_err(|e| OcrError::Recognition(format!("recognition inference failed: {e}")))?;
            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| OcrError::Recognition(format!("recognition output failed: {e}")))?;
            output
                .into_owned()
                .into_dimensionality::<ndarray::Ix3>()
                .map_err(|e| OcrError::Recognition(format!("unexpected recognition shape: {e}")))?
        };

        let (text, confidence) = ctc_decode(pred.index_axis(ndarray::Axis(0), 0), &self.characters);
        debug!("region decoded with confidence {confidence:.2}: {text:?}");
        Ok(text)
    }
}

impl OcrEngine for NeuralOcr {
    fn label(&self) -> &'static str {
        "neural"
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<String, OcrError> {
        let boxes = self.detect_boxes(image)?;
        if boxes.is_empty() {
            return Ok(String::new());
        }

        let mut lines = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let region = image.crop_imm(text_box.x, text_box.y, text_box.width, text_box.height);
            let line = self.recognize_region(&region)?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }

        Ok(lines.join("\n"))
    }
}

fn load_session(path: &Path) -> Result<Session, OcrError> {
    let build = || -> Result<Session, ort::Error> {
        Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_intra_threads(4)?
            .commit_from_file(path)
    };
    build().map_err(|e| OcrError::Init(format!("failed to load model {path:?}: {e}")))
}

/// Load the CTC character dictionary: blank token first, space token last.
fn load_character_dict(path: &Path) -> Result<Vec<String>, OcrError> {
    let file = std::fs::File::open(path)
        .map_err(|e| OcrError::Init(format!("failed to open dictionary {path:?}: {e}")))?;
    let reader = BufReader::new(file);

    let mut characters = vec!["blank".to_string()];
    for line in reader.lines() {
        let line = line.map_err(|e| OcrError::Init(format!("failed to read dictionary: {e}")))?;
        let ch = line.trim_end_matches(['\r', '\n']).to_string();
        if !ch.is_empty() {
            characters.push(ch);
        }
    }
    characters.push(" ".to_string());

    Ok(characters)
}

/// Resize to at most `DET_MAX_SIDE`, padded to multiples of 32, and
/// normalize with ImageNet statistics. Returns the NCHW tensor and the
/// resized dimensions.
fn preprocess_detection(image: &DynamicImage) -> (Array4<f32>, u32, u32) {
    let (width, height) = image.dimensions();
    let max_side = width.max(height) as f32;
    let ratio = if max_side > DET_MAX_SIDE {
        DET_MAX_SIDE / max_side
    } else {
        1.0
    };

    let resize_w = (((width as f32 * ratio) / 32.0).round().max(1.0) as u32) * 32;
    let resize_h = (((height as f32 * ratio) / 32.0).round().max(1.0) as u32) * 32;

    let resized = image
        .resize_exact(resize_w, resize_h, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, resize_h as usize, resize_w as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (f32::from(pixel[c]) / 255.0 - DET_MEAN[c]) / DET_STD[c];
        }
    }

    (tensor, resize_w, resize_h)
}

/// Mean probability inside a box on the prediction map.
fn box_mean_score(pred: &ArrayView2<f32>, x1: u32, y1: u32, x2: u32, y2: u32) -> f32 {
    let (height, width) = (pred.shape()[0], pred.shape()[1]);
    let x1 = (x1 as usize).min(width - 1);
    let x2 = (x2 as usize).min(width - 1);
    let y1 = (y1 as usize).min(height - 1);
    let y2 = (y2 as usize).min(height - 1);

    let mut sum = 0.0f32;
    let mut count = 0u32;
    for y in y1..=y2 {
        for x in x1..=x2 {
            sum += pred[[y, x]];
            count += 1;
        }
    }

    if count > 0 {
        sum / count as f32
    } else {
        0.0
    }
}

/// Sort boxes top-to-bottom, then left-to-right within a 10-pixel row band.
fn sort_reading_order(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    if boxes.len() <= 1 {
        return boxes;
    }

    boxes.sort_by(|a, b| a.y.cmp(&b.y).then(a.x.cmp(&b.x)));

    // Neighboring boxes within a row band swap into left-to-right order.
    let n = boxes.len();
    for i in 0..(n - 1) {
        for j in (0..=i).rev() {
            if j + 1 < n && boxes[j + 1].y.abs_diff(boxes[j].y) < 10 && boxes[j + 1].x < boxes[j].x
            {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    boxes
}

/// Greedy CTC decoding: argmax per step, collapse repeats, drop blanks.
/// Returns the decoded text and the mean probability of kept characters.
fn ctc_decode(preds: ArrayView2<f32>, characters: &[String]) -> (String, f32) {
    let steps = preds.shape()[0];

    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = usize::MAX;

    for t in 0..steps {
        let row = preds.row(t);
        let (index, prob) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or((0, 0.0), |(i, p)| (i, *p));

        let repeated = index == previous;
        previous = index;

        // Index 0 is the CTC blank token.
        if index == 0 || repeated {
            continue;
        }
        if let Some(ch) = characters.get(index) {
            text.push_str(ch);
            confidences.push(prob);
        }
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    (text, confidence)
}
