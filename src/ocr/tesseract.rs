//! Tesseract OCR backend
//!
//! The always-available classical baseline. One engine instance is created
//! per language configuration and reused across calls.

use image::DynamicImage;
use leptess::{LepTess, Variable};
use std::io::Cursor;
use tracing::debug;

use super::{OcrEngine, OcrError};
use crate::lang::LanguageTag;

/// Tesseract engine bound to one language dictionary.
pub struct TesseractOcr {
    engine: LepTess,
}

impl TesseractOcr {
    /// Initialize Tesseract for a language tag.
    ///
    /// `Auto` selects the combined English + traditional-Chinese dictionary
    /// used by the language-probing pass.
    pub fn create(tag: LanguageTag, psm: u32) -> Result<Box<dyn OcrEngine>, OcrError> {
        let lang = tag.tesseract_lang();

        let mut engine = LepTess::new(None, lang).map_err(|e| {
            OcrError::Init(format!(
                "Tesseract init failed for '{lang}': {e}. \
                 Make sure the language data is installed"
            ))
        })?;

        engine
            .set_variable(Variable::TesseditPagesegMode, &psm.to_string())
            .map_err(|e| OcrError::Init(format!("failed to set page segmentation mode: {e}")))?;

        debug!("Tesseract initialized with language '{lang}', psm {psm}");
        Ok(Box::new(Self { engine }))
    }
}

impl OcrEngine for TesseractOcr {
    fn label(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<String, OcrError> {
        // leptess expects encoded image data; hand it a PNG from memory.
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(format!("failed to encode image: {e}")))?;

        self.engine
            .set_image_from_mem(png.get_ref())
            .map_err(|e| OcrError::Recognition(format!("failed to load image: {e}")))?;

        let text = self
            .engine
            .get_utf8_text()
            .map_err(|e| OcrError::Recognition(format!("failed to extract text: {e}")))?;

        Ok(text)
    }
}
