//! OCR Layer
//!
//! Converts an image region to text in a requested language, trying backends
//! in priority order until one yields non-empty output:
//! - PaddleOCR via ONNX Runtime (when its models are present)
//! - Tesseract (always-available baseline)
//! - a remote recognition service (when configured)
//!
//! Backend attempts are isolated: an error or empty result from one backend
//! means "try the next", never a failure of the recognition call. When every
//! backend comes up empty the result is the empty string, which downstream
//! stages treat as a valid "no text found" outcome.

pub mod cloud;
pub mod neural;
pub mod tesseract;

use image::DynamicImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{OcrBackendKind, OcrSettings};
use crate::lang::LanguageTag;
use crate::vision::ModelManager;

/// OCR backend errors. These never escape the recognizer; they only steer
/// the fallback chain.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Engine could not be initialized (missing models, missing language data)
    #[error("failed to initialize OCR engine: {0}")]
    Init(String),

    /// Engine was initialized but recognition failed
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// A single OCR backend bound to one language configuration.
pub trait OcrEngine: Send {
    /// Short backend name for logging
    fn label(&self) -> &'static str;

    /// Recognize text in the image. Empty output is a valid result.
    fn recognize(&mut self, image: &DynamicImage) -> Result<String, OcrError>;

    /// Recognize text, optionally reporting the locale the backend detected.
    /// Only the cloud backend knows locales; everyone else returns `None`.
    fn recognize_with_locale(
        &mut self,
        image: &DynamicImage,
    ) -> Result<(String, Option<String>), OcrError> {
        self.recognize(image).map(|text| (text, None))
    }
}

type SharedEngine = Arc<Mutex<Box<dyn OcrEngine>>>;

/// Engine cache keyed by (backend, language) configuration.
///
/// Each cached engine sits behind its own mutex because the underlying
/// libraries are not assumed re-entrant. A failed initialization is not
/// cached: the next lookup runs the initializer again.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<(OcrBackendKind, LanguageTag), SharedEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached engine for `key`, initializing it on first use.
    pub fn get_or_init<F>(
        &self,
        key: (OcrBackendKind, LanguageTag),
        init: F,
    ) -> Result<SharedEngine, OcrError>
    where
        F: FnOnce() -> Result<Box<dyn OcrEngine>, OcrError>,
    {
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&key) {
            return Ok(Arc::clone(engine));
        }

        let engine: SharedEngine = Arc::new(Mutex::new(init()?));
        engines.insert(key, Arc::clone(&engine));
        Ok(engine)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.engines.lock().len()
    }
}

/// Multi-backend recognizer shared by the sample and final passes.
pub struct Recognizer {
    settings: OcrSettings,
    models: ModelManager,
    registry: EngineRegistry,
}

impl Recognizer {
    pub fn new(settings: OcrSettings, models: ModelManager) -> Self {
        Self {
            settings,
            models,
            registry: EngineRegistry::new(),
        }
    }

    /// Recognize text in the image using the given language mode.
    pub fn recognize(&self, image: &DynamicImage, tag: LanguageTag) -> String {
        self.recognize_with_locale(image, tag).0
    }

    /// Recognize text, also returning a backend-reported locale when the
    /// producing backend knows one.
    pub fn recognize_with_locale(
        &self,
        image: &DynamicImage,
        tag: LanguageTag,
    ) -> (String, Option<String>) {
        for &kind in &self.settings.backends {
            match self.try_backend(kind, image, tag) {
                Ok(Some(result)) => return result,
                Ok(None) => continue,
                Err(e) => {
                    warn!("OCR backend {kind:?} failed for {tag}: {e}");
                    continue;
                }
            }
        }

        debug!("no OCR backend produced text for {tag}");
        (String::new(), None)
    }

    /// Run one backend. `Ok(None)` means the backend was skipped or produced
    /// no text; errors are reported to the caller for logging only.
    fn try_backend(
        &self,
        kind: OcrBackendKind,
        image: &DynamicImage,
        tag: LanguageTag,
    ) -> Result<Option<(String, Option<String>)>, OcrError> {
        let engine = match kind {
            OcrBackendKind::Neural => {
                if !self.models.ocr_models_ready(tag) {
                    debug!("neural OCR models not present for {tag}, skipping");
                    return Ok(None);
                }
                self.registry
                    .get_or_init((kind, tag), || neural::NeuralOcr::create(&self.models, tag))?
            }
            OcrBackendKind::Tesseract => self.registry.get_or_init((kind, tag), || {
                tesseract::TesseractOcr::create(tag, self.settings.tesseract_psm)
            })?,
            OcrBackendKind::Cloud => {
                let Some(endpoint) = self.settings.cloud_endpoint.clone() else {
                    debug!("cloud OCR endpoint not configured, skipping");
                    return Ok(None);
                };
                self.registry.get_or_init((kind, tag), || {
                    cloud::CloudOcr::create(endpoint, self.settings.cloud_api_key.clone(), tag)
                })?
            }
        };

        let mut engine = engine.lock();
        let (text, locale) = engine.recognize_with_locale(image)?;

        if text.trim().is_empty() {
            debug!("{} produced no text for {tag}", engine.label());
            return Ok(None);
        }

        info!(
            "{} recognized {} characters for {tag}",
            engine.label(),
            text.chars().count()
        );
        Ok(Some((text, locale)))
    }
}
