//! Scan Pipeline
//!
//! Orchestrates the stages for one image: normalize, locate the packaging,
//! probe a text sample, identify the language, recognize with the identified
//! language, and mine the structured fields. Every interior stage degrades
//! to an empty or default outcome; only undecodable input fails an image,
//! and a failed image never aborts the rest of a batch.

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::extract::{self, MedicineInfo};
use crate::imaging;
use crate::lang::{locale_to_tag, LanguageIdentifier, LanguageTag};
use crate::ocr::Recognizer;
use crate::storage::database::Database;
use crate::vision::{Detection, ModelKind, ModelManager, RegionDetector};

/// Result of processing one image.
#[derive(Debug, Serialize)]
pub struct ScanOutcome {
    /// File stem of the source image
    pub image_id: String,
    /// Language used for the final recognition pass
    pub language: LanguageTag,
    /// Extracted fields with confidence
    pub info: MedicineInfo,
    /// Full recognized text (empty when every backend came up empty)
    pub raw_text: String,
    /// Located packaging box, when the annotated variant ran
    pub detection: Option<Detection>,
    /// Source image with the detection box drawn, when annotation is enabled
    #[serde(skip_serializing)]
    pub overlay: Option<RgbImage>,
    /// Wall-clock processing time
    pub elapsed_ms: u64,
}

/// The medicine-scan pipeline. One instance can process any number of
/// images; engines are cached per language configuration inside.
pub struct Pipeline {
    config: AppConfig,
    detector: RegionDetector,
    recognizer: Recognizer,
    identifier: LanguageIdentifier,
    database: Option<Database>,
}

impl Pipeline {
    /// Build a pipeline from configuration.
    pub fn new(config: AppConfig) -> Result<Self> {
        let models = match &config.ocr.models_dir {
            Some(dir) => ModelManager::with_dir(dir.clone())?,
            None => ModelManager::new()?,
        };

        let packaging_model = models.model_path(ModelKind::PackagingDetector);
        let detector = RegionDetector::new(config.detection.clone(), Some(&packaging_model));

        let identifier = LanguageIdentifier::new(
            config.language.default_tag,
            config.language.min_sample_chars,
        );

        let database = if config.storage.enabled {
            let path = crate::storage::get_data_dir()?.join(&config.storage.database_file);
            match Database::open(&path) {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!("result database unavailable, continuing without it: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let recognizer = Recognizer::new(config.ocr.clone(), models);

        Ok(Self {
            config,
            detector,
            recognizer,
            identifier,
            database,
        })
    }

    /// Process a single image file end to end.
    ///
    /// Only input I/O and decode failures are errors; recognition and
    /// extraction always produce a (possibly empty) outcome.
    pub fn process_one(&mut self, path: &Path) -> Result<ScanOutcome> {
        let started = Instant::now();
        let image_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        debug!("processing image {image_id}");
        let image = imaging::load_image(path)?;

        // Stage 2: locate the packaging.
        let (region, detection, overlay) = if self.config.detection.annotate {
            let outcome = self.detector.detect_annotated(&image);
            (outcome.image, outcome.detection, Some(outcome.overlay))
        } else {
            (self.detector.detect(&image), None, None)
        };

        let region = self.prepare_for_ocr(region);

        // Stages 3-4: probe a sample and identify the language.
        let (sample_text, locale) = self
            .recognizer
            .recognize_with_locale(&region, LanguageTag::Auto);

        let language = self.resolve_language(&sample_text, locale.as_deref());
        debug!("identified language {language} for {image_id}");

        // Stage 5: final recognition in the identified language.
        let raw_text = self.recognizer.recognize(&region, language);

        // Stage 6: structured extraction.
        let info = extract::extract(&raw_text, language);

        let outcome = ScanOutcome {
            image_id,
            language,
            info,
            raw_text,
            detection,
            overlay,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        self.record(path, &outcome);

        info!(
            "processed {} in {}ms: language {}, confidence {:.2}",
            outcome.image_id, outcome.elapsed_ms, outcome.language, outcome.info.confidence
        );
        Ok(outcome)
    }

    /// Process every image in a batch directory, in file-name order.
    ///
    /// Unreadable entries are skipped with a warning; one bad image never
    /// affects the others.
    pub fn process_batch(&mut self, dir: &Path) -> Result<Vec<ScanOutcome>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read batch directory {dir:?}"))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(imaging::is_valid_image_extension)
            })
            .collect();
        paths.sort();

        info!("processing batch of {} images from {dir:?}", paths.len());

        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            match self.process_one(&path) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("skipping {path:?}: {e:#}"),
            }
        }

        Ok(outcomes)
    }

    /// Optionally binarize the region before recognition.
    fn prepare_for_ocr(&self, region: DynamicImage) -> DynamicImage {
        if self.config.ocr.enhance {
            DynamicImage::ImageLuma8(imaging::enhance_for_ocr(&region))
        } else {
            region
        }
    }

    /// Pick the language for the final pass: the cloud-reported locale when
    /// configured and usable, otherwise local identification of the sample.
    fn resolve_language(&self, sample_text: &str, locale: Option<&str>) -> LanguageTag {
        if self.config.ocr.prefer_cloud_locale {
            if let Some(tag) = locale.and_then(locale_to_tag) {
                debug!("using cloud-reported locale, resolved to {tag}");
                return tag;
            }
        }
        self.identifier.identify(sample_text)
    }

    /// Fire-and-forget persistence: failures are logged and swallowed.
    fn record(&self, path: &Path, outcome: &ScanOutcome) {
        let Some(db) = &self.database else {
            return;
        };

        let batch_id = path
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(e) = db.record_scan(
            &batch_id,
            &outcome.image_id,
            outcome.language,
            &outcome.info,
            &outcome.raw_text,
        ) {
            warn!("failed to persist scan {}: {e:#}", outcome.image_id);
        }
    }
}
