//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and validating the packaging detector and
//! the per-language PaddleOCR models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::lang::LanguageTag;

/// Model identifier for the vision and OCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Packaging region detector (YOLO-style, single class)
    PackagingDetector,
    /// PaddleOCR text detection model (DBNet), shared across languages
    TextDetection,
    /// PaddleOCR text recognition model (CRNN) for one language
    TextRecognition(LanguageTag),
    /// Character dictionary for one language's recognition model
    Dictionary(LanguageTag),
}

impl ModelKind {
    /// File name inside the models directory
    pub fn filename(&self) -> String {
        match self {
            ModelKind::PackagingDetector => "packaging.onnx".to_string(),
            ModelKind::TextDetection => "det.onnx".to_string(),
            ModelKind::TextRecognition(tag) => format!("rec-{}.onnx", Self::asset_code(*tag)),
            ModelKind::Dictionary(tag) => format!("dict-{}.txt", Self::asset_code(*tag)),
        }
    }

    /// The Auto probe shares the traditional-Chinese assets on disk.
    fn asset_code(tag: LanguageTag) -> &'static str {
        match tag {
            LanguageTag::Auto => LanguageTag::TraditionalChinese.code(),
            other => other.code(),
        }
    }

    /// PaddleOCR model-zoo directory for a language's recognition assets.
    /// The Auto probe uses the traditional-Chinese model, whose dictionary
    /// also covers Latin characters.
    fn language_dir(tag: LanguageTag) -> &'static str {
        match tag {
            LanguageTag::TraditionalChinese | LanguageTag::Auto => "chinese_cht",
            LanguageTag::SimplifiedChinese => "chinese",
            LanguageTag::English => "english",
            LanguageTag::Japanese => "japan",
            LanguageTag::Korean => "korean",
        }
    }

    /// Download URL, when the model is fetchable from the public zoo.
    ///
    /// The packaging detector is a custom-trained model with no public
    /// source; it must be placed in the models directory by hand.
    pub fn download_url(&self) -> Option<String> {
        const BASE: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";
        match self {
            ModelKind::PackagingDetector => None,
            ModelKind::TextDetection => Some(format!("{BASE}/detection/v3/det.onnx")),
            ModelKind::TextRecognition(tag) => {
                Some(format!("{BASE}/languages/{}/rec.onnx", Self::language_dir(*tag)))
            }
            ModelKind::Dictionary(tag) => {
                Some(format!("{BASE}/languages/{}/dict.txt", Self::language_dir(*tag)))
            }
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::PackagingDetector => (100_000, 500_000_000),
            ModelKind::TextDetection => (2_000_000, 5_000_000),
            ModelKind::TextRecognition(_) => (4_000_000, 30_000_000),
            ModelKind::Dictionary(_) => (500, 2_000_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> String {
        match self {
            ModelKind::PackagingDetector => "Packaging Detector".to_string(),
            ModelKind::TextDetection => "Text Detection".to_string(),
            ModelKind::TextRecognition(tag) => format!("Text Recognition ({tag})"),
            ModelKind::Dictionary(tag) => format!("Character Dictionary ({tag})"),
        }
    }
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager using the platform data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        let models_dir = data_dir.join("models");
        std::fs::create_dir_all(&models_dir)?;

        Ok(Self { models_dir })
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        let path = self.model_path(kind);
        if !path.exists() {
            return false;
        }

        if let Ok(metadata) = std::fs::metadata(&path) {
            let (min, max) = kind.expected_size_range();
            let size = metadata.len();
            size >= min && size <= max
        } else {
            false
        }
    }

    /// Whether the neural OCR path can run for a language
    pub fn ocr_models_ready(&self, tag: LanguageTag) -> bool {
        self.is_model_available(ModelKind::TextDetection)
            && self.is_model_available(ModelKind::TextRecognition(tag))
            && self.is_model_available(ModelKind::Dictionary(tag))
    }

    /// Download a model if not already available, returning its path
    pub fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            debug!("model {} already available at {:?}", kind.display_name(), path);
            return Ok(path);
        }

        info!("downloading model {}...", kind.display_name());
        self.download_model(kind)?;

        Ok(path)
    }

    /// Prefetch every downloadable model for the given languages
    pub fn ensure_ocr_models(&self, tags: &[LanguageTag]) -> Result<()> {
        self.ensure_model(ModelKind::TextDetection)?;
        for &tag in tags {
            self.ensure_model(ModelKind::TextRecognition(tag))?;
            self.ensure_model(ModelKind::Dictionary(tag))?;
        }
        if !self.is_model_available(ModelKind::PackagingDetector) {
            info!(
                "packaging detector not present; place packaging.onnx in {:?} to enable it",
                self.models_dir
            );
        }
        Ok(())
    }

    /// Download a specific model (blocking)
    fn download_model(&self, kind: ModelKind) -> Result<()> {
        let url = kind.download_url().with_context(|| {
            format!(
                "{} has no download source; place {} in {:?} manually",
                kind.display_name(),
                kind.filename(),
                self.models_dir
            )
        })?;
        let path = self.model_path(kind);

        info!("downloading {} from {}", kind.display_name(), url);

        if std::env::var("MEDISCAN_OFFLINE").is_ok() {
            anyhow::bail!(
                "offline mode: cannot download models. Download manually from {} and place at {:?}",
                url,
                path
            );
        }

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(async { self.download_file_async(&url, &path).await })?;

        if !self.is_model_available(kind) {
            anyhow::bail!("download completed but model verification failed");
        }

        info!("successfully downloaded {}", kind.display_name());
        Ok(())
    }

    /// Async download implementation
    async fn download_file_async(&self, url: &str, path: &Path) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("download size: {:?} bytes", total_size);

        // Stream to a temp file, then rename into place.
        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;

            file.write_all(&chunk).context("Failed to write to temp file")?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let digest = format!("{:x}", hasher.finalize());
        debug!("downloaded {downloaded} bytes, sha256 {digest}");

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }
}
