//! Application Configuration
//!
//! Pipeline settings and preferences stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lang::LanguageTag;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Region detection settings
    pub detection: DetectionSettings,
    /// OCR backend settings
    pub ocr: OcrSettings,
    /// Language identification settings
    pub language: LanguageSettings,
    /// Result persistence settings
    pub storage: StorageSettings,
}

/// Region-detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Use the learned packaging detector when its model is present
    pub use_model: bool,
    /// Minimum confidence for a learned detection to be accepted
    pub confidence_threshold: f32,
    /// Minimum fraction of the image area a fallback box must cover
    pub min_area_ratio: f32,
    /// Square input size fed to the detection model
    pub input_size: u32,
    /// Render an overlay image with the detection box drawn
    pub annotate: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            use_model: true,
            confidence_threshold: 0.25,
            min_area_ratio: 0.10,
            input_size: 640,
            annotate: false,
        }
    }
}

/// OCR backend identifier, in the order they may be tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    /// PaddleOCR detection + recognition via ONNX Runtime
    Neural,
    /// Tesseract baseline, always available
    Tesseract,
    /// Remote recognition service, used only when an endpoint is configured
    Cloud,
}

/// OCR-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Backend priority order, highest first
    pub backends: Vec<OcrBackendKind>,
    /// Tesseract page segmentation mode (6 = single uniform block)
    pub tesseract_psm: u32,
    /// Binarize the detected region before OCR (helps washed-out photos)
    pub enhance: bool,
    /// Override directory for ONNX models (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
    /// Cloud recognition endpoint; backend stays disabled while unset
    pub cloud_endpoint: Option<String>,
    /// API key sent to the cloud endpoint
    pub cloud_api_key: Option<String>,
    /// Trust the cloud backend's reported locale over local identification
    pub prefer_cloud_locale: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backends: vec![
                OcrBackendKind::Neural,
                OcrBackendKind::Tesseract,
                OcrBackendKind::Cloud,
            ],
            tesseract_psm: 6,
            enhance: false,
            models_dir: None,
            cloud_endpoint: None,
            cloud_api_key: None,
            prefer_cloud_locale: false,
        }
    }
}

/// Language-identification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    /// Tag returned when identification has too little signal or fails
    pub default_tag: LanguageTag,
    /// Minimum trimmed characters required to attempt classification
    pub min_sample_chars: usize,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            default_tag: LanguageTag::TraditionalChinese,
            min_sample_chars: 5,
        }
    }
}

/// Result-persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Record outcomes to the local database
    pub enabled: bool,
    /// Database file name inside the data directory
    pub database_file: String,
    /// Days after which stale batch files are eligible for cleanup
    pub retention_days: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            database_file: "mediscan.db".to_string(),
            retention_days: 7,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.detection.use_model);
        assert!((config.detection.confidence_threshold - 0.25).abs() < 0.001);
        assert!((config.detection.min_area_ratio - 0.10).abs() < 0.001);
        assert_eq!(config.detection.input_size, 640);
        assert!(!config.detection.annotate);

        assert_eq!(
            config.ocr.backends,
            vec![
                OcrBackendKind::Neural,
                OcrBackendKind::Tesseract,
                OcrBackendKind::Cloud
            ]
        );
        assert_eq!(config.ocr.tesseract_psm, 6);
        assert!(config.ocr.cloud_endpoint.is_none());
        assert!(!config.ocr.prefer_cloud_locale);

        assert_eq!(config.language.default_tag, LanguageTag::TraditionalChinese);
        assert_eq!(config.language.min_sample_chars, 5);

        assert!(!config.storage.enabled);
        assert_eq!(config.storage.database_file, "mediscan.db");
        assert_eq!(config.storage.retention_days, 7);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.detection.input_size, config.detection.input_size);
        assert_eq!(parsed.ocr.backends, config.ocr.backends);
        assert_eq!(parsed.language.default_tag, config.language.default_tag);
        assert_eq!(parsed.storage.database_file, config.storage.database_file);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.ocr.backends = vec![OcrBackendKind::Tesseract];
        config.ocr.cloud_endpoint = Some("https://ocr.example.com/v1".to_string());
        config.language.default_tag = LanguageTag::English;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.ocr.backends, vec![OcrBackendKind::Tesseract]);
        assert_eq!(
            parsed.ocr.cloud_endpoint.as_deref(),
            Some("https://ocr.example.com/v1")
        );
        assert_eq!(parsed.language.default_tag, LanguageTag::English);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[detection]\nannotate = true\n").unwrap();
        assert!(parsed.detection.annotate);
        assert_eq!(parsed.detection.input_size, 640);
        assert_eq!(parsed.language.min_sample_chars, 5);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.storage.retention_days, config.storage.retention_days);
        assert_eq!(loaded.ocr.tesseract_psm, config.ocr.tesseract_psm);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
