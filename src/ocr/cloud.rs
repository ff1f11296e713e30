//! Cloud OCR backend
//!
//! Posts the image to a remote recognition service and reads back the text
//! plus the locale the service detected. Disabled unless an endpoint is
//! configured; treated strictly as an optional optimization over the local
//! backends.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{OcrEngine, OcrError};
use crate::lang::LanguageTag;

/// Request body sent to the recognition endpoint.
#[derive(Debug, Serialize)]
struct RecognizeRequest {
    /// Base64-encoded PNG
    image: String,
    /// Language hints for the service, short codes
    language_hints: Vec<String>,
}

/// Response body from the recognition endpoint.
#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    /// Recognized text, possibly empty
    #[serde(default)]
    text: String,
    /// Locale the service detected (e.g. "zh-TW"), when it reports one
    #[serde(default)]
    locale: Option<String>,
}

/// Remote recognition client bound to one language hint set.
pub struct CloudOcr {
    endpoint: String,
    api_key: Option<String>,
    hints: Vec<String>,
    client: reqwest::Client,
    runtime: Runtime,
}

impl CloudOcr {
    pub fn create(
        endpoint: String,
        api_key: Option<String>,
        tag: LanguageTag,
    ) -> Result<Box<dyn OcrEngine>, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| OcrError::Init(format!("failed to create HTTP client: {e}")))?;

        let runtime = Runtime::new()
            .map_err(|e| OcrError::Init(format!("failed to create tokio runtime: {e}")))?;

        // The probe pass hints both of its default languages.
        let hints = if tag.is_auto() {
            vec![
                LanguageTag::English.code().to_string(),
                LanguageTag::TraditionalChinese.code().to_string(),
            ]
        } else {
            vec![tag.code().to_string()]
        };

        Ok(Box::new(Self {
            endpoint,
            api_key,
            hints,
            client,
            runtime,
        }))
    }

    async fn post_image(&self, body: &RecognizeRequest) -> Result<RecognizeResponse, OcrError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OcrError::Recognition(format!("cloud request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OcrError::Recognition(format!(
                "cloud endpoint returned status {}",
                response.status()
            )));
        }

        response
            .json::<RecognizeResponse>()
            .await
            .map_err(|e| OcrError::Recognition(format!("invalid cloud response: {e}")))
    }
}

impl OcrEngine for CloudOcr {
    fn label(&self) -> &'static str {
        "cloud"
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<String, OcrError> {
        self.recognize_with_locale(image).map(|(text, _)| text)
    }

    fn recognize_with_locale(
        &mut self,
        image: &DynamicImage,
    ) -> Result<(String, Option<String>), OcrError> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(format!("failed to encode image: {e}")))?;

        let body = RecognizeRequest {
            image: BASE64.encode(png.get_ref()),
            language_hints: self.hints.clone(),
        };

        let response = self.runtime.block_on(self.post_image(&body))?;
        debug!(
            "cloud OCR returned {} characters, locale {:?}",
            response.text.chars().count(),
            response.locale
        );

        Ok((response.text, response.locale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = RecognizeRequest {
            image: "aGVsbG8=".to_string(),
            language_hints: vec!["zh-tw".to_string()],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["image"], "aGVsbG8=");
        assert_eq!(json["language_hints"][0], "zh-tw");
    }

    #[test]
    fn test_response_defaults() {
        let response: RecognizeResponse = serde_json::from_str("{}").unwrap();
        assert!(response.text.is_empty());
        assert!(response.locale.is_none());

        let response: RecognizeResponse =
            serde_json::from_str(r#"{"text": "藥品", "locale": "zh-TW"}"#).unwrap();
        assert_eq!(response.text, "藥品");
        assert_eq!(response.locale.as_deref(), Some("zh-TW"));
    }
}
