use super::non_empty;
use crate::error::CapabilityError;
use crate::models::{ImageData, ImageFormat};
use crate::ocr::OcrEngine;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest<'a> {
    image_base64: String,
    format: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Multimodal OCR service that accepts one base64 image per request.
pub struct HttpOcrEngine {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
}

impl HttpOcrEngine {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, CapabilityError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|error| {
            CapabilityError::Unavailable(format!("invalid ocr endpoint {endpoint}: {error}"))
        })?;
        Ok(Self {
            endpoint,
            api_key: non_empty(api_key),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn name(&self) -> &str {
        "llm-ocr"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Jpeg | ImageFormat::Jpeg2000 | ImageFormat::Png
        )
    }

    async fn recognize(&self, image: &ImageData) -> Result<String, CapabilityError> {
        let payload = LlmOcrRequest {
            image_base64: STANDARD.encode(&image.bytes),
            format: format_name(image.format),
            width: image.width,
            height: image.height,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CapabilityError::BadResponse {
                backend: "llm-ocr".to_string(),
                details: format!("{} returned {}", self.endpoint, response.status()),
            });
        }

        let payload: LlmOcrResponse = response.json().await?;
        Ok(payload_text(&payload))
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Jpeg2000 => "jp2",
        ImageFormat::Png => "png",
        ImageFormat::Raw => "raw",
        ImageFormat::Unknown => "unknown",
    }
}

/// Listed page texts win over the flat `text` field; blank entries are dropped.
fn payload_text(payload: &LlmOcrResponse) -> String {
    let listed = payload
        .pages
        .iter()
        .flatten()
        .filter_map(|page| page.text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();

    if !listed.is_empty() {
        return listed.join("\n");
    }

    payload
        .text
        .as_deref()
        .map(|text| text.replace('\u{000c}', "\n").trim().to_string())
        .unwrap_or_default()
}
