//! Optical text recognition client.
//!
//! The OCR service accepts image bytes and returns recognized text with
//! per-region confidence and bounding boxes. OCR failure degrades to empty
//! text; signboard text is helpful for location inference but never
//! required.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One recognized text region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRegion {
    #[serde(default)]
    pub text: String,

    /// Recognition confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,

    /// Bounding box as [x, y, width, height] in pixels.
    #[serde(default)]
    pub bbox: [u32; 4],
}

/// Full OCR output for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrExtraction {
    /// All recognized text joined in reading order.
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub regions: Vec<OcrRegion>,
}

/// Text recognition over image bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, image_bytes: &[u8]) -> anyhow::Result<OcrExtraction>;
}

/// Client for an HTTP OCR service that accepts raw image bytes.
#[derive(Clone)]
pub struct HttpOcrEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrEngine {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn extract(&self, image_bytes: &[u8]) -> anyhow::Result<OcrExtraction> {
        let url = format!("{}/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(image_bytes.to_vec())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<OcrExtraction>().await?)
    }
}
