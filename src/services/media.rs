//! Image-byte retrieval from the media store.

use std::time::Duration;

use async_trait::async_trait;

/// Fetches image bytes for a report's image reference.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn fetch(&self, image_ref: &str) -> anyhow::Result<Vec<u8>>;
}

/// HTTP media store: image references are retrievable URLs.
#[derive(Clone)]
pub struct HttpMediaStore {
    client: reqwest::Client,
}

impl Default for HttpMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMediaStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn fetch(&self, image_ref: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(image_ref).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
