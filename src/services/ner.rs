//! Named-entity extraction client.
//!
//! The NER service accepts text and returns typed entity spans. Only
//! location-flavored labels (places, facilities, bodies of water) and
//! numeric spans are of interest downstream; everything else maps to
//! `Other`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Entity label after mapping the service's tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLabel {
    /// Administrative place (city, state, country).
    Place,
    /// Building, airport, highway, bridge.
    Facility,
    /// River, lake, other body of water.
    Water,
    /// Cardinal number or quantity.
    Number,
    Other,
}

impl EntityLabel {
    /// Map the service's raw tag to our label set.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "GPE" | "LOC" => EntityLabel::Place,
            "FAC" => EntityLabel::Facility,
            "WATER" => EntityLabel::Water,
            "CARDINAL" | "QUANTITY" => EntityLabel::Number,
            _ => EntityLabel::Other,
        }
    }

    /// Whether this label names somewhere geocodable.
    pub fn is_location(&self) -> bool {
        matches!(
            self,
            EntityLabel::Place | EntityLabel::Facility | EntityLabel::Water
        )
    }
}

/// One labeled span of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub label: EntityLabel,
}

/// Typed-span extraction over free text.
#[async_trait]
pub trait NerService: Send + Sync {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<EntitySpan>>;
}

/// Client for an HTTP NER service.
#[derive(Clone)]
pub struct HttpNerService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNerService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NerRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct NerResponse {
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    text: String,
    #[serde(default)]
    label: String,
}

#[async_trait]
impl NerService for HttpNerService {
    async fn extract(&self, text: &str) -> anyhow::Result<Vec<EntitySpan>> {
        let url = format!("{}/ner", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&NerRequest { text })
            .send()
            .await?
            .error_for_status()?;

        let data = response.json::<NerResponse>().await?;
        Ok(data
            .entities
            .into_iter()
            .map(|e| EntitySpan {
                label: EntityLabel::from_tag(&e.label),
                text: e.text,
            })
            .collect())
    }
}
