//! Vision-language analysis client.
//!
//! Sends the report image to an OpenAI-compatible chat-completions endpoint
//! with a strict-JSON prompt and parses the structured disaster attributes
//! out of the reply. Models wrap JSON in markdown fences often enough that
//! the parser strips them before looking for the object.
//!
//! Any failure - network, model, malformed reply - degrades to
//! [`VisionAnalysis::unavailable`]; image analysis never blocks the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::VisionConfig;
use crate::model::{DisasterType, Severity, VisionAnalysis};

/// The analysis prompt. The false-positive rules matter: wet roads, water
/// parks, and movie stills otherwise dominate flood reports.
const ANALYSIS_PROMPT: &str = r#"Analyze this image for DISASTER response.

You MUST respond with ONLY valid JSON (no markdown, no explanation, no code blocks):
{
    "is_disaster": true or false,
    "disaster_type": "flood" or "fire" or "earthquake" or "collapse" or "explosion" or "none",
    "severity": "low" or "medium" or "high" or "critical",
    "description": "Brief description of what you see",
    "detected_elements": ["element1", "element2"],
    "location_hints": ["visually identified location name", "landmarks", "text on signs"],
    "visible_text": "all readable text on signs, billboards, or buildings",
    "people_affected": "none" or "few" or "many" or "crowd",
    "urgency_score": 1-10
}

IMPORTANT RULES:
1. STRICT CRITERIA: set is_disaster=true ONLY for actual uncontrolled events causing
   disruption or danger: submerged infrastructure, water entering buildings, people
   wading through deep flood water, active fires or smoke plumes, collapsed structures,
   rescue operations in progress.
2. FALSE POSITIVES (set is_disaster=false): water parks, pools, beaches, boating;
   wet roads or puddles on a rainy day; controlled canals, dams, fountains;
   movies, cartoons, memes, or screenshots unless they clearly depict a real event.
3. DECISION THRESHOLD: if the scene looks like normal life or just wet, it is NOT a
   disaster. Only flag what looks abnormal, dangerous, or disruptive.
4. LOCATION: include any specific place name, distinct landmark, or city skyline in
   "location_hints". Transcribe ALL readable text into "visible_text" - it is critical
   for identifying the location.
5. Respond with the JSON object only, nothing else."#;

/// Image analysis as an abstract capability.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image_ref: &str) -> anyhow::Result<VisionAnalysis>;
}

/// Client for an OpenAI-compatible vision endpoint.
#[derive(Clone)]
pub struct HttpVisionAnalyzer {
    client: reqwest::Client,
    config: VisionConfig,
}

impl HttpVisionAnalyzer {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// The model's reply before normalization. Everything is defaulted so a
/// partially filled object still parses.
#[derive(Debug, Deserialize)]
struct RawVisionReply {
    #[serde(default)]
    is_disaster: bool,
    #[serde(default)]
    disaster_type: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    detected_elements: Vec<String>,
    #[serde(default)]
    location_hints: Vec<String>,
    #[serde(default)]
    visible_text: String,
    #[serde(default)]
    people_affected: String,
    /// Reported on a 1-10 scale.
    #[serde(default)]
    urgency_score: f64,
}

#[async_trait]
impl VisionAnalyzer for HttpVisionAnalyzer {
    async fn analyze(&self, image_ref: &str) -> anyhow::Result<VisionAnalysis> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = json!({
            "model": self.config.model,
            "max_tokens": 500,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": ANALYSIS_PROMPT },
                    { "type": "image_url", "image_url": { "url": image_ref } }
                ]
            }]
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let data = response.json::<ChatResponse>().await?;
        let content = data
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");

        Ok(parse_vision_reply(content).unwrap_or_else(|| {
            warn!("Vision reply contained no parseable JSON");
            VisionAnalysis::unavailable()
        }))
    }
}

/// Extract and normalize the JSON object from a model reply.
///
/// Strips markdown fences, locates the outermost `{...}`, and maps the raw
/// fields onto our enums. Returns `None` when no JSON object can be found.
pub fn parse_vision_reply(content: &str) -> Option<VisionAnalysis> {
    let mut text = content.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let raw: RawVisionReply = serde_json::from_str(&text[start..=end]).ok()?;

    let severity = if raw.severity.is_empty() {
        None
    } else {
        Some(Severity::parse(&raw.severity))
    };

    Some(VisionAnalysis {
        is_disaster: raw.is_disaster,
        disaster_type: DisasterType::parse(&raw.disaster_type),
        severity,
        description: raw.description,
        detected_elements: raw.detected_elements,
        location_hints: raw.location_hints,
        visible_text: raw.visible_text,
        people_affected: if raw.people_affected.is_empty() {
            "unknown".to_string()
        } else {
            raw.people_affected
        },
        urgency_score: (raw.urgency_score / 10.0).clamp(0.0, 1.0),
    })
}
