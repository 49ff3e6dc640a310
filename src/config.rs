//! Configuration for Groundtruth.
//!
//! Everything is read from environment variables once at startup. Missing
//! mandatory values are fatal at process start; optional services (vision,
//! OCR, NER) simply run in degraded mode when not configured.
//!
//! The ambiguity threshold, scene-match bonus, and duplicate Hamming
//! threshold are tunable here rather than hard-coded: they are operational
//! constants without a derivation, not calibrated values.

use std::env;
use std::time::Duration;

use crate::error::EngineError;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:groundtruth.db?mode=rwc";

/// Geocoding and location-resolution tunables.
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Base URL of the Nominatim-style geocoding service.
    pub base_url: String,

    /// Regional qualifier appended to queries to bias results (e.g. "India").
    pub region_bias: String,

    /// ISO country codes restricting geocode results (e.g. "in").
    pub country_codes: String,

    /// Minimum delay between geocode requests, process-wide. The upstream
    /// service's usage policy requires at least one second; violating it
    /// risks being blocked.
    pub rate_limit_delay: Duration,

    /// Per-request timeout for geocode calls.
    pub request_timeout: Duration,

    /// Maximum number of trailing-token reductions when a query returns
    /// nothing ("A B C" -> "A B" -> "A").
    pub max_query_reductions: u32,

    /// Confidence below this marks the resolved location as ambiguous.
    pub ambiguity_threshold: f64,

    /// Confidence bonus applied when the scene category matches the geocoded
    /// result.
    pub scene_match_bonus: f64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            region_bias: "India".to_string(),
            country_codes: "in".to_string(),
            rate_limit_delay: Duration::from_millis(1100),
            request_timeout: Duration::from_secs(10),
            max_query_reductions: 3,
            ambiguity_threshold: 0.6,
            scene_match_bonus: 0.15,
        }
    }
}

/// Image-deduplication tunables.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Time window within which a perceptually similar image counts as a duplicate.
    pub window: Duration,

    /// Maximum Hamming distance (bits) for each perceptual hash. Both hashes
    /// must be within this distance (AND semantics).
    pub hamming_threshold: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2 * 3600),
            hamming_threshold: 10,
        }
    }
}

/// Vision-language service settings. Absent entirely when not configured.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub geo: GeoConfig,
    pub dedup: DedupConfig,

    /// `None` -> vision analysis degrades to the text pipeline only.
    pub vision: Option<VisionConfig>,

    /// `None` -> OCR text comes only from the submission / vision visible text.
    pub ocr_base_url: Option<String>,

    /// `None` -> entity extraction falls back to regex patterns.
    pub ner_base_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// Returns `EngineError::Configuration` for malformed values; the caller
    /// treats that as fatal at startup.
    pub fn from_env() -> Result<Self, EngineError> {
        let port = match env::var("GROUNDTRUTH_PORT") {
            Ok(p) => p
                .parse()
                .map_err(|_| EngineError::Configuration(format!("invalid port: {p}")))?,
            Err(_) => DEFAULT_PORT,
        };

        let database_url =
            env::var("GROUNDTRUTH_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let mut geo = GeoConfig::default();
        if let Ok(url) = env::var("GROUNDTRUTH_GEOCODE_URL") {
            geo.base_url = url;
        }
        if let Ok(bias) = env::var("GROUNDTRUTH_REGION_BIAS") {
            geo.region_bias = bias;
        }
        if let Ok(codes) = env::var("GROUNDTRUTH_COUNTRY_CODES") {
            geo.country_codes = codes;
        }
        if let Ok(ms) = env::var("GROUNDTRUTH_GEOCODE_DELAY_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| EngineError::Configuration(format!("invalid geocode delay: {ms}")))?;
            geo.rate_limit_delay = Duration::from_millis(ms);
        }
        if let Ok(secs) = env::var("GROUNDTRUTH_GEOCODE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid geocode timeout: {secs}"))
            })?;
            geo.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(n) = env::var("GROUNDTRUTH_MAX_QUERY_REDUCTIONS") {
            geo.max_query_reductions = n.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid max query reductions: {n}"))
            })?;
        }
        if let Ok(t) = env::var("GROUNDTRUTH_AMBIGUITY_THRESHOLD") {
            geo.ambiguity_threshold = t.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid ambiguity threshold: {t}"))
            })?;
        }
        if let Ok(b) = env::var("GROUNDTRUTH_SCENE_MATCH_BONUS") {
            geo.scene_match_bonus = b.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid scene match bonus: {b}"))
            })?;
        }

        let mut dedup = DedupConfig::default();
        if let Ok(h) = env::var("GROUNDTRUTH_DEDUP_WINDOW_HOURS") {
            let hours: u64 = h
                .parse()
                .map_err(|_| EngineError::Configuration(format!("invalid dedup window: {h}")))?;
            dedup.window = Duration::from_secs(hours * 3600);
        }
        if let Ok(t) = env::var("GROUNDTRUTH_DEDUP_HAMMING_THRESHOLD") {
            dedup.hamming_threshold = t.parse().map_err(|_| {
                EngineError::Configuration(format!("invalid hamming threshold: {t}"))
            })?;
        }

        // Vision is optional; when the key is present the endpoint and model
        // fall back to OpenAI-compatible defaults.
        let vision = env::var("GROUNDTRUTH_VISION_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(|api_key| VisionConfig {
                base_url: env::var("GROUNDTRUTH_VISION_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key,
                model: env::var("GROUNDTRUTH_VISION_MODEL")
                    .unwrap_or_else(|_| "gpt-4o".to_string()),
            });

        Ok(Self {
            port,
            database_url,
            geo,
            dedup,
            vision,
            ocr_base_url: env::var("GROUNDTRUTH_OCR_URL").ok().filter(|s| !s.is_empty()),
            ner_base_url: env::var("GROUNDTRUTH_NER_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}
