//! Geocoding client with normalization, fallback, and result ranking.
//!
//! The backend speaks the Nominatim search API. On top of it the [`Geocoder`]
//! adds the behaviors the resolver relies on:
//!
//! - **Normalization**: colloquial spellings are rewritten to the official
//!   place name before querying ("mount road" is signposted "Anna Salai").
//! - **Region bias**: a regional qualifier is appended so short names land in
//!   the deployment region instead of a same-named place elsewhere.
//! - **Fallback reduction**: a query that returns nothing is retried with its
//!   last token dropped, a bounded number of times ("A B C" -> "A B" -> "A").
//! - **Ranking**: road-shaped queries prefer highway-class results over
//!   same-named localities.
//!
//! Every backend call passes through the injected [`RateLimiter`] first, and
//! every failure degrades to an empty result set with a warning.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GeoConfig;
use crate::model::{GeocodePlaceKind, GeocodeResult};

use super::extractor::ROAD_SUFFIXES;
use super::ratelimit::RateLimiter;

/// Results requested per query.
const RESULT_LIMIT: u32 = 5;

/// Colloquial spelling -> official place name. Checked as lowercase
/// substrings; first match wins.
const SPELLING_ALIASES: &[(&str, &str)] = &[
    ("theagaraya", "Sir Thyagaraya"),
    ("thyagaraya", "Sir Thyagaraya"),
    ("thiyagaraya", "Sir Thyagaraya"),
    ("mount road", "Anna Salai"),
];

/// Raw access to a geocoding service.
#[async_trait]
pub trait GeocodeBackend: Send + Sync {
    /// Forward-geocode a free-text query.
    async fn search(&self, query: &str, limit: u32) -> anyhow::Result<Vec<GeocodeResult>>;

    /// Reverse-geocode coordinates to a display name.
    async fn reverse(&self, latitude: f64, longitude: f64) -> anyhow::Result<Option<String>>;
}

/// One place from the Nominatim search response.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    #[serde(default)]
    lat: String,
    #[serde(default)]
    lon: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    class: String,
    #[serde(default, rename = "type")]
    place_type: String,
    #[serde(default)]
    importance: f64,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    #[serde(default)]
    display_name: String,
}

/// Nominatim HTTP backend.
pub struct NominatimBackend {
    client: reqwest::Client,
    base_url: String,
    country_codes: String,
}

impl NominatimBackend {
    pub fn new(config: &GeoConfig) -> Self {
        Self::with_base_url(config.base_url.clone(), config)
    }

    /// Create a backend pointing at a specific base URL (used in tests).
    pub fn with_base_url(base_url: String, config: &GeoConfig) -> Self {
        // The service's usage policy requires an identifying user agent
        let client = reqwest::Client::builder()
            .user_agent(concat!("groundtruth/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url,
            country_codes: config.country_codes.clone(),
        }
    }

    fn place_kind(class: &str, place_type: &str) -> GeocodePlaceKind {
        match class {
            "highway" => GeocodePlaceKind::Road,
            "natural" | "water" | "waterway" => GeocodePlaceKind::Water,
            "amenity" | "building" | "shop" | "tourism" | "leisure" => GeocodePlaceKind::Poi,
            "boundary" => GeocodePlaceKind::AdminArea,
            "place" => match place_type {
                "city" | "town" | "village" | "suburb" | "neighbourhood" | "locality"
                | "quarter" | "hamlet" => GeocodePlaceKind::Locality,
                "state" | "county" | "region" => GeocodePlaceKind::AdminArea,
                _ => GeocodePlaceKind::Other,
            },
            _ => GeocodePlaceKind::Other,
        }
    }
}

#[async_trait]
impl GeocodeBackend for NominatimBackend {
    async fn search(&self, query: &str, limit: u32) -> anyhow::Result<Vec<GeocodeResult>> {
        let url = format!(
            "{}/search?q={}&format=jsonv2&limit={}&countrycodes={}",
            self.base_url,
            urlencoding::encode(query),
            limit,
            urlencoding::encode(&self.country_codes),
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let places: Vec<NominatimPlace> = response.json().await?;
        let results = places
            .into_iter()
            .filter_map(|p| {
                let latitude = p.lat.parse().ok()?;
                let longitude = p.lon.parse().ok()?;
                Some(GeocodeResult {
                    latitude,
                    longitude,
                    display_name: p.display_name,
                    kind: Self::place_kind(&p.class, &p.place_type),
                    importance: p.importance,
                })
            })
            .collect();
        Ok(results)
    }

    async fn reverse(&self, latitude: f64, longitude: f64) -> anyhow::Result<Option<String>> {
        let url = format!(
            "{}/reverse?lat={latitude}&lon={longitude}&format=jsonv2",
            self.base_url,
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let place: NominatimReverse = response.json().await?;
        if place.display_name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(place.display_name))
        }
    }
}

/// Rewrite colloquial spellings to the official place name.
///
/// Matching is case-insensitive; casing of unmatched text is preserved
/// because replacement operates on the matched span only. All index math
/// happens in the original string - `to_lowercase` can change byte lengths
/// (e.g. for non-ASCII capitals), so offsets found in a lowercased copy must
/// never be used to slice the original.
pub fn normalize_query(query: &str) -> String {
    for (alias, official) in SPELLING_ALIASES {
        if let Some((start, end)) = find_ascii_ci(query, alias) {
            let mut normalized = String::with_capacity(query.len() + official.len());
            normalized.push_str(&query[..start]);
            normalized.push_str(official);
            normalized.push_str(&query[end..]);
            return normalized;
        }
    }
    query.to_string()
}

/// Case-insensitive search for an ASCII needle, returning byte bounds in the
/// haystack. A match consists solely of ASCII bytes, so both bounds are char
/// boundaries.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return None;
    }
    for (start, _) in haystack.char_indices() {
        let Some(window) = hay.get(start..start + needle.len()) else {
            break;
        };
        if window
            .iter()
            .zip(needle)
            .all(|(h, n)| h.to_ascii_lowercase() == *n)
        {
            return Some((start, start + needle.len()));
        }
    }
    None
}

/// Whether the query names a road-class feature ("MG Road", "Silk Board
/// Junction"). Road-shaped queries prefer highway-class results.
pub fn is_road_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    ROAD_SUFFIXES
        .iter()
        .any(|s| lower.ends_with(s) || lower.contains(&format!("{s} ")))
}

/// Reorder results for a road-shaped query: highway-class first, otherwise
/// keep the service's order. Stable within each group.
pub fn rank_results(query: &str, mut results: Vec<GeocodeResult>) -> Vec<GeocodeResult> {
    if is_road_query(query) {
        results.sort_by_key(|r| r.kind != GeocodePlaceKind::Road);
    }
    results
}

/// Geocoding front-end used by the resolver.
pub struct Geocoder {
    backend: Arc<dyn GeocodeBackend>,
    limiter: Arc<dyn RateLimiter>,
    config: GeoConfig,
}

impl Geocoder {
    pub fn new(
        backend: Arc<dyn GeocodeBackend>,
        limiter: Arc<dyn RateLimiter>,
        config: GeoConfig,
    ) -> Self {
        Self {
            backend,
            limiter,
            config,
        }
    }

    /// Geocode a free-text query with normalization, region bias, and
    /// trailing-token fallback.
    ///
    /// Never errors: backend failures are logged and yield an empty list, so
    /// one geocoding outage degrades location resolution instead of failing
    /// the whole analysis.
    pub async fn search(&self, raw_query: &str) -> Vec<GeocodeResult> {
        let normalized = normalize_query(raw_query);
        let mut query = normalized.trim().to_string();
        if query.is_empty() {
            return vec![];
        }

        for reduction in 0..=self.config.max_query_reductions {
            let biased = self.with_region_bias(&query);
            let results = self.search_once(&biased).await;
            if !results.is_empty() {
                if reduction > 0 {
                    debug!(original = %normalized, reduced = %query, "geocode succeeded after query reduction");
                }
                return rank_results(&query, results);
            }

            // Drop the trailing token and retry
            match query.rsplit_once(char::is_whitespace) {
                Some((head, _)) if !head.trim().is_empty() => query = head.trim().to_string(),
                _ => break,
            }
        }

        vec![]
    }

    /// Reverse-geocode coordinates to a display name. `None` on failure.
    pub async fn reverse(&self, latitude: f64, longitude: f64) -> Option<String> {
        self.limiter.acquire().await;
        match self.backend.reverse(latitude, longitude).await {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, latitude, longitude, "reverse geocode failed");
                None
            }
        }
    }

    fn with_region_bias(&self, query: &str) -> String {
        let bias = self.config.region_bias.trim();
        if bias.is_empty() || query.to_lowercase().contains(&bias.to_lowercase()) {
            query.to_string()
        } else {
            format!("{query}, {bias}")
        }
    }

    async fn search_once(&self, query: &str) -> Vec<GeocodeResult> {
        self.limiter.acquire().await;
        match self.backend.search(query, RESULT_LIMIT).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, query, "geocode request failed");
                vec![]
            }
        }
    }
}
