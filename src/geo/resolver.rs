//! Location resolution: one best location per report, with a confidence.
//!
//! Sources are combined in a strict precedence order:
//!
//! 1. **Device GPS** is authoritative. When coordinates are present they are
//!    used as-is with maximum confidence; geocoding only runs to attach a
//!    human-readable display name, and its failure changes nothing.
//! 2. **Text candidates** (OCR, caption NER/patterns, image hints) are
//!    geocoded most-specific-first. The first plausible result wins.
//! 3. **Nothing** resolves to the explicit unresolved value, never a guess.
//!
//! Confidence is a transparent ladder, not a learned score: a base value per
//! place kind, a penalty when the top two results are nearly tied, and a
//! bonus when the scene category agrees with the result. A confidence below
//! the configured threshold marks the location ambiguous so downstream
//! consumers can route it for manual review.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::GeoConfig;
use crate::model::{
    CandidateSource, GeocodePlaceKind, GeocodeResult, LocationCandidate, LocationMethod,
    ResolvedLocation, SceneCategory,
};

use super::extractor;
use super::geocoder::{is_road_query, Geocoder};
use super::scene::{self, SceneClassifier};

/// Candidates geocoded per report before giving up. Each candidate can cost
/// several rate-limited requests, so the list is kept short.
const MAX_CANDIDATES: usize = 4;

/// Combined length limit for paired "primary, secondary" queries; longer
/// queries confuse the geocoding service more than they help.
const MAX_PAIRED_QUERY_LEN: usize = 100;

/// Importance gap below which the top two results count as a near-tie.
const NEAR_TIE_GAP: f64 = 0.05;

/// Confidence penalty for a near-tie between the top two results.
const NEAR_TIE_PENALTY: f64 = 0.1;

/// Confidence penalty when only an implausible result was found (e.g. a
/// locality answering a road-shaped query).
const IMPLAUSIBLE_PENALTY: f64 = 0.15;

/// Everything the resolver needs about one report.
#[derive(Debug, Default)]
pub struct ResolveInput<'a> {
    pub caption: &'a str,
    pub ocr_text: Option<&'a str>,

    /// Device coordinates, if the submitting device shared them.
    pub gps: Option<(f64, f64)>,

    /// Location entities the NER service found in the caption.
    pub ner_locations: &'a [String],

    /// Place names the vision service read off the image.
    pub vision_hints: &'a [String],

    /// Raw image bytes for scene classification. `None` skips the scene step.
    pub image_bytes: Option<&'a [u8]>,
}

pub struct LocationResolver {
    geocoder: Geocoder,
    scene: Arc<dyn SceneClassifier>,
    config: GeoConfig,
}

impl LocationResolver {
    pub fn new(geocoder: Geocoder, scene: Arc<dyn SceneClassifier>, config: GeoConfig) -> Self {
        Self {
            geocoder,
            scene,
            config,
        }
    }

    /// Resolve one report to its best location.
    pub async fn resolve(&self, input: ResolveInput<'_>) -> ResolvedLocation {
        if let Some((latitude, longitude)) = input.gps {
            // Reverse geocoding is cosmetic here; failure keeps the coordinates
            let display_name = self.geocoder.reverse(latitude, longitude).await;
            return ResolvedLocation {
                latitude: Some(latitude),
                longitude: Some(longitude),
                display_name,
                confidence: 1.0,
                is_ambiguous: false,
                method: LocationMethod::DeviceGps,
            };
        }

        let scene_category = match input.image_bytes {
            Some(bytes) => self.scene.classify_scene(bytes).await.category,
            None => SceneCategory::Unknown,
        };

        let candidates = extractor::gather_candidates(
            input.caption,
            input.ocr_text,
            input.ner_locations,
            input.vision_hints,
            scene_category,
        );
        if candidates.is_empty() {
            debug!("no location candidates in report text");
            return ResolvedLocation::unresolved();
        }

        self.resolve_from_candidates(&candidates, scene_category)
            .await
    }

    async fn resolve_from_candidates(
        &self,
        candidates: &[LocationCandidate],
        scene_category: SceneCategory,
    ) -> ResolvedLocation {
        let mut fallback: Option<ResolvedLocation> = None;

        for (i, candidate) in candidates.iter().take(MAX_CANDIDATES).enumerate() {
            let query = self.build_query(candidate, candidates.get(i + 1));
            let results = self.geocoder.search(&query).await;
            let Some(top) = results.first() else {
                continue;
            };

            let plausible =
                !is_road_query(&candidate.name) || top.kind == GeocodePlaceKind::Road;
            let mut confidence = self.score(top, &results, scene_category);
            if !plausible {
                confidence = (confidence - IMPLAUSIBLE_PENALTY).max(0.0);
            }

            let resolved = ResolvedLocation {
                latitude: Some(top.latitude),
                longitude: Some(top.longitude),
                display_name: Some(top.display_name.clone()),
                confidence,
                is_ambiguous: confidence < self.config.ambiguity_threshold,
                method: method_for(candidate.source),
            };

            if plausible {
                info!(
                    candidate = %candidate.name,
                    display_name = %top.display_name,
                    confidence,
                    "location resolved"
                );
                return resolved;
            }
            // Keep the first implausible answer in case nothing better comes
            if fallback.is_none() {
                fallback = Some(resolved);
            }
        }

        fallback.unwrap_or_else(ResolvedLocation::unresolved)
    }

    /// Build the geocode query for a candidate.
    ///
    /// When the next candidate adds independent context (not a substring
    /// relation either way) the two are paired, which disambiguates short
    /// names ("Shanti Nagar" alone matches in every city).
    fn build_query(
        &self,
        primary: &LocationCandidate,
        secondary: Option<&LocationCandidate>,
    ) -> String {
        if let Some(secondary) = secondary {
            let a = primary.name.to_lowercase();
            let b = secondary.name.to_lowercase();
            let related = a.contains(&b) || b.contains(&a);
            let combined_len = primary.name.len() + secondary.name.len() + 2;
            if !related && combined_len < MAX_PAIRED_QUERY_LEN {
                return format!("{}, {}", primary.name, secondary.name);
            }
        }
        primary.name.clone()
    }

    /// Confidence for the top result: base per place kind, near-tie penalty,
    /// scene-agreement bonus, clamped to [0, 1].
    fn score(
        &self,
        top: &GeocodeResult,
        results: &[GeocodeResult],
        scene_category: SceneCategory,
    ) -> f64 {
        let mut confidence = kind_base(top.kind);

        if let Some(runner_up) = results.get(1) {
            if (top.importance - runner_up.importance).abs() < NEAR_TIE_GAP {
                confidence -= NEAR_TIE_PENALTY;
            }
        }

        if scene::scene_matches_result(scene_category, top.kind, &top.display_name) {
            confidence += self.config.scene_match_bonus;
        }

        confidence.clamp(0.0, 1.0)
    }
}

/// Base confidence per place kind: pointlike features beat areas.
fn kind_base(kind: GeocodePlaceKind) -> f64 {
    match kind {
        GeocodePlaceKind::Road => 0.75,
        GeocodePlaceKind::Poi => 0.7,
        GeocodePlaceKind::Water => 0.65,
        GeocodePlaceKind::Locality => 0.6,
        GeocodePlaceKind::AdminArea => 0.5,
        GeocodePlaceKind::Other => 0.45,
    }
}

fn method_for(source: CandidateSource) -> LocationMethod {
    match source {
        CandidateSource::Ocr => LocationMethod::OcrCaption,
        CandidateSource::CaptionNer => LocationMethod::Caption,
        CandidateSource::SceneHint => LocationMethod::ImageContext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::geocoder::GeocodeBackend;
    use crate::geo::ratelimit::NoDelayLimiter;
    use crate::geo::scene::SceneHint;
    use async_trait::async_trait;

    /// Backend that answers any query containing one of the scripted names.
    struct MapBackend {
        entries: Vec<(&'static str, Vec<GeocodeResult>)>,
        reverse_name: Option<String>,
    }

    #[async_trait]
    impl GeocodeBackend for MapBackend {
        async fn search(&self, query: &str, _limit: u32) -> anyhow::Result<Vec<GeocodeResult>> {
            let lower = query.to_lowercase();
            for (needle, results) in &self.entries {
                if lower.contains(&needle.to_lowercase()) {
                    return Ok(results.clone());
                }
            }
            Ok(vec![])
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> anyhow::Result<Option<String>> {
            Ok(self.reverse_name.clone())
        }
    }

    struct FixedScene(SceneCategory);

    #[async_trait]
    impl SceneClassifier for FixedScene {
        async fn classify_scene(&self, _image_bytes: &[u8]) -> SceneHint {
            SceneHint {
                category: self.0,
                confidence: 0.5,
            }
        }
    }

    fn result(
        name: &str,
        kind: GeocodePlaceKind,
        importance: f64,
    ) -> GeocodeResult {
        GeocodeResult {
            latitude: 12.92,
            longitude: 77.62,
            display_name: name.to_string(),
            kind,
            importance,
        }
    }

    fn resolver(backend: MapBackend, scene_category: SceneCategory) -> LocationResolver {
        let config = GeoConfig::default();
        let geocoder = Geocoder::new(
            Arc::new(backend),
            Arc::new(NoDelayLimiter),
            config.clone(),
        );
        LocationResolver::new(geocoder, Arc::new(FixedScene(scene_category)), config)
    }

    #[tokio::test]
    async fn test_gps_is_authoritative() {
        let backend = MapBackend {
            entries: vec![(
                "silk board",
                vec![result("Silk Board Junction", GeocodePlaceKind::Road, 0.5)],
            )],
            reverse_name: Some("HSR Layout, Bangalore".to_string()),
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "Flood near Silk Board Junction",
                gps: Some((12.915, 77.638)),
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::DeviceGps);
        assert_eq!(resolved.latitude, Some(12.915));
        assert_eq!(resolved.confidence, 1.0);
        assert!(!resolved.is_ambiguous);
        assert_eq!(
            resolved.display_name.as_deref(),
            Some("HSR Layout, Bangalore")
        );
    }

    #[tokio::test]
    async fn test_gps_survives_reverse_failure() {
        let backend = MapBackend {
            entries: vec![],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "",
                gps: Some((12.915, 77.638)),
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::DeviceGps);
        assert_eq!(resolved.confidence, 1.0);
        assert!(resolved.display_name.is_none());
    }

    #[tokio::test]
    async fn test_caption_candidate_resolves() {
        let backend = MapBackend {
            entries: vec![(
                "silk board junction",
                vec![result(
                    "Silk Board Junction, Hosur Road, Bangalore",
                    GeocodePlaceKind::Road,
                    0.5,
                )],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "Flood near Silk Board Junction, send help",
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::Caption);
        assert!((resolved.confidence - 0.75).abs() < 1e-9);
        assert!(!resolved.is_ambiguous);
    }

    #[tokio::test]
    async fn test_ocr_candidate_wins_method_label() {
        let backend = MapBackend {
            entries: vec![(
                "kr puram",
                vec![result("KR Puram Bridge, Bangalore", GeocodePlaceKind::Road, 0.5)],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "water rising fast",
                ocr_text: Some("KR Puram Bridge"),
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::OcrCaption);
    }

    #[tokio::test]
    async fn test_no_candidates_is_unresolved() {
        let backend = MapBackend {
            entries: vec![],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "water everywhere, so much water",
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::None);
        assert!(resolved.is_ambiguous);
        assert_eq!(resolved.confidence, 0.0);
        assert!(resolved.latitude.is_none());
    }

    #[tokio::test]
    async fn test_near_tie_marks_ambiguous() {
        let backend = MapBackend {
            entries: vec![(
                "shanti nagar",
                vec![
                    result("Shanti Nagar, Bangalore", GeocodePlaceKind::Locality, 0.50),
                    result("Shanti Nagar, Mysore", GeocodePlaceKind::Locality, 0.48),
                ],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "Fire reported in Shanti Nagar",
                ..Default::default()
            })
            .await;

        // Locality base 0.6 minus the near-tie penalty lands below threshold
        assert!((resolved.confidence - 0.5).abs() < 1e-9);
        assert!(resolved.is_ambiguous);
        assert!(resolved.latitude.is_some());
    }

    #[tokio::test]
    async fn test_scene_agreement_raises_confidence() {
        let backend = MapBackend {
            entries: vec![(
                "ulsoor lake",
                vec![result("Ulsoor Lake, Bangalore", GeocodePlaceKind::Water, 0.5)],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::WaterFlood);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "Overflow at Ulsoor Lake",
                image_bytes: Some(b"fake image bytes"),
                ..Default::default()
            })
            .await;

        // Water base 0.65 plus the scene-match bonus
        assert!((resolved.confidence - 0.8).abs() < 1e-9);
        assert!(!resolved.is_ambiguous);
    }

    #[tokio::test]
    async fn test_implausible_road_answer_kept_as_fallback() {
        // A road-shaped query answered only by a locality
        let backend = MapBackend {
            entries: vec![(
                "station road",
                vec![result("Station Road Colony", GeocodePlaceKind::Locality, 0.5)],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let resolved = resolver
            .resolve(ResolveInput {
                caption: "Collapse on Station Road",
                ..Default::default()
            })
            .await;

        // Locality base 0.6 minus the implausibility penalty
        assert!((resolved.confidence - 0.45).abs() < 1e-9);
        assert!(resolved.is_ambiguous);
        assert!(resolved.latitude.is_some());
    }

    #[tokio::test]
    async fn test_vision_hint_resolves_as_image_context() {
        let backend = MapBackend {
            entries: vec![(
                "chennai central",
                vec![result("Chennai Central", GeocodePlaceKind::Poi, 0.5)],
            )],
            reverse_name: None,
        };
        let resolver = resolver(backend, SceneCategory::Unknown);

        let hints = vec!["Chennai Central".to_string()];
        let resolved = resolver
            .resolve(ResolveInput {
                caption: "so much smoke here",
                vision_hints: &hints,
                ..Default::default()
            })
            .await;

        assert_eq!(resolved.method, LocationMethod::ImageContext);
        assert!((resolved.confidence - 0.7).abs() < 1e-9);
    }
}
