//! Scene classification for location context.
//!
//! A scene category ("water_flood", "bridge_flyover", ...) carries a small
//! place-name vocabulary that biases candidate ordering and earns a
//! confidence bonus when the geocoded result matches. The classifier is an
//! abstract capability: a model service may back it, and the built-in
//! [`HeuristicSceneClassifier`] covers the common case where none is
//! configured using plain color statistics. Failure degrades to
//! `SceneCategory::Unknown`, which disables the bonus but never blocks
//! resolution.

use async_trait::async_trait;

use crate::model::{GeocodePlaceKind, SceneCategory};

/// Scene classification result.
#[derive(Debug, Clone, Copy)]
pub struct SceneHint {
    pub category: SceneCategory,

    /// Classifier confidence in [0, 1]; informational only.
    pub confidence: f64,
}

impl SceneHint {
    pub fn unknown() -> Self {
        Self {
            category: SceneCategory::Unknown,
            confidence: 0.0,
        }
    }
}

/// Maps an image to a coarse scene category.
#[async_trait]
pub trait SceneClassifier: Send + Sync {
    async fn classify_scene(&self, image_bytes: &[u8]) -> SceneHint;
}

/// Place-name vocabulary per scene category.
///
/// Used only to bias candidate ordering and to award the scene-match bonus.
pub fn scene_hints(category: SceneCategory) -> &'static [&'static str] {
    match category {
        SceneCategory::UrbanRoad => &["junction", "signal", "road", "highway", "main road", "circle"],
        SceneCategory::BridgeFlyover => &["bridge", "flyover", "underpass", "overpass", "elevated"],
        SceneCategory::Residential => &["layout", "nagar", "colony", "apartments", "enclave", "phase"],
        SceneCategory::WaterFlood => &["lake", "river", "tank", "canal", "nala", "kere"],
        SceneCategory::Rural => &["village", "gram", "halli", "rural"],
        SceneCategory::Commercial => &["market", "mall", "complex", "plaza", "bazaar"],
        SceneCategory::Landmark => &["temple", "church", "mosque", "stadium", "park", "garden"],
        SceneCategory::Transit => &["bus stand", "metro", "station", "terminal", "depot"],
        SceneCategory::Industrial => &["industrial", "factory", "zone", "area"],
        SceneCategory::Unknown => &[],
    }
}

/// Whether a geocoded result agrees with the scene category.
///
/// Matches on the result's place kind (water scene over a water body) or on
/// the scene vocabulary appearing in the display name.
pub fn scene_matches_result(
    category: SceneCategory,
    kind: GeocodePlaceKind,
    display_name: &str,
) -> bool {
    if category == SceneCategory::Unknown {
        return false;
    }

    let kind_match = matches!(
        (category, kind),
        (SceneCategory::WaterFlood, GeocodePlaceKind::Water)
            | (SceneCategory::UrbanRoad, GeocodePlaceKind::Road)
            | (SceneCategory::BridgeFlyover, GeocodePlaceKind::Road)
    );
    if kind_match {
        return true;
    }

    let lower = display_name.to_lowercase();
    scene_hints(category).iter().any(|hint| lower.contains(hint))
}

/// Color-statistics fallback classifier used when no model service is
/// configured.
///
/// Dominant blue tones read as flood water, dominant green as open/rural
/// ground, balanced grays as urban road. Confidence stays low; the category
/// only ever nudges ordering and the bonus.
#[derive(Debug, Clone, Default)]
pub struct HeuristicSceneClassifier;

#[async_trait]
impl SceneClassifier for HeuristicSceneClassifier {
    async fn classify_scene(&self, image_bytes: &[u8]) -> SceneHint {
        let Ok(img) = image::load_from_memory(image_bytes) else {
            return SceneHint::unknown();
        };

        let small = img.resize_exact(50, 50, image::imageops::FilterType::Triangle);
        let rgb = small.to_rgb8();

        let mut sum_r = 0u64;
        let mut sum_g = 0u64;
        let mut sum_b = 0u64;
        for pixel in rgb.pixels() {
            sum_r += pixel.0[0] as u64;
            sum_g += pixel.0[1] as u64;
            sum_b += pixel.0[2] as u64;
        }
        let n = (rgb.width() * rgb.height()) as f64;
        let avg_r = sum_r as f64 / n;
        let avg_g = sum_g as f64 / n;
        let avg_b = sum_b as f64 / n;

        let has_water_tones = avg_b > 100.0 && avg_b > avg_r;
        let has_vegetation = avg_g > 100.0 && avg_g > avg_r * 1.2;
        let is_neutral = (avg_r - avg_g).abs() < 20.0 && (avg_g - avg_b).abs() < 20.0;

        if has_water_tones {
            SceneHint {
                category: SceneCategory::WaterFlood,
                confidence: 0.4,
            }
        } else if has_vegetation {
            SceneHint {
                category: SceneCategory::Rural,
                confidence: 0.35,
            }
        } else if is_neutral {
            SceneHint {
                category: SceneCategory::UrbanRoad,
                confidence: 0.3,
            }
        } else {
            SceneHint::unknown()
        }
    }
}
