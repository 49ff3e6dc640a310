//! Location-candidate extraction from report text.
//!
//! Candidates come from three provenances: OCR text (signboards are often a
//! literal place name), caption NER spans, and image-derived hints. Regex
//! patterns for common place-name shapes ("X Junction", "-nagar" suffixes,
//! capitalized multiword phrases) back up the NER service and run
//! unconditionally, since NER misses road and junction names regularly.
//!
//! Each candidate gets a specificity rank; the resolver geocodes the most
//! specific first. More words and road/junction-shaped names rank higher,
//! because "Silk Board Junction" geocodes to a point while "Bangalore"
//! geocodes to a city.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{CandidateSource, LocationCandidate, SceneCategory};

use super::scene;

/// Place-name shapes, most specific first.
static LOCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Junction/signal/road shapes: "Silk Board Junction", "KR Puram Underpass"
        r"\b([A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*)*\s+(?:Junction|Signal|Circle|Square|Chowk|Nagar|Puram|Halli|Bagh|Garden|Park|Lake|Road|Street|Avenue|Lane|Bridge|Underpass|Flyover|Metro|Station|Railway))\b",
        // Area names with fused suffixes: "Indiranagar", "Koramangala"
        r"\b([A-Z][a-z]+(?:nagar|puram|halli|pete|pura|abad|pur|ganj|wadi|guda|pet))\b",
        // Capitalized multi-word phrases (potential place names)
        r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Suffixes that mark a road-shaped name.
pub const ROAD_SUFFIXES: &[&str] = &[
    "road", "street", "lane", "avenue", "highway", "junction", "signal", "circle", "flyover",
    "bridge", "underpass", "salai", "marg",
];

/// Extract place-name strings from text using the regex patterns only.
///
/// This is the degraded path when the NER service is down, and also runs
/// alongside NER to catch shapes it misses. Deduplicated case-insensitively,
/// order preserved.
pub fn extract_locations_regex(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut locations = Vec::new();

    for pattern in LOCATION_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let cleaned = m.as_str().trim();
                if cleaned.len() > 2 && seen.insert(cleaned.to_lowercase()) {
                    locations.push(cleaned.to_string());
                }
            }
        }
    }

    locations
}

/// Gather candidates from every source and sort by specificity descending.
///
/// Tie-break: the sort is stable, so insertion order decides - OCR first
/// (signboards name the exact spot), then caption, then image hints.
pub fn gather_candidates(
    caption: &str,
    ocr_text: Option<&str>,
    ner_locations: &[String],
    image_hints: &[String],
    scene_category: SceneCategory,
) -> Vec<LocationCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let mut push = |name: &str, source: CandidateSource| {
        let trimmed = name.trim();
        if trimmed.len() > 2 && seen.insert(trimmed.to_lowercase()) {
            candidates.push(LocationCandidate {
                name: trimmed.to_string(),
                source,
                specificity: specificity(trimmed, scene_category),
            });
        }
    };

    if let Some(ocr) = ocr_text {
        for loc in extract_locations_regex(ocr) {
            push(&loc, CandidateSource::Ocr);
        }
        // Short OCR text is often a signboard reading the place name verbatim
        let trimmed = ocr.trim();
        if !trimmed.is_empty() && trimmed.split_whitespace().count() <= 5 {
            push(trimmed, CandidateSource::Ocr);
        }
    }

    for loc in ner_locations {
        push(loc, CandidateSource::CaptionNer);
    }
    for loc in extract_locations_regex(caption) {
        push(&loc, CandidateSource::CaptionNer);
    }

    for hint in image_hints {
        push(hint, CandidateSource::SceneHint);
    }

    candidates.sort_by(|a, b| b.specificity.cmp(&a.specificity));
    candidates
}

/// Specificity rank for ordering geocode attempts.
///
/// Word count dominates, proper-noun density refines, road/junction shapes
/// get a flat boost, and a match against the scene vocabulary nudges the
/// candidate up (scene hints bias ordering only; they never create
/// candidates).
fn specificity(name: &str, scene_category: SceneCategory) -> u32 {
    let words: Vec<&str> = name.split_whitespace().collect();
    let mut score = words.len() as u32 * 10;

    score += words
        .iter()
        .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
        .count() as u32
        * 2;

    let lower = name.to_lowercase();
    if ROAD_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        score += 15;
    }

    if scene::scene_hints(scene_category)
        .iter()
        .any(|hint| lower.contains(hint))
    {
        score += 5;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_extracts_junction_shape() {
        let locations = extract_locations_regex("Flood near Silk Board Junction this morning");
        assert!(locations.iter().any(|l| l == "Silk Board Junction"));
    }

    #[test]
    fn test_regex_extracts_fused_suffix() {
        let locations = extract_locations_regex("Water entering homes in Koramangala today");
        assert!(locations.iter().any(|l| l == "Koramangala"));
    }

    #[test]
    fn test_regex_deduplicates_case_insensitively() {
        let locations =
            extract_locations_regex("Marathahalli Bridge flooded. marathahalli bridge closed.");
        let count = locations
            .iter()
            .filter(|l| l.to_lowercase().contains("marathahalli"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_regex_empty_text() {
        assert!(extract_locations_regex("").is_empty());
        assert!(extract_locations_regex("water everywhere").is_empty());
    }

    #[test]
    fn test_candidates_ordered_by_specificity() {
        let candidates = gather_candidates(
            "Flooding in Bangalore near Silk Board Junction",
            None,
            &["Bangalore".to_string()],
            &[],
            SceneCategory::Unknown,
        );

        assert!(!candidates.is_empty());
        // The three-word road-shaped name outranks the bare city
        assert_eq!(candidates[0].name, "Silk Board Junction");
        assert!(candidates.iter().any(|c| c.name == "Bangalore"));
    }

    #[test]
    fn test_short_ocr_text_becomes_candidate() {
        let candidates = gather_candidates(
            "water everywhere",
            Some("KR Puram Underpass"),
            &[],
            &[],
            SceneCategory::Unknown,
        );

        assert!(candidates.iter().any(|c| c.name == "KR Puram Underpass"));
        assert_eq!(candidates[0].source, CandidateSource::Ocr);
    }

    #[test]
    fn test_scene_vocabulary_biases_ordering() {
        let plain = gather_candidates(
            "",
            None,
            &["Ulsoor Halt".to_string(), "Ulsoor Lake".to_string()],
            &[],
            SceneCategory::Unknown,
        );
        let flood = gather_candidates(
            "",
            None,
            &["Ulsoor Halt".to_string(), "Ulsoor Lake".to_string()],
            &[],
            SceneCategory::WaterFlood,
        );

        // Same names, but the water-flood vocabulary promotes the lake
        assert_eq!(plain[0].name, "Ulsoor Halt");
        assert_eq!(flood[0].name, "Ulsoor Lake");
    }

    #[test]
    fn test_image_hints_carried_with_scene_source() {
        let candidates = gather_candidates(
            "",
            None,
            &[],
            &["Wonderla".to_string()],
            SceneCategory::Unknown,
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, CandidateSource::SceneHint);
    }
}
