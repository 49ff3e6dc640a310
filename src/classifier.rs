//! Rule-based disaster classification and urgency scoring over report text.
//!
//! A fixed keyword table maps each disaster type to a synonym list. Any
//! fuzzy hit (normalized similarity >= 0.8, tolerating typos) marks the type
//! as a candidate; one post can match several types. A separate term list
//! drives urgency: each distinct term found adds 0.2, saturating at 1.0.
//!
//! Classification is pure and deterministic. Entity extraction delegates to
//! the external NER service and degrades to regex patterns when it is
//! unavailable - keyword and urgency scoring never depend on NER.

use std::sync::Arc;

use tracing::warn;

use crate::geo::extractor;
use crate::model::{ClassificationResult, DisasterType, ExtractedEntities, TypeMatch};
use crate::services::{EntityLabel, NerService};

/// Minimum normalized similarity for a keyword hit.
const FUZZY_THRESHOLD: f64 = 0.8;

/// Score added per distinct urgency term.
const URGENCY_STEP: f64 = 0.2;

/// Numeric spans at or above this count as people-affected hints.
const PEOPLE_AFFECTED_MIN: i64 = 5;

/// Immutable keyword table: disaster type -> synonym terms.
///
/// Loaded once; never mutated at runtime, so classification stays
/// deterministic and testable.
const KEYWORDS: &[(DisasterType, &[&str])] = &[
    (
        DisasterType::Flood,
        &["flood", "inundation", "water level", "drowning", "submerged", "waterlogging"],
    ),
    (
        DisasterType::Fire,
        &["fire", "flames", "burning", "smoke", "wildfire", "burnt"],
    ),
    (
        DisasterType::Earthquake,
        &["earthquake", "quake", "shaking", "tremor", "magnitude"],
    ),
    (
        DisasterType::Collapse,
        &["collapse", "collapsed", "crumbled", "cave-in", "caved in"],
    ),
    (
        DisasterType::Explosion,
        &["explosion", "exploded", "blast", "detonation"],
    ),
];

/// Urgency vocabulary. Each distinct term found contributes one step.
const URGENCY_TERMS: &[&str] = &[
    "urgent", "help", "sos", "trapped", "rescue", "injured", "dead", "dying", "emergency",
    "critical", "blood", "ambulance",
];

/// Text classifier with an optional NER service for entity extraction.
pub struct TextClassifier {
    ner: Option<Arc<dyn NerService>>,
}

impl TextClassifier {
    pub fn new(ner: Option<Arc<dyn NerService>>) -> Self {
        Self { ner }
    }

    /// Classify text: keyword candidates, urgency score, and entities.
    ///
    /// Empty text yields no candidates and urgency 0.0.
    pub async fn classify(&self, text: &str) -> ClassificationResult {
        let candidates = classify_types(text);
        let urgency_score = urgency_score(text);
        let entities = self.extract_entities(text).await;

        ClassificationResult {
            candidates,
            urgency_score,
            entities,
        }
    }

    /// Extract location and numeric entities, falling back to regex patterns
    /// when the NER service is unavailable or errors.
    pub async fn extract_entities(&self, text: &str) -> ExtractedEntities {
        if text.trim().is_empty() {
            return ExtractedEntities::default();
        }

        if let Some(ner) = &self.ner {
            match ner.extract(text).await {
                Ok(spans) => return entities_from_spans(spans),
                Err(e) => {
                    warn!(error = %e, "NER service unavailable; falling back to regex extraction");
                }
            }
        }

        ExtractedEntities {
            locations: extractor::extract_locations_regex(text),
            numbers: extract_numbers_regex(text),
            people_affected_hint: people_affected_hint(&extract_numbers_regex(text)),
        }
    }
}

/// Match the keyword table against the text.
///
/// Strength starts at 0.5 for one synonym hit and rises 0.1 per additional
/// distinct hit within the same type, capped at 1.0.
pub fn classify_types(text: &str) -> Vec<TypeMatch> {
    let lower = text.to_lowercase();
    let tokens = tokenize(&lower);

    let mut matches = Vec::new();
    for (disaster_type, terms) in KEYWORDS {
        let hits = terms
            .iter()
            .filter(|term| fuzzy_contains(&lower, &tokens, term))
            .count();
        if hits > 0 {
            matches.push(TypeMatch {
                disaster_type: *disaster_type,
                strength: (0.5 + 0.1 * (hits as f64 - 1.0)).min(1.0),
            });
        }
    }
    matches
}

/// Saturating urgency score: distinct terms x 0.2, capped at 1.0.
///
/// Monotonic in the set of distinct terms present; repeating a term does not
/// raise the score further.
pub fn urgency_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let hits = URGENCY_TERMS
        .iter()
        .filter(|term| lower.contains(**term))
        .count();
    (hits as f64 * URGENCY_STEP).min(1.0)
}

/// Whether `term` occurs in the text, tolerating typos.
///
/// Multi-word terms are compared against token windows of the same width;
/// single words against individual tokens. Exact substring containment
/// short-circuits both.
fn fuzzy_contains(lower_text: &str, tokens: &[String], term: &str) -> bool {
    if lower_text.contains(term) {
        return true;
    }

    let term_words: Vec<&str> = term.split_whitespace().collect();
    match term_words.len() {
        0 => false,
        1 => tokens
            .iter()
            .any(|t| strsim::normalized_levenshtein(t, term) >= FUZZY_THRESHOLD),
        n => tokens
            .windows(n)
            .any(|w| strsim::normalized_levenshtein(&w.join(" "), term) >= FUZZY_THRESHOLD),
    }
}

/// Lowercased word tokens with surrounding punctuation stripped.
fn tokenize(lower_text: &str) -> Vec<String> {
    lower_text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Build entities from NER spans: keep location-flavored and numeric labels.
fn entities_from_spans(spans: Vec<crate::services::EntitySpan>) -> ExtractedEntities {
    let mut locations = Vec::new();
    let mut numbers = Vec::new();

    for span in spans {
        if span.label.is_location() {
            let trimmed = span.text.trim();
            if !trimmed.is_empty() {
                locations.push(trimmed.to_string());
            }
        } else if span.label == EntityLabel::Number {
            numbers.push(span.text.trim().to_string());
        }
    }

    let people_affected_hint = people_affected_hint(&numbers);
    ExtractedEntities {
        locations,
        numbers,
        people_affected_hint,
    }
}

/// Largest numeric span at or above the people-affected threshold.
fn people_affected_hint(numbers: &[String]) -> Option<i64> {
    numbers
        .iter()
        .filter_map(|n| n.replace(',', "").parse::<i64>().ok())
        .filter(|&n| n >= PEOPLE_AFFECTED_MIN)
        .max()
}

/// Bare-digit extraction for the regex fallback path.
fn extract_numbers_regex(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_digit()))
        .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_string())
        .collect()
}
