//! Data models for Groundtruth.
//!
//! These types describe one disaster report's journey through the engine:
//! a raw [`Report`] comes in, the analysis pipeline attaches an
//! [`ImageFingerprint`], a [`ClassificationResult`], and a
//! [`ResolvedLocation`], and everything is merged into a
//! [`ConsolidatedReport`] that is written back to storage in one step.
//!
//! Analysis fields are never partially written: a report either carries a
//! complete [`ConsolidatedReport`] or none of its fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One disaster submission: image plus caption, optionally OCR text and
/// device coordinates.
///
/// Owned by the submission flow. The engine only reads these fields and
/// annotates the report with analysis results; it never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Unique report identifier.
    pub id: Uuid,

    /// Caption text entered by the reporter.
    pub caption: String,

    /// Text recognized from the image, if OCR has already run.
    pub ocr_text: Option<String>,

    /// Reference to the image in the media store (a retrievable URL).
    pub image_ref: String,

    /// Device latitude, if the submitting device shared coordinates.
    pub latitude: Option<f64>,

    /// Device longitude.
    pub longitude: Option<f64>,

    /// When the report was submitted (server-assigned, UTC).
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Device coordinates as a pair, if both are present.
    pub fn device_gps(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Perceptual fingerprint of a report image.
///
/// Two perceptual hashes (a coarse average hash and a finer DCT-based
/// perceptual hash, both 256 bits hex-encoded) plus an exact SHA-256 content
/// hash. Computation is deterministic: identical bytes always produce an
/// identical fingerprint.
///
/// For images that cannot be decoded, the perceptual hashes are `None` and
/// only the content hash is available; duplicate detection then degrades to
/// exact byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    /// 256-bit average hash, hex-encoded. `None` if the image failed to decode.
    pub average_hash: Option<String>,

    /// 256-bit DCT perceptual hash, hex-encoded. `None` if the image failed to decode.
    pub perceptual_hash: Option<String>,

    /// SHA-256 of the raw bytes, hex-encoded. Always present.
    pub content_hash: String,
}

/// Disaster categories the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisasterType {
    Flood,
    Fire,
    Earthquake,
    Collapse,
    Explosion,
    /// Not disaster-related (or undetermined).
    None,
}

impl DisasterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisasterType::Flood => "flood",
            DisasterType::Fire => "fire",
            DisasterType::Earthquake => "earthquake",
            DisasterType::Collapse => "collapse",
            DisasterType::Explosion => "explosion",
            DisasterType::None => "none",
        }
    }

    /// Parse a type label as reported by the vision service or stored in the
    /// database. Unknown labels map to `None`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "flood" | "flooding" => DisasterType::Flood,
            "fire" | "wildfire" => DisasterType::Fire,
            "earthquake" => DisasterType::Earthquake,
            "collapse" | "building_collapse" => DisasterType::Collapse,
            "explosion" | "blast" => DisasterType::Explosion,
            _ => DisasterType::None,
        }
    }
}

/// Severity of a confirmed disaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a severity label. Unknown labels map to `Low`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Derive severity from a text urgency score when the vision service did
    /// not report one.
    ///
    /// # Thresholds
    ///
    /// - `critical`: urgency >= 0.8
    /// - `high`: urgency >= 0.6
    /// - `medium`: urgency >= 0.3
    /// - `low`: otherwise
    pub fn from_urgency(urgency: f64) -> Self {
        if urgency >= 0.8 {
            Severity::Critical
        } else if urgency >= 0.6 {
            Severity::High
        } else if urgency >= 0.3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Numeric weight used when computing final priority (severity x urgency).
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

/// One disaster type that matched the text, with its match strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMatch {
    pub disaster_type: DisasterType,

    /// Match strength in [0, 1]. More distinct synonym hits raise the strength.
    pub strength: f64,
}

/// Entities pulled out of the report text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Place-name strings (administrative places, facilities, bodies of water).
    pub locations: Vec<String>,

    /// Numeric spans as they appeared in the text.
    pub numbers: Vec<String>,

    /// Largest numeric span at or above the people-affected threshold, if any.
    pub people_affected_hint: Option<i64>,
}

/// Result of rule-based text classification over caption + OCR text.
///
/// Recomputable idempotently: the same input text always yields the same
/// result (entity extraction may differ only when the external NER service
/// changes its answers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Disaster types whose synonym lists matched the text, with strengths.
    pub candidates: Vec<TypeMatch>,

    /// Urgency score in [0, 1]. Saturating: each distinct urgency term adds
    /// 0.2 and the score never exceeds 1.0.
    pub urgency_score: f64,

    /// Entities extracted from the text.
    pub entities: ExtractedEntities,
}

impl ClassificationResult {
    /// Whether the text mentions at least one disaster type.
    pub fn is_disaster_text(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// The strongest matched type, or `DisasterType::None` when nothing matched.
    ///
    /// Ties break toward the earlier entry in the keyword table order.
    pub fn top_candidate(&self) -> DisasterType {
        self.candidates
            .iter()
            .max_by(|a, b| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|m| m.disaster_type)
            .unwrap_or(DisasterType::None)
    }
}

/// Where a location candidate string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Recognized in OCR text from the image (signboards and banners).
    Ocr,
    /// Named-entity or pattern match in the caption.
    CaptionNer,
    /// Location hint reported by the vision service or scene vocabulary.
    SceneHint,
}

/// A place-name string queued for geocoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub name: String,
    pub source: CandidateSource,

    /// Specificity rank; higher ranks are geocoded first. More words and
    /// road/junction-shaped names score higher.
    pub specificity: u32,
}

/// Coarse kind of a geocoded place, used to match results against query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodePlaceKind {
    /// A road, street, junction, or other highway-class feature.
    Road,
    /// A named facility or point of interest.
    Poi,
    /// A body of water.
    Water,
    /// A populated place below the administrative level (suburb, locality).
    Locality,
    /// An administrative boundary (district, state).
    AdminArea,
    Other,
}

/// One ranked result from the geocoding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub kind: GeocodePlaceKind,

    /// Relevance as reported by the geocoding service, used for near-tie detection.
    pub importance: f64,
}

/// How the final location was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationMethod {
    /// Device coordinates were present; they are authoritative.
    #[serde(rename = "device-gps")]
    DeviceGps,
    /// Geocoded from a candidate backed by OCR text (caption context included).
    #[serde(rename = "ocr+caption")]
    OcrCaption,
    /// Geocoded from a caption-derived candidate.
    #[serde(rename = "caption")]
    Caption,
    /// Geocoded from an image-derived hint only (vision or scene vocabulary).
    #[serde(rename = "image-context")]
    ImageContext,
    /// No location could be resolved.
    #[serde(rename = "none")]
    None,
}

impl LocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationMethod::DeviceGps => "device-gps",
            LocationMethod::OcrCaption => "ocr+caption",
            LocationMethod::Caption => "caption",
            LocationMethod::ImageContext => "image-context",
            LocationMethod::None => "none",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "device-gps" => LocationMethod::DeviceGps,
            "ocr+caption" => LocationMethod::OcrCaption,
            "caption" => LocationMethod::Caption,
            "image-context" => LocationMethod::ImageContext,
            _ => LocationMethod::None,
        }
    }
}

/// Final location output of the resolver.
///
/// Invariant: when `method` is `DeviceGps`, `confidence` is the maximum the
/// pipeline can produce; device coordinates are never overridden by
/// text-derived locations, only enriched with a display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub display_name: Option<String>,

    /// Confidence in [0, 1].
    pub confidence: f64,

    /// True iff confidence is below the configured ambiguity threshold.
    pub is_ambiguous: bool,

    pub method: LocationMethod,
}

impl ResolvedLocation {
    /// The empty result: nothing resolved, zero confidence, ambiguous.
    pub fn unresolved() -> Self {
        Self {
            latitude: None,
            longitude: None,
            display_name: None,
            confidence: 0.0,
            is_ambiguous: true,
            method: LocationMethod::None,
        }
    }
}

/// Coarse scene category inferred from the report image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneCategory {
    UrbanRoad,
    BridgeFlyover,
    Residential,
    WaterFlood,
    Rural,
    Commercial,
    Landmark,
    Transit,
    Industrial,
    Unknown,
}

/// Structured attributes reported by the vision-language service for an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub is_disaster: bool,
    pub disaster_type: DisasterType,

    /// Severity as judged from the image, if the model reported one.
    pub severity: Option<Severity>,

    pub description: String,
    pub detected_elements: Vec<String>,

    /// Visually identified place names, landmarks, and text on signs.
    pub location_hints: Vec<String>,

    /// All readable text transcribed from the image.
    pub visible_text: String,

    pub people_affected: String,

    /// Urgency in [0, 1] as judged from the image.
    pub urgency_score: f64,
}

impl VisionAnalysis {
    /// The degraded result used when the vision service is absent or failing:
    /// everything defaults to "unknown/none" and the text pipeline decides.
    pub fn unavailable() -> Self {
        Self {
            is_disaster: false,
            disaster_type: DisasterType::None,
            severity: None,
            description: String::new(),
            detected_elements: vec![],
            location_hints: vec![],
            visible_text: String::new(),
            people_affected: "unknown".to_string(),
            urgency_score: 0.0,
        }
    }
}

/// Review status derived from analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Not yet analyzed, or analysis produced no verdict.
    Pending,
    /// Confirmed disaster.
    Verified,
    /// Confirmed disaster with high urgency.
    Urgent,
    /// Analysis concluded this is not a disaster.
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Verified => "verified",
            ReportStatus::Urgent => "urgent",
            ReportStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => ReportStatus::Verified,
            "urgent" => ReportStatus::Urgent,
            "rejected" => ReportStatus::Rejected,
            _ => ReportStatus::Pending,
        }
    }
}

/// Dispatch workflow state for a verified report.
///
/// The engine only feeds this state machine; transitions are simple
/// bookkeeping validated against [`DispatchStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Assigned => "assigned",
            DispatchStatus::InProgress => "in-progress",
            DispatchStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DispatchStatus::Pending),
            "assigned" => Some(DispatchStatus::Assigned),
            "in-progress" => Some(DispatchStatus::InProgress),
            "resolved" => Some(DispatchStatus::Resolved),
            _ => None,
        }
    }

    /// Allowed transitions. Rollbacks one step are permitted; `Resolved` is terminal.
    pub fn can_transition_to(&self, next: DispatchStatus) -> bool {
        matches!(
            (self, next),
            (DispatchStatus::Pending, DispatchStatus::Assigned)
                | (DispatchStatus::Assigned, DispatchStatus::InProgress)
                | (DispatchStatus::Assigned, DispatchStatus::Pending)
                | (DispatchStatus::InProgress, DispatchStatus::Resolved)
                | (DispatchStatus::InProgress, DispatchStatus::Assigned)
        )
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,

    /// The earlier report this one duplicates, if any.
    pub matched_report_id: Option<Uuid>,

    /// Worst (larger) of the two Hamming distances for a perceptual match;
    /// 0 for an exact content-hash match.
    pub matched_distance: Option<u32>,
}

impl DuplicateCheck {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            matched_report_id: None,
            matched_distance: None,
        }
    }
}

/// A report enriched with every analysis output, written to storage in one step.
///
/// Re-running analysis on the same report with the same external-service
/// responses yields an identical record except for `analyzed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub report_id: Uuid,

    /// Final verdict: true if either the vision service or the text
    /// classifier found disaster evidence.
    pub is_disaster: bool,

    /// Vision type when the vision service declared a disaster, otherwise the
    /// text classifier's top candidate.
    pub disaster_type: DisasterType,

    /// Vision severity when present, otherwise derived from urgency.
    pub severity: Severity,

    /// Max of vision-reported and text-derived urgency.
    pub urgency_score: f64,

    /// Final priority: severity weight x urgency score.
    pub priority: f64,

    pub status: ReportStatus,
    pub classification: ClassificationResult,
    pub location: ResolvedLocation,
    pub fingerprint: ImageFingerprint,
    pub duplicate: DuplicateCheck,

    /// When this analysis ran (the only field excluded from idempotence).
    pub analyzed_at: DateTime<Utc>,
}

// ============================================================================
// API request/response types
// ============================================================================

/// Request body for POST /reports.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReportRequest {
    pub caption: String,
    pub image_ref: String,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Request body for POST /analyze.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub report_id: Uuid,

    /// When true, the advisory duplicate check is skipped entirely.
    #[serde(default)]
    pub skip_duplicate_check: bool,
}

/// Request body for POST /check-duplicate.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckDuplicateRequest {
    pub image_ref: String,

    /// Deduplication window in hours (default: 2).
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
}

fn default_window_hours() -> u32 {
    2
}

/// Response body for POST /check-duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct CheckDuplicateResponse {
    pub is_duplicate: bool,
    pub matched_report_id: Option<Uuid>,
    pub message: String,
}

/// Request body for POST /reset-analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct ResetAnalysisRequest {
    pub report_id: Uuid,
}

/// Request body for POST /dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub report_id: Uuid,
    pub dispatch_status: DispatchStatus,
    #[serde(default)]
    pub assigned_team: Option<String>,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}
