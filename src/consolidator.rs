//! Analysis pipeline: one report in, one consolidated assessment out.
//!
//! The consolidator owns the ordering and the merge rules; every step it
//! calls is degradable. A failed image fetch skips the visual steps, a failed
//! vision call falls back to the text verdict, a failed duplicate scan
//! reports "unique". The only hard failures are an unknown report id and a
//! storage fault.
//!
//! # Merge rules
//!
//! - `is_disaster`: vision verdict OR text classifier candidates.
//! - `disaster_type`: vision's type when vision declared a disaster,
//!   otherwise the text classifier's strongest candidate.
//! - `urgency_score`: max of the vision and text scores.
//! - `severity`: vision's judgment when present, otherwise derived from the
//!   merged urgency score.
//! - `priority`: severity weight x urgency score.
//! - `status`: `rejected` for non-disasters, `urgent` at or above the
//!   urgency threshold, `verified` otherwise.
//!
//! The duplicate check is advisory: a duplicate report is still analyzed and
//! stored in full, with the match recorded alongside.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::classifier::TextClassifier;
use crate::config::DedupConfig;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::{self, find_duplicate};
use crate::geo::resolver::{LocationResolver, ResolveInput};
use crate::model::{
    ConsolidatedReport, DuplicateCheck, ImageFingerprint, ReportStatus, Severity, VisionAnalysis,
};
use crate::services::{MediaStore, OcrEngine, VisionAnalyzer};
use crate::storage::Storage;

/// Merged urgency at or above this makes a verified report urgent.
const URGENT_THRESHOLD: f64 = 0.7;

/// Per-analysis options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Skip the advisory duplicate check entirely.
    pub skip_duplicate_check: bool,
}

/// The analysis engine.
pub struct Consolidator {
    storage: Storage,
    media: Arc<dyn MediaStore>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    classifier: TextClassifier,
    resolver: LocationResolver,
    dedup: DedupConfig,
}

impl Consolidator {
    pub fn new(
        storage: Storage,
        media: Arc<dyn MediaStore>,
        vision: Option<Arc<dyn VisionAnalyzer>>,
        ocr: Option<Arc<dyn OcrEngine>>,
        classifier: TextClassifier,
        resolver: LocationResolver,
        dedup: DedupConfig,
    ) -> Self {
        Self {
            storage,
            media,
            vision,
            ocr,
            classifier,
            resolver,
            dedup,
        }
    }

    /// Run the full pipeline for one report and persist the result.
    ///
    /// Idempotent up to `analyzed_at` and external-service drift: re-running
    /// with the same service answers overwrites the stored analysis with an
    /// identical one.
    #[instrument(skip(self, options))]
    pub async fn analyze(
        &self,
        report_id: Uuid,
        options: AnalyzeOptions,
    ) -> EngineResult<ConsolidatedReport> {
        let report = self.storage.get_report(report_id).await?;

        let image_bytes = match self.media.fetch(&report.image_ref).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, image_ref = %report.image_ref, "image fetch failed; analyzing text only");
                None
            }
        };

        let fp = match &image_bytes {
            Some(bytes) => fingerprint::fingerprint(bytes),
            // No bytes to hash: key the content hash off the reference so two
            // reports pointing at the same unavailable image still compare equal
            None => ImageFingerprint {
                average_hash: None,
                perceptual_hash: None,
                content_hash: hex::encode(Sha256::digest(report.image_ref.as_bytes())),
            },
        };

        let duplicate = if options.skip_duplicate_check {
            DuplicateCheck::unique()
        } else {
            find_duplicate(
                &self.storage,
                self.media.as_ref(),
                &fp,
                &self.dedup,
                Some(report_id),
            )
            .await
        };
        if duplicate.is_duplicate {
            info!(
                matched = ?duplicate.matched_report_id,
                distance = ?duplicate.matched_distance,
                "report duplicates an earlier submission"
            );
        }

        let (vision, ocr_text) = tokio::join!(
            self.run_vision(&report.image_ref, image_bytes.is_some()),
            self.run_ocr(report.ocr_text.as_deref(), image_bytes.as_deref()),
        );

        let mut text = report.caption.clone();
        if let Some(ocr) = &ocr_text {
            text.push('\n');
            text.push_str(ocr);
        }
        if !vision.visible_text.is_empty() {
            text.push('\n');
            text.push_str(&vision.visible_text);
        }
        let classification = self.classifier.classify(&text).await;

        let location = self
            .resolver
            .resolve(ResolveInput {
                caption: &report.caption,
                ocr_text: ocr_text.as_deref(),
                gps: report.device_gps(),
                ner_locations: &classification.entities.locations,
                vision_hints: &vision.location_hints,
                image_bytes: image_bytes.as_deref(),
            })
            .await;

        let is_disaster = vision.is_disaster || classification.is_disaster_text();
        let disaster_type = if vision.is_disaster {
            vision.disaster_type
        } else {
            classification.top_candidate()
        };
        let urgency_score = vision.urgency_score.max(classification.urgency_score);
        let severity = vision
            .severity
            .unwrap_or_else(|| Severity::from_urgency(urgency_score));
        let priority = severity.weight() * urgency_score;
        let status = if !is_disaster {
            ReportStatus::Rejected
        } else if urgency_score >= URGENT_THRESHOLD {
            ReportStatus::Urgent
        } else {
            ReportStatus::Verified
        };

        let analysis = ConsolidatedReport {
            report_id,
            is_disaster,
            disaster_type,
            severity,
            urgency_score,
            priority,
            status,
            classification,
            location,
            fingerprint: fp,
            duplicate,
            analyzed_at: Utc::now(),
        };

        self.storage.write_analysis(&analysis).await?;
        info!(
            is_disaster,
            disaster_type = disaster_type.as_str(),
            status = status.as_str(),
            priority,
            "analysis complete"
        );
        Ok(analysis)
    }

    /// Check an image against recent fingerprints without creating a report.
    pub async fn check_duplicate(
        &self,
        image_ref: &str,
        window: std::time::Duration,
    ) -> EngineResult<DuplicateCheck> {
        let bytes = self
            .media
            .fetch(image_ref)
            .await
            .map_err(|e| EngineError::InvalidInput(format!("image not retrievable: {e}")))?;

        let fp = fingerprint::fingerprint(&bytes);
        let config = DedupConfig {
            window,
            hamming_threshold: self.dedup.hamming_threshold,
        };
        Ok(find_duplicate(&self.storage, self.media.as_ref(), &fp, &config, None).await)
    }

    /// Clear a report's analysis so it can be re-run.
    pub async fn reset_analysis(&self, report_id: Uuid) -> EngineResult<()> {
        self.storage.reset_analysis(report_id).await
    }

    /// Analyze every pending report, continuing past individual failures.
    /// Returns the number analyzed successfully.
    pub async fn process_pending(&self, limit: u32) -> EngineResult<u32> {
        let pending = self.storage.pending_report_ids(limit).await?;
        let mut analyzed = 0;
        for id in pending {
            match self.analyze(id, AnalyzeOptions::default()).await {
                Ok(_) => analyzed += 1,
                Err(e) => warn!(report_id = %id, error = %e, "pending analysis failed"),
            }
        }
        Ok(analyzed)
    }

    async fn run_vision(&self, image_ref: &str, have_image: bool) -> VisionAnalysis {
        let Some(vision) = &self.vision else {
            return VisionAnalysis::unavailable();
        };
        if !have_image {
            return VisionAnalysis::unavailable();
        }
        match vision.analyze(image_ref).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "vision analysis failed; using text pipeline only");
                VisionAnalysis::unavailable()
            }
        }
    }

    /// OCR text: the submitted text wins; the OCR service fills the gap when
    /// configured and the image is available.
    async fn run_ocr(&self, submitted: Option<&str>, image_bytes: Option<&[u8]>) -> Option<String> {
        if let Some(text) = submitted {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
        let (Some(ocr), Some(bytes)) = (&self.ocr, image_bytes) else {
            return None;
        };
        match ocr.extract(bytes).await {
            Ok(extraction) if !extraction.text.trim().is_empty() => Some(extraction.text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "OCR failed; continuing without image text");
                None
            }
        }
    }
}
