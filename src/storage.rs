//! SQLite storage layer for Groundtruth.
//!
//! One `reports` table holds the submission columns plus the analysis
//! columns. The analysis columns are written by a single UPDATE in
//! [`Storage::write_analysis`], so a report is always observed either fully
//! analyzed or not analyzed at all - there is no partially-written state for
//! readers to trip over. [`Storage::reset_analysis`] clears the same column
//! set in one statement for the same reason.
//!
//! Structured fields (classification candidates, extracted entities) are
//! stored as JSON text columns; everything queried or filtered on is a flat
//! column.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    ClassificationResult, ConsolidatedReport, DispatchRequest, DispatchStatus, DuplicateCheck,
    ImageFingerprint, LocationMethod, Report, ReportStatus, ResolvedLocation, Severity,
    DisasterType,
};

/// A stored fingerprint with the report it belongs to, for duplicate scans.
#[derive(Debug, Clone)]
pub struct StoredFingerprint {
    pub report_id: Uuid,
    pub fingerprint: ImageFingerprint,
}

/// Dispatch bookkeeping attached to a report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchState {
    pub dispatch_status: DispatchStatus,
    pub assigned_team: Option<String>,
    pub resolution_notes: Option<String>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:groundtruth.db?mode=rwc"
    ///   or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                caption TEXT NOT NULL,
                ocr_text TEXT,
                image_ref TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                created_at INTEGER NOT NULL,

                analyzed INTEGER NOT NULL DEFAULT 0,
                is_disaster INTEGER,
                disaster_type TEXT,
                severity TEXT,
                urgency_score REAL,
                priority REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                classification TEXT,
                resolved_latitude REAL,
                resolved_longitude REAL,
                resolved_display_name TEXT,
                location_confidence REAL,
                location_ambiguous INTEGER,
                location_method TEXT,
                average_hash TEXT,
                perceptual_hash TEXT,
                content_hash TEXT,
                duplicate_of TEXT,
                duplicate_distance INTEGER,
                analyzed_at INTEGER,

                dispatch_status TEXT NOT NULL DEFAULT 'pending',
                assigned_team TEXT,
                resolution_notes TEXT,
                dispatch_updated_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the time-windowed duplicate scan
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_reports_created_at
            ON reports(created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_reports_analyzed
            ON reports(analyzed)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new report.
    pub async fn create_report(&self, report: &Report) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, caption, ocr_text, image_ref, latitude, longitude, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.id.to_string())
        .bind(&report.caption)
        .bind(&report.ocr_text)
        .bind(&report.image_ref)
        .bind(report.latitude)
        .bind(report.longitude)
        .bind(report.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a report's submission fields.
    pub async fn get_report(&self, id: Uuid) -> EngineResult<Report> {
        let row = sqlx::query(
            r#"
            SELECT caption, ocr_text, image_ref, latitude, longitude, created_at
            FROM reports WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::ReportNotFound(id))?;

        let created_ts: i64 = row.get("created_at");
        Ok(Report {
            id,
            caption: row.get("caption"),
            ocr_text: row.get("ocr_text"),
            image_ref: row.get("image_ref"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            created_at: Utc
                .timestamp_opt(created_ts, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    /// Fetch the stored analysis for a report, if analysis has run.
    pub async fn get_analysis(&self, id: Uuid) -> EngineResult<Option<ConsolidatedReport>> {
        let row = sqlx::query(
            r#"
            SELECT analyzed, is_disaster, disaster_type, severity, urgency_score, priority,
                   status, classification,
                   resolved_latitude, resolved_longitude, resolved_display_name,
                   location_confidence, location_ambiguous, location_method,
                   average_hash, perceptual_hash, content_hash,
                   duplicate_of, duplicate_distance, analyzed_at
            FROM reports WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::ReportNotFound(id))?;

        let analyzed: i64 = row.get("analyzed");
        if analyzed == 0 {
            return Ok(None);
        }

        let classification_json: String = row.get("classification");
        let classification: ClassificationResult = serde_json::from_str(&classification_json)?;

        let disaster_type: String = row.get("disaster_type");
        let severity: String = row.get("severity");
        let status: String = row.get("status");
        let method: String = row.get("location_method");
        let duplicate_of: Option<String> = row.get("duplicate_of");
        let duplicate_distance: Option<i64> = row.get("duplicate_distance");
        let ambiguous: i64 = row.get("location_ambiguous");
        let is_disaster: i64 = row.get("is_disaster");
        let analyzed_ts: i64 = row.get("analyzed_at");

        let matched_report_id = duplicate_of.and_then(|s| Uuid::parse_str(&s).ok());
        Ok(Some(ConsolidatedReport {
            report_id: id,
            is_disaster: is_disaster != 0,
            disaster_type: DisasterType::parse(&disaster_type),
            severity: Severity::parse(&severity),
            urgency_score: row.get("urgency_score"),
            priority: row.get("priority"),
            status: ReportStatus::parse(&status),
            classification,
            location: ResolvedLocation {
                latitude: row.get("resolved_latitude"),
                longitude: row.get("resolved_longitude"),
                display_name: row.get("resolved_display_name"),
                confidence: row.get("location_confidence"),
                is_ambiguous: ambiguous != 0,
                method: LocationMethod::parse(&method),
            },
            fingerprint: ImageFingerprint {
                average_hash: row.get("average_hash"),
                perceptual_hash: row.get("perceptual_hash"),
                content_hash: row.get::<Option<String>, _>("content_hash").unwrap_or_default(),
            },
            duplicate: DuplicateCheck {
                is_duplicate: matched_report_id.is_some(),
                matched_report_id,
                matched_distance: duplicate_distance.map(|d| d as u32),
            },
            analyzed_at: Utc
                .timestamp_opt(analyzed_ts, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    /// Write a complete analysis in one statement.
    ///
    /// The single UPDATE is what guarantees analysis atomicity: no reader can
    /// observe half the columns filled in.
    pub async fn write_analysis(&self, analysis: &ConsolidatedReport) -> EngineResult<()> {
        let classification = serde_json::to_string(&analysis.classification)?;

        let result = sqlx::query(
            r#"
            UPDATE reports SET
                analyzed = 1,
                is_disaster = ?,
                disaster_type = ?,
                severity = ?,
                urgency_score = ?,
                priority = ?,
                status = ?,
                classification = ?,
                resolved_latitude = ?,
                resolved_longitude = ?,
                resolved_display_name = ?,
                location_confidence = ?,
                location_ambiguous = ?,
                location_method = ?,
                average_hash = ?,
                perceptual_hash = ?,
                content_hash = ?,
                duplicate_of = ?,
                duplicate_distance = ?,
                analyzed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(analysis.is_disaster)
        .bind(analysis.disaster_type.as_str())
        .bind(analysis.severity.as_str())
        .bind(analysis.urgency_score)
        .bind(analysis.priority)
        .bind(analysis.status.as_str())
        .bind(classification)
        .bind(analysis.location.latitude)
        .bind(analysis.location.longitude)
        .bind(&analysis.location.display_name)
        .bind(analysis.location.confidence)
        .bind(analysis.location.is_ambiguous)
        .bind(analysis.location.method.as_str())
        .bind(&analysis.fingerprint.average_hash)
        .bind(&analysis.fingerprint.perceptual_hash)
        .bind(&analysis.fingerprint.content_hash)
        .bind(analysis.duplicate.matched_report_id.map(|u| u.to_string()))
        .bind(analysis.duplicate.matched_distance.map(|d| d as i64))
        .bind(analysis.analyzed_at.timestamp())
        .bind(analysis.report_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ReportNotFound(analysis.report_id));
        }
        Ok(())
    }

    /// Clear every analysis column and return the report to `pending`.
    ///
    /// Dispatch bookkeeping survives a reset; it tracks field work, not
    /// analysis.
    pub async fn reset_analysis(&self, id: Uuid) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET
                analyzed = 0,
                is_disaster = NULL,
                disaster_type = NULL,
                severity = NULL,
                urgency_score = NULL,
                priority = NULL,
                status = 'pending',
                classification = NULL,
                resolved_latitude = NULL,
                resolved_longitude = NULL,
                resolved_display_name = NULL,
                location_confidence = NULL,
                location_ambiguous = NULL,
                location_method = NULL,
                average_hash = NULL,
                perceptual_hash = NULL,
                content_hash = NULL,
                duplicate_of = NULL,
                duplicate_distance = NULL,
                analyzed_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ReportNotFound(id));
        }
        Ok(())
    }

    /// Fingerprints of analyzed reports created within the window, newest
    /// first, optionally excluding one report (the one being analyzed).
    pub async fn recent_fingerprints(
        &self,
        window: Duration,
        exclude: Option<Uuid>,
    ) -> EngineResult<Vec<StoredFingerprint>> {
        let cutoff = Utc::now().timestamp() - window.as_secs() as i64;
        let exclude_id = exclude.map(|u| u.to_string()).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            SELECT id, average_hash, perceptual_hash, content_hash
            FROM reports
            WHERE analyzed = 1 AND content_hash IS NOT NULL AND created_at >= ? AND id != ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(cutoff)
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await?;

        let mut fingerprints = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let Ok(report_id) = Uuid::parse_str(&id) else {
                continue;
            };
            fingerprints.push(StoredFingerprint {
                report_id,
                fingerprint: ImageFingerprint {
                    average_hash: row.get("average_hash"),
                    perceptual_hash: row.get("perceptual_hash"),
                    content_hash: row.get::<Option<String>, _>("content_hash").unwrap_or_default(),
                },
            });
        }
        Ok(fingerprints)
    }

    /// Reports created within the window that have no stored fingerprint yet
    /// (submitted but not analyzed), newest first. The duplicate scan hashes
    /// these on demand so a not-yet-analyzed submission can still be matched.
    pub async fn recent_unhashed_reports(
        &self,
        window: Duration,
        exclude: Option<Uuid>,
    ) -> EngineResult<Vec<(Uuid, String)>> {
        let cutoff = Utc::now().timestamp() - window.as_secs() as i64;
        let exclude_id = exclude.map(|u| u.to_string()).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            SELECT id, image_ref
            FROM reports
            WHERE content_hash IS NULL AND created_at >= ? AND id != ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(cutoff)
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = Uuid::parse_str(&row.get::<String, _>("id")).ok()?;
                Some((id, row.get::<String, _>("image_ref")))
            })
            .collect())
    }

    /// IDs of reports awaiting analysis, oldest first.
    pub async fn pending_report_ids(&self, limit: u32) -> EngineResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM reports
            WHERE analyzed = 0
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| Uuid::parse_str(&r.get::<String, _>("id")).ok())
            .collect())
    }

    /// Current dispatch bookkeeping for a report.
    pub async fn get_dispatch(&self, id: Uuid) -> EngineResult<DispatchState> {
        let row = sqlx::query(
            r#"
            SELECT dispatch_status, assigned_team, resolution_notes
            FROM reports WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::ReportNotFound(id))?;

        let status: String = row.get("dispatch_status");
        Ok(DispatchState {
            dispatch_status: DispatchStatus::parse(&status).unwrap_or(DispatchStatus::Pending),
            assigned_team: row.get("assigned_team"),
            resolution_notes: row.get("resolution_notes"),
        })
    }

    /// Apply a dispatch transition after validating it against the state
    /// machine. Returns the new state.
    pub async fn update_dispatch(&self, request: &DispatchRequest) -> EngineResult<DispatchState> {
        let current = self.get_dispatch(request.report_id).await?;
        if !current
            .dispatch_status
            .can_transition_to(request.dispatch_status)
        {
            return Err(EngineError::InvalidTransition {
                from: current.dispatch_status,
                to: request.dispatch_status,
            });
        }

        sqlx::query(
            r#"
            UPDATE reports SET
                dispatch_status = ?,
                assigned_team = COALESCE(?, assigned_team),
                resolution_notes = COALESCE(?, resolution_notes),
                dispatch_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(request.dispatch_status.as_str())
        .bind(&request.assigned_team)
        .bind(&request.resolution_notes)
        .bind(Utc::now().timestamp())
        .bind(request.report_id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_dispatch(request.report_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedEntities, TypeMatch};

    fn sample_report() -> Report {
        Report {
            id: Uuid::new_v4(),
            caption: "Flood near Silk Board Junction".to_string(),
            ocr_text: None,
            image_ref: "http://media.local/img/1.jpg".to_string(),
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
        }
    }

    fn sample_analysis(report_id: Uuid) -> ConsolidatedReport {
        ConsolidatedReport {
            report_id,
            is_disaster: true,
            disaster_type: DisasterType::Flood,
            severity: Severity::High,
            urgency_score: 0.6,
            priority: 0.45,
            status: ReportStatus::Verified,
            classification: ClassificationResult {
                candidates: vec![TypeMatch {
                    disaster_type: DisasterType::Flood,
                    strength: 0.5,
                }],
                urgency_score: 0.6,
                entities: ExtractedEntities::default(),
            },
            location: ResolvedLocation {
                latitude: Some(12.917),
                longitude: Some(77.623),
                display_name: Some("Silk Board Junction, Bangalore".to_string()),
                confidence: 0.75,
                is_ambiguous: false,
                method: LocationMethod::Caption,
            },
            fingerprint: ImageFingerprint {
                average_hash: Some("ab".repeat(32)),
                perceptual_hash: Some("cd".repeat(32)),
                content_hash: "ef".repeat(32),
            },
            duplicate: DuplicateCheck::unique(),
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_report() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let report = sample_report();

        storage.create_report(&report).await.unwrap();
        let fetched = storage.get_report(report.id).await.unwrap();

        assert_eq!(fetched.caption, report.caption);
        assert_eq!(fetched.image_ref, report.image_ref);
        assert!(fetched.latitude.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_report() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let err = storage.get_report(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::ReportNotFound(_)));
    }

    #[tokio::test]
    async fn test_analysis_round_trip() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let report = sample_report();
        storage.create_report(&report).await.unwrap();

        // No analysis yet
        assert!(storage.get_analysis(report.id).await.unwrap().is_none());

        let analysis = sample_analysis(report.id);
        storage.write_analysis(&analysis).await.unwrap();

        let stored = storage.get_analysis(report.id).await.unwrap().unwrap();
        assert!(stored.is_disaster);
        assert_eq!(stored.disaster_type, DisasterType::Flood);
        assert_eq!(stored.severity, Severity::High);
        assert_eq!(stored.status, ReportStatus::Verified);
        assert_eq!(stored.location.method, LocationMethod::Caption);
        assert_eq!(stored.classification.candidates.len(), 1);
        assert!(!stored.duplicate.is_duplicate);
    }

    #[tokio::test]
    async fn test_reset_analysis_clears_columns() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let report = sample_report();
        storage.create_report(&report).await.unwrap();
        storage
            .write_analysis(&sample_analysis(report.id))
            .await
            .unwrap();

        storage.reset_analysis(report.id).await.unwrap();
        assert!(storage.get_analysis(report.id).await.unwrap().is_none());

        // Fingerprints are gone from the duplicate scan too
        let prints = storage
            .recent_fingerprints(Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert!(prints.is_empty());
    }

    #[tokio::test]
    async fn test_recent_fingerprints_window_and_exclusion() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let report = sample_report();
        storage.create_report(&report).await.unwrap();
        storage
            .write_analysis(&sample_analysis(report.id))
            .await
            .unwrap();

        let all = storage
            .recent_fingerprints(Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].report_id, report.id);

        let excluded = storage
            .recent_fingerprints(Duration::from_secs(3600), Some(report.id))
            .await
            .unwrap();
        assert!(excluded.is_empty());

        // A report from three hours ago falls outside a two-hour window
        let old = Report {
            created_at: Utc::now() - chrono::Duration::hours(3),
            ..sample_report()
        };
        storage.create_report(&old).await.unwrap();
        storage.write_analysis(&sample_analysis(old.id)).await.unwrap();

        let windowed = storage
            .recent_fingerprints(Duration::from_secs(2 * 3600), None)
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].report_id, report.id);
    }

    #[tokio::test]
    async fn test_recent_unhashed_reports() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let pending = sample_report();
        let analyzed = sample_report();
        storage.create_report(&pending).await.unwrap();
        storage.create_report(&analyzed).await.unwrap();
        storage
            .write_analysis(&sample_analysis(analyzed.id))
            .await
            .unwrap();

        // Only the report without a stored fingerprint shows up
        let unhashed = storage
            .recent_unhashed_reports(Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(unhashed.len(), 1);
        assert_eq!(unhashed[0].0, pending.id);
        assert_eq!(unhashed[0].1, pending.image_ref);

        let excluded = storage
            .recent_unhashed_reports(Duration::from_secs(3600), Some(pending.id))
            .await
            .unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn test_pending_report_ids() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let a = sample_report();
        let b = sample_report();
        storage.create_report(&a).await.unwrap();
        storage.create_report(&b).await.unwrap();
        storage.write_analysis(&sample_analysis(a.id)).await.unwrap();

        let pending = storage.pending_report_ids(10).await.unwrap();
        assert_eq!(pending, vec![b.id]);
    }

    #[tokio::test]
    async fn test_dispatch_transitions_enforced() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let report = sample_report();
        storage.create_report(&report).await.unwrap();

        let state = storage
            .update_dispatch(&DispatchRequest {
                report_id: report.id,
                dispatch_status: DispatchStatus::Assigned,
                assigned_team: Some("rescue-7".to_string()),
                resolution_notes: None,
            })
            .await
            .unwrap();
        assert_eq!(state.dispatch_status, DispatchStatus::Assigned);
        assert_eq!(state.assigned_team.as_deref(), Some("rescue-7"));

        // Skipping straight to resolved is rejected
        let err = storage
            .update_dispatch(&DispatchRequest {
                report_id: report.id,
                dispatch_status: DispatchStatus::Resolved,
                assigned_team: None,
                resolution_notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        // Team assignment survives a later transition without one
        let state = storage
            .update_dispatch(&DispatchRequest {
                report_id: report.id,
                dispatch_status: DispatchStatus::InProgress,
                assigned_team: None,
                resolution_notes: None,
            })
            .await
            .unwrap();
        assert_eq!(state.assigned_team.as_deref(), Some("rescue-7"));
    }

    #[tokio::test]
    async fn test_dispatch_on_missing_report() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let err = storage
            .update_dispatch(&DispatchRequest {
                report_id: Uuid::new_v4(),
                dispatch_status: DispatchStatus::Assigned,
                assigned_team: None,
                resolution_notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ReportNotFound(_)));
    }
}
