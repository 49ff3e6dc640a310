//! HTTP API handlers for Groundtruth.
//!
//! Handlers are thin: they validate input, call into the engine, map
//! [`EngineError`] to a status code, and log the outcome. All analysis
//! behavior lives in [`crate::consolidator`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::consolidator::{AnalyzeOptions, Consolidator};
use crate::error::EngineError;
use crate::model::{
    AnalyzeRequest, CheckDuplicateRequest, CheckDuplicateResponse, ConsolidatedReport,
    CreateReportRequest, DispatchRequest, Report, ResetAnalysisRequest,
};
use crate::storage::{DispatchState, Storage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub consolidator: Arc<Consolidator>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/reports", post(create_report))
        .route("/reports/:id", get(get_report))
        .route("/analyze", post(analyze_report))
        .route("/check-duplicate", post(check_duplicate))
        .route("/reset-analysis", post(reset_analysis))
        .route("/dispatch", post(update_dispatch))
        .route("/process-pending", post(process_pending))
        .route("/health", get(health_check))
        .with_state(state)
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::ReportNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        EngineError::Configuration(_)
        | EngineError::Storage(_)
        | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Response body for GET /reports/:id.
#[derive(Debug, Serialize)]
pub struct ReportDetail {
    pub report: Report,

    /// `None` until analysis has run.
    pub analysis: Option<ConsolidatedReport>,

    pub dispatch: DispatchState,
}

/// Response body for POST /process-pending.
#[derive(Debug, Serialize)]
pub struct ProcessPendingResponse {
    pub analyzed: u32,
}

/// POST /reports - Submit a new report.
///
/// # Request Body
///
/// ```json
/// {
///     "caption": "Flood near Silk Board Junction",
///     "image_ref": "https://media.example/reports/42.jpg",
///     "ocr_text": null,
///     "latitude": null,
///     "longitude": null
/// }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the stored report, including its assigned id.
#[instrument(skip(state, request))]
pub async fn create_report(
    State(state): State<AppState>,
    Json(request): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), StatusCode> {
    if request.image_ref.trim().is_empty() {
        warn!("Report submitted without an image reference");
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.caption.trim().is_empty() && request.ocr_text.is_none() {
        warn!("Report submitted with no text at all");
        return Err(StatusCode::BAD_REQUEST);
    }

    let report = Report {
        id: Uuid::new_v4(),
        caption: request.caption,
        ocr_text: request.ocr_text,
        image_ref: request.image_ref,
        latitude: request.latitude,
        longitude: request.longitude,
        created_at: Utc::now(),
    };

    match state.storage.create_report(&report).await {
        Ok(()) => {
            info!(report_id = %report.id, "Report created");
            Ok((StatusCode::CREATED, Json(report)))
        }
        Err(e) => {
            warn!(error = %e, "Failed to create report");
            Err(status_for(&e))
        }
    }
}

/// GET /reports/:id - Fetch a report with its analysis and dispatch state.
#[instrument(skip(state))]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportDetail>, StatusCode> {
    let report = state.storage.get_report(id).await.map_err(|e| {
        warn!(report_id = %id, error = %e, "Failed to fetch report");
        status_for(&e)
    })?;
    let analysis = state.storage.get_analysis(id).await.map_err(|e| {
        warn!(report_id = %id, error = %e, "Failed to fetch analysis");
        status_for(&e)
    })?;
    let dispatch = state.storage.get_dispatch(id).await.map_err(|e| {
        warn!(report_id = %id, error = %e, "Failed to fetch dispatch state");
        status_for(&e)
    })?;

    Ok(Json(ReportDetail {
        report,
        analysis,
        dispatch,
    }))
}

/// POST /analyze - Run the full analysis pipeline for a report.
///
/// # Request Body
///
/// ```json
/// {
///     "report_id": "7b0c...",
///     "skip_duplicate_check": false
/// }
/// ```
///
/// # Response
///
/// The consolidated analysis. Re-analyzing overwrites the stored result.
#[instrument(skip(state, request), fields(report_id = %request.report_id))]
pub async fn analyze_report(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ConsolidatedReport>, StatusCode> {
    let options = AnalyzeOptions {
        skip_duplicate_check: request.skip_duplicate_check,
    };

    match state.consolidator.analyze(request.report_id, options).await {
        Ok(analysis) => {
            info!(
                report_id = %request.report_id,
                status = analysis.status.as_str(),
                "Report analyzed"
            );
            Ok(Json(analysis))
        }
        Err(e) => {
            warn!(report_id = %request.report_id, error = %e, "Analysis failed");
            Err(status_for(&e))
        }
    }
}

/// POST /check-duplicate - Check an image against recent reports without
/// creating one.
///
/// # Request Body
///
/// ```json
/// {
///     "image_ref": "https://media.example/reports/42.jpg",
///     "window_hours": 2
/// }
/// ```
#[instrument(skip(state, request))]
pub async fn check_duplicate(
    State(state): State<AppState>,
    Json(request): Json<CheckDuplicateRequest>,
) -> Result<Json<CheckDuplicateResponse>, StatusCode> {
    let window = Duration::from_secs(u64::from(request.window_hours) * 3600);

    match state
        .consolidator
        .check_duplicate(&request.image_ref, window)
        .await
    {
        Ok(check) => {
            let message = if check.is_duplicate {
                format!(
                    "image matches a report from the last {} hour(s)",
                    request.window_hours
                )
            } else {
                "no recent match".to_string()
            };
            info!(is_duplicate = check.is_duplicate, "Duplicate check complete");
            Ok(Json(CheckDuplicateResponse {
                is_duplicate: check.is_duplicate,
                matched_report_id: check.matched_report_id,
                message,
            }))
        }
        Err(e) => {
            warn!(error = %e, "Duplicate check failed");
            Err(status_for(&e))
        }
    }
}

/// POST /reset-analysis - Clear a report's analysis so it can be re-run.
///
/// Returns `204 No Content` on success.
#[instrument(skip(state, request), fields(report_id = %request.report_id))]
pub async fn reset_analysis(
    State(state): State<AppState>,
    Json(request): Json<ResetAnalysisRequest>,
) -> Result<StatusCode, StatusCode> {
    match state.consolidator.reset_analysis(request.report_id).await {
        Ok(()) => {
            info!(report_id = %request.report_id, "Analysis reset");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            warn!(report_id = %request.report_id, error = %e, "Failed to reset analysis");
            Err(status_for(&e))
        }
    }
}

/// POST /dispatch - Advance a report through the dispatch workflow.
///
/// Transitions are validated: pending -> assigned -> in-progress -> resolved,
/// with single-step rollbacks allowed and `resolved` terminal. An invalid
/// transition returns `409 Conflict`.
#[instrument(skip(state, request), fields(report_id = %request.report_id))]
pub async fn update_dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchState>, StatusCode> {
    match state.storage.update_dispatch(&request).await {
        Ok(dispatch) => {
            info!(
                report_id = %request.report_id,
                dispatch_status = dispatch.dispatch_status.as_str(),
                "Dispatch updated"
            );
            Ok(Json(dispatch))
        }
        Err(e) => {
            warn!(report_id = %request.report_id, error = %e, "Dispatch update failed");
            Err(status_for(&e))
        }
    }
}

/// POST /process-pending - Analyze every report still awaiting analysis.
#[instrument(skip(state))]
pub async fn process_pending(
    State(state): State<AppState>,
) -> Result<Json<ProcessPendingResponse>, StatusCode> {
    match state.consolidator.process_pending(100).await {
        Ok(analyzed) => {
            info!(analyzed, "Pending reports processed");
            Ok(Json(ProcessPendingResponse { analyzed }))
        }
        Err(e) => {
            warn!(error = %e, "Failed to process pending reports");
            Err(status_for(&e))
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
