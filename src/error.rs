//! Error taxonomy for the analysis engine.
//!
//! External-service failures (vision, OCR, NER, geocoder, scene classifier)
//! are *degradable*: they are recovered locally with a defined fallback and
//! never surface through this type. What remains are input errors, storage
//! faults, and configuration problems that are fatal at startup.

use thiserror::Error;
use uuid::Uuid;

use crate::model::DispatchStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("report not found: {0}")]
    ReportNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid dispatch transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: DispatchStatus,
        to: DispatchStatus,
    },

    /// Missing or malformed mandatory configuration. Fatal at process start,
    /// never produced per-request.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Stored analysis columns failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
