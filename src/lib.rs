//! Groundtruth - report analysis and location resolution for disaster response.
//!
//! # Overview
//!
//! Groundtruth ingests disaster reports from the field (an image plus a short
//! caption, optionally OCR text and device coordinates) and produces one
//! consolidated, confidence-scored assessment per report:
//!
//! - **Deduplication**: perceptual image hashing catches the same photo
//!   recirculating across submissions within a time window.
//! - **Classification**: a rule-based keyword classifier types the disaster
//!   and scores urgency from the text; an optional vision-language service
//!   adds an image verdict.
//! - **Location resolution**: place names extracted from OCR text, the
//!   caption, and image context are geocoded and combined with device GPS
//!   into one best location with an explicit confidence and ambiguity flag.
//!
//! Every external service (vision, OCR, NER, geocoding, media store) is
//! degradable: failures fall back to a defined local behavior and never
//! abort an analysis.
//!
//! # API Endpoints
//!
//! - `POST /reports` - Submit a report
//! - `GET /reports/:id` - Fetch a report with analysis and dispatch state
//! - `POST /analyze` - Run the analysis pipeline for a report
//! - `POST /check-duplicate` - Check an image against recent reports
//! - `POST /reset-analysis` - Clear an analysis for re-running
//! - `POST /dispatch` - Advance the dispatch workflow
//! - `POST /process-pending` - Analyze the backlog
//! - `GET /health` - Health check
//!
//! # Modules
//!
//! - [`model`]: Data types for reports, classifications, and locations
//! - [`fingerprint`]: Perceptual hashing and duplicate detection
//! - [`classifier`]: Keyword classification and urgency scoring
//! - [`geo`]: Candidate extraction, geocoding, and location resolution
//! - [`services`]: Clients for external vision/OCR/NER/media services
//! - [`consolidator`]: The analysis pipeline and merge rules
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod classifier;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod fingerprint;
pub mod geo;
pub mod model;
pub mod services;
pub mod storage;
