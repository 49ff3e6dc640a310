//! Integration tests for Groundtruth API endpoints.
//!
//! These tests verify the full request/response cycle through the HTTP API,
//! with external services replaced by local stubs.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use image::{ImageBuffer, Rgb};
use serde_json::json;

use groundtruth::api::{AppState, router};
use groundtruth::classifier::TextClassifier;
use groundtruth::config::{DedupConfig, GeoConfig};
use groundtruth::consolidator::Consolidator;
use groundtruth::geo::{GeocodeBackend, Geocoder, LocationResolver, NoDelayLimiter};
use groundtruth::geo::scene::{SceneClassifier, SceneHint};
use groundtruth::model::{GeocodePlaceKind, GeocodeResult, SceneCategory};
use groundtruth::services::MediaStore;
use groundtruth::storage::Storage;

/// Media store serving synthetic fixtures: a smooth gradient for most
/// references, a checkerboard for references containing "other" (perceptually
/// distinct from the gradient), and a failure for references containing
/// "missing".
struct FixtureMedia;

#[async_trait]
impl MediaStore for FixtureMedia {
    async fn fetch(&self, image_ref: &str) -> anyhow::Result<Vec<u8>> {
        if image_ref.contains("missing") {
            anyhow::bail!("object not found: {image_ref}");
        }
        if image_ref.contains("other") {
            Ok(checkerboard_png())
        } else {
            Ok(gradient_png())
        }
    }
}

fn encode_png(img: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn gradient_png() -> Vec<u8> {
    encode_png(ImageBuffer::from_fn(64, 64, |x, y| {
        Rgb([(x * 3) as u8, (y * 3) as u8, 128u8])
    }))
}

fn checkerboard_png() -> Vec<u8> {
    encode_png(ImageBuffer::from_fn(64, 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([255u8, 255, 255])
        } else {
            Rgb([0u8, 0, 0])
        }
    }))
}

/// Geocode stub answering known Bangalore place names.
struct FixtureGeocode;

#[async_trait]
impl GeocodeBackend for FixtureGeocode {
    async fn search(&self, query: &str, _limit: u32) -> anyhow::Result<Vec<GeocodeResult>> {
        let lower = query.to_lowercase();
        if lower.contains("silk board") {
            return Ok(vec![GeocodeResult {
                latitude: 12.9172,
                longitude: 77.6229,
                display_name: "Silk Board Junction, Hosur Road, Bangalore".to_string(),
                kind: GeocodePlaceKind::Road,
                importance: 0.5,
            }]);
        }
        if lower.contains("koramangala") {
            return Ok(vec![GeocodeResult {
                latitude: 12.9352,
                longitude: 77.6245,
                display_name: "Koramangala, Bangalore".to_string(),
                kind: GeocodePlaceKind::Locality,
                importance: 0.6,
            }]);
        }
        Ok(vec![])
    }

    async fn reverse(&self, _lat: f64, _lon: f64) -> anyhow::Result<Option<String>> {
        Ok(Some("BTM Layout, Bangalore".to_string()))
    }
}

struct NoScene;

#[async_trait]
impl SceneClassifier for NoScene {
    async fn classify_scene(&self, _image_bytes: &[u8]) -> SceneHint {
        SceneHint {
            category: SceneCategory::Unknown,
            confidence: 0.0,
        }
    }
}

async fn create_test_server() -> TestServer {
    let storage = Storage::new("sqlite::memory:").await.unwrap();

    let geo = GeoConfig::default();
    let geocoder = Geocoder::new(
        Arc::new(FixtureGeocode),
        Arc::new(NoDelayLimiter),
        geo.clone(),
    );
    let resolver = LocationResolver::new(geocoder, Arc::new(NoScene), geo);

    let consolidator = Consolidator::new(
        storage.clone(),
        Arc::new(FixtureMedia),
        None,
        None,
        TextClassifier::new(None),
        resolver,
        DedupConfig::default(),
    );

    let state = AppState {
        storage,
        consolidator: Arc::new(consolidator),
    };

    TestServer::new(router(state)).unwrap()
}

async fn submit_report(server: &TestServer, body: serde_json::Value) -> serde_json::Value {
    let response = server.post("/reports").json(&body).await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;

    let response = server.get("/health").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_create_report_returns_id() {
    let server = create_test_server().await;

    let body = submit_report(
        &server,
        json!({
            "caption": "Flood near Silk Board Junction",
            "image_ref": "https://media.local/reports/1.jpg"
        }),
    )
    .await;

    assert!(body["id"].as_str().is_some());
    assert_eq!(body["caption"], "Flood near Silk Board Junction");
}

#[tokio::test]
async fn test_create_report_requires_image_ref() {
    let server = create_test_server().await;

    let response = server
        .post("/reports")
        .json(&json!({
            "caption": "Flooding",
            "image_ref": ""
        }))
        .await;

    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analyze_flood_report() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Flood near Silk Board Junction, water rising",
            "image_ref": "https://media.local/reports/2.jpg"
        }),
    )
    .await;

    let response = server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["is_disaster"], true);
    assert_eq!(body["disaster_type"], "flood");
    assert_eq!(body["status"], "verified");
    assert_eq!(body["location"]["method"], "caption");
    assert!(body["location"]["confidence"].as_f64().unwrap() >= 0.6);
    assert_eq!(body["location"]["is_ambiguous"], false);
    assert_eq!(
        body["location"]["display_name"],
        "Silk Board Junction, Hosur Road, Bangalore"
    );
}

#[tokio::test]
async fn test_analyze_gps_report_uses_device_coordinates() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Fire here, send help",
            "image_ref": "https://media.local/reports/3.jpg",
            "latitude": 12.97,
            "longitude": 77.59
        }),
    )
    .await;

    let response = server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["location"]["method"], "device-gps");
    assert_eq!(body["location"]["latitude"], 12.97);
    assert_eq!(body["location"]["confidence"], 1.0);
    // Reverse geocode attaches a display name without touching coordinates
    assert_eq!(body["location"]["display_name"], "BTM Layout, Bangalore");
}

#[tokio::test]
async fn test_analyze_unknown_report() {
    let server = create_test_server().await;

    let response = server
        .post("/analyze")
        .json(&json!({ "report_id": "00000000-0000-0000-0000-000000000000" }))
        .await;

    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_flagged_but_still_analyzed() {
    let server = create_test_server().await;

    // Same image_ref, so the fixture store serves identical bytes
    let first = submit_report(
        &server,
        json!({
            "caption": "Flood at Koramangala",
            "image_ref": "https://media.local/reports/dup.jpg"
        }),
    )
    .await;
    let second = submit_report(
        &server,
        json!({
            "caption": "Flooding again at Koramangala",
            "image_ref": "https://media.local/reports/dup.jpg"
        }),
    )
    .await;

    server
        .post("/analyze")
        .json(&json!({ "report_id": first["id"] }))
        .await
        .assert_status_ok();

    let response = server
        .post("/analyze")
        .json(&json!({ "report_id": second["id"] }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["duplicate"]["is_duplicate"], true);
    assert_eq!(body["duplicate"]["matched_report_id"], first["id"]);
    // Advisory: the duplicate still carries a full analysis
    assert_eq!(body["is_disaster"], true);
}

#[tokio::test]
async fn test_check_duplicate_endpoint() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Flood at Koramangala",
            "image_ref": "https://media.local/reports/dup2.jpg"
        }),
    )
    .await;
    server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await
        .assert_status_ok();

    let response = server
        .post("/check-duplicate")
        .json(&json!({
            "image_ref": "https://media.local/reports/dup2.jpg",
            "window_hours": 1
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["is_duplicate"], true);
    assert_eq!(body["matched_report_id"], report["id"]);

    // A different image does not match
    let response = server
        .post("/check-duplicate")
        .json(&json!({
            "image_ref": "https://media.local/reports/other.png",
            "window_hours": 1
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_duplicate"], false);
}

#[tokio::test]
async fn test_reset_analysis_and_reanalyze() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Building collapse at Koramangala, people trapped",
            "image_ref": "https://media.local/reports/4.jpg"
        }),
    )
    .await;

    server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await
        .assert_status_ok();

    let response = server
        .post("/reset-analysis")
        .json(&json!({ "report_id": report["id"] }))
        .await;
    response.assert_status(axum::http::StatusCode::NO_CONTENT);

    let detail: serde_json::Value = server
        .get(&format!("/reports/{}", report["id"].as_str().unwrap()))
        .await
        .json();
    assert!(detail["analysis"].is_null());

    // Re-analysis works after a reset
    server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_report_detail_includes_analysis_and_dispatch() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Flood near Silk Board Junction",
            "image_ref": "https://media.local/reports/5.jpg"
        }),
    )
    .await;
    server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await
        .assert_status_ok();

    let response = server
        .get(&format!("/reports/{}", report["id"].as_str().unwrap()))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["report"]["id"], report["id"]);
    assert_eq!(body["analysis"]["disaster_type"], "flood");
    assert_eq!(body["dispatch"]["dispatch_status"], "pending");
}

#[tokio::test]
async fn test_dispatch_workflow() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Flood near Silk Board Junction",
            "image_ref": "https://media.local/reports/6.jpg"
        }),
    )
    .await;

    // Skipping straight to resolved is rejected
    let response = server
        .post("/dispatch")
        .json(&json!({
            "report_id": report["id"],
            "dispatch_status": "resolved"
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);

    // Step through the valid transitions
    let response = server
        .post("/dispatch")
        .json(&json!({
            "report_id": report["id"],
            "dispatch_status": "assigned",
            "assigned_team": "rescue-7"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["dispatch_status"], "assigned");
    assert_eq!(body["assigned_team"], "rescue-7");

    server
        .post("/dispatch")
        .json(&json!({
            "report_id": report["id"],
            "dispatch_status": "in-progress"
        }))
        .await
        .assert_status_ok();

    let response = server
        .post("/dispatch")
        .json(&json!({
            "report_id": report["id"],
            "dispatch_status": "resolved",
            "resolution_notes": "water receded, area cleared"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["dispatch_status"], "resolved");

    // Resolved is terminal
    let response = server
        .post("/dispatch")
        .json(&json!({
            "report_id": report["id"],
            "dispatch_status": "pending"
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_process_pending() {
    let server = create_test_server().await;

    submit_report(
        &server,
        json!({
            "caption": "Flood one at Koramangala",
            "image_ref": "https://media.local/reports/7.jpg"
        }),
    )
    .await;
    submit_report(
        &server,
        json!({
            "caption": "Flood two near Silk Board Junction",
            "image_ref": "https://media.local/reports/8.jpg"
        }),
    )
    .await;

    let response = server.post("/process-pending").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["analyzed"], 2);

    // Nothing left to do on the second pass
    let body: serde_json::Value = server.post("/process-pending").await.json();
    assert_eq!(body["analyzed"], 0);
}

#[tokio::test]
async fn test_unfetchable_image_still_analyzes_text() {
    let server = create_test_server().await;

    let report = submit_report(
        &server,
        json!({
            "caption": "Fire and smoke everywhere, people injured",
            "image_ref": "https://media.local/reports/missing.jpg"
        }),
    )
    .await;

    let response = server
        .post("/analyze")
        .json(&json!({ "report_id": report["id"] }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["is_disaster"], true);
    assert_eq!(body["disaster_type"], "fire");
    assert!(body["fingerprint"]["average_hash"].is_null());
}
