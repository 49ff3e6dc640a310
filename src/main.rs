use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use groundtruth::api::{AppState, router};
use groundtruth::classifier::TextClassifier;
use groundtruth::config::AppConfig;
use groundtruth::consolidator::Consolidator;
use groundtruth::geo::{
    FixedDelayLimiter, Geocoder, HeuristicSceneClassifier, LocationResolver, NominatimBackend,
};
use groundtruth::services::{
    HttpMediaStore, HttpNerService, HttpOcrEngine, HttpVisionAnalyzer, NerService, OcrEngine,
    VisionAnalyzer,
};
use groundtruth::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("groundtruth=info".parse()?))
        .init();

    // Malformed configuration is fatal; absent optional services are not
    let config = AppConfig::from_env()?;
    info!(port = config.port, db_url = %config.database_url, "Starting Groundtruth server");

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let vision = config
        .vision
        .clone()
        .map(|v| Arc::new(HttpVisionAnalyzer::new(v)) as Arc<dyn VisionAnalyzer>);
    let ocr = config
        .ocr_base_url
        .as_deref()
        .map(|url| Arc::new(HttpOcrEngine::new(url)) as Arc<dyn OcrEngine>);
    let ner = config
        .ner_base_url
        .as_deref()
        .map(|url| Arc::new(HttpNerService::new(url)) as Arc<dyn NerService>);
    info!(
        vision = vision.is_some(),
        ocr = ocr.is_some(),
        ner = ner.is_some(),
        "External services configured (absent ones run degraded)"
    );

    let geocoder = Geocoder::new(
        Arc::new(NominatimBackend::new(&config.geo)),
        Arc::new(FixedDelayLimiter::new(config.geo.rate_limit_delay)),
        config.geo.clone(),
    );
    let resolver = LocationResolver::new(
        geocoder,
        Arc::new(HeuristicSceneClassifier),
        config.geo.clone(),
    );

    let consolidator = Consolidator::new(
        storage.clone(),
        Arc::new(HttpMediaStore::new()),
        vision,
        ocr,
        TextClassifier::new(ner),
        resolver,
        config.dedup.clone(),
    );

    let state = AppState {
        storage,
        consolidator: Arc::new(consolidator),
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Groundtruth is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
