//! Receipt OCR Bridge - streams OCR progress and results for receipt images
//! over a WebSocket session.

mod acquire;
mod assemble;
mod config;
mod error;
mod normalize;
mod ocr;
mod orchestrator;
mod protocol;
mod session;
mod ws;

use acquire::Acquirer;
use axum::{routing::get, Router};
use config::BridgeConfig;
use normalize::Normalizer;
use ocr::SharedEngine;
use orchestrator::Orchestrator;
use session::SessionRegistry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    sessions: SessionRegistry,
    max_message_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "receipt_ocr_bridge=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BridgeConfig::from_env()?;
    info!(
        "Config: backend={:?} lang={} frontend={}",
        config.ocr.backend, config.ocr.lang, config.frontend_base_url
    );

    // Load the OCR engine once; every request reuses it
    let engine = SharedEngine::new(ocr::build_engine(&config.ocr)?, config.ocr.timeout);
    engine.warm_up().await?;
    info!("OCR engine '{}' initialized", engine.name());

    let sessions = SessionRegistry::new();
    let orchestrator = Orchestrator::new(
        Acquirer::new(
            config.frontend_base_url.clone(),
            config.fetch_timeout,
            config.max_image_bytes,
        )?,
        Normalizer::new(config.tmp_dir.clone()),
        engine,
        sessions.clone(),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        sessions,
        max_message_bytes: config.max_message_bytes(),
    };

    let app = router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on ws://{}/ws", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}
