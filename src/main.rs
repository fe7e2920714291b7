pub mod analysis_service;
pub mod api;
pub mod config;
pub mod data_structures;
pub mod utils;
pub mod yahoo;

use crate::data_structures::SharedEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() {
    let app_config = config::AppConfig::load();

    // Initialize tracing with node_name in all logs
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    // Set a global span with node_name for all subsequent logs
    let _span = tracing::info_span!("node", name = %app_config.node_name).entered();

    tracing::info!("Starting valuation-api");
    tracing::info!(
        environment = %app_config.environment,
        port = app_config.port,
        data_base_url = %app_config.data_base_url,
        "Loaded configuration"
    );

    let source = yahoo::YahooClient::from_config(&app_config)
        .expect("Failed to initialize market data client");
    let engine: SharedEngine = Arc::new(analysis_service::ValuationEngine::new(
        Arc::new(source),
        app_config.cache_ttl,
    ));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default().per_second(10).burst_size(20).finish().unwrap(),
    );

    // The dashboard frontend runs on another origin
    let app = Router::new()
        .route("/healthz", get(api::healthz_handler))
        .route(
            "/analyze",
            post(api::analyze_handler).layer(GovernorLayer::new(governor_conf.clone())),
        )
        .route(
            "/analyze_batch",
            post(api::analyze_batch_handler).layer(GovernorLayer::new(governor_conf)),
        )
        .layer(CorsLayer::permissive())
        .with_state(engine);

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap();
}
