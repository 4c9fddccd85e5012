use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use epc_enrichment::api;
use epc_enrichment::config::Config;
use epc_enrichment::handlers::AppState;
use epc_enrichment::obs;

/// Main entry point for the EPC enrichment server.
///
/// Initializes tracing and configuration, wires the lookup service, the
/// rate-limited upstream client and the summary assembler into `AppState`,
/// then serves the HTTP routes with per-IP throttling and permissive CORS.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing("epc_enrichment=debug,tower_http=debug");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let app_state = Arc::new(AppState::from_config(config.clone()));
    if app_state.lookup.is_available() {
        tracing::info!("EPC index: {}", config.epc_db_path.display());
    } else {
        tracing::warn!(
            "EPC index {} missing; run load-epc to build it. Serving from upstream only.",
            config.epc_db_path.display()
        );
    }

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid request throttling configuration"))?,
    );

    let protected_routes = api::epc_routes().layer(ServiceBuilder::new().layer(GovernorLayer {
        config: governor_conf,
    }));

    // Health check bypasses throttling
    let app = axum::Router::new()
        .route("/health", axum::routing::get(api::handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
