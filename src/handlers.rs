use crate::config::Config;
use crate::enrichment::{AssemblerOptions, SummaryAssembler};
use crate::epc_client::EpcClient;
use crate::errors::AppError;
use crate::lookup::{LookupService, DEFAULT_SEARCH_LIMIT};
use crate::models::*;
use crate::normalize::{is_plausible_postcode, normalize_postcode};
use crate::rate_limiter::RateLimiter;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Upper bound on `limit` for postcode searches.
pub const MAX_SEARCH_LIMIT: i64 = 500;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Read-only view of the local EPC index.
    pub lookup: LookupService,
    /// Upstream EPC client (optional; `None` disables remote fallback).
    pub epc_client: Option<EpcClient>,
    /// Local-then-remote orchestration used by the summary endpoint.
    pub assembler: SummaryAssembler,
}

impl AppState {
    /// Wires the services for one process: a single rate limiter shared by
    /// the upstream client, which in turn is shared by the assembler.
    ///
    /// A client that fails to build is logged and left out; summaries then
    /// answer from the local index only.
    pub fn from_config(config: Config) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.epc_rate_limit));
        let lookup = LookupService::new(&config.epc_db_path);

        let epc_client = match EpcClient::new(&config.epc_api, limiter) {
            Ok(client) => {
                tracing::info!("✓ EPC client initialized: {}", config.epc_api.base_url);
                Some(client)
            }
            Err(e) => {
                tracing::error!("Failed to initialize EPC client: {}", e);
                None
            }
        };

        let assembler = SummaryAssembler::new(
            lookup.clone(),
            epc_client.clone(),
            config.council_tax.clone(),
            AssemblerOptions {
                stale_after_days: config.stale_after_days,
                write_through: config.write_through,
            },
        );

        Self {
            config,
            lookup,
            epc_client,
            assembler,
        }
    }
}

fn checked_postcode(raw: &str) -> Result<(), AppError> {
    if is_plausible_postcode(raw) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "'{}' is not a valid UK postcode",
            raw.trim()
        )))
    }
}

/// Health check endpoint.
///
/// Always 200; reports whether the local index is present and whether the
/// upstream client carries credentials.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "epc-enrichment",
            "version": env!("CARGO_PKG_VERSION"),
            "index_available": state.lookup.is_available(),
            "remote_enabled": state.epc_client.is_some(),
            "remote_authenticated": state
                .epc_client
                .as_ref()
                .is_some_and(EpcClient::is_authenticated),
        })),
    )
}

/// GET /api/v1/epc/search?postcode=..&limit=..
///
/// Certificates for a postcode from the local index, most recent first.
pub async fn search_epc(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<EpcRecord>>, AppError> {
    checked_postcode(&params.postcode)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(0, MAX_SEARCH_LIMIT);

    tracing::info!("GET /epc/search - postcode: {}, limit: {}", params.postcode, limit);

    let records = state.lookup.search_by_postcode(&params.postcode, limit).await;
    Ok(Json(records))
}

/// GET /api/v1/epc/find?postcode=..&address=..
///
/// The authoritative (most recent) local certificate. 404 when the index has
/// nothing for the postcode/address, 503 when the index cannot be read.
pub async fn find_epc(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FindParams>,
) -> Result<Json<EpcRecord>, AppError> {
    checked_postcode(&params.postcode)?;
    tracing::info!("GET /epc/find - postcode: {}", params.postcode);

    match state
        .lookup
        .find(&params.postcode, params.address.as_deref())
        .await
    {
        Lookup::Found(record) => Ok(Json(record)),
        Lookup::NotFound => Err(AppError::NotFound(format!(
            "No EPC certificate for {}",
            normalize_postcode(&params.postcode)
        ))),
        Lookup::Unavailable(reason) => Err(AppError::Unavailable(reason)),
    }
}

/// GET /api/v1/epc/stats
pub async fn index_stats(State(state): State<Arc<AppState>>) -> Json<IndexStatistics> {
    Json(state.lookup.statistics().await)
}

/// GET /api/v1/epc/addresses?postcode=..
///
/// Upstream address stubs for dropdown selection; empty when the remote
/// client is disabled or failing.
pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PostcodeParams>,
) -> Result<Json<Vec<AddressStub>>, AppError> {
    checked_postcode(&params.postcode)?;

    let stubs = match &state.epc_client {
        Some(client) => client.list_properties(&params.postcode).await,
        None => Vec::new(),
    };

    tracing::info!(
        "GET /epc/addresses - postcode: {}, {} addresses",
        params.postcode,
        stubs.len()
    );
    Ok(Json(stubs))
}

/// GET /api/v1/properties/summary?postcode=..&address=..
///
/// Always 200 for a plausible postcode; `found: false` means no enrichment.
pub async fn property_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FindParams>,
) -> Result<Json<PropertySummary>, AppError> {
    checked_postcode(&params.postcode)?;

    let summary = state
        .assembler
        .summarize(&params.postcode, params.address.as_deref())
        .await;

    tracing::info!(
        "GET /properties/summary - postcode: {}, found: {}, source: {:?}",
        params.postcode,
        summary.found,
        summary.source
    );
    Ok(Json(summary))
}
