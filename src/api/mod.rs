// Thin namespace wrapper for API-layer components
use axum::{routing::get, Router};
use std::sync::Arc;

pub mod handlers {
    pub use crate::handlers::*;
}

/// The `/api/v1` EPC and property routes, without per-IP throttling.
pub fn epc_routes() -> Router<Arc<handlers::AppState>> {
    Router::new()
        .route("/api/v1/epc/search", get(handlers::search_epc))
        .route("/api/v1/epc/find", get(handlers::find_epc))
        .route("/api/v1/epc/stats", get(handlers::index_stats))
        .route("/api/v1/epc/addresses", get(handlers::list_addresses))
        .route("/api/v1/properties/summary", get(handlers::property_summary))
}

/// Health check plus the EPC routes, bound to `state`.
pub fn router(state: Arc<handlers::AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(epc_routes())
        .with_state(state)
}
