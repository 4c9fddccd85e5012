//! EPC Enrichment Library
//!
//! Enriches UK property records with Energy Performance Certificate data:
//! a local SQLite index bulk-loaded from the government ZIP/CSV release, a
//! rate-limited client for the upstream EPC search API as fallback, and a
//! council-tax band heuristic derived from floor area.
//!
//! # Modules
//!
//! - `api`: HTTP routes.
//! - `core`: Domain logic (normalisation, council tax, summaries).
//! - `data`: Local index (schema, writer, lookups, bulk loader).
//! - `integrations`: Upstream EPC service client and its resilience pieces.
//! - `obs`: Observability and logging.
//! - `cache_validator`: Checksummed response cache entries.
//! - `circuit_breaker`: Circuit breaker around upstream calls.
//! - `config`: Configuration management.
//! - `council_tax`: Floor-area to council-tax band estimator.
//! - `db`: Index schema and connection setup.
//! - `db_storage`: Index write operations and the load ledger.
//! - `enrichment`: Summary assembler (local index, then upstream, then council tax).
//! - `epc_client`: Upstream EPC search client.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `loader`: Bulk ZIP/CSV loader.
//! - `lookup`: Query façade over the local index.
//! - `models`: Core data models.
//! - `normalize`: Row normalisation shared by the loader and the client.
//! - `rate_limiter`: Minimum-spacing limiter for upstream requests.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;
pub mod obs;

// Re-export primary modules for shared use in tests and other binaries
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod council_tax;
pub mod db;
pub mod db_storage;
pub mod enrichment;
pub mod epc_client;
pub mod errors;
pub mod handlers;
pub mod loader;
pub mod lookup;
pub mod models;
pub mod normalize;
pub mod rate_limiter;
