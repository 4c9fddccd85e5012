/// HTTP surface: routes driven in-process through `api::router`.
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use epc_enrichment::api;
use epc_enrichment::config::{Config, EpcApiSettings};
use epc_enrichment::db_storage::IndexWriter;
use epc_enrichment::handlers::AppState;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state(db: &Path, upstream: &MockServer) -> Arc<AppState> {
    let config = Config {
        epc_db_path: db.to_path_buf(),
        epc_api: EpcApiSettings {
            base_url: upstream.uri(),
            email: Some("agent@example.co.uk".to_string()),
            api_key: Some("test-key".to_string()),
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::ZERO,
        },
        epc_rate_limit: Duration::ZERO,
        ..Config::default()
    };
    Arc::new(AppState::from_config(config))
}

async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let response = api::router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn upstream_with_row() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domestic/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [{
                "lmk-key": "k1",
                "address": "Flat 3, 1 Oxford Road",
                "postcode": "M1 4BT",
                "current-energy-rating": "C",
                "property-type": "Flat",
                "built-form": "Mid-Terrace",
                "inspection-date": "2021-03-04",
                "total-floor-area": "72.0"
            }]
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_health_reports_index_and_credentials() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = get(state(&dir.path().join("epc.db"), &upstream), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["index_available"], false);
    assert_eq!(body["remote_authenticated"], true);
}

#[tokio::test]
async fn test_invalid_postcode_is_rejected() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let state = state(&dir.path().join("epc.db"), &upstream);

    for uri in [
        "/api/v1/epc/search?postcode=not-a-postcode",
        "/api/v1/epc/find?postcode=12345",
        "/api/v1/epc/addresses?postcode=",
        "/api/v1/properties/summary?postcode=ZZZZ",
    ] {
        let (status, body) = get(state.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["error"].as_str().unwrap().contains("postcode"), "{}", uri);
    }
}

#[tokio::test]
async fn test_summary_endpoint_uses_remote_fallback() {
    let upstream = upstream_with_row().await;
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = get(
        state(&dir.path().join("epc.db"), &upstream),
        "/api/v1/properties/summary?postcode=M1%204BT",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], true);
    assert_eq!(body["postcode"], "M1 4BT");
    assert_eq!(body["council_tax_band"], "D");
    assert_eq!(body["council_tax_estimated"], true);
    assert_eq!(body["source"], "remote_api");
    assert_eq!(body["epc"]["current_rating"], "C");
}

#[tokio::test]
async fn test_find_distinguishes_missing_index_from_miss() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("epc.db");

    let (status, _) = get(state(&db, &upstream), "/api/v1/epc/find?postcode=M14BT").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    IndexWriter::open(&db).await.unwrap().close().await.unwrap();
    let (status, _) = get(state(&db, &upstream), "/api/v1/epc/find?postcode=M14BT").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_and_stats_on_empty_index() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("epc.db");
    IndexWriter::open(&db).await.unwrap().close().await.unwrap();
    let state = state(&db, &upstream);

    let (status, body) = get(state.clone(), "/api/v1/epc/search?postcode=sw1a1aa&limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = get(state, "/api/v1/epc/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert_eq!(body["total_records"], 0);
}

#[tokio::test]
async fn test_addresses_endpoint_lists_upstream_stubs() {
    let upstream = upstream_with_row().await;
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = get(
        state(&dir.path().join("epc.db"), &upstream),
        "/api/v1/epc/addresses?postcode=M14BT",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["address"], "Flat 3, 1 Oxford Road");
    assert_eq!(body[0]["inspection_date"], "2021-03-04");
}
