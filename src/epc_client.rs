use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cache_validator::CachedRows;
use crate::circuit_breaker::{create_epc_circuit_breaker, EpcCircuitBreaker};
use crate::config::EpcApiSettings;
use crate::errors::AppError;
use crate::models::{AddressStub, EpcRecord, Lookup};
use crate::normalize::{normalize_postcode, parse_date, record_from_fields, FieldSource};
use crate::rate_limiter::RateLimiter;

/// Page size requested from the upstream search endpoint.
pub const PAGE_SIZE: usize = 100;

type Rows = Vec<Map<String, Value>>;

/// Client for the government EPC domestic search API.
///
/// Every network request waits on the shared [`RateLimiter`] and runs inside
/// a circuit breaker. Responses are cached per compressed postcode. Failures
/// are logged and surfaced as `Lookup::Unavailable` or empty lists; nothing
/// here returns an error once the client is built.
#[derive(Clone)]
pub struct EpcClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    limiter: Arc<RateLimiter>,
    breaker: EpcCircuitBreaker,
    cache: Option<Cache<String, String>>,
}

impl EpcClient {
    /// Creates a new `EpcClient`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Base URL, credentials, timeout and cache TTL.
    /// * `limiter` - The process-wide limiter shared by every upstream caller.
    pub fn new(settings: &EpcApiSettings, limiter: Arc<RateLimiter>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create EPC client: {}", e))
            })?;

        let credentials = match (&settings.email, &settings.api_key) {
            (Some(email), Some(key)) => Some((email.clone(), key.clone())),
            _ => {
                tracing::warn!("EPC client has no credentials; requests will be sent unauthenticated");
                None
            }
        };

        let cache = (!settings.cache_ttl.is_zero()).then(|| {
            Cache::builder()
                .time_to_live(settings.cache_ttl)
                .max_capacity(10_000)
                .build()
        });

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
            limiter,
            breaker: create_epc_circuit_breaker(),
            cache,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Address stubs for a postcode, for dropdown selection. Empty on any failure.
    pub async fn list_properties(&self, postcode: &str) -> Vec<AddressStub> {
        let rows = match self.search_rows(postcode).await {
            Ok(rows) => rows,
            Err(_) => return Vec::new(),
        };

        rows.iter()
            .take(PAGE_SIZE)
            .map(|row| AddressStub {
                address: row.field("address").unwrap_or_default(),
                property_type: row.field("property_type").unwrap_or_default(),
                built_form: row.field("built_form").unwrap_or_default(),
                inspection_date: parse_date(row.field("inspection_date").as_deref()),
            })
            .collect()
    }

    /// Most recent certificate for a postcode, optionally narrowed by a
    /// case-insensitive address substring.
    pub async fn get_epc(&self, postcode: &str, address: Option<&str>) -> Lookup<EpcRecord> {
        let rows = match self.search_rows(postcode).await {
            Ok(rows) => rows,
            Err(reason) => return Lookup::Unavailable(reason),
        };

        let needle = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase);

        let mut records: Vec<EpcRecord> = rows
            .iter()
            .filter_map(record_from_fields)
            .filter(|record| match &needle {
                Some(needle) => record.address.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .collect();

        // None sorts before Some, so undated rows end up last.
        records.sort_by(|a, b| b.inspection_date.cmp(&a.inspection_date));

        match records.into_iter().next() {
            Some(record) => Lookup::Found(record),
            None => Lookup::NotFound,
        }
    }

    async fn search_rows(&self, postcode: &str) -> Result<Rows, String> {
        let postcode = normalize_postcode(postcode);
        if postcode.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&postcode).await {
                if let Some(rows) = CachedRows::deserialize_and_validate(&cached) {
                    tracing::debug!("EPC cache hit for {}", postcode);
                    return Ok(rows);
                }
                cache.invalidate(&postcode).await;
            }
        }

        let fetch = async {
            self.limiter.acquire().await;
            self.fetch_rows(&postcode).await
        };

        match self.breaker.call(fetch).await {
            Ok(rows) => {
                if let Some(cache) = &self.cache {
                    cache
                        .insert(postcode.clone(), CachedRows::new(&rows).serialize())
                        .await;
                }
                Ok(rows)
            }
            Err(failsafe::Error::Inner(reason)) => Err(reason),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("EPC circuit open; skipping upstream lookup for {}", postcode);
                Err("EPC service unavailable (circuit open)".to_string())
            }
        }
    }

    async fn fetch_rows(&self, postcode: &str) -> Result<Rows, String> {
        let url = format!("{}/domestic/search", self.base_url);
        tracing::info!("Fetching EPC rows for {} from {}", postcode, url);

        let size = PAGE_SIZE.to_string();
        let mut request = self
            .client
            .get(&url)
            .query(&[("postcode", postcode), ("size", size.as_str())])
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some((email, key)) = &self.credentials {
            request = request.basic_auth(email, Some(key));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("EPC request for {} failed: {}", postcode, e);
            format!("EPC request failed: {}", e)
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("EPC API returned {} for {}: {}", status, postcode, body);
            return Err(format!("EPC API returned {}", status));
        }

        let body = response.text().await.map_err(|e| {
            tracing::error!("Failed to read EPC response for {}: {}", postcode, e);
            format!("Failed to read EPC response: {}", e)
        })?;

        parse_rows(&body).map_err(|e| {
            tracing::error!("Failed to parse EPC response for {}: {}", postcode, e);
            format!("Failed to parse EPC response: {}", e)
        })
    }
}

/// Extracts the `rows` array of a search response. The upstream answers an
/// unmatched postcode with an empty body, which counts as no rows.
fn parse_rows(body: &str) -> Result<Rows, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(body)?;
    let rows = value
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.as_object().cloned())
                .collect()
        })
        .unwrap_or_default();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_rows_tolerates_empty_and_missing() {
        assert!(parse_rows("").unwrap().is_empty());
        assert!(parse_rows("{}").unwrap().is_empty());
        assert!(parse_rows("not json").is_err());

        let rows = parse_rows(r#"{"column-names": [], "rows": [{"lmk-key": "k1"}, 7]}"#).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("lmk_key").as_deref(), Some("k1"));
    }

    #[test]
    fn test_authentication_requires_both_credentials() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));

        let partial = EpcApiSettings {
            email: Some("agent@example.co.uk".to_string()),
            ..EpcApiSettings::default()
        };
        assert!(!EpcClient::new(&partial, limiter.clone()).unwrap().is_authenticated());

        let full = EpcApiSettings {
            api_key: Some("key".to_string()),
            ..partial
        };
        assert!(EpcClient::new(&full, limiter).unwrap().is_authenticated());
    }
}
