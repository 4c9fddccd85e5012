use std::path::PathBuf;
use std::time::Duration;

use crate::council_tax::{CouncilTaxEstimator, DEFAULT_THRESHOLDS};
use crate::rate_limiter::DEFAULT_MIN_INTERVAL;

pub const DEFAULT_DB_PATH: &str = "data/epc/epc.db";
pub const DEFAULT_EPC_API_BASE_URL: &str = "https://epc.opendatacommunities.org/api/v1";
/// Largest accepted freshness window (100 years).
pub const MAX_STALE_AFTER_DAYS: i64 = 36_500;

/// Settings for the upstream EPC client.
#[derive(Debug, Clone)]
pub struct EpcApiSettings {
    pub base_url: String,
    /// `UK_EPC_API_EMAIL`; `None` means unauthenticated requests.
    pub email: Option<String>,
    /// `UK_EPC_API_KEY`; `None` means unauthenticated requests.
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Response cache TTL; zero disables the cache.
    pub cache_ttl: Duration,
}

impl Default for EpcApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EPC_API_BASE_URL.to_string(),
            email: None,
            api_key: None,
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub epc_db_path: PathBuf,
    pub epc_api: EpcApiSettings,
    /// Minimum spacing between upstream requests (rate limiter δ).
    pub epc_rate_limit: Duration,
    pub council_tax: CouncilTaxEstimator,
    /// Local records lodged longer ago than this trigger a remote freshness check.
    pub stale_after_days: Option<i64>,
    /// Persist remote hits into the local index.
    pub write_through: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            epc_db_path: PathBuf::from(DEFAULT_DB_PATH),
            epc_api: EpcApiSettings::default(),
            epc_rate_limit: DEFAULT_MIN_INTERVAL,
            council_tax: CouncilTaxEstimator::default(),
            stale_after_days: None,
            write_through: false,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = optional_var("EPC_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_EPC_API_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("EPC_API_BASE_URL must start with http:// or https://");
        }

        let council_tax = match optional_var("EPC_COUNCIL_TAX_THRESHOLDS") {
            Some(table) => CouncilTaxEstimator::parse(&table)
                .map_err(|e| anyhow::anyhow!("EPC_COUNCIL_TAX_THRESHOLDS: {}", e))?,
            None => CouncilTaxEstimator::new(&DEFAULT_THRESHOLDS)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?,
        };

        let stale_after_days = optional_var("EPC_STALE_AFTER_DAYS")
            .map(|raw| parse_stale_after_days(&raw))
            .transpose()?;

        let config = Self {
            port: parse_var("PORT", 3000u16)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            epc_db_path: optional_var("EPC_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            epc_api: EpcApiSettings {
                base_url: base_url.trim_end_matches('/').to_string(),
                email: optional_var("UK_EPC_API_EMAIL"),
                api_key: optional_var("UK_EPC_API_KEY"),
                timeout: Duration::from_secs(parse_var("EPC_REQUEST_TIMEOUT_SECS", 10u64)?),
                cache_ttl: Duration::from_secs(parse_var("EPC_CACHE_TTL_SECS", 3600u64)?),
            },
            epc_rate_limit: Duration::from_millis(parse_var(
                "EPC_RATE_LIMIT_MS",
                DEFAULT_MIN_INTERVAL.as_millis() as u64,
            )?),
            council_tax,
            stale_after_days,
            write_through: parse_var("EPC_WRITE_THROUGH", false)?,
        };

        // Log configuration without credential values
        tracing::debug!("EPC index path: {}", config.epc_db_path.display());
        tracing::debug!("EPC API base URL: {}", config.epc_api.base_url);
        tracing::debug!("EPC rate limit: {:?}", config.epc_rate_limit);
        tracing::debug!("Server Port: {}", config.port);
        if config.epc_api.email.is_none() || config.epc_api.api_key.is_none() {
            tracing::warn!("UK_EPC_API_EMAIL / UK_EPC_API_KEY not set; upstream EPC requests will be unauthenticated");
        }

        Ok(config)
    }
}

fn parse_stale_after_days(raw: &str) -> anyhow::Result<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("EPC_STALE_AFTER_DAYS must be a whole number of days"))?;
    if !(1..=MAX_STALE_AFTER_DAYS).contains(&days) {
        anyhow::bail!(
            "EPC_STALE_AFTER_DAYS must be between 1 and {}",
            MAX_STALE_AFTER_DAYS
        );
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_after_days_bounds() {
        assert_eq!(parse_stale_after_days("30").unwrap(), 30);
        assert_eq!(parse_stale_after_days(" 36500 ").unwrap(), MAX_STALE_AFTER_DAYS);
        assert!(parse_stale_after_days("0").is_err());
        assert!(parse_stale_after_days("-5").is_err());
        assert!(parse_stale_after_days("36501").is_err());
        assert!(parse_stale_after_days("100000000").is_err());
        assert!(parse_stale_after_days("a year").is_err());
    }
}
