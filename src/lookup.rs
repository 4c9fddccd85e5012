use sqlx::{Connection, SqliteConnection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db;
use crate::models::{EpcRecord, IndexStatistics, Lookup};
use crate::normalize::normalize_postcode;

pub const DEFAULT_SEARCH_LIMIT: i64 = 50;

/// Query façade over the local EPC index.
///
/// Answers strictly from the index file: it never calls the upstream service.
/// A connection is opened per call and closed afterwards. When the file is
/// missing or cannot be queried, reads come back empty (or `Unavailable`)
/// and the failure is logged.
#[derive(Debug, Clone)]
pub struct LookupService {
    path: PathBuf,
}

impl LookupService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.is_file() {
            tracing::warn!(
                "EPC index not found at {}; local lookups will report unavailable",
                path.display()
            );
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the index file currently exists.
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }

    async fn connect(&self) -> Result<SqliteConnection, String> {
        if !self.is_available() {
            return Err(format!("EPC index not found at {}", self.path.display()));
        }
        db::connect_reader(&self.path).await.map_err(|e| {
            tracing::error!("Failed to open EPC index {}: {}", self.path.display(), e);
            format!("EPC index could not be opened: {}", e)
        })
    }

    /// Certificates for a postcode (any spacing or case), most recently lodged first.
    pub async fn search_by_postcode(&self, postcode: &str, limit: i64) -> Vec<EpcRecord> {
        if limit <= 0 {
            return Vec::new();
        }
        match self.query_postcode(postcode, None, limit).await {
            Ok(records) => records,
            Err(reason) => {
                tracing::debug!("search_by_postcode({}) returned nothing: {}", postcode, reason);
                Vec::new()
            }
        }
    }

    /// The most recently lodged certificate for a postcode, optionally
    /// narrowed by a case-insensitive address substring.
    pub async fn find(&self, postcode: &str, address: Option<&str>) -> Lookup<EpcRecord> {
        let address = address.map(str::trim).filter(|a| !a.is_empty());
        match self.query_postcode(postcode, address, 1).await {
            Ok(mut records) => match records.pop() {
                Some(record) => Lookup::Found(record),
                None => Lookup::NotFound,
            },
            Err(reason) => Lookup::Unavailable(reason),
        }
    }

    async fn query_postcode(
        &self,
        postcode: &str,
        address: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EpcRecord>, String> {
        let postcode = normalize_postcode(postcode);
        if postcode.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connect().await?;

        let result = match address {
            Some(address) => {
                sqlx::query_as::<_, EpcRecord>(
                    r#"
                    SELECT * FROM epc_certificates
                    WHERE postcode = ? AND LOWER(address) LIKE ? ESCAPE '\'
                    ORDER BY lodgement_date DESC, lmk_key
                    LIMIT ?
                    "#,
                )
                .bind(&postcode)
                .bind(like_pattern(address))
                .bind(limit)
                .fetch_all(&mut conn)
                .await
            }
            None => {
                sqlx::query_as::<_, EpcRecord>(
                    r#"
                    SELECT * FROM epc_certificates
                    WHERE postcode = ?
                    ORDER BY lodgement_date DESC, lmk_key
                    LIMIT ?
                    "#,
                )
                .bind(&postcode)
                .bind(limit)
                .fetch_all(&mut conn)
                .await
            }
        };

        if let Err(e) = conn.close().await {
            tracing::debug!("Closing EPC index connection failed: {}", e);
        }

        result.map_err(|e| {
            tracing::error!("EPC index query failed for {}: {}", postcode, e);
            format!("EPC index query failed: {}", e)
        })
    }

    /// Totals and current-rating distribution; all zero when unavailable.
    pub async fn statistics(&self) -> IndexStatistics {
        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(_) => return IndexStatistics::default(),
        };

        let totals: Result<(i64, i64), _> =
            sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT postcode) FROM epc_certificates")
                .fetch_one(&mut conn)
                .await;
        let distribution: Result<Vec<(String, i64)>, _> = sqlx::query_as(
            "SELECT current_rating, COUNT(*) FROM epc_certificates GROUP BY current_rating ORDER BY current_rating",
        )
        .fetch_all(&mut conn)
        .await;

        if let Err(e) = conn.close().await {
            tracing::debug!("Closing EPC index connection failed: {}", e);
        }

        match (totals, distribution) {
            (Ok((total_records, unique_postcodes)), Ok(distribution)) => IndexStatistics {
                available: true,
                total_records,
                unique_postcodes,
                rating_distribution: distribution.into_iter().collect::<BTreeMap<_, _>>(),
            },
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("EPC index statistics failed: {}", e);
                IndexStatistics::default()
            }
        }
    }
}

/// `%needle%` for a case-insensitive LIKE, with LIKE wildcards in the input escaped.
///
/// SQLite's `LOWER` and `LIKE` fold ASCII only, so the needle does the same.
fn like_pattern(address: &str) -> String {
    let mut escaped = String::with_capacity(address.len() + 2);
    escaped.push('%');
    for c in address.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Flat 1"), "%flat 1%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("PLAS ÔL"), "%plas Ôl%");
    }

    #[tokio::test]
    async fn test_missing_index_is_unavailable_but_answers() {
        let dir = tempfile::tempdir().unwrap();
        let service = LookupService::new(dir.path().join("absent.db"));

        assert!(!service.is_available());
        assert!(service.search_by_postcode("SW1A 1AA", 50).await.is_empty());
        assert!(matches!(service.find("SW1A 1AA", None).await, Lookup::Unavailable(_)));
        assert_eq!(service.statistics().await, IndexStatistics::default());
    }

    #[tokio::test]
    async fn test_file_without_schema_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        std::fs::write(&path, b"").unwrap();

        let service = LookupService::new(&path);
        assert!(service.is_available());
        assert!(matches!(service.find("M1 4BT", None).await, Lookup::Unavailable(_)));
        assert!(!service.statistics().await.available);
    }
}
