use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Upstream EPC rows as held in the response cache, with a SHA-256 checksum.
///
/// The cache stores the serialized entry; on read the checksum is recomputed
/// and a mismatch is treated as a miss so the rows are fetched again.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedRows {
    /// The `rows` array of an upstream search response, as JSON text.
    pub data: String,
    /// SHA-256 checksum of `data` (hex encoded).
    pub checksum: String,
}

impl CachedRows {
    pub fn new(rows: &[Map<String, Value>]) -> Self {
        let data = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Serialized form stored in the cache.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the cached rows when the entry parses and its checksum holds.
    pub fn deserialize_and_validate(serialized: &str) -> Option<Vec<Map<String, Value>>> {
        let entry: CachedRows = serde_json::from_str(serialized).ok()?;

        if !entry.is_valid() {
            tracing::warn!(
                "EPC cache entry failed checksum validation (expected {}, {} bytes); refetching",
                entry.checksum,
                entry.data.len()
            );
            return None;
        }

        serde_json::from_str(&entry.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Map<String, Value>> {
        vec![json!({"lmk-key": "k1", "postcode": "M14BT", "current-energy-rating": "C"})
            .as_object()
            .cloned()
            .unwrap()]
    }

    #[test]
    fn test_entry_round_trips_rows() {
        let entry = CachedRows::new(&rows());
        assert!(entry.is_valid());

        let restored = CachedRows::deserialize_and_validate(&entry.serialize()).unwrap();
        assert_eq!(restored, rows());
    }

    #[test]
    fn test_tampered_cache_returns_none() {
        let serialized = CachedRows::new(&rows()).serialize();
        let tampered = serialized.replace("M14BT", "SW1A1AA");

        assert_eq!(CachedRows::deserialize_and_validate(&tampered), None);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert_eq!(CachedRows::deserialize_and_validate("not json"), None);
    }

    #[test]
    fn test_checksum_consistency() {
        assert_eq!(CachedRows::new(&rows()).checksum, CachedRows::new(&rows()).checksum);
        assert_ne!(CachedRows::new(&rows()).checksum, CachedRows::new(&[]).checksum);
    }
}
