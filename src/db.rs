use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, SqliteConnection};
use std::path::Path;
use std::time::Duration;

pub const CREATE_CERTIFICATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS epc_certificates (
    lmk_key TEXT PRIMARY KEY NOT NULL,
    postcode TEXT NOT NULL,
    address TEXT NOT NULL DEFAULT '',
    current_rating TEXT NOT NULL DEFAULT '',
    potential_rating TEXT NOT NULL DEFAULT '',
    current_efficiency INTEGER NOT NULL DEFAULT 0,
    potential_efficiency INTEGER NOT NULL DEFAULT 0,
    property_type TEXT NOT NULL DEFAULT '',
    built_form TEXT NOT NULL DEFAULT '',
    inspection_date TEXT,
    lodgement_date TEXT,
    tenure TEXT NOT NULL DEFAULT 'Unknown',
    transaction_type TEXT NOT NULL DEFAULT '',
    total_floor_area REAL NOT NULL DEFAULT 0,
    number_habitable_rooms INTEGER NOT NULL DEFAULT 0,
    co2_emissions_current REAL,
    co2_emissions_potential REAL,
    heating_cost_current REAL,
    heating_cost_potential REAL,
    hot_water_cost_current REAL,
    hot_water_cost_potential REAL,
    lighting_cost_current REAL,
    lighting_cost_potential REAL,
    local_authority TEXT NOT NULL DEFAULT '',
    constituency TEXT NOT NULL DEFAULT ''
)
"#;

/// Built after the bulk load so inserts avoid per-row B-tree maintenance.
pub const CREATE_POSTCODE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_postcode ON epc_certificates (postcode)";

/// Members of a bulk archive whose every batch has been committed.
pub const CREATE_LOAD_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS epc_load_ledger (
    member TEXT PRIMARY KEY NOT NULL,
    crc32 INTEGER NOT NULL,
    size INTEGER NOT NULL,
    rows INTEGER NOT NULL,
    completed_at TEXT NOT NULL
)
"#;

pub const INSERT_OR_REPLACE_CERTIFICATE: &str = r#"
INSERT OR REPLACE INTO epc_certificates (
    lmk_key, postcode, address, current_rating, potential_rating,
    current_efficiency, potential_efficiency, property_type, built_form,
    inspection_date, lodgement_date, tenure, transaction_type,
    total_floor_area, number_habitable_rooms,
    co2_emissions_current, co2_emissions_potential,
    heating_cost_current, heating_cost_potential,
    hot_water_cost_current, hot_water_cost_potential,
    lighting_cost_current, lighting_cost_potential,
    local_authority, constituency
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a short-lived read connection to an existing index file.
///
/// Never creates the file; a missing index surfaces as an error for the
/// caller to report as unavailable.
pub async fn connect_reader(path: &Path) -> Result<SqliteConnection, sqlx::Error> {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .busy_timeout(BUSY_TIMEOUT)
        .connect()
        .await
}

/// Opens (creating if needed) the index for writing and ensures the schema.
///
/// WAL keeps readers unblocked while the loader commits batches.
pub async fn connect_writer(path: &Path) -> Result<SqliteConnection, sqlx::Error> {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .connect()
        .await?;

    sqlx::query(CREATE_CERTIFICATES_TABLE)
        .execute(&mut conn)
        .await?;
    sqlx::query(CREATE_LOAD_LEDGER).execute(&mut conn).await?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_does_not_create_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        assert!(connect_reader(&path).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_writer_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epc.db");

        let mut conn = connect_writer(&path).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&mut conn)
                .await
                .unwrap();

        let names: Vec<_> = tables.into_iter().map(|(name,)| name).collect();
        assert_eq!(names, vec!["epc_certificates", "epc_load_ledger"]);
    }
}
