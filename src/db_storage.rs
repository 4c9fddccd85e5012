use chrono::Utc;
use sqlx::sqlite::SqliteArguments;
use sqlx::query::Query;
use sqlx::{Connection, Sqlite, SqliteConnection};
use std::path::Path;

use crate::db::{self, CREATE_POSTCODE_INDEX, INSERT_OR_REPLACE_CERTIFICATE};
use crate::errors::{AppError, ResultExt};
use crate::models::EpcRecord;

/// Postcode cardinality of the index, reported at the end of a bulk load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostcodeCardinality {
    pub total_records: i64,
    pub unique_postcodes: i64,
    /// Largest number of certificates sharing one postcode.
    pub max_per_postcode: i64,
}

impl PostcodeCardinality {
    pub fn mean_per_postcode(&self) -> f64 {
        if self.unique_postcodes == 0 {
            0.0
        } else {
            self.total_records as f64 / self.unique_postcodes as f64
        }
    }
}

/// Write side of the local EPC index.
///
/// Holds one connection for the duration of a load (or a single write-through
/// upsert). Every write goes through `INSERT OR REPLACE`, so replaying a batch
/// converges to the same state.
pub struct IndexWriter {
    conn: SqliteConnection,
}

fn bind_record<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    record: &'q EpcRecord,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(record.lmk_key.as_str())
        .bind(record.postcode.as_str())
        .bind(record.address.as_str())
        .bind(record.current_rating.as_str())
        .bind(record.potential_rating.as_str())
        .bind(record.current_efficiency)
        .bind(record.potential_efficiency)
        .bind(record.property_type.as_str())
        .bind(record.built_form.as_str())
        .bind(record.inspection_date)
        .bind(record.lodgement_date)
        .bind(record.tenure.as_str())
        .bind(record.transaction_type.as_str())
        .bind(record.total_floor_area)
        .bind(record.number_habitable_rooms)
        .bind(record.co2_emissions_current)
        .bind(record.co2_emissions_potential)
        .bind(record.heating_cost_current)
        .bind(record.heating_cost_potential)
        .bind(record.hot_water_cost_current)
        .bind(record.hot_water_cost_potential)
        .bind(record.lighting_cost_current)
        .bind(record.lighting_cost_potential)
        .bind(record.local_authority.as_str())
        .bind(record.constituency.as_str())
}

impl IndexWriter {
    /// Opens the index for writing, creating the file, its parent directory
    /// and the schema when missing.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating index directory {}", parent.display()))?;
        }

        let conn = db::connect_writer(path)
            .await
            .with_context(|| format!("opening EPC index {}", path.display()))?;

        Ok(Self { conn })
    }

    /// Inserts one batch inside a single transaction.
    ///
    /// If the returned future is dropped before commit the transaction rolls
    /// back, leaving only previously committed batches.
    pub async fn insert_batch(&mut self, records: &[EpcRecord]) -> Result<u64, AppError> {
        let mut tx = self.conn.begin().await?;
        let mut written = 0u64;

        for record in records {
            written += bind_record(sqlx::query(INSERT_OR_REPLACE_CERTIFICATE), record)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting certificate {}", record.lmk_key))?
                .rows_affected();
        }

        tx.commit().await.context("committing EPC batch")?;
        Ok(written)
    }

    /// Inserts or replaces a single certificate (write-through of remote hits).
    pub async fn upsert(&mut self, record: &EpcRecord) -> Result<(), AppError> {
        bind_record(sqlx::query(INSERT_OR_REPLACE_CERTIFICATE), record)
            .execute(&mut self.conn)
            .await
            .with_context(|| format!("upserting certificate {}", record.lmk_key))?;
        Ok(())
    }

    pub async fn ensure_postcode_index(&mut self) -> Result<(), AppError> {
        sqlx::query(CREATE_POSTCODE_INDEX)
            .execute(&mut self.conn)
            .await
            .context("creating idx_postcode")?;
        Ok(())
    }

    /// True when `member` was fully loaded from an archive entry with the same CRC-32 and size.
    pub async fn member_completed(
        &mut self,
        member: &str,
        crc32: u32,
        size: u64,
    ) -> Result<bool, AppError> {
        let completed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM epc_load_ledger WHERE member = ? AND crc32 = ? AND size = ?)",
        )
        .bind(member)
        .bind(i64::from(crc32))
        .bind(size as i64)
        .fetch_one(&mut self.conn)
        .await?;

        Ok(completed)
    }

    pub async fn mark_member_completed(
        &mut self,
        member: &str,
        crc32: u32,
        size: u64,
        rows: u64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR REPLACE INTO epc_load_ledger (member, crc32, size, rows, completed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(member)
        .bind(i64::from(crc32))
        .bind(size as i64)
        .bind(rows as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut self.conn)
        .await
        .with_context(|| format!("recording completed member {}", member))?;

        Ok(())
    }

    pub async fn postcode_cardinality(&mut self) -> Result<PostcodeCardinality, AppError> {
        let (total_records, unique_postcodes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT postcode) FROM epc_certificates")
                .fetch_one(&mut self.conn)
                .await?;

        let max_per_postcode: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(n) FROM (SELECT COUNT(*) AS n FROM epc_certificates GROUP BY postcode)",
        )
        .fetch_one(&mut self.conn)
        .await?;

        Ok(PostcodeCardinality {
            total_records,
            unique_postcodes,
            max_per_postcode: max_per_postcode.unwrap_or(0),
        })
    }

    pub async fn close(self) -> Result<(), AppError> {
        self.conn.close().await?;
        Ok(())
    }
}
