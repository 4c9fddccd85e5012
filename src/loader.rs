//! Bulk EPC loader: streams a ZIP of CSV members into the local index.
//!
//! Per member: extract to the scratch directory, parse on a blocking thread,
//! hand batches over a bounded channel to the async writer, commit each batch
//! in its own transaction with `INSERT OR REPLACE`, then delete the scratch
//! file. Interrupting a run loses at most the in-flight batch; re-running
//! converges to the same index because replays replace by certificate key.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::db_storage::{IndexWriter, PostcodeCardinality};
use crate::errors::{AppError, ResultExt};
use crate::models::EpcRecord;
use crate::normalize::{self, CsvRow, EXPECTED_COLUMNS, REQUIRED_COLUMNS};

pub const DEFAULT_BATCH_SIZE: usize = 50_000;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    /// Members are extracted here one at a time and removed once committed.
    pub scratch_dir: PathBuf,
    /// Stop after committing this many batches in this run.
    pub max_batches: Option<usize>,
    /// Reload members the ledger already marks complete.
    pub force: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            scratch_dir: PathBuf::from("data/epc/scratch"),
            max_batches: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub members_total: usize,
    pub members_loaded: usize,
    /// Members already in the ledger with a matching CRC-32 and size.
    pub members_skipped: usize,
    /// Members ignored because their header lacks a required column.
    pub members_rejected: usize,
    pub rows_inserted: u64,
    /// Rows without a certificate key or postcode, or unreadable.
    pub rows_skipped: u64,
    pub batches_committed: usize,
    /// The run stopped at a batch boundary before finishing the archive.
    pub interrupted: bool,
    pub elapsed: Duration,
    pub cardinality: PostcodeCardinality,
}

#[derive(Debug, Clone)]
struct MemberInfo {
    index: usize,
    name: String,
    crc32: u32,
    size: u64,
}

#[derive(Debug, Default)]
struct ParseOutcome {
    rows_skipped: u64,
    rejected: bool,
}

enum MemberOutcome {
    Completed { rows: u64 },
    Rejected,
    Interrupted,
}

pub struct BulkLoader {
    db_path: PathBuf,
    options: LoadOptions,
    stop: Arc<AtomicBool>,
}

impl BulkLoader {
    pub fn new(db_path: impl Into<PathBuf>, options: LoadOptions) -> Self {
        Self {
            db_path: db_path.into(),
            options: LoadOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at every batch boundary; setting it ends the run after
    /// the current commit.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn load_archive(&self, archive: &Path) -> Result<LoadReport, AppError> {
        let started = Instant::now();
        let mut report = LoadReport::default();

        tokio::fs::create_dir_all(&self.options.scratch_dir)
            .await
            .with_context(|| {
                format!(
                    "creating scratch directory {}",
                    self.options.scratch_dir.display()
                )
            })?;

        let members = list_csv_members(archive.to_path_buf()).await?;
        report.members_total = members.len();
        tracing::info!(
            "Loading {} CSV member(s) from {} into {}",
            members.len(),
            archive.display(),
            self.db_path.display()
        );

        let mut writer = IndexWriter::open(&self.db_path).await?;

        for member in &members {
            if self.should_stop(&report) {
                report.interrupted = true;
                break;
            }

            if !self.options.force
                && writer
                    .member_completed(&member.name, member.crc32, member.size)
                    .await?
            {
                tracing::info!("Skipping {} (already loaded)", member.name);
                report.members_skipped += 1;
                continue;
            }

            match self.load_member(archive, member, &mut writer, &mut report).await? {
                MemberOutcome::Completed { rows } => {
                    writer
                        .mark_member_completed(&member.name, member.crc32, member.size, rows)
                        .await?;
                    report.members_loaded += 1;
                }
                MemberOutcome::Rejected => report.members_rejected += 1,
                MemberOutcome::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        if report.interrupted {
            tracing::warn!(
                "Load interrupted after {} batch(es); re-run to continue",
                report.batches_committed
            );
        } else {
            writer.ensure_postcode_index().await?;
        }

        report.cardinality = writer.postcode_cardinality().await?;
        writer.close().await?;
        report.elapsed = started.elapsed();

        tracing::info!(
            "EPC load finished in {:.1}s: {} rows inserted, {} skipped, {} batches, {} member(s) loaded, {} already loaded, {} rejected",
            report.elapsed.as_secs_f64(),
            report.rows_inserted,
            report.rows_skipped,
            report.batches_committed,
            report.members_loaded,
            report.members_skipped,
            report.members_rejected
        );
        tracing::info!(
            "Index holds {} certificates across {} postcodes (mean {:.2}, max {} per postcode)",
            report.cardinality.total_records,
            report.cardinality.unique_postcodes,
            report.cardinality.mean_per_postcode(),
            report.cardinality.max_per_postcode
        );

        Ok(report)
    }

    fn should_stop(&self, report: &LoadReport) -> bool {
        self.stop.load(Ordering::SeqCst)
            || self
                .options
                .max_batches
                .is_some_and(|max| report.batches_committed >= max)
    }

    async fn load_member(
        &self,
        archive: &Path,
        member: &MemberInfo,
        writer: &mut IndexWriter,
        report: &mut LoadReport,
    ) -> Result<MemberOutcome, AppError> {
        let scratch = self.options.scratch_dir.join(scratch_file_name(&member.name));
        let result = match extract_member(archive.to_path_buf(), member.index, scratch.clone()).await {
            Ok(()) => self.ingest_scratch(&scratch, member, writer, report).await,
            Err(e) => {
                tracing::error!("Failed to extract {}: {}", member.name, e);
                Err(e)
            }
        };

        remove_scratch(&scratch).await;
        result
    }

    async fn ingest_scratch(
        &self,
        scratch: &Path,
        member: &MemberInfo,
        writer: &mut IndexWriter,
        report: &mut LoadReport,
    ) -> Result<MemberOutcome, AppError> {
        let (tx, mut rx) = mpsc::channel::<Vec<EpcRecord>>(2);
        let parser = {
            let scratch = scratch.to_path_buf();
            let name = member.name.clone();
            let batch_size = self.options.batch_size;
            tokio::task::spawn_blocking(move || parse_member(&scratch, &name, batch_size, tx))
        };

        let mut rows = 0u64;
        let mut interrupted = false;

        while let Some(batch) = rx.recv().await {
            let inserted = writer.insert_batch(&batch).await?;
            rows += inserted;
            report.rows_inserted += inserted;
            report.batches_committed += 1;
            tracing::info!(
                "{}: committed batch {} ({} records)",
                member.name,
                report.batches_committed,
                batch.len()
            );

            if self.should_stop(report) {
                interrupted = true;
                break;
            }
        }

        // Dropping the receiver makes a still-running parser stop at its next send.
        drop(rx);
        let outcome = parser
            .await
            .map_err(|e| AppError::InternalError(format!("CSV parser task failed: {}", e)))??;
        report.rows_skipped += outcome.rows_skipped;

        if outcome.rejected {
            Ok(MemberOutcome::Rejected)
        } else if interrupted {
            Ok(MemberOutcome::Interrupted)
        } else {
            tracing::info!("{}: {} records loaded", member.name, rows);
            Ok(MemberOutcome::Completed { rows })
        }
    }
}

/// Lists CSV members in archive order.
async fn list_csv_members(archive: PathBuf) -> Result<Vec<MemberInfo>, AppError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<MemberInfo>, AppError> {
        let file = File::open(&archive)
            .with_context(|| format!("opening archive {}", archive.display()))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

        let mut members = Vec::new();
        for index in 0..zip.len() {
            let entry = zip.by_index(index)?;
            if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".csv") {
                continue;
            }
            members.push(MemberInfo {
                index,
                name: entry.name().to_string(),
                crc32: entry.crc32(),
                size: entry.size(),
            });
        }
        Ok(members)
    })
    .await
    .map_err(|e| AppError::InternalError(format!("archive listing task failed: {}", e)))?
}

/// Streams one member to `dest` without buffering it in memory.
async fn extract_member(archive: PathBuf, index: usize, dest: PathBuf) -> Result<(), AppError> {
    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let file = File::open(&archive)
            .with_context(|| format!("opening archive {}", archive.display()))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
        let mut entry = zip.by_index(index)?;

        let mut out = File::create(&dest)
            .with_context(|| format!("creating scratch file {}", dest.display()))?;
        let copied = std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("extracting {}", entry.name()))?;
        tracing::debug!("Extracted {} ({} bytes) to {}", entry.name(), copied, dest.display());
        Ok(())
    })
    .await
    .map_err(|e| AppError::InternalError(format!("extraction task failed: {}", e)))?
}

/// Removes a scratch member, complete or partial. Absent files are fine.
async fn remove_scratch(scratch: &Path) {
    match tokio::fs::remove_file(scratch).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove scratch file {}: {}", scratch.display(), e),
    }
}

/// Scratch files live flat in the scratch directory regardless of member paths.
fn scratch_file_name(member: &str) -> String {
    member
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Runs on a blocking thread: reads the scratch CSV and sends normalised batches.
fn parse_member(
    path: &Path,
    name: &str,
    batch_size: usize,
    tx: mpsc::Sender<Vec<EpcRecord>>,
) -> Result<ParseOutcome, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)?;

    let headers = normalize::header_index(reader.byte_headers()?);
    let mut outcome = ParseOutcome::default();

    if !check_header(name, &headers) {
        outcome.rejected = true;
        return Ok(outcome);
    }

    let mut batch = Vec::with_capacity(batch_size);
    let mut record = csv::ByteRecord::new();

    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                tracing::debug!("{}: unreadable row skipped: {}", name, e);
                outcome.rows_skipped += 1;
                continue;
            }
        }

        let row = CsvRow {
            headers: &headers,
            record: &record,
        };
        match normalize::record_from_fields(&row) {
            Some(epc) => batch.push(epc),
            None => outcome.rows_skipped += 1,
        }

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(full).is_err() {
                // Writer stopped at a batch boundary.
                return Ok(outcome);
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(batch);
    }

    if outcome.rows_skipped > 0 {
        tracing::info!(
            "{}: {} row(s) skipped (missing certificate key or postcode)",
            name,
            outcome.rows_skipped
        );
    }

    Ok(outcome)
}

/// Returns false when a required column is absent; warns about missing optional ones.
fn check_header(name: &str, headers: &HashMap<String, usize>) -> bool {
    let has = |column: &str| headers.contains_key(&column.to_ascii_uppercase());

    let missing_required: Vec<_> = REQUIRED_COLUMNS.iter().filter(|c| !has(c)).collect();
    if !missing_required.is_empty() {
        tracing::warn!(
            "{}: header lacks required column(s) {:?}; member skipped",
            name,
            missing_required
        );
        return false;
    }

    let missing: Vec<_> = EXPECTED_COLUMNS
        .iter()
        .filter(|c| !has(c))
        // address may arrive split over ADDRESS1..3
        .filter(|c| **c != "address" || !has("address1"))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            "{}: header lacks {} expected column(s) {:?}; defaults apply",
            name,
            missing.len(),
            missing
        );
    }

    true
}
