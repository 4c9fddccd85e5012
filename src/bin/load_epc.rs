//! Bulk-load the government EPC ZIP/CSV release into the local index.
//!
//! ```bash
//! load-epc --archive all-domestic-certificates.zip [--db data/epc/epc.db] [--batch-size 50000]
//! ```
//!
//! Interrupting with Ctrl-C stops at the next batch boundary; committed
//! batches stay in the index and a re-run resumes from the load ledger.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use epc_enrichment::config::DEFAULT_DB_PATH;
use epc_enrichment::data::loader::{BulkLoader, LoadOptions, DEFAULT_BATCH_SIZE};
use epc_enrichment::obs;

#[derive(Parser, Debug)]
#[command(name = "load-epc")]
#[command(about = "Load the bulk EPC archive into the local SQLite index")]
#[command(version)]
struct Args {
    /// ZIP archive downloaded from the EPC open data site
    #[arg(short, long, value_name = "ZIP")]
    archive: PathBuf,

    /// Index file to create or extend
    #[arg(long, env = "EPC_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Directory for extracted members (one at a time)
    #[arg(long, default_value = "data/epc/scratch")]
    scratch_dir: PathBuf,

    /// Rows per insert transaction
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Stop after this many committed batches
    #[arg(long)]
    max_batches: Option<usize>,

    /// Reload members already recorded as complete
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    obs::init_tracing("epc_enrichment=info,load_epc=info");

    let args = Args::parse();

    if !args.archive.is_file() {
        anyhow::bail!("archive {} does not exist", args.archive.display());
    }

    let loader = BulkLoader::new(
        &args.db,
        LoadOptions {
            batch_size: args.batch_size,
            scratch_dir: args.scratch_dir,
            max_batches: args.max_batches,
            force: args.force,
        },
    );

    let stop = loader.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current batch");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let report = loader.load_archive(&args.archive).await?;

    println!(
        "members:   {} total, {} loaded, {} skipped (ledger), {} rejected (header)",
        report.members_total,
        report.members_loaded,
        report.members_skipped,
        report.members_rejected
    );
    println!("rows:      {} inserted, {} skipped", report.rows_inserted, report.rows_skipped);
    println!("batches:   {}", report.batches_committed);
    println!(
        "postcodes: {} unique, {:.1} certificates per postcode (max {})",
        report.cardinality.unique_postcodes,
        report.cardinality.mean_per_postcode(),
        report.cardinality.max_per_postcode
    );
    println!("elapsed:   {:.1}s", report.elapsed.as_secs_f64());

    if report.interrupted {
        println!("interrupted: re-run the same command to resume");
    }

    Ok(())
}
