//! Print local EPC index statistics.

use clap::Parser;
use std::path::PathBuf;

use epc_enrichment::config::DEFAULT_DB_PATH;
use epc_enrichment::data::lookup::LookupService;
use epc_enrichment::obs;

#[derive(Parser, Debug)]
#[command(name = "epc-stats")]
#[command(about = "Show record counts and the rating distribution of the EPC index")]
struct Args {
    /// Index file to inspect
    #[arg(long, env = "EPC_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    obs::init_tracing("epc_enrichment=warn");

    let args = Args::parse();
    let stats = LookupService::new(&args.db).statistics().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if !stats.available {
        anyhow::bail!("EPC index {} is not available", args.db.display());
    }

    println!("index:     {}", args.db.display());
    println!("records:   {}", stats.total_records);
    println!("postcodes: {}", stats.unique_postcodes);
    println!("ratings:");
    for (rating, count) in &stats.rating_distribution {
        let label = if rating.is_empty() { "unknown" } else { rating.as_str() };
        println!("  {:<8} {}", label, count);
    }

    Ok(())
}
