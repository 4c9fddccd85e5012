/// Per-property enrichment: local index first, upstream EPC service on a
/// miss, then a council-tax band estimated from floor area.
///
/// The assembler owns the escalation policy. `LookupService` only reports
/// what the local index says and `EpcClient` only reports what the upstream
/// says; neither decides when the other is consulted.
use chrono::{NaiveDate, TimeDelta, Utc};

use crate::council_tax::{CouncilTaxBand, CouncilTaxEstimator};
use crate::db_storage::IndexWriter;
use crate::epc_client::EpcClient;
use crate::lookup::LookupService;
use crate::models::{EpcRecord, Lookup, PropertySummary, RecordSource};

/// Separator between the parts of a one-line property summary.
pub const SUMMARY_SEPARATOR: &str = " • ";

#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerOptions {
    /// Local records lodged more than this many days ago are re-checked upstream.
    pub stale_after_days: Option<i64>,
    /// Upsert upstream hits into the local index.
    pub write_through: bool,
}

#[derive(Clone)]
pub struct SummaryAssembler {
    lookup: LookupService,
    client: Option<EpcClient>,
    estimator: CouncilTaxEstimator,
    options: AssemblerOptions,
}

impl SummaryAssembler {
    pub fn new(
        lookup: LookupService,
        client: Option<EpcClient>,
        estimator: CouncilTaxEstimator,
        options: AssemblerOptions,
    ) -> Self {
        Self {
            lookup,
            client,
            estimator,
            options,
        }
    }

    /// Builds the summary for one property. Never fails: any problem becomes
    /// `found: false` with the reason in `error`.
    pub async fn summarize(&self, postcode: &str, address: Option<&str>) -> PropertySummary {
        let local = self.lookup.find(postcode, address).await;

        let (record, source) = match local {
            Lookup::Found(record) if self.is_stale(&record) => {
                tracing::info!(
                    "Local EPC {} for {} is stale (lodged {:?}); checking upstream",
                    record.lmk_key,
                    postcode,
                    record.lodgement_date
                );
                self.refresh(postcode, address, record).await
            }
            Lookup::Found(record) => (record, RecordSource::LocalIndex),
            Lookup::NotFound => match self.fetch_remote(postcode, address).await {
                Lookup::Found(record) => (record, RecordSource::RemoteApi),
                Lookup::NotFound => return PropertySummary::not_found(postcode, None),
                Lookup::Unavailable(reason) => {
                    return PropertySummary::not_found(postcode, Some(reason))
                }
            },
            Lookup::Unavailable(local_reason) => {
                tracing::warn!("Local EPC index unavailable: {}", local_reason);
                match self.fetch_remote(postcode, address).await {
                    Lookup::Found(record) => (record, RecordSource::RemoteApi),
                    Lookup::NotFound => {
                        return PropertySummary::not_found(postcode, Some(local_reason))
                    }
                    Lookup::Unavailable(reason) => {
                        return PropertySummary::not_found(
                            postcode,
                            Some(format!("{}; {}", local_reason, reason)),
                        )
                    }
                }
            }
        };

        if source == RecordSource::RemoteApi {
            self.write_through(&record).await;
        }

        self.assemble(postcode, record, source)
    }

    fn assemble(&self, postcode: &str, record: EpcRecord, source: RecordSource) -> PropertySummary {
        let band = self.estimator.estimate(record.floor_area());
        let summary = format_summary(&record, band);

        PropertySummary {
            postcode: postcode.to_string(),
            found: true,
            council_tax_band: band,
            council_tax_estimated: band.is_some(),
            local_authority: non_empty(&record.local_authority),
            constituency: non_empty(&record.constituency),
            summary,
            source: Some(source),
            epc: Some(record),
            error: None,
        }
    }

    async fn fetch_remote(&self, postcode: &str, address: Option<&str>) -> Lookup<EpcRecord> {
        match &self.client {
            Some(client) => client.get_epc(postcode, address).await,
            None => Lookup::NotFound,
        }
    }

    /// Keeps the local record unless upstream has a later lodgement.
    async fn refresh(
        &self,
        postcode: &str,
        address: Option<&str>,
        local: EpcRecord,
    ) -> (EpcRecord, RecordSource) {
        match self.fetch_remote(postcode, address).await {
            Lookup::Found(remote) if remote.lodgement_date > local.lodgement_date => {
                tracing::info!(
                    "Upstream has newer EPC {} for {} (lodged {:?})",
                    remote.lmk_key,
                    postcode,
                    remote.lodgement_date
                );
                (remote, RecordSource::RemoteApi)
            }
            Lookup::Unavailable(reason) => {
                tracing::warn!("Freshness check for {} skipped: {}", postcode, reason);
                (local, RecordSource::LocalIndex)
            }
            _ => (local, RecordSource::LocalIndex),
        }
    }

    fn is_stale(&self, record: &EpcRecord) -> bool {
        let Some(days) = self.options.stale_after_days else {
            return false;
        };
        if self.client.is_none() {
            return false;
        }
        is_older_than(record.lodgement_date, days, Utc::now().date_naive())
    }

    async fn write_through(&self, record: &EpcRecord) {
        if !self.options.write_through || !self.lookup.is_available() {
            return;
        }

        let result = async {
            let mut writer = IndexWriter::open(self.lookup.path()).await?;
            writer.upsert(record).await?;
            writer.close().await
        }
        .await;

        match result {
            Ok(()) => tracing::debug!("Wrote upstream EPC {} through to the index", record.lmk_key),
            Err(e) => tracing::warn!("Write-through of EPC {} failed: {}", record.lmk_key, e),
        }
    }
}

/// Undated records count as stale. A window reaching past the calendar's
/// range means nothing is old enough.
fn is_older_than(lodged: Option<NaiveDate>, days: i64, today: NaiveDate) -> bool {
    let Some(cutoff) = TimeDelta::try_days(days).and_then(|window| today.checked_sub_signed(window))
    else {
        return false;
    };
    match lodged {
        Some(lodged) => lodged < cutoff,
        None => true,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// One-line summary: property type, built form, rating, band and area,
/// skipping whatever is unknown.
pub fn format_summary(record: &EpcRecord, band: Option<CouncilTaxBand>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);

    if let Some(property_type) = non_empty(&record.property_type) {
        parts.push(property_type);
    }
    if let Some(built_form) = non_empty(&record.built_form) {
        parts.push(built_form);
    }
    if !record.current_rating.is_empty() {
        parts.push(format!("EPC: {}", record.current_rating));
    }
    if let Some(band) = band {
        parts.push(format!("Council Tax: Band {}", band));
    }
    if let Some(area) = record.floor_area() {
        parts.push(format!("{:.0}m²", area));
    }

    parts.join(SUMMARY_SEPARATOR)
}
