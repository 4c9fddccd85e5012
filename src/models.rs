use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use crate::council_tax::CouncilTaxBand;

// ============ Index Models ============

/// A single Energy Performance Certificate, as stored in `epc_certificates`.
///
/// Produced by `normalize::record_from_fields` for both bulk CSV rows and
/// upstream JSON rows, so both sources share the same invariants: compressed
/// postcode, potential rating never worse than current, non-negative numerics
/// (0 meaning unknown) and lodgement date not before inspection date.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EpcRecord {
    /// Certificate key issued by the assessment body (primary key).
    pub lmk_key: String,
    /// Postcode in compressed form (uppercase, no whitespace).
    pub postcode: String,
    /// Free-text address as lodged.
    pub address: String,
    /// Current energy rating letter (A-G), empty when unknown.
    pub current_rating: String,
    /// Potential energy rating letter (A-G), empty when unknown.
    pub potential_rating: String,
    /// Current energy efficiency score (0-100, 0 = unknown).
    pub current_efficiency: i64,
    /// Potential energy efficiency score (0-100, 0 = unknown).
    pub potential_efficiency: i64,
    /// House, Flat, Bungalow, Maisonette or Park home.
    pub property_type: String,
    /// Detached, Semi-Detached, Mid-Terrace, End-Terrace...
    pub built_form: String,
    pub inspection_date: Option<NaiveDate>,
    /// Date the certificate reached the national register; recency key.
    pub lodgement_date: Option<NaiveDate>,
    pub tenure: String,
    pub transaction_type: String,
    /// Total floor area in square metres (0 = unknown).
    pub total_floor_area: f64,
    pub number_habitable_rooms: i64,
    pub co2_emissions_current: Option<f64>,
    pub co2_emissions_potential: Option<f64>,
    pub heating_cost_current: Option<f64>,
    pub heating_cost_potential: Option<f64>,
    pub hot_water_cost_current: Option<f64>,
    pub hot_water_cost_potential: Option<f64>,
    pub lighting_cost_current: Option<f64>,
    pub lighting_cost_potential: Option<f64>,
    pub local_authority: String,
    pub constituency: String,
}

impl EpcRecord {
    /// Floor area when known (strictly positive and finite).
    pub fn floor_area(&self) -> Option<f64> {
        if self.total_floor_area.is_finite() && self.total_floor_area > 0.0 {
            Some(self.total_floor_area)
        } else {
            None
        }
    }
}

/// Address entry returned by the upstream service for dropdown selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressStub {
    pub address: String,
    pub property_type: String,
    pub built_form: String,
    pub inspection_date: Option<NaiveDate>,
}

/// Tagged outcome of a single-record lookup.
///
/// `Unavailable` carries the reason the source could not answer (index file
/// missing, upstream non-200, transport failure, open circuit).
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Unavailable(String),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Collapses the outcome into an `Option`, dropping the unavailability reason.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Operator view of the local index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub available: bool,
    pub total_records: i64,
    pub unique_postcodes: i64,
    /// Current rating letter -> record count. Unknown ratings are keyed by "".
    pub rating_distribution: BTreeMap<String, i64>,
}

// ============ Summary Models ============

/// Where the authoritative record of a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    LocalIndex,
    RemoteApi,
}

/// Assembled per-property enrichment result handed to downstream collaborators.
///
/// `found = false` means "no enrichment available"; consumers fall back to
/// user-supplied values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySummary {
    /// Postcode exactly as supplied by the caller.
    pub postcode: String,
    pub found: bool,
    pub epc: Option<EpcRecord>,
    pub council_tax_band: Option<CouncilTaxBand>,
    /// Bands are derived from floor area, never from a valuation register.
    pub council_tax_estimated: bool,
    pub local_authority: Option<String>,
    pub constituency: Option<String>,
    pub summary: String,
    pub source: Option<RecordSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PropertySummary {
    /// Summary for a property with no enrichment available.
    pub fn not_found(postcode: &str, error: Option<String>) -> Self {
        Self {
            postcode: postcode.to_string(),
            found: false,
            epc: None,
            council_tax_band: None,
            council_tax_estimated: false,
            local_authority: None,
            constituency: None,
            summary: String::new(),
            source: None,
            error,
        }
    }
}

// ============ Request Models ============

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub postcode: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FindParams {
    pub postcode: String,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostcodeParams {
    pub postcode: String,
}

#[cfg(test)]
pub(crate) fn sample_record(lmk_key: &str, postcode: &str, lodged: &str) -> EpcRecord {
    let lodgement = NaiveDate::parse_from_str(lodged, "%Y-%m-%d").ok();
    EpcRecord {
        lmk_key: lmk_key.to_string(),
        postcode: postcode.to_string(),
        address: "10 Downing Street, London".to_string(),
        current_rating: "D".to_string(),
        potential_rating: "B".to_string(),
        current_efficiency: 60,
        potential_efficiency: 84,
        property_type: "House".to_string(),
        built_form: "Mid-Terrace".to_string(),
        inspection_date: lodgement,
        lodgement_date: lodgement,
        tenure: "Unknown".to_string(),
        transaction_type: "marketed sale".to_string(),
        total_floor_area: 72.0,
        number_habitable_rooms: 4,
        co2_emissions_current: Some(3.1),
        co2_emissions_potential: Some(1.2),
        heating_cost_current: Some(612.0),
        heating_cost_potential: Some(410.0),
        hot_water_cost_current: Some(98.0),
        hot_water_cost_potential: Some(70.0),
        lighting_cost_current: Some(65.0),
        lighting_cost_potential: Some(50.0),
        local_authority: "Westminster".to_string(),
        constituency: "Cities of London and Westminster".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_area_zero_is_unknown() {
        let mut record = sample_record("k1", "SW1A1AA", "2022-11-15");
        assert_eq!(record.floor_area(), Some(72.0));
        record.total_floor_area = 0.0;
        assert_eq!(record.floor_area(), None);
        record.total_floor_area = f64::NAN;
        assert_eq!(record.floor_area(), None);
    }

    #[test]
    fn lookup_found_collapses_to_option() {
        assert_eq!(Lookup::Found(3).found(), Some(3));
        assert_eq!(Lookup::<i32>::NotFound.found(), None);
        assert!(!Lookup::<i32>::Unavailable("missing".into()).is_found());
    }

    #[test]
    fn not_found_summary_omits_error_when_absent() {
        let summary = PropertySummary::not_found("M1 4BT", None);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["found"], false);
        assert!(json.get("error").is_none());
    }
}
