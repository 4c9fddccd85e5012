//! Row normalisation shared by the bulk loader and the upstream client.
//!
//! Both sources expose the same logical fields under different spellings:
//! bulk CSV headers are `UPPER_SNAKE` (`CURRENT_ENERGY_RATING`), upstream JSON
//! keys are `lower-kebab` (`current-energy-rating`). Callers implement
//! [`FieldSource`] over their row type and ask for the canonical `lower_snake`
//! name; [`record_from_fields`] turns any source into an [`EpcRecord`].

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::EpcRecord;

/// Columns a bulk member must carry for any of its rows to be usable.
pub const REQUIRED_COLUMNS: [&str; 2] = ["lmk_key", "postcode"];

/// Columns the index is built from. Absence is tolerated (defaults apply) but reported.
pub const EXPECTED_COLUMNS: [&str; 25] = [
    "lmk_key",
    "address",
    "postcode",
    "current_energy_rating",
    "potential_energy_rating",
    "current_energy_efficiency",
    "potential_energy_efficiency",
    "property_type",
    "built_form",
    "inspection_date",
    "lodgement_date",
    "tenure",
    "transaction_type",
    "total_floor_area",
    "number_habitable_rooms",
    "co2_emissions_current",
    "co2_emissions_potential",
    "heating_cost_current",
    "heating_cost_potential",
    "hot_water_cost_current",
    "hot_water_cost_potential",
    "lighting_cost_current",
    "lighting_cost_potential",
    "local_authority",
    "constituency",
];

/// Read access to one raw row by canonical (`lower_snake`) field name.
pub trait FieldSource {
    /// Returns the trimmed field value, or `None` when absent or blank.
    fn field(&self, name: &str) -> Option<String>;
}

/// Compresses a postcode: all whitespace removed, uppercased. Idempotent.
pub fn normalize_postcode(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

fn postcode_regex() -> &'static Regex {
    static POSTCODE: OnceLock<Regex> = OnceLock::new();
    POSTCODE.get_or_init(|| {
        // Outward code (area + district) followed by inward code, compressed form.
        Regex::new(r"^[A-Z]{1,2}[0-9][A-Z0-9]?[0-9][A-Z]{2}$").expect("static postcode regex")
    })
}

/// Shape check for a UK postcode in any spacing/case. Not a gazetteer lookup.
pub fn is_plausible_postcode(raw: &str) -> bool {
    postcode_regex().is_match(&normalize_postcode(raw))
}

/// Uppercase A-G letter, or empty when the input is not a rating.
pub fn normalize_rating(raw: Option<&str>) -> String {
    let mut chars = raw.map(str::trim).unwrap_or_default().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if ('A'..='G').contains(&c.to_ascii_uppercase()) => {
            c.to_ascii_uppercase().to_string()
        }
        _ => String::new(),
    }
}

/// Non-negative finite real; blanks, garbage and negatives yield `None`.
pub fn parse_non_negative_f64(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Non-negative integer; accepts `"4"` and `"4.0"`.
pub fn parse_non_negative_i64(raw: Option<&str>) -> Option<i64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
        .filter(|v| *v >= 0)
}

/// ISO calendar date; a trailing time component (`2021-03-04 10:22:31`) is ignored.
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| s.len() >= 10)?;
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

fn text(source: &impl FieldSource, name: &str) -> String {
    source.field(name).unwrap_or_default()
}

fn first_text(source: &impl FieldSource, names: &[&str]) -> String {
    names
        .iter()
        .find_map(|name| source.field(name))
        .unwrap_or_default()
}

fn address(source: &impl FieldSource) -> String {
    if let Some(address) = source.field("address") {
        return address;
    }
    ["address1", "address2", "address3"]
        .iter()
        .filter_map(|name| source.field(name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds a normalised record from a raw row.
///
/// Returns `None` when the row lacks a certificate key or a postcode; the
/// caller counts such rows as skipped.
pub fn record_from_fields(source: &impl FieldSource) -> Option<EpcRecord> {
    let lmk_key = source.field("lmk_key")?;
    let postcode = normalize_postcode(&source.field("postcode")?);
    if postcode.is_empty() {
        return None;
    }

    let current_rating = normalize_rating(source.field("current_energy_rating").as_deref());
    let mut potential_rating = normalize_rating(source.field("potential_energy_rating").as_deref());
    // Letters sort best-first, so a larger letter is a worse rating.
    if !current_rating.is_empty() && !potential_rating.is_empty() && potential_rating > current_rating {
        potential_rating = current_rating.clone();
    }

    let efficiency = |name: &str| {
        parse_non_negative_i64(source.field(name).as_deref())
            .unwrap_or(0)
            .min(100)
    };
    let optional = |name: &str| parse_non_negative_f64(source.field(name).as_deref());

    let inspection_date = parse_date(source.field("inspection_date").as_deref());
    let lodgement_date = match (
        parse_date(source.field("lodgement_date").as_deref()),
        inspection_date,
    ) {
        (Some(lodged), Some(inspected)) => Some(lodged.max(inspected)),
        (lodged, inspected) => lodged.or(inspected),
    };

    let tenure = source
        .field("tenure")
        .unwrap_or_else(|| "Unknown".to_string());

    Some(EpcRecord {
        lmk_key,
        postcode,
        address: address(source),
        current_rating,
        potential_rating,
        current_efficiency: efficiency("current_energy_efficiency"),
        potential_efficiency: efficiency("potential_energy_efficiency"),
        property_type: text(source, "property_type"),
        built_form: text(source, "built_form"),
        inspection_date,
        lodgement_date,
        tenure,
        transaction_type: text(source, "transaction_type"),
        total_floor_area: optional("total_floor_area").unwrap_or(0.0),
        number_habitable_rooms: parse_non_negative_i64(
            source.field("number_habitable_rooms").as_deref(),
        )
        .unwrap_or(0),
        co2_emissions_current: optional("co2_emissions_current"),
        co2_emissions_potential: optional("co2_emissions_potential"),
        heating_cost_current: optional("heating_cost_current"),
        heating_cost_potential: optional("heating_cost_potential"),
        hot_water_cost_current: optional("hot_water_cost_current"),
        hot_water_cost_potential: optional("hot_water_cost_potential"),
        lighting_cost_current: optional("lighting_cost_current"),
        lighting_cost_potential: optional("lighting_cost_potential"),
        local_authority: first_text(source, &["local_authority_label", "local_authority"]),
        constituency: first_text(source, &["constituency_label", "constituency"]),
    })
}

fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// One row of a bulk CSV member, addressed through its header map.
pub struct CsvRow<'a> {
    pub headers: &'a HashMap<String, usize>,
    pub record: &'a csv::ByteRecord,
}

impl FieldSource for CsvRow<'_> {
    fn field(&self, name: &str) -> Option<String> {
        let idx = *self.headers.get(&name.to_ascii_uppercase())?;
        let bytes = self.record.get(idx)?;
        clean(&String::from_utf8_lossy(bytes))
    }
}

/// Maps a CSV header row to `UPPER_SNAKE name -> column index`.
pub fn header_index(headers: &csv::ByteRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = String::from_utf8_lossy(name);
            // Some dumps carry a UTF-8 BOM on the first header.
            let name = name.trim_start_matches('\u{feff}').trim();
            (name.to_ascii_uppercase().replace(['-', ' '], "_"), idx)
        })
        .collect()
}

/// One upstream JSON row (`"current-energy-rating": "C"`).
impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<String> {
        match self.get(&name.replace('_', "-"))? {
            Value::String(s) => clean(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn postcode_is_compressed_and_uppercased() {
        assert_eq!(normalize_postcode(" sw1a 1aa "), "SW1A1AA");
        assert_eq!(normalize_postcode("M1\t4BT"), "M14BT");
        assert_eq!(normalize_postcode(&normalize_postcode("ec1a 1bb")), "EC1A1BB");
    }

    #[test]
    fn plausible_postcodes() {
        assert!(is_plausible_postcode("SW1A 1AA"));
        assert!(is_plausible_postcode("m1 4bt"));
        assert!(is_plausible_postcode("B33 8TH"));
        assert!(!is_plausible_postcode("12345"));
        assert!(!is_plausible_postcode(""));
    }

    #[test]
    fn rating_letters() {
        assert_eq!(normalize_rating(Some(" c ")), "C");
        assert_eq!(normalize_rating(Some("H")), "");
        assert_eq!(normalize_rating(Some("CD")), "");
        assert_eq!(normalize_rating(None), "");
    }

    #[test]
    fn numeric_coercion_rejects_negatives_and_garbage() {
        assert_eq!(parse_non_negative_f64(Some("72.5")), Some(72.5));
        assert_eq!(parse_non_negative_f64(Some("")), None);
        assert_eq!(parse_non_negative_f64(Some("-3")), None);
        assert_eq!(parse_non_negative_f64(Some("NaN")), None);
        assert_eq!(parse_non_negative_i64(Some("4.0")), Some(4));
        assert_eq!(parse_non_negative_i64(Some("abc")), None);
    }

    #[test]
    fn dates_ignore_time_component() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4);
        assert_eq!(parse_date(Some("2021-03-04")), expected);
        assert_eq!(parse_date(Some("2021-03-04 10:22:31")), expected);
        assert_eq!(parse_date(Some("04/03/2021")), None);
    }

    #[test]
    fn json_row_normalises_all_invariants() {
        let row = json_row(json!({
            "lmk-key": "abc123",
            "address": "1 Test Road",
            "postcode": "m1 4bt",
            "current-energy-rating": "c",
            "potential-energy-rating": "E",
            "current-energy-efficiency": "72",
            "potential-energy-efficiency": 140,
            "inspection-date": "2021-06-01",
            "lodgement-date": "2021-05-20",
            "total-floor-area": "72.0",
            "number-habitable-rooms": "",
            "co2-emissions-current": "2.4",
            "local-authority": "E08000003",
            "local-authority-label": "Manchester",
        }));

        let record = record_from_fields(&row).unwrap();
        assert_eq!(record.postcode, "M14BT");
        assert_eq!(record.current_rating, "C");
        // potential never worse than current
        assert_eq!(record.potential_rating, "C");
        assert_eq!(record.current_efficiency, 72);
        assert_eq!(record.potential_efficiency, 100);
        assert_eq!(record.lodgement_date, record.inspection_date);
        assert_eq!(record.total_floor_area, 72.0);
        assert_eq!(record.number_habitable_rooms, 0);
        assert_eq!(record.co2_emissions_current, Some(2.4));
        assert_eq!(record.co2_emissions_potential, None);
        assert_eq!(record.tenure, "Unknown");
        assert_eq!(record.local_authority, "Manchester");
    }

    #[test]
    fn rows_without_key_or_postcode_are_rejected() {
        assert!(record_from_fields(&json_row(json!({"postcode": "M1 4BT"}))).is_none());
        assert!(record_from_fields(&json_row(json!({"lmk-key": "k", "postcode": "  "}))).is_none());
    }

    #[test]
    fn missing_lodgement_takes_inspection_date() {
        let record = record_from_fields(&json_row(json!({
            "lmk-key": "k",
            "postcode": "M14BT",
            "inspection-date": "2019-01-02",
        })))
        .unwrap();
        assert_eq!(record.lodgement_date, NaiveDate::from_ymd_opt(2019, 1, 2));
    }

    #[test]
    fn csv_row_reads_by_header_name() {
        let headers = csv::ByteRecord::from(vec!["\u{feff}LMK_KEY", "ADDRESS1", "ADDRESS2", "POSTCODE"]);
        let index = header_index(&headers);
        let record = csv::ByteRecord::from(vec!["k9", "Flat 2", "9 High St", "b33 8th"]);
        let row = CsvRow {
            headers: &index,
            record: &record,
        };

        let epc = record_from_fields(&row).unwrap();
        assert_eq!(epc.lmk_key, "k9");
        assert_eq!(epc.address, "Flat 2, 9 High St");
        assert_eq!(epc.postcode, "B338TH");
    }
}
