//! Maps raw API rows of unknown naming onto the canonical carbon schema.

use crate::error::{Result, SchemaError};
use crate::frame::records_to_frame;
use crate::models::{
    CarbonRecord, CARBON_DIRECT, CARBON_LIFECYCLE, CFE_PCT, ESTIMATED, ESTIMATION_METHOD, RE_PCT,
};
use crate::raw::RawTable;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::DataFrame;
use serde_json::Value;

/// Header names accepted as the timestamp column, after header normalization.
const DATETIME_SYNONYMS: &[&str] = &[
    "datetime",
    "datetime_utc",
    "time",
    "timestamp",
    "utc_datetime",
    "date",
];

/// Target field -> source names, most preferred first. New API variants are
/// additions here; names are header-normalized before matching.
const FIELD_SYNONYMS: &[(&str, &[&str])] = &[
    (
        CARBON_DIRECT,
        &[
            "carbon_intensity",
            "carbon_intensity_gco2eq/kwh",
            "carbon_intensity_gco₂eq/kwh_(direct)",
            "carbonintensity",
            "direct",
        ],
    ),
    (
        CARBON_LIFECYCLE,
        &[
            "lifecycle",
            "carbon_intensity_gco2eq/kwh_(life_cycle)",
            "carbon_intensity_gco₂eq/kwh_(life_cycle)",
            "life_cycle",
            "lifecycle_intensity",
        ],
    ),
    (
        CFE_PCT,
        &[
            "cfe",
            "cfe_%",
            "carbon-free_energy_percentage",
            "carbon-free_energy_percentage_(cfe%)",
        ],
    ),
    (
        RE_PCT,
        &[
            "re",
            "re_%",
            "renewable_energy_percentage",
            "renewable_energy_percentage_(re%)",
        ],
    ),
    (ESTIMATED, &["estimated", "data_estimated", "isestimated"]),
    (
        ESTIMATION_METHOD,
        &[
            "estimation_method",
            "data_estimation_method",
            "estimation",
            "estimationmethod",
        ],
    ),
];

/// Textual values read as `estimated = true` (case-insensitive).
const TRUTHY: &[&str] = &["1", "true", "yes", "sim", "y"];

/// Lower-case, trim, spaces to underscores, drop parentheses.
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .collect()
}

/// Normalized header -> original column name, first occurrence wins.
struct HeaderIndex<'a> {
    entries: Vec<(String, &'a str)>,
}

impl<'a> HeaderIndex<'a> {
    fn new(columns: &'a [String]) -> Self {
        let mut entries: Vec<(String, &'a str)> = Vec::with_capacity(columns.len());
        for column in columns {
            let normalized = normalize_header(column);
            if !entries.iter().any(|(n, _)| *n == normalized) {
                entries.push((normalized, column.as_str()));
            }
        }
        Self { entries }
    }

    fn get(&self, normalized: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(n, _)| n == normalized)
            .map(|(_, original)| *original)
    }

    fn datetime_column(&self) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(n, _)| DATETIME_SYNONYMS.contains(&n.as_str()))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(n, _)| n.contains("date") || n.contains("time"))
            })
            .map(|(_, original)| *original)
    }

    fn first_present(&self, candidates: &[&str]) -> Option<&'a str> {
        candidates
            .iter()
            .find_map(|candidate| self.get(&normalize_header(candidate)))
    }
}

/// Source column chosen for each canonical field, `None` when absent.
#[derive(Debug, Default, PartialEq)]
struct FieldSources<'a> {
    carbon_direct: Option<&'a str>,
    carbon_lifecycle: Option<&'a str>,
    cfe_pct: Option<&'a str>,
    re_pct: Option<&'a str>,
    estimated: Option<&'a str>,
    estimation_method: Option<&'a str>,
}

impl<'a> FieldSources<'a> {
    fn resolve(index: &HeaderIndex<'a>) -> Self {
        let mut sources = Self::default();
        for (target, candidates) in FIELD_SYNONYMS {
            let found = index.first_present(candidates);
            match *target {
                CARBON_DIRECT => sources.carbon_direct = found,
                CARBON_LIFECYCLE => sources.carbon_lifecycle = found,
                CFE_PCT => sources.cfe_pct = found,
                RE_PCT => sources.re_pct = found,
                ESTIMATED => sources.estimated = found,
                ESTIMATION_METHOD => sources.estimation_method = found,
                _ => {}
            }
        }
        sources
    }
}

/// Standardize a raw API table for `zone` into the canonical hourly frame.
///
/// Rows whose timestamp cannot be parsed are dropped; unparseable field
/// values become null. The result is sorted by `datetime_utc`.
///
/// # Errors
///
/// [`SchemaError::NoDatetimeColumn`] when no column looks like a timestamp.
pub fn normalize(raw: &RawTable, zone: &str) -> Result<DataFrame> {
    let records = normalize_records(raw, zone)?;
    Ok(records_to_frame(&records)?)
}

/// Row-level form of [`normalize`].
pub fn normalize_records(
    raw: &RawTable,
    zone: &str,
) -> std::result::Result<Vec<CarbonRecord>, SchemaError> {
    let index = HeaderIndex::new(raw.columns());
    let dt_col = index
        .datetime_column()
        .ok_or_else(|| SchemaError::NoDatetimeColumn {
            columns: raw.columns().to_vec(),
        })?;
    let sources = FieldSources::resolve(&index);

    let field = |row: &serde_json::Map<String, Value>, source: Option<&str>| -> Option<Value> {
        source.and_then(|name| row.get(name)).cloned()
    };

    let mut records: Vec<CarbonRecord> = raw
        .rows()
        .iter()
        .filter_map(|row| {
            let datetime_utc = row.get(dt_col).and_then(parse_datetime)?;
            Some(CarbonRecord {
                datetime_utc,
                zone: zone.to_string(),
                carbon_direct: field(row, sources.carbon_direct).as_ref().and_then(coerce_f64),
                carbon_lifecycle: field(row, sources.carbon_lifecycle)
                    .as_ref()
                    .and_then(coerce_f64),
                cfe_pct: field(row, sources.cfe_pct).as_ref().and_then(coerce_f64),
                re_pct: field(row, sources.re_pct).as_ref().and_then(coerce_f64),
                estimated: field(row, sources.estimated)
                    .as_ref()
                    .map(coerce_bool)
                    .unwrap_or(false),
                estimation_method: field(row, sources.estimation_method)
                    .as_ref()
                    .and_then(coerce_string),
            })
        })
        .collect();

    // Stable: rows sharing a timestamp keep their arrival order.
    records.sort_by_key(|r| r.datetime_utc);
    Ok(records)
}

/// Parse a timestamp cell into UTC; `None` for anything unrecognizable.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => {
            let epoch = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Below 10^11 reads as seconds (year ~5138), above as milliseconds.
            if epoch.abs() < 100_000_000_000 {
                DateTime::<Utc>::from_timestamp(epoch, 0)
            } else {
                DateTime::<Utc>::from_timestamp_millis(epoch)
            }
        }
        _ => None,
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Numeric coercion that never fails: unparseable becomes `None`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|f| !f.is_nan())
}

/// Booleans and numbers coerce directly; text is matched against [`TRUTHY`].
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            TRUTHY.contains(&lowered.as_str())
        }
        _ => false,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
