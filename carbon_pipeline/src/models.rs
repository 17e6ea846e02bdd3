use crate::error::{PipelineError, Result};
use chrono::{DateTime, Datelike, Months, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DATETIME_UTC: &str = "datetime_utc";
pub const ZONE: &str = "zone";
pub const CARBON_DIRECT: &str = "carbon_direct";
pub const CARBON_LIFECYCLE: &str = "carbon_lifecycle";
pub const CFE_PCT: &str = "cfe_pct";
pub const RE_PCT: &str = "re_pct";
pub const ESTIMATED: &str = "estimated";
pub const ESTIMATION_METHOD: &str = "estimation_method";

/// Canonical column order for every stored partition.
pub const CANONICAL_COLUMNS: [&str; 8] = [
    DATETIME_UTC,
    ZONE,
    CARBON_DIRECT,
    CARBON_LIFECYCLE,
    CFE_PCT,
    RE_PCT,
    ESTIMATED,
    ESTIMATION_METHOD,
];

/// Intensity and percentage fields averaged by the aggregator.
pub const NUMERIC_FIELDS: [&str; 4] = [CARBON_DIRECT, CARBON_LIFECYCLE, CFE_PCT, RE_PCT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl Granularity {
    /// Granularities derived from hourly data by resampling.
    pub const AGGREGATES: [Granularity; 3] =
        [Granularity::Daily, Granularity::Monthly, Granularity::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        }
    }

    /// Start of the bucket containing `timestamp` at this granularity.
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let date = timestamp.date_naive();
        let start = match self {
            Granularity::Hourly => {
                let secs = timestamp.timestamp();
                return DateTime::<Utc>::from_timestamp(secs - secs.rem_euclid(3600), 0)
                    .unwrap_or(timestamp);
            }
            Granularity::Daily => date,
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
            Granularity::Yearly => date.with_ordinal(1).unwrap_or(date),
        };
        start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Start of the bucket following the one that starts at `bucket`.
    /// `None` past the end of the calendar.
    pub fn next_bucket(&self, bucket: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = bucket.date_naive();
        let next = match self {
            Granularity::Hourly => return bucket.checked_add_signed(chrono::Duration::hours(1)),
            Granularity::Daily => date.succ_opt()?,
            Granularity::Monthly => date.checked_add_months(Months::new(1))?,
            Granularity::Yearly => date.checked_add_months(Months::new(12))?,
        };
        Some(next.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Storage type of the `estimated` column. Aggregates hold the fraction
    /// of estimated hours rather than a flag.
    pub fn estimated_dtype(&self) -> DataType {
        match self {
            Granularity::Hourly => DataType::Boolean,
            _ => DataType::Float64,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            "monthly" => Ok(Granularity::Monthly),
            "yearly" => Ok(Granularity::Yearly),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// Physical storage unit: one file per (granularity, zone, year).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub granularity: Granularity,
    pub zone: String,
    pub year: i32,
}

impl PartitionKey {
    pub fn new(granularity: Granularity, zone: impl Into<String>, year: i32) -> Self {
        Self {
            granularity,
            zone: zone.into(),
            year,
        }
    }

    /// Rejects zones that cannot be a single directory name under the store
    /// root: empty, `.`/`..`, or containing a path separator.
    pub fn validate(&self) -> Result<()> {
        validate_zone(&self.zone)
    }

    /// Path of the partition file relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!("granularity={}", self.granularity))
            .join(format!("zone={}", self.zone))
            .join(format!("year={}", self.year))
            .join("data.parquet")
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.granularity, self.zone, self.year)
    }
}

pub fn validate_zone(zone: &str) -> Result<()> {
    let invalid = zone.trim().is_empty()
        || zone == "."
        || zone == ".."
        || zone.contains(['/', '\\'])
        || zone.contains('\0');
    if invalid {
        return Err(PipelineError::InvalidZone(zone.to_string()));
    }
    Ok(())
}

/// One canonical hourly row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonRecord {
    pub datetime_utc: DateTime<Utc>,
    pub zone: String,
    pub carbon_direct: Option<f64>,
    pub carbon_lifecycle: Option<f64>,
    pub cfe_pct: Option<f64>,
    pub re_pct: Option<f64>,
    pub estimated: bool,
    pub estimation_method: Option<String>,
}

impl CarbonRecord {
    pub fn new(datetime_utc: DateTime<Utc>, zone: impl Into<String>) -> Self {
        Self {
            datetime_utc,
            zone: zone.into(),
            carbon_direct: None,
            carbon_lifecycle: None,
            cfe_pct: None,
            re_pct: None,
            estimated: false,
            estimation_method: None,
        }
    }

    /// Value of one of the [`NUMERIC_FIELDS`].
    pub fn numeric(&self, field: &str) -> Option<f64> {
        match field {
            CARBON_DIRECT => self.carbon_direct,
            CARBON_LIFECYCLE => self.carbon_lifecycle,
            CFE_PCT => self.cfe_pct,
            RE_PCT => self.re_pct,
            _ => None,
        }
    }
}

pub fn datetime_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()))
}

/// Column names and storage types of a partition at `granularity`.
pub fn canonical_schema(granularity: Granularity) -> Vec<(&'static str, DataType)> {
    vec![
        (DATETIME_UTC, datetime_dtype()),
        (ZONE, DataType::String),
        (CARBON_DIRECT, DataType::Float64),
        (CARBON_LIFECYCLE, DataType::Float64),
        (CFE_PCT, DataType::Float64),
        (RE_PCT, DataType::Float64),
        (ESTIMATED, granularity.estimated_dtype()),
        (ESTIMATION_METHOD, DataType::String),
    ]
}
