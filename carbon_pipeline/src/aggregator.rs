use crate::error::Result;
use crate::frame::{conform, records_from_frame};
use crate::models::{CarbonRecord, Granularity, DATETIME_UTC, ESTIMATED, NUMERIC_FIELDS, ZONE};
use crate::store::{log_writes, PartitionStore};
use chrono::{DateTime, Utc};
use log::{info, warn};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Running sums for one (zone, bucket). Means skip nulls.
#[derive(Debug, Default, Clone)]
struct BucketMean {
    sums: [f64; 4],
    counts: [usize; 4],
    estimated_sum: f64,
    rows: usize,
}

impl BucketMean {
    fn add(&mut self, record: &CarbonRecord) {
        for (i, field) in NUMERIC_FIELDS.iter().enumerate() {
            if let Some(v) = record.numeric(field) {
                self.sums[i] += v;
                self.counts[i] += 1;
            }
        }
        if record.estimated {
            self.estimated_sum += 1.0;
        }
        self.rows += 1;
    }

    fn mean(&self, i: usize) -> Option<f64> {
        (self.counts[i] > 0).then(|| self.sums[i] / self.counts[i] as f64)
    }

    fn estimated_share(&self) -> Option<f64> {
        (self.rows > 0).then(|| self.estimated_sum / self.rows as f64)
    }
}

/// Resample hourly rows to `granularity`, per zone, by arithmetic mean.
///
/// Each zone gets one row per bucket from its first to its last bucket.
/// Buckets without hourly rows are kept with every field null. `estimated`
/// becomes the fraction of estimated hours; `estimation_method` is null.
pub fn resample(records: &[CarbonRecord], granularity: Granularity) -> Result<DataFrame> {
    let mut zones: BTreeMap<&str, BTreeMap<DateTime<Utc>, BucketMean>> = BTreeMap::new();
    for record in records {
        let bucket = granularity.bucket_start(record.datetime_utc);
        zones
            .entry(record.zone.as_str())
            .or_default()
            .entry(bucket)
            .or_default()
            .add(record);
    }

    let mut datetimes = Vec::new();
    let mut zone_col = Vec::new();
    let mut means: [Vec<Option<f64>>; 4] = Default::default();
    let mut estimated = Vec::new();

    let empty = BucketMean::default();
    for (zone, buckets) in &zones {
        let (Some(first), Some(last)) = (buckets.keys().next(), buckets.keys().next_back())
        else {
            continue;
        };
        let mut cursor = Some(*first);
        while let Some(bucket) = cursor.filter(|b| b <= last) {
            let acc = buckets.get(&bucket).unwrap_or(&empty);
            datetimes.push(Some(bucket.timestamp_millis()));
            zone_col.push(zone.to_string());
            for (i, column) in means.iter_mut().enumerate() {
                column.push(acc.mean(i));
            }
            estimated.push(acc.estimated_share());
            cursor = granularity.next_bucket(bucket);
        }
    }

    let mut columns = vec![
        Int64Chunked::from_iter_options(DATETIME_UTC.into(), datetimes.into_iter())
            .into_datetime(TimeUnit::Milliseconds, Some("UTC".into()))
            .into_series(),
        Series::new(ZONE.into(), zone_col),
    ];
    for (field, values) in NUMERIC_FIELDS.iter().zip(means) {
        columns.push(Series::new((*field).into(), values));
    }
    columns.push(Series::new(ESTIMATED.into(), estimated));

    // estimation_method is filled back in as nulls by conform.
    conform(DataFrame::new(columns)?, granularity)
}

/// Rebuild daily, monthly and yearly partitions from all stored hourly data.
///
/// A full recompute on every call. Returns the number of rows written per
/// granularity; empty when there is no hourly data.
pub fn aggregate<S: PartitionStore>(store: &S) -> Result<Vec<(Granularity, usize)>> {
    aggregate_to(store, &Granularity::AGGREGATES)
}

/// [`aggregate`] restricted to `targets`. `hourly` is the source and is
/// skipped if listed.
pub fn aggregate_to<S: PartitionStore>(
    store: &S,
    targets: &[Granularity],
) -> Result<Vec<(Granularity, usize)>> {
    let Some(hourly) = store.read_all(Granularity::Hourly)? else {
        info!("No hourly data found to aggregate.");
        return Ok(Vec::new());
    };
    let records = records_from_frame(&hourly)?;
    if records.is_empty() {
        info!("No hourly data found to aggregate.");
        return Ok(Vec::new());
    }

    let mut written = Vec::new();
    for &granularity in targets {
        if granularity == Granularity::Hourly {
            warn!("Skipping hourly: it is the aggregation source.");
            continue;
        }
        let resampled = resample(&records, granularity)?;
        let writes = store.upsert(&resampled, granularity)?;
        log_writes(granularity, &writes);
        info!("Aggregated {}: {} rows", granularity, resampled.height());
        written.push((granularity, resampled.height()));
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::records_to_frame;
    use crate::models::{PartitionKey, CARBON_DIRECT, CFE_PCT, ESTIMATION_METHOD};
    use crate::store::ParquetStore;
    use tempfile::TempDir;
    use chrono::{Duration, TimeZone};

    fn day_of(zone: &str, direct: f64) -> Vec<CarbonRecord> {
        let start = Utc.with_ymd_and_hms(2023, 5, 10, 0, 0, 0).unwrap();
        (0..24)
            .map(|h| {
                let mut r = CarbonRecord::new(start + Duration::hours(h), zone);
                r.carbon_direct = Some(direct);
                r
            })
            .collect()
    }

    #[test]
    fn test_constant_day_averages_to_one_daily_row() {
        let df = resample(&day_of("FR", 100.0), Granularity::Daily).unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.column(CARBON_DIRECT).unwrap().f64().unwrap().get(0), Some(100.0));
        let ms = df
            .column(DATETIME_UTC)
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .get(0);
        assert_eq!(
            ms,
            Some(Utc.with_ymd_and_hms(2023, 5, 10, 0, 0, 0).unwrap().timestamp_millis())
        );
    }

    #[test]
    fn test_means_skip_nulls_and_split_by_zone() {
        let mut records = day_of("FR", 10.0);
        records[0].carbon_direct = None;
        records[1].carbon_direct = Some(240.0);
        records.extend(day_of("BR", 20.0));

        let df = resample(&records, Granularity::Monthly).unwrap();
        assert_eq!(df.height(), 2);
        let zones: Vec<Option<&str>> = df.column(ZONE).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(zones, vec![Some("BR"), Some("FR")]);
        let direct = df.column(CARBON_DIRECT).unwrap().f64().unwrap();
        assert_eq!(direct.get(0), Some(20.0));
        // 22 hours at 10 plus one at 240, over 23 non-null values.
        assert!((direct.get(1).unwrap() - 460.0 / 23.0).abs() < 1e-9);
        assert_eq!(df.column(CFE_PCT).unwrap().null_count(), 2);
        assert_eq!(df.column(ESTIMATION_METHOD).unwrap().null_count(), 2);
    }

    #[test]
    fn test_estimated_becomes_fraction() {
        let mut records = day_of("FR", 1.0);
        for r in records.iter_mut().take(6) {
            r.estimated = true;
        }
        let df = resample(&records, Granularity::Yearly).unwrap();
        assert_eq!(df.column(ESTIMATED).unwrap().f64().unwrap().get(0), Some(0.25));
    }

    #[test]
    fn test_gap_days_are_emitted_as_null_rows() {
        let mut first = CarbonRecord::new(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(), "FR");
        first.carbon_direct = Some(10.0);
        let mut third = CarbonRecord::new(Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap(), "FR");
        third.carbon_direct = Some(30.0);
        third.estimated = true;

        let df = resample(&[first, third], Granularity::Daily).unwrap();
        assert_eq!(df.height(), 3);
        let direct: Vec<Option<f64>> =
            df.column(CARBON_DIRECT).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(direct, vec![Some(10.0), None, Some(30.0)]);
        let estimated: Vec<Option<f64>> =
            df.column(ESTIMATED).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(estimated, vec![Some(0.0), None, Some(1.0)]);
        assert_eq!(df.column(ZONE).unwrap().null_count(), 0);
    }

    #[test]
    fn test_gaps_are_filled_per_zone_only_within_its_own_span() {
        let at = |zone: &str, month: u32| {
            let mut r = CarbonRecord::new(Utc.with_ymd_and_hms(2023, month, 15, 0, 0, 0).unwrap(), zone);
            r.carbon_direct = Some(1.0);
            r
        };
        let df = resample(&[at("FR", 1), at("FR", 4), at("BR", 6)], Granularity::Monthly).unwrap();
        let zones: Vec<Option<&str>> = df.column(ZONE).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(zones, vec![Some("BR"), Some("FR"), Some("FR"), Some("FR"), Some("FR")]);
        assert_eq!(df.column(CARBON_DIRECT).unwrap().null_count(), 2);
    }

    #[test]
    fn test_aggregate_to_selected_granularities() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        store
            .upsert(&records_to_frame(&day_of("FR", 5.0)).unwrap(), Granularity::Hourly)
            .unwrap();

        let written =
            aggregate_to(&store, &[Granularity::Hourly, Granularity::Monthly]).unwrap();
        assert_eq!(written, vec![(Granularity::Monthly, 1)]);
        assert!(store
            .read(&PartitionKey::new(Granularity::Daily, "FR", 2023))
            .unwrap()
            .is_none());
        let hourly = store
            .read(&PartitionKey::new(Granularity::Hourly, "FR", 2023))
            .unwrap()
            .unwrap();
        assert_eq!(hourly.height(), 24);
    }
}
