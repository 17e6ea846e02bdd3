//! Conversions between canonical rows and polars frames.

use crate::error::{PipelineError, Result};
use crate::models::{
    canonical_schema, CarbonRecord, Granularity, CARBON_DIRECT, CARBON_LIFECYCLE, CFE_PCT,
    DATETIME_UTC, ESTIMATED, ESTIMATION_METHOD, RE_PCT, ZONE,
};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::collections::HashSet;

/// Build the canonical hourly frame from records, preserving their order.
pub fn records_to_frame(records: &[CarbonRecord]) -> PolarsResult<DataFrame> {
    let datetimes = Int64Chunked::from_iter_options(
        DATETIME_UTC.into(),
        records.iter().map(|r| Some(r.datetime_utc.timestamp_millis())),
    )
    .into_datetime(TimeUnit::Milliseconds, Some("UTC".into()))
    .into_series();

    DataFrame::new(vec![
        datetimes,
        Series::new(
            ZONE.into(),
            records.iter().map(|r| r.zone.clone()).collect::<Vec<_>>(),
        ),
        Series::new(
            CARBON_DIRECT.into(),
            records.iter().map(|r| r.carbon_direct).collect::<Vec<_>>(),
        ),
        Series::new(
            CARBON_LIFECYCLE.into(),
            records.iter().map(|r| r.carbon_lifecycle).collect::<Vec<_>>(),
        ),
        Series::new(
            CFE_PCT.into(),
            records.iter().map(|r| r.cfe_pct).collect::<Vec<_>>(),
        ),
        Series::new(
            RE_PCT.into(),
            records.iter().map(|r| r.re_pct).collect::<Vec<_>>(),
        ),
        Series::new(
            ESTIMATED.into(),
            records.iter().map(|r| r.estimated).collect::<Vec<_>>(),
        ),
        Series::new(
            ESTIMATION_METHOD.into(),
            records
                .iter()
                .map(|r| r.estimation_method.clone())
                .collect::<Vec<_>>(),
        ),
    ])
}

/// Read canonical rows back out of a frame. Rows with a null timestamp or
/// zone are skipped; `estimated` is read as true when its value is nonzero.
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<CarbonRecord>> {
    let df = conform(df.clone(), Granularity::Hourly)?;
    let millis = millis_column(&df)?;
    let zones = df.column(ZONE)?.str()?;
    let direct = df.column(CARBON_DIRECT)?.f64()?;
    let lifecycle = df.column(CARBON_LIFECYCLE)?.f64()?;
    let cfe = df.column(CFE_PCT)?.f64()?;
    let re = df.column(RE_PCT)?.f64()?;
    let estimated = df.column(ESTIMATED)?.bool()?;
    let methods = df.column(ESTIMATION_METHOD)?.str()?;

    let mut records = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (Some(ms), Some(zone)) = (millis[idx], zones.get(idx)) else {
            continue;
        };
        let Some(datetime_utc) = DateTime::<Utc>::from_timestamp_millis(ms) else {
            continue;
        };
        records.push(CarbonRecord {
            datetime_utc,
            zone: zone.to_string(),
            carbon_direct: direct.get(idx),
            carbon_lifecycle: lifecycle.get(idx),
            cfe_pct: cfe.get(idx),
            re_pct: re.get(idx),
            estimated: estimated.get(idx).unwrap_or(false),
            estimation_method: methods.get(idx).map(str::to_string),
        });
    }

    Ok(records)
}

/// `datetime_utc` as epoch milliseconds.
pub fn millis_column(df: &DataFrame) -> Result<Vec<Option<i64>>> {
    let physical = df.column(DATETIME_UTC)?.cast(&DataType::Int64)?;
    Ok(physical.i64()?.into_iter().collect())
}

/// Project `df` onto the canonical schema for `granularity`: columns in
/// canonical order, cast to their storage types, missing ones added as nulls.
/// Extra columns are dropped.
pub fn conform(df: DataFrame, granularity: Granularity) -> Result<DataFrame> {
    let present: HashSet<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    if !present.contains(DATETIME_UTC) {
        return Err(PipelineError::Storage(PolarsError::ColumnNotFound(
            DATETIME_UTC.into(),
        )));
    }

    let exprs: Vec<Expr> = canonical_schema(granularity)
        .into_iter()
        .map(|(name, dtype)| {
            if present.contains(name) {
                col(name).cast(dtype)
            } else {
                lit(NULL).cast(dtype).alias(name)
            }
        })
        .collect();

    Ok(df.lazy().select(exprs).collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{datetime_dtype, CANONICAL_COLUMNS};
    use chrono::TimeZone;

    fn sample() -> Vec<CarbonRecord> {
        let mut a = CarbonRecord::new(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(), "FR");
        a.carbon_direct = Some(50.0);
        a.estimated = true;
        a.estimation_method = Some("TIME_SLICER_AVERAGE".to_string());
        let mut b = CarbonRecord::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap(), "FR");
        b.cfe_pct = Some(88.5);
        vec![a, b]
    }

    #[test]
    fn test_records_survive_frame_conversion() {
        let records = sample();
        let df = records_to_frame(&records).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column(DATETIME_UTC).unwrap().dtype(), &datetime_dtype());
        assert_eq!(records_from_frame(&df).unwrap(), records);
    }

    #[test]
    fn test_conform_fills_missing_and_orders_columns() {
        let df = records_to_frame(&sample())
            .unwrap()
            .drop(ESTIMATION_METHOD)
            .unwrap()
            .drop(CFE_PCT)
            .unwrap();
        let conformed = conform(df, Granularity::Daily).unwrap();

        let names: Vec<String> = conformed
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, CANONICAL_COLUMNS.to_vec());
        assert_eq!(conformed.column(CFE_PCT).unwrap().null_count(), 2);
        assert_eq!(
            conformed.column(ESTIMATED).unwrap().dtype(),
            &DataType::Float64
        );
        assert_eq!(
            conformed.column(ESTIMATED).unwrap().f64().unwrap().get(0),
            Some(1.0)
        );
    }

    #[test]
    fn test_conform_requires_timestamp() {
        let df = records_to_frame(&sample()).unwrap().drop(DATETIME_UTC).unwrap();
        assert!(conform(df, Granularity::Hourly).is_err());
    }
}
