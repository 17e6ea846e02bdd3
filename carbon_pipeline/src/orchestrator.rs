use crate::error::{PipelineError, Result};
use crate::fetcher::{iso_utc, Transport, WindowedFetcher};
use crate::models::{validate_zone, Granularity};
use crate::normalizer::normalize;
use crate::raw::RawTable;
use crate::store::{log_writes, PartitionStore};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;

/// `[first of month, first of next month)` in UTC.
pub fn month_window(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || PipelineError::InvalidPeriod { year, month };
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    let to_utc = |d: NaiveDate| d.and_time(chrono::NaiveTime::MIN).and_utc();
    Ok((to_utc(start), to_utc(next)))
}

/// Consecutive sub-windows of at most `max_days` covering `[start, end)`.
/// The final window is cut short at `end`.
pub fn split_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_days: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    // A span too large for a TimeDelta covers the whole range in one window.
    let step = Duration::try_days(max_days.max(1)).unwrap_or_else(|| end - start);
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = cursor.checked_add_signed(step).map_or(end, |t| t.min(end));
        windows.push((cursor, next));
        cursor = next;
    }
    windows
}

/// What happened to one (zone, month) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No window returned any rows; nothing was written.
    NoData,
    /// Rows were normalized and upserted.
    Ingested { rows: usize, partitions: usize },
}

/// Drives fetch -> normalize -> store for one (zone, month) at a time.
pub struct Ingestor<'a, T: Transport, S: PartitionStore> {
    fetcher: &'a WindowedFetcher<T>,
    store: &'a S,
    window_days: i64,
}

impl<'a, T: Transport, S: PartitionStore> Ingestor<'a, T, S> {
    pub fn new(fetcher: &'a WindowedFetcher<T>, store: &'a S, window_days: i64) -> Self {
        Self {
            fetcher,
            store,
            window_days,
        }
    }

    /// Ingest one calendar month of hourly data for `zone`.
    ///
    /// Sub-windows are fetched sequentially. Errors from the fetcher or the
    /// normalizer propagate; the caller decides whether the batch continues.
    pub fn ingest_period(&self, zone: &str, year: i32, month: u32) -> Result<IngestOutcome> {
        validate_zone(zone)?;
        let (start, end) = month_window(year, month)?;

        let mut collected = Vec::new();
        for (from, to) in split_windows(start, end, self.window_days) {
            let raw = self.fetcher.fetch(zone, from, to)?;
            if !raw.is_empty() {
                collected.push(raw);
            }
        }

        if collected.is_empty() {
            info!("[{}] No data {}-{:02}", zone, year, month);
            return Ok(IngestOutcome::NoData);
        }

        let raw_all = RawTable::concat(collected);
        let canonical = normalize(&raw_all, zone)?;
        let writes = self.store.upsert(&canonical, Granularity::Hourly)?;
        log_writes(Granularity::Hourly, &writes);

        info!(
            "[{}] Ingested {}-{:02}: {} rows ({} -> {})",
            zone,
            year,
            month,
            canonical.height(),
            iso_utc(start),
            iso_utc(end)
        );
        Ok(IngestOutcome::Ingested {
            rows: canonical.height(),
            partitions: writes.len(),
        })
    }
}
