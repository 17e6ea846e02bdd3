//! Partitioned columnar storage of canonical rows.
//!
//! Layout under the store root:
//!
//! ```text
//! granularity=<g>/zone=<z>/year=<y>/data.parquet
//! ```
//!
//! Every write replaces the whole partition file. There is no locking: a store
//! root must have a single writer process at a time.

use crate::error::{PipelineError, Result};
use crate::frame::{conform, millis_column};
use crate::models::{Granularity, PartitionKey, ZONE};
use chrono::{DateTime, Datelike, Utc};
use glob::glob;
use log::{debug, info};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Row counts for one partition touched by an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWrite {
    pub key: PartitionKey,
    pub existing_rows: usize,
    pub incoming_rows: usize,
    pub stored_rows: usize,
}

/// Storage seam: the merge logic lives in [`upsert`](PartitionStore::upsert)
/// and only needs `read`/`write`, so another engine can slot in underneath.
pub trait PartitionStore {
    /// Contents of a partition, `None` if it was never written.
    fn read(&self, key: &PartitionKey) -> Result<Option<DataFrame>>;

    /// Replace a partition's contents.
    fn write(&self, key: &PartitionKey, frame: &mut DataFrame) -> Result<()>;

    /// Existing partitions of one granularity, sorted.
    fn partitions(&self, granularity: Granularity) -> Result<Vec<PartitionKey>>;

    /// Merge `frame` into the partitions it touches.
    ///
    /// Rows are grouped by `(zone, year of datetime_utc)`. Within each
    /// partition the result holds one row per `(datetime_utc, zone)`, the
    /// incoming row winning over a stored one, sorted by time. An empty
    /// frame is a no-op.
    fn upsert(&self, frame: &DataFrame, granularity: Granularity) -> Result<Vec<PartitionWrite>> {
        if frame.height() == 0 {
            return Ok(Vec::new());
        }

        let frame = conform(frame.clone(), granularity)?;
        let mut summaries = Vec::new();

        for (key, group) in split_by_partition(&frame, granularity)? {
            let existing = self.read(&key)?;
            let existing_rows = existing.as_ref().map(|df| df.height()).unwrap_or(0);
            let incoming_rows = group.height();

            let mut merged = merge_keep_last(existing, group, granularity)?;
            self.write(&key, &mut merged)?;

            debug!(
                "Upserted {}: {} existing + {} incoming -> {} rows",
                key,
                existing_rows,
                incoming_rows,
                merged.height()
            );
            summaries.push(PartitionWrite {
                key,
                existing_rows,
                incoming_rows,
                stored_rows: merged.height(),
            });
        }

        Ok(summaries)
    }

    /// Every partition of `granularity` stacked into one frame, `None` when
    /// there are none.
    fn read_all(&self, granularity: Granularity) -> Result<Option<DataFrame>> {
        let mut combined: Option<DataFrame> = None;
        for key in self.partitions(granularity)? {
            let Some(df) = self.read(&key)? else {
                continue;
            };
            let df = conform(df, granularity)?;
            combined = Some(match combined {
                Some(acc) => acc.vstack(&df)?,
                None => df,
            });
        }
        Ok(combined)
    }
}

/// Parquet files in a hive-style directory tree.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl PartitionStore for ParquetStore {
    fn read(&self, key: &PartitionKey) -> Result<Option<DataFrame>> {
        key.validate()?;
        let path = self.partition_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let df = ParquetReader::new(fs::File::open(&path)?).finish()?;
        Ok(Some(df))
    }

    fn write(&self, key: &PartitionKey, frame: &mut DataFrame) -> Result<()> {
        key.validate()?;
        let path = self.partition_path(key);
        let parent = path.parent().ok_or_else(|| {
            PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Cannot determine parent directory for: {}", path.display()),
            ))
        })?;
        fs::create_dir_all(parent)?;

        // Write beside the target, then rename over it.
        let temp_file = NamedTempFile::new_in(parent)?;
        ParquetWriter::new(temp_file.as_file()).finish(frame)?;
        temp_file.persist(&path).map_err(|e| PipelineError::Io(e.error))?;

        Ok(())
    }

    fn partitions(&self, granularity: Granularity) -> Result<Vec<PartitionKey>> {
        let pattern = self
            .root
            .join(format!("granularity={}", granularity))
            .join("zone=*")
            .join("year=*")
            .join("data.parquet");
        let pattern = pattern.to_string_lossy().to_string();

        let mut keys = Vec::new();
        for entry in glob(&pattern)? {
            let path = entry?;
            if let Some(key) = parse_partition_path(&path, granularity) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Recover the key from `.../zone=<z>/year=<y>/data.parquet`.
fn parse_partition_path(path: &Path, granularity: Granularity) -> Option<PartitionKey> {
    let year_dir = path.parent()?;
    let zone_dir = year_dir.parent()?;
    let year = year_dir
        .file_name()?
        .to_str()?
        .strip_prefix("year=")?
        .parse::<i32>()
        .ok()?;
    let zone = zone_dir.file_name()?.to_str()?.strip_prefix("zone=")?;
    Some(PartitionKey::new(granularity, zone, year))
}

/// Group a conformed frame by `(zone, year)` into per-partition frames.
fn split_by_partition(
    frame: &DataFrame,
    granularity: Granularity,
) -> Result<BTreeMap<PartitionKey, DataFrame>> {
    let millis = millis_column(frame)?;
    let zones = frame.column(ZONE)?.str()?;

    let mut indices: BTreeMap<PartitionKey, Vec<IdxSize>> = BTreeMap::new();
    for (idx, ms) in millis.iter().enumerate() {
        // Null timestamps or zones cannot be placed in a partition.
        let (Some(ms), Some(zone)) = (ms, zones.get(idx)) else {
            continue;
        };
        let Some(ts) = DateTime::<Utc>::from_timestamp_millis(*ms) else {
            continue;
        };
        indices
            .entry(PartitionKey::new(granularity, zone, ts.year()))
            .or_default()
            .push(idx as IdxSize);
    }

    // All-or-nothing: one unusable zone fails the batch before any write.
    for key in indices.keys() {
        key.validate()?;
    }

    let mut groups = BTreeMap::new();
    for (key, idx) in indices {
        let group = frame.take(&IdxCa::from_vec("idx".into(), idx))?;
        groups.insert(key, group);
    }
    Ok(groups)
}

/// Concatenate `existing` then `incoming`, keep the last row for every
/// `(datetime_utc, zone)` key and order by time.
///
/// The policy is applied here explicitly: walking the stacked rows backwards,
/// the first sighting of a key is the newest version.
pub fn merge_keep_last(
    existing: Option<DataFrame>,
    incoming: DataFrame,
    granularity: Granularity,
) -> Result<DataFrame> {
    let incoming = conform(incoming, granularity)?;
    let stacked = match existing {
        Some(old) => conform(old, granularity)?.vstack(&incoming)?,
        None => incoming,
    };

    let millis = millis_column(&stacked)?;
    let zones = stacked.column(ZONE)?.str()?;

    let mut seen: HashSet<(Option<i64>, Option<&str>)> = HashSet::with_capacity(stacked.height());
    let mut keep: Vec<(i64, IdxSize)> = Vec::with_capacity(stacked.height());
    for idx in (0..stacked.height()).rev() {
        let key = (millis[idx], zones.get(idx));
        if seen.insert(key) {
            keep.push((millis[idx].unwrap_or(i64::MIN), idx as IdxSize));
        }
    }
    // Ascending time; equal timestamps keep stacking order.
    keep.sort_by_key(|&(ms, idx)| (ms, idx));

    let order: Vec<IdxSize> = keep.into_iter().map(|(_, idx)| idx).collect();
    Ok(stacked.take(&IdxCa::from_vec("idx".into(), order))?)
}

/// Log a one-line summary of an upsert.
pub fn log_writes(granularity: Granularity, writes: &[PartitionWrite]) {
    let stored: usize = writes.iter().map(|w| w.stored_rows).sum();
    info!(
        "Stored {} partition(s) at {} granularity ({} rows total)",
        writes.len(),
        granularity,
        stored
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{records_from_frame, records_to_frame};
    use crate::models::CarbonRecord;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(zone: &str, y: i32, m: u32, d: u32, h: u32, direct: f64) -> CarbonRecord {
        let mut r = CarbonRecord::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(), zone);
        r.carbon_direct = Some(direct);
        r
    }

    fn frame(records: &[CarbonRecord]) -> DataFrame {
        records_to_frame(records).unwrap()
    }

    #[test]
    fn test_empty_upsert_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        let writes = store.upsert(&frame(&[]), Granularity::Hourly).unwrap();
        assert!(writes.is_empty());
        assert!(store.partitions(Granularity::Hourly).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_partitions_by_zone_and_year() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        let rows = vec![
            record("FR", 2022, 12, 31, 23, 1.0),
            record("FR", 2023, 1, 1, 0, 2.0),
            record("BR", 2023, 1, 1, 0, 3.0),
        ];
        let writes = store.upsert(&frame(&rows), Granularity::Hourly).unwrap();
        assert_eq!(writes.len(), 3);

        let keys = store.partitions(Granularity::Hourly).unwrap();
        assert_eq!(
            keys,
            vec![
                PartitionKey::new(Granularity::Hourly, "BR", 2023),
                PartitionKey::new(Granularity::Hourly, "FR", 2022),
                PartitionKey::new(Granularity::Hourly, "FR", 2023),
            ]
        );
        assert!(dir
            .path()
            .join("granularity=hourly/zone=FR/year=2022/data.parquet")
            .exists());
    }

    #[test]
    fn test_zone_that_is_not_one_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path().join("store"));
        for zone in ["US/NY", "..", ""] {
            let rows = vec![record("FR", 2023, 1, 1, 0, 1.0), record(zone, 2023, 1, 1, 0, 2.0)];
            let err = store.upsert(&frame(&rows), Granularity::Hourly).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidZone(_)), "{zone:?}");
        }
        assert!(store.partitions(Granularity::Hourly).unwrap().is_empty());
        assert!(!dir.path().join("granularity=hourly").exists());

        let outside = PartitionKey::new(Granularity::Hourly, "..", 2023);
        assert!(store.read(&outside).is_err());
    }

    #[test]
    fn test_new_rows_supersede_stored_rows() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        let first = vec![record("FR", 2023, 1, 1, 0, 50.0), record("FR", 2023, 1, 1, 1, 55.0)];
        store.upsert(&frame(&first), Granularity::Hourly).unwrap();

        let writes = store
            .upsert(&frame(&[record("FR", 2023, 1, 1, 0, 60.0)]), Granularity::Hourly)
            .unwrap();
        assert_eq!(writes[0].existing_rows, 2);
        assert_eq!(writes[0].incoming_rows, 1);
        assert_eq!(writes[0].stored_rows, 2);

        let key = PartitionKey::new(Granularity::Hourly, "FR", 2023);
        let stored = records_from_frame(&store.read(&key).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].carbon_direct, Some(60.0));
        assert_eq!(stored[1].carbon_direct, Some(55.0));
    }

    #[test]
    fn test_duplicates_within_one_batch_keep_last() {
        let merged = merge_keep_last(
            None,
            frame(&[
                record("FR", 2023, 1, 1, 2, 1.0),
                record("FR", 2023, 1, 1, 0, 2.0),
                record("FR", 2023, 1, 1, 2, 3.0),
            ]),
            Granularity::Hourly,
        )
        .unwrap();
        let rows = records_from_frame(&merged).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].carbon_direct, Some(2.0));
        assert_eq!(rows[1].carbon_direct, Some(3.0));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        let rows = vec![
            record("FR", 2023, 3, 1, 5, 7.0),
            record("FR", 2023, 3, 1, 1, 8.0),
            record("FR", 2023, 3, 2, 0, 9.0),
        ];
        let key = PartitionKey::new(Granularity::Hourly, "FR", 2023);

        store.upsert(&frame(&rows), Granularity::Hourly).unwrap();
        let once = store.read(&key).unwrap().unwrap();
        store.upsert(&frame(&rows), Granularity::Hourly).unwrap();
        let twice = store.read(&key).unwrap().unwrap();

        assert!(once.equals_missing(&twice));
        let times = millis_column(&twice).unwrap();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_read_all_stacks_partitions() {
        let dir = TempDir::new().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(store.read_all(Granularity::Hourly).unwrap().is_none());

        let rows = vec![record("FR", 2022, 6, 1, 0, 1.0), record("US-GA-GA", 2023, 6, 1, 0, 2.0)];
        store.upsert(&frame(&rows), Granularity::Hourly).unwrap();
        let all = store.read_all(Granularity::Hourly).unwrap().unwrap();
        assert_eq!(all.height(), 2);
    }

    #[test]
    fn test_parse_partition_path() {
        let path = Path::new("/data/granularity=daily/zone=US-NY-NYIS/year=2024/data.parquet");
        assert_eq!(
            parse_partition_path(path, Granularity::Daily),
            Some(PartitionKey::new(Granularity::Daily, "US-NY-NYIS", 2024))
        );
        assert_eq!(
            parse_partition_path(Path::new("/data/zone=FR/2024/data.parquet"), Granularity::Daily),
            None
        );
    }
}
