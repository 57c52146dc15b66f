//! Persistent, key-addressed store for regridded `GriddedField`s.
//!
//! Writes are staged to a temp file in the same directory and renamed into
//! place, the same discipline `persistent_queue.rs` uses for its backing
//! file: a reader never observes a partially written entry, and concurrent
//! writers to the same key produce one winner with no torn file.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PipelineResult;
use crate::field::GriddedField;
use crate::grid::GeoBounds;
use crate::grid::Grid;

/// Datasets whose values don't meaningfully change day to day use the
/// sentinel date-key `"latest"` instead of the literal requested date
/// — salinity is the only such dataset today.
pub const TIME_INSENSITIVE_KEY: &str = "latest";

pub struct RawCache {
    root: PathBuf,
}

impl RawCache {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn payload_path(&self, dataset: &str, date_key: &str) -> PathBuf {
        self.root.join(format!("{dataset}_{date_key}.bin"))
    }

    /// Atomically write `field` under `(dataset, date_key)`. Writes the
    /// payload to a temp file in the cache directory, then renames over the
    /// final path — rename is atomic on the same filesystem, so a crash
    /// mid-write never leaves a half-written cache entry visible.
    pub fn write(&self, dataset: &str, date_key: &str, field: &GriddedField) -> PipelineResult<()> {
        let final_path = self.payload_path(dataset, date_key);
        let bytes = bincode::serialize(field)
            .map_err(|e| crate::error::PipelineError::Internal(format!("encode failed: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        use std::io::Write;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&final_path)
            .map_err(|e| crate::error::PipelineError::Internal(format!("rename failed: {e}")))?;

        debug!(dataset, date_key, bytes = bytes.len(), "wrote raw cache entry");
        Ok(())
    }

    /// Read `(dataset, date_key)`. A hit requires both that the file exists
    /// and that it parses; a parse failure is treated as a cache miss and
    /// the corrupt file is removed so future reads don't repeat the cost.
    pub fn read(&self, dataset: &str, date_key: &str) -> Option<GriddedField> {
        let path = self.payload_path(dataset, date_key);
        let bytes = std::fs::read(&path).ok()?;
        match bincode::deserialize::<GriddedField>(&bytes) {
            Ok(field) => Some(field),
            Err(e) => {
                warn!(dataset, date_key, error = %e, "raw cache entry failed to parse, evicting");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Read, then optionally restrict to `bounds` via the grid service — the
    /// file on disk always holds the full canonical grid; bounds are
    /// applied only to the in-memory result.
    pub fn read_with_bounds(
        &self,
        dataset: &str,
        date_key: &str,
        grid: &Grid,
        bounds: Option<GeoBounds>,
    ) -> Option<GriddedField> {
        let field = self.read(dataset, date_key)?;
        Some(match bounds {
            Some(b) => grid.apply_bounds(&field, b),
            None => field,
        })
    }

    pub fn evict(&self, dataset: &str, date_key: &str) -> std::io::Result<()> {
        let path = self.payload_path(dataset, date_key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldMeta;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn sample_field() -> GriddedField {
        GriddedField::new(
            Array2::from_elem((3, 3), 1.5),
            Array2::from_elem((3, 3), false),
            FieldMeta {
                variable: "sst".into(),
                source: "test".into(),
                units: "C".into(),
                observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        )
    }

    #[test]
    fn write_then_read_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path()).unwrap();
        let field = sample_field();

        cache.write("sst", "2024-01-01", &field).unwrap();
        let read_back = cache.read("sst", "2024-01-01").unwrap();

        assert_eq!(read_back, field);
    }

    #[test]
    fn second_write_does_not_corrupt_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path()).unwrap();
        let a = sample_field();
        let mut b = sample_field();
        b.values[(0, 0)] = 99.0;

        cache.write("sst", "2024-01-01", &a).unwrap();
        cache.write("sst", "2024-01-01", &b).unwrap();

        let read_back = cache.read("sst", "2024-01-01").unwrap();
        assert_eq!(read_back, b);
    }

    #[test]
    fn corrupt_entry_is_treated_as_miss_and_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path()).unwrap();
        let path = dir.path().join("sst_2024-01-01.bin");
        std::fs::write(&path, b"not a valid payload").unwrap();

        assert!(cache.read("sst", "2024-01-01").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn salinity_uses_latest_sentinel_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path()).unwrap();
        let field = sample_field();
        cache.write("salinity", TIME_INSENSITIVE_KEY, &field).unwrap();
        assert!(cache.read("salinity", "2024-06-01").is_none());
        assert!(cache.read("salinity", TIME_INSENSITIVE_KEY).is_some());
    }
}
