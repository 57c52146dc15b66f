//! File-backed cache for encoded GeoJSON feature collections,
//! keyed by an md5 hash of the request parameters.
//!
//! Follows the same write-temp-then-rename discipline as [`crate::raw_cache`],
//! plus a `.meta.json` sidecar carrying `created_at`/`feature_count` so
//! maintenance sweeps can evict by age without re-parsing every payload.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use geojson::Feature;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::PipelineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheParams {
    pub kind: String,
    pub date: String,
    pub species: Option<String>,
    pub overlay_type: Option<String>,
    pub bounds: Option<(String, String, String, String)>,
    pub threshold: String,
    pub density_factor: usize,
}

impl CacheParams {
    /// md5 over a canonical (field-order-stable) JSON encoding of the
    /// params — two logically identical requests always hash the same.
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_string(&serde_json::json!({
            "kind": self.kind,
            "date": self.date,
            "species": self.species,
            "overlay_type": self.overlay_type,
            "bounds": self.bounds,
            "threshold": self.threshold,
            "density_factor": self.density_factor,
        }))
        .expect("CacheParams always serializes");
        format!("{:x}", md5::compute(canonical.as_bytes()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    created_at: u64,
    feature_count: usize,
    params: CacheParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
}

pub struct GeoJsonCache {
    root: PathBuf,
    ttl: Duration,
    max_bytes: u64,
}

impl GeoJsonCache {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, max_bytes: u64) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, ttl, max_bytes })
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.meta.json"))
    }

    /// Returns the cached features for `params` if present and not expired.
    pub fn get(&self, params: &CacheParams) -> Option<Vec<Value>> {
        let key = params.cache_key();
        let meta_path = self.meta_path(&key);
        let meta_bytes = std::fs::read(&meta_path).ok()?;
        let meta: CacheMeta = serde_json::from_slice(&meta_bytes).ok()?;

        let age = now_unix().saturating_sub(meta.created_at);
        if age > self.ttl.as_secs() {
            info!(key, age, "geojson cache entry expired");
            let _ = self.evict(&key);
            return None;
        }

        let payload_bytes = std::fs::read(self.payload_path(&key)).ok()?;
        serde_json::from_slice(&payload_bytes).ok()
    }

    /// Write `features` under the key derived from `params`, then enforce
    /// the size cap across the whole cache directory.
    pub fn put(&self, params: &CacheParams, features: &[Feature]) -> PipelineResult<()> {
        let key = params.cache_key();
        let payload: Vec<Value> = features
            .iter()
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
            .collect();
        let payload_bytes = serde_json::to_vec(&payload)?;

        let meta = CacheMeta {
            created_at: now_unix(),
            feature_count: features.len(),
            params: params.clone(),
        };
        let meta_bytes = serde_json::to_vec(&meta)?;

        write_atomic(&self.root, &self.payload_path(&key), &payload_bytes)?;
        write_atomic(&self.root, &self.meta_path(&key), &meta_bytes)?;

        self.enforce_size_cap()?;
        Ok(())
    }

    fn evict(&self, key: &str) -> std::io::Result<()> {
        let _ = std::fs::remove_file(self.payload_path(key));
        let _ = std::fs::remove_file(self.meta_path(key));
        Ok(())
    }

    /// Invalidate the entry matching `params`, if any. Returns whether an
    /// entry was actually present.
    pub fn invalidate(&self, params: &CacheParams) -> std::io::Result<bool> {
        let key = params.cache_key();
        let was_present = self.payload_path(&key).exists();
        self.evict(&key)?;
        Ok(was_present)
    }

    /// Drop every cached entry.
    pub fn clear(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.to_string_lossy().ends_with(".meta.json") {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                self.evict(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Current entry count and on-disk size, for an operator `cache stats` view.
    pub fn stats(&self) -> std::io::Result<CacheStats> {
        let mut entry_count = 0;
        let mut total_bytes = 0u64;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            total_bytes += entry.metadata()?.len();
            if entry.path().to_string_lossy().ends_with(".meta.json") {
                entry_count += 1;
            }
        }
        Ok(CacheStats { entry_count, total_bytes, max_bytes: self.max_bytes })
    }

    /// Remove all expired entries; returns the number removed. Intended to
    /// be run on a maintenance schedule, not on every request.
    pub fn sweep_expired(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.to_string_lossy().ends_with(".meta.json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(meta_bytes) = std::fs::read(self.meta_path(key)) else {
                continue;
            };
            let Ok(meta) = serde_json::from_slice::<CacheMeta>(&meta_bytes) else {
                self.evict(key)?;
                removed += 1;
                continue;
            };
            if now_unix().saturating_sub(meta.created_at) > self.ttl.as_secs() {
                self.evict(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evict the oldest entries (by `created_at`) until total size is at or
    /// below 80% of `max_bytes`.
    fn enforce_size_cap(&self) -> std::io::Result<()> {
        let mut entries: Vec<(String, u64, u64)> = Vec::new();
        let mut total_bytes: u64 = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let size = entry.metadata()?.len();
            total_bytes += size;

            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if !name.ends_with(".meta.json") {
                continue;
            }
            let key = name.trim_end_matches(".meta.json").to_string();
            let Ok(meta_bytes) = std::fs::read(&path) else {
                continue;
            };
            let Ok(meta) = serde_json::from_slice::<CacheMeta>(&meta_bytes) else {
                continue;
            };
            let payload_size = std::fs::metadata(self.payload_path(&key)).map(|m| m.len()).unwrap_or(0);
            entries.push((key, meta.created_at, payload_size + size));
        }

        if total_bytes <= self.max_bytes {
            return Ok(());
        }

        warn!(total_bytes, max_bytes = self.max_bytes, "geojson cache over size cap, evicting oldest entries");
        entries.sort_by_key(|(_, created_at, _)| *created_at);

        let target = (self.max_bytes as f64 * 0.8) as u64;
        for (key, _, entry_size) in entries {
            if total_bytes <= target {
                break;
            }
            self.evict(&key)?;
            total_bytes = total_bytes.saturating_sub(entry_size);
        }

        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn write_atomic(dir: &std::path::Path, final_path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(final_path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CacheParams {
        CacheParams {
            kind: "hotspots".to_string(),
            date: "2024-01-01".to_string(),
            species: Some("tiger_shark".to_string()),
            overlay_type: None,
            bounds: None,
            threshold: "0".to_string(),
            density_factor: 4,
        }
    }

    #[test]
    fn same_params_hash_identically() {
        assert_eq!(params().cache_key(), params().cache_key());
    }

    #[test]
    fn different_species_hashes_differently() {
        let mut other = params();
        other.species = Some("whale_shark".to_string());
        assert_ne!(params().cache_key(), other.cache_key());
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeoJsonCache::new(dir.path(), Duration::from_secs(3600), 500 * 1024 * 1024).unwrap();
        let p = params();

        assert!(cache.get(&p).is_none());
        cache.put(&p, &[]).unwrap();
        assert!(cache.get(&p).is_some());
    }

    #[test]
    fn invalidate_and_clear_remove_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeoJsonCache::new(dir.path(), Duration::from_secs(3600), 500 * 1024 * 1024).unwrap();
        let p = params();

        cache.put(&p, &[]).unwrap();
        assert_eq!(cache.stats().unwrap().entry_count, 1);

        assert!(cache.invalidate(&p).unwrap());
        assert!(cache.get(&p).is_none());

        cache.put(&p, &[]).unwrap();
        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().entry_count, 0);
    }

    #[test]
    fn expired_entry_is_treated_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeoJsonCache::new(dir.path(), Duration::from_secs(0), 500 * 1024 * 1024).unwrap();
        let p = params();

        cache.put(&p, &[]).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&p).is_none());
    }
}
