//! Environment-derived configuration.
//!
//! Every option recognized by the pipeline is parsed here once, with
//! typed defaults, the way `ingest_config.rs` collects its ingest knobs into
//! a single struct instead of scattering `std::env::var` calls through the
//! codebase.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache_dir: PathBuf,
    pub grid_step_deg: f64,
    pub earthdata_username: Option<String>,
    pub earthdata_password: Option<String>,
    pub gfw_api_key: Option<String>,
    pub pressure_cache_ttl: Duration,
    pub geojson_cache_ttl: Duration,
    pub geojson_cache_max_bytes: u64,
    pub dataset_bundle_cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data_cache"),
            grid_step_deg: 0.25,
            earthdata_username: None,
            earthdata_password: None,
            gfw_api_key: None,
            pressure_cache_ttl: Duration::from_secs(30 * 24 * 3600),
            geojson_cache_ttl: Duration::from_secs(24 * 3600),
            geojson_cache_max_bytes: 500 * 1024 * 1024,
            dataset_bundle_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl PipelineConfig {
    /// Build configuration from the process environment, falling back to
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_dir = std::env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let grid_step_deg = std::env::var("GRID_STEP_DEG")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.grid_step_deg);

        let pressure_cache_ttl_days = std::env::var("PRESSURE_CACHE_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let geojson_cache_ttl_hours = std::env::var("GEOJSON_CACHE_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24);

        let geojson_cache_max_mb = std::env::var("GEOJSON_CACHE_MAX_MB")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);

        let dataset_bundle_cache_secs = std::env::var("DATASET_BUNDLE_CACHE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);

        let config = Self {
            cache_dir,
            grid_step_deg,
            earthdata_username: std::env::var("EARTHDATA_USERNAME").ok(),
            earthdata_password: std::env::var("EARTHDATA_PASSWORD").ok(),
            gfw_api_key: std::env::var("GFW_API_KEY").ok(),
            pressure_cache_ttl: Duration::from_secs(pressure_cache_ttl_days * 24 * 3600),
            geojson_cache_ttl: Duration::from_secs(geojson_cache_ttl_hours * 3600),
            geojson_cache_max_bytes: geojson_cache_max_mb * 1024 * 1024,
            dataset_bundle_cache_ttl: Duration::from_secs(dataset_bundle_cache_secs),
        };

        info!(
            cache_dir = %config.cache_dir.display(),
            grid_step_deg = config.grid_step_deg,
            "loaded pipeline configuration"
        );

        config
    }

    pub fn raw_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("raw")
    }

    pub fn geojson_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("geojson_cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = PipelineConfig::default();
        assert_eq!(config.grid_step_deg, 0.25);
        assert_eq!(config.geojson_cache_max_bytes, 500 * 1024 * 1024);
        assert_eq!(config.pressure_cache_ttl, Duration::from_secs(30 * 24 * 3600));
    }
}
