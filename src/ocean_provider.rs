//! Ocean data provider: search, download, quality-filter, and regrid
//! chlorophyll, SSH anomaly, SST, and salinity.
//!
//! Each upstream call builds its own short-lived [`reqwest::Client`] instead
//! of sharing one across the provider, the same per-call isolation
//! `geocoding.rs`'s `Geocoder` uses for its Nominatim/Google Maps requests —
//! here it additionally sidesteps any cross-request connection-pool state
//! when calls run concurrently across tokio tasks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use ndarray::Array2;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::datasets::{Dataset, SEARCH_WIDENING_DAYS};
use crate::error::{PipelineError, PipelineResult};
use crate::field::{FieldMeta, GriddedField};
use crate::grid::{GeoBounds, Grid};
use crate::raw_cache::{RawCache, TIME_INSENSITIVE_KEY};

/// The configured "known-good" date salinity requests are coerced to before
/// searching upstream — SMAP SSS composites are effectively static
/// on pipeline timescales, so there is no value in chasing a literal date.
const SALINITY_KNOWN_GOOD_DATE: &str = "2024-01-15";

const CMR_GRANULE_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";

/// CMR short_name for each dataset's backing collection, matching the
/// producer each dataset is modeled on.
fn cmr_short_name(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Chlorophyll => "PACE_OCI_L3M_CHL",
        Dataset::SeaLevel => "NASA_SSH_REF_SIMPLE_GRID_V1",
        Dataset::Sst => "MUR-JPL-L4-GLOB-v4.1",
        Dataset::Salinity => "SMAP_RSS_L3_SSS_SMI_MONTHLY_V5",
    }
}

#[derive(Debug, Deserialize)]
struct CmrGranuleSearchResponse {
    feed: CmrFeed,
}

#[derive(Debug, Deserialize)]
struct CmrFeed {
    entry: Vec<CmrEntry>,
}

#[derive(Debug, Deserialize)]
struct CmrEntry {
    id: String,
    #[serde(default)]
    links: Vec<CmrLink>,
}

#[derive(Debug, Deserialize)]
struct CmrLink {
    href: String,
    #[serde(default)]
    rel: String,
}

impl CmrEntry {
    /// The OPeNDAP data-access link, if CMR returned one; a granule with no
    /// such link can't be processed and is skipped.
    fn data_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.ends_with("/service#") || l.href.ends_with(".json"))
            .map(|l| l.href.as_str())
    }
}

/// The granule payload this provider understands: a rectilinear lat/lon
/// grid, one or more named variables, and optional quality-flag arrays
/// keyed by flag name (`nasa_flag`, `median_filter_flag`, `source_flag`,
/// `qual_sst`, `quality_flag`, depending on dataset) rather than by
/// variable — a granule may carry several independent flags at once.
#[derive(Debug, Deserialize)]
struct GranuleEnvelope {
    lats: Vec<f64>,
    lons: Vec<f64>,
    variables: HashMap<String, Vec<Vec<f64>>>,
    #[serde(default)]
    fill_value: Option<f64>,
    #[serde(default)]
    quality_flags: HashMap<String, Vec<Vec<i64>>>,
    /// Orbit-error-range correction for SSH anomaly, added to the value
    /// when present. Absent for every other dataset.
    #[serde(default)]
    orbit_error_correction: Option<Vec<Vec<f64>>>,
}

/// Whether cell `(i, j)` passes the dataset-specific quality-flag test. A
/// flag that the granule didn't carry is treated as passing (matching the
/// upstream client's "proceed without quality filtering" behavior when a
/// flag variable is absent) rather than failing closed.
fn quality_ok(dataset: Dataset, envelope: &GranuleEnvelope, i: usize, j: usize) -> bool {
    let flag_ok = |name: &str, max_value: i64| -> bool {
        envelope.quality_flags.get(name).map(|f| f[i][j] <= max_value).unwrap_or(true)
    };

    match dataset {
        // AND-combined: every flag present must be clean.
        Dataset::SeaLevel => flag_ok("nasa_flag", 0) && flag_ok("median_filter_flag", 0) && flag_ok("source_flag", 0),
        Dataset::Sst => flag_ok("qual_sst", 1),
        Dataset::Salinity => flag_ok("quality_flag", 1),
        Dataset::Chlorophyll => true,
    }
}

pub struct OceanDataProvider {
    cache: RawCache,
    grid: Grid,
    earthdata_username: Option<String>,
    earthdata_password: Option<String>,
}

impl OceanDataProvider {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            cache: RawCache::new(config.raw_cache_dir())?,
            grid: Grid::canonical(config.grid_step_deg),
            earthdata_username: config.earthdata_username.clone(),
            earthdata_password: config.earthdata_password.clone(),
        })
    }

    fn date_key_for(&self, dataset: Dataset, date: NaiveDate) -> (String, NaiveDate) {
        if dataset.is_time_insensitive() {
            let known_good = NaiveDate::parse_from_str(SALINITY_KNOWN_GOOD_DATE, "%Y-%m-%d")
                .expect("SALINITY_KNOWN_GOOD_DATE is a valid date literal");
            (TIME_INSENSITIVE_KEY.to_string(), known_good)
        } else {
            (date.format("%Y-%m-%d").to_string(), date)
        }
    }

    /// Fetch a dataset for `date`, using the on-disk cache first and falling
    /// back to a widened upstream search on a cache miss.
    pub async fn fetch(
        &self,
        dataset: Dataset,
        date: NaiveDate,
        bounds: Option<GeoBounds>,
    ) -> PipelineResult<GriddedField> {
        let (date_key, search_date) = self.date_key_for(dataset, date);

        if let Some(field) = self.cache.read_with_bounds(dataset.short_name(), &date_key, &self.grid, bounds) {
            info!(dataset = dataset.short_name(), date_key, "raw cache hit");
            return Ok(field);
        }

        let envelope = self.search_and_download(dataset, search_date).await?;
        let field = self.process_envelope(dataset, search_date, envelope)?;

        self.cache.write(dataset.short_name(), &date_key, &field)?;

        Ok(match bounds {
            Some(b) => self.grid.apply_bounds(&field, b),
            None => field,
        })
    }

    /// Search CMR around `date`, widening the window through
    /// [`SEARCH_WIDENING_DAYS`] if the initial search is empty, then download
    /// and parse the first matching granule.
    async fn search_and_download(
        &self,
        dataset: Dataset,
        date: NaiveDate,
    ) -> PipelineResult<GranuleEnvelope> {
        let mut last_widen = 0;
        for &window in std::iter::once(&7_i64).chain(SEARCH_WIDENING_DAYS.iter()) {
            last_widen = window;
            let entries = self.search_granules(dataset, date, window).await?;
            if let Some(entry) = entries.into_iter().find(|e| e.data_url().is_some()) {
                info!(
                    dataset = dataset.short_name(),
                    window_days = window,
                    granule = %entry.id,
                    "selected granule"
                );
                return self.download_granule(&entry).await;
            }
            warn!(
                dataset = dataset.short_name(),
                window_days = window,
                "no granules found, widening search"
            );
        }

        Err(PipelineError::DataUnavailable {
            dataset: dataset.short_name().to_string(),
            date: date.format("%Y-%m-%d").to_string(),
        })
        .map_err(|e| {
            warn!(
                dataset = dataset.short_name(),
                widest_window_days = last_widen,
                "exhausted search widening ladder"
            );
            e
        })
    }

    async fn search_granules(
        &self,
        dataset: Dataset,
        date: NaiveDate,
        window_days: i64,
    ) -> PipelineResult<Vec<CmrEntry>> {
        let start = date
            .checked_sub_days(Days::new(window_days as u64))
            .ok_or_else(|| PipelineError::Internal("date underflow during search widening".into()))?;
        let end = date
            .checked_add_days(Days::new(window_days as u64))
            .ok_or_else(|| PipelineError::Internal("date overflow during search widening".into()))?;

        // A fresh client per call: this provider is invoked concurrently
        // across many tokio tasks and a shared client's connection pool
        // would serialize unrelated requests behind one set of keep-alives.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let mut request = client.get(CMR_GRANULE_SEARCH_URL).query(&[
            ("short_name", cmr_short_name(dataset)),
            (
                "temporal",
                &format!(
                    "{}T00:00:00Z,{}T23:59:59Z",
                    start.format("%Y-%m-%d"),
                    end.format("%Y-%m-%d")
                ),
            ),
            ("page_size", "10"),
        ]);

        if let (Some(user), Some(pass)) = (&self.earthdata_username, &self.earthdata_password) {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::TransientIo(format!(
                "CMR search returned status {}",
                response.status()
            )));
        }

        let parsed: CmrGranuleSearchResponse = response.json().await?;
        Ok(parsed.feed.entry)
    }

    async fn download_granule(&self, entry: &CmrEntry) -> PipelineResult<GranuleEnvelope> {
        let url = entry.data_url().ok_or_else(|| PipelineError::DataInvalid {
            dataset: "unknown".into(),
            reason: format!("granule {} has no data access link", entry.id),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::TransientIo(format!(
                "granule download returned status {}",
                response.status()
            )));
        }

        Ok(response.json::<GranuleEnvelope>().await?)
    }

    /// Select the primary variable (falling back through the dataset's
    /// candidate list), apply quality flags, plausible-range clipping, unit
    /// conversion, and regrid onto the canonical grid.
    fn process_envelope(
        &self,
        dataset: Dataset,
        date: NaiveDate,
        envelope: GranuleEnvelope,
    ) -> PipelineResult<GriddedField> {
        let var_name = envelope
            .variables
            .keys()
            .find(|k| dataset.variable_candidates().contains(&k.as_str()))
            .or_else(|| envelope.variables.keys().next())
            .ok_or_else(|| PipelineError::DataInvalid {
                dataset: dataset.short_name().to_string(),
                reason: "granule contains no data variables".to_string(),
            })?
            .clone();

        if var_name != dataset.variable_candidates()[0] {
            warn!(
                dataset = dataset.short_name(),
                variable = %var_name,
                "primary variable name not found, used fallback"
            );
        }

        let grid_values = &envelope.variables[&var_name];
        let nlat = envelope.lats.len();
        let nlon = envelope.lons.len();
        if grid_values.len() != nlat || grid_values.iter().any(|row| row.len() != nlon) {
            return Err(PipelineError::DataInvalid {
                dataset: dataset.short_name().to_string(),
                reason: "variable array shape does not match coordinate arrays".to_string(),
            });
        }

        let (plaus_min, plaus_max) = dataset.plausible_range();

        let mut values = Array2::<f64>::zeros((nlat, nlon));
        let mut missing = Array2::<bool>::from_elem((nlat, nlon), false);

        for i in 0..nlat {
            for j in 0..nlon {
                let mut v = grid_values[i][j];

                if let Some(fill) = envelope.fill_value {
                    if (v - fill).abs() < f64::EPSILON {
                        missing[(i, j)] = true;
                        continue;
                    }
                }

                if !quality_ok(dataset, &envelope, i, j) {
                    missing[(i, j)] = true;
                    continue;
                }

                if dataset == Dataset::SeaLevel {
                    if let Some(oer) = &envelope.orbit_error_correction {
                        v += oer[i][j];
                    }
                }

                if v < plaus_min || v > plaus_max {
                    missing[(i, j)] = true;
                    continue;
                }

                if dataset == Dataset::Sst && v > 100.0 {
                    // MUR ships in Kelvin; plausible Celsius range tops out
                    // at 35, so anything above 100 is still in Kelvin.
                    v -= 273.15;
                }

                values[(i, j)] = v;
            }
        }

        let (regridded_values, regridded_missing) =
            self.grid.regrid(&envelope.lats, &envelope.lons, &values, &missing)?;

        Ok(GriddedField::new(
            regridded_values,
            regridded_missing,
            FieldMeta {
                variable: dataset.short_name().to_string(),
                source: dataset.source_description().to_string(),
                units: dataset.units().to_string(),
                observation_date: date,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salinity_coerces_to_known_good_date() {
        let config = PipelineConfig::default();
        let provider = OceanDataProvider {
            cache: RawCache::new(std::env::temp_dir().join("habitat_test_unused")).unwrap(),
            grid: Grid::canonical(config.grid_step_deg),
            earthdata_username: None,
            earthdata_password: None,
        };

        let requested = NaiveDate::from_ymd_opt(2030, 6, 1).unwrap();
        let (key_a, date_a) = provider.date_key_for(Dataset::Salinity, requested);
        let (key_b, date_b) = provider.date_key_for(
            Dataset::Salinity,
            NaiveDate::from_ymd_opt(2031, 1, 1).unwrap(),
        );

        assert_eq!(key_a, TIME_INSENSITIVE_KEY);
        assert_eq!(key_a, key_b);
        assert_eq!(date_a, date_b);
    }

    #[test]
    fn sst_uses_literal_date_key() {
        let config = PipelineConfig::default();
        let provider = OceanDataProvider {
            cache: RawCache::new(std::env::temp_dir().join("habitat_test_unused2")).unwrap(),
            grid: Grid::canonical(config.grid_step_deg),
            earthdata_username: None,
            earthdata_password: None,
        };

        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let (key, _) = provider.date_key_for(Dataset::Sst, date);
        assert_eq!(key, "2024-03-15");
    }

    fn envelope_with_flags(flags: &[(&str, i64)]) -> GranuleEnvelope {
        let mut quality_flags = HashMap::new();
        for (name, value) in flags {
            quality_flags.insert(name.to_string(), vec![vec![*value]]);
        }
        GranuleEnvelope {
            lats: vec![0.0],
            lons: vec![0.0],
            variables: HashMap::new(),
            fill_value: None,
            quality_flags,
            orbit_error_correction: None,
        }
    }

    #[test]
    fn sea_level_quality_requires_all_three_flags_clean() {
        let all_clean = envelope_with_flags(&[("nasa_flag", 0), ("median_filter_flag", 0), ("source_flag", 0)]);
        assert!(quality_ok(Dataset::SeaLevel, &all_clean, 0, 0));

        let one_dirty = envelope_with_flags(&[("nasa_flag", 0), ("median_filter_flag", 1), ("source_flag", 0)]);
        assert!(!quality_ok(Dataset::SeaLevel, &one_dirty, 0, 0));
    }

    #[test]
    fn sea_level_quality_passes_when_flags_absent() {
        let no_flags = envelope_with_flags(&[]);
        assert!(quality_ok(Dataset::SeaLevel, &no_flags, 0, 0));
    }

    #[test]
    fn sst_quality_allows_flag_up_to_one() {
        let good = envelope_with_flags(&[("qual_sst", 1)]);
        assert!(quality_ok(Dataset::Sst, &good, 0, 0));

        let bad = envelope_with_flags(&[("qual_sst", 2)]);
        assert!(!quality_ok(Dataset::Sst, &bad, 0, 0));
    }

    #[test]
    fn salinity_quality_allows_flag_up_to_one() {
        let good = envelope_with_flags(&[("quality_flag", 1)]);
        assert!(quality_ok(Dataset::Salinity, &good, 0, 0));

        let bad = envelope_with_flags(&[("quality_flag", 2)]);
        assert!(!quality_ok(Dataset::Salinity, &bad, 0, 0));
    }

    #[test]
    fn chlorophyll_has_no_flag_based_filtering() {
        let envelope = envelope_with_flags(&[("quality_flag", 99)]);
        assert!(quality_ok(Dataset::Chlorophyll, &envelope, 0, 0));
    }
}
