//! Pipeline orchestrator: the single entry point the external surface
//! invokes. Validates the request, fans the four ocean datasets and
//! the two pressure fields out concurrently, resolves trophic-lag dates
//! with silent fallback, runs the HSI Engine, and (for `geojson` output)
//! the encoder/cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use geojson::Feature;
use moka::future::Cache;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::datasets::Dataset;
use crate::error::{PipelineError, PipelineResult};
use crate::field::GriddedField;
use crate::geojson_cache::{CacheParams, CacheStats, GeoJsonCache};
use crate::geojson_encoder::{self, EncodeOptions};
use crate::grid::{GeoBounds, Grid};
use crate::hsi_engine::{HsiEngine, HsiInputs, HsiMode, HsiResult, Statistics};
use crate::ocean_provider::OceanDataProvider;
use crate::pressure_provider::{PressureKind, PressureProvider};
use crate::profiles::{self, SharkProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    GeoJson,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Chlorophyll,
    Oceanographic,
    Salinity,
}

pub struct HotspotRequest {
    pub target_date: NaiveDate,
    pub species: String,
    pub bounds: Option<GeoBounds>,
    pub threshold: f64,
    pub output: OutputKind,
    pub mode: HsiMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub species: String,
    pub target_date: String,
    pub statistics: Statistics,
    pub lagged_data_available: HashMap<String, bool>,
    pub anthropogenic_data_available: HashMap<String, bool>,
}

pub struct GeoJsonResponse {
    pub features: Vec<Feature>,
    pub metadata: ResponseMetadata,
}

pub struct RawResponse {
    pub hsi: GriddedField,
    pub sub_suitabilities: HashMap<String, GriddedField>,
    pub sub_indices: HashMap<String, GriddedField>,
    pub metadata: ResponseMetadata,
}

pub enum HotspotResponse {
    GeoJson(GeoJsonResponse),
    Raw(RawResponse),
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub date: String,
    pub datasets: HashMap<String, bool>,
}

/// The set of already-fetched fields for one `(date, bounds)` pair, kept in
/// an in-memory TTL cache so an "overlay" request for the same date reuses
/// the bundle a preceding `get_hotspots` call already materialized.
#[derive(Clone)]
struct DatasetBundle {
    chlorophyll: Arc<GriddedField>,
    chlorophyll_lagged: Arc<GriddedField>,
    chlorophyll_lag_fell_back: bool,
    sea_level: Arc<GriddedField>,
    sst: Arc<GriddedField>,
    sst_lagged: Arc<GriddedField>,
    sst_lag_fell_back: bool,
    salinity: Arc<GriddedField>,
}

pub struct PipelineOrchestrator {
    grid: Grid,
    ocean: OceanDataProvider,
    pressure: PressureProvider,
    geojson_cache: GeoJsonCache,
    bundle_cache: Cache<String, DatasetBundle>,
}

impl PipelineOrchestrator {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            grid: Grid::canonical(config.grid_step_deg),
            ocean: OceanDataProvider::new(config)?,
            pressure: PressureProvider::new(config),
            geojson_cache: GeoJsonCache::new(
                config.geojson_cache_dir(),
                config.geojson_cache_ttl,
                config.geojson_cache_max_bytes,
            )?,
            bundle_cache: Cache::builder()
                .time_to_live(config.dataset_bundle_cache_ttl)
                .build(),
        })
    }

    pub async fn get_hotspots(&self, request: HotspotRequest) -> PipelineResult<HotspotResponse> {
        let profile = validate_species(&request.species)?;
        validate_threshold(request.threshold)?;

        let bundle = self.load_bundle(profile, request.target_date, request.bounds).await?;

        let inputs = HsiInputs {
            sst: (*bundle.sst_lagged).clone(),
            salinity: (*bundle.salinity).clone(),
            chlorophyll: (*bundle.chlorophyll_lagged).clone(),
            sea_level: (*bundle.sea_level).clone(),
            oxygen: None,
            depth: None,
            slope: None,
            prey_fields: vec![],
            fishing_pressure: fetch_pressure(&self.pressure, PressureKind::FishingEffort, request.target_date, request.bounds).await,
            shipping_density: fetch_pressure(&self.pressure, PressureKind::ShippingDensity, request.target_date, request.bounds).await,
        };
        let anthropogenic_data_available = [
            ("fishing_effort".to_string(), inputs.fishing_pressure.is_some()),
            ("shipping_density".to_string(), inputs.shipping_density.is_some()),
        ]
        .into_iter()
        .collect();

        let engine = HsiEngine::new(&self.grid);
        let result = engine.compute(profile, request.mode, inputs)?;

        let lagged_data_available = [
            ("chlorophyll".to_string(), !bundle.chlorophyll_lag_fell_back),
            ("sst".to_string(), !bundle.sst_lag_fell_back),
        ]
        .into_iter()
        .collect();

        let metadata = ResponseMetadata {
            species: request.species.clone(),
            target_date: request.target_date.format("%Y-%m-%d").to_string(),
            statistics: result.statistics.clone(),
            lagged_data_available,
            anthropogenic_data_available,
        };

        match request.output {
            OutputKind::Raw => Ok(HotspotResponse::Raw(RawResponse {
                hsi: result.hsi,
                sub_suitabilities: result.sub_suitabilities,
                sub_indices: result.sub_indices,
                metadata,
            })),
            OutputKind::GeoJson => {
                let features = self
                    .encode_cached_hsi(&request, &result, &metadata)
                    .await?;
                Ok(HotspotResponse::GeoJson(GeoJsonResponse { features, metadata }))
            }
        }
    }

    pub async fn get_overlay(
        &self,
        kind: OverlayKind,
        date: NaiveDate,
        bounds: Option<GeoBounds>,
        threshold: f64,
        density_factor: usize,
    ) -> PipelineResult<Vec<Feature>> {
        validate_threshold(threshold)?;

        let dataset = match kind {
            OverlayKind::Chlorophyll => Dataset::Chlorophyll,
            OverlayKind::Oceanographic => Dataset::SeaLevel,
            OverlayKind::Salinity => Dataset::Salinity,
        };
        let field = self.ocean.fetch(dataset, date, bounds).await?;

        let params = CacheParams {
            kind: "overlay".to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            species: None,
            overlay_type: Some(format!("{kind:?}")),
            bounds: bounds.map(bounds_key_tuple),
            threshold: threshold.to_string(),
            density_factor,
        };

        if let Some(cached) = self.geojson_cache.get(&params) {
            return Ok(cached
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect());
        }

        let options = EncodeOptions { threshold, density_factor };
        let features = geojson_encoder::encode_overlay(&self.grid, &field, &options);
        self.geojson_cache.put(&params, &features)?;

        Ok(features)
    }

    pub fn get_species_profiles(&self) -> Vec<&'static SharkProfile> {
        profiles::known_species()
            .into_iter()
            .filter_map(profiles::lookup)
            .collect()
    }

    pub fn get_dataset_info(&self) -> Vec<&'static Dataset> {
        Dataset::all().iter().collect()
    }

    pub async fn check_availability(&self, date: NaiveDate) -> AvailabilityReport {
        let mut datasets = HashMap::new();
        for dataset in Dataset::all() {
            let available = self.ocean.fetch(*dataset, date, None).await.is_ok();
            datasets.insert(dataset.short_name().to_string(), available);
        }
        AvailabilityReport { date: date.format("%Y-%m-%d").to_string(), datasets }
    }

    /// Sweep expired GeoJSON cache entries; returns the number removed.
    pub async fn cache_maintenance(&self) -> PipelineResult<usize> {
        Ok(self.geojson_cache.sweep_expired()?)
    }

    pub fn cache_stats(&self) -> PipelineResult<CacheStats> {
        Ok(self.geojson_cache.stats()?)
    }

    /// Drop every cached GeoJSON response, forcing a re-encode on next request.
    pub fn cache_clear(&self) -> PipelineResult<usize> {
        Ok(self.geojson_cache.clear()?)
    }

    /// Invalidate the cached hotspots response for one `(species, date, bounds,
    /// threshold)` combination.
    pub fn invalidate_hotspots(
        &self,
        species: &str,
        date: NaiveDate,
        bounds: Option<GeoBounds>,
        threshold: f64,
    ) -> PipelineResult<bool> {
        let params = CacheParams {
            kind: "hotspots".to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            species: Some(species.to_string()),
            overlay_type: None,
            bounds: bounds.map(bounds_key_tuple),
            threshold: threshold.to_string(),
            density_factor: 1,
        };
        Ok(self.geojson_cache.invalidate(&params)?)
    }

    /// Invalidate the cached overlay response for one `(kind, date, bounds,
    /// threshold, density_factor)` combination.
    pub fn invalidate_overlay(
        &self,
        kind: OverlayKind,
        date: NaiveDate,
        bounds: Option<GeoBounds>,
        threshold: f64,
        density_factor: usize,
    ) -> PipelineResult<bool> {
        let params = CacheParams {
            kind: "overlay".to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            species: None,
            overlay_type: Some(format!("{kind:?}")),
            bounds: bounds.map(bounds_key_tuple),
            threshold: threshold.to_string(),
            density_factor,
        };
        Ok(self.geojson_cache.invalidate(&params)?)
    }

    async fn load_bundle(
        &self,
        profile: &SharkProfile,
        target_date: NaiveDate,
        bounds: Option<GeoBounds>,
    ) -> PipelineResult<DatasetBundle> {
        let bundle_key = format!(
            "{}_{}",
            target_date.format("%Y-%m-%d"),
            bounds.map(bounds_key_string).unwrap_or_default()
        );

        if let Some(cached) = self.bundle_cache.get(&bundle_key).await {
            info!(bundle_key, "dataset bundle cache hit");
            return Ok(cached);
        }

        let chl_lag_date = subtract_days(target_date, profile.preferences.c_lag_days)?;
        let sst_lag_date = subtract_days(target_date, profile.preferences.t_lag_days)?;

        let (chlorophyll, sea_level, sst, salinity) = tokio::try_join!(
            self.ocean.fetch(Dataset::Chlorophyll, target_date, bounds),
            self.ocean.fetch(Dataset::SeaLevel, target_date, bounds),
            self.ocean.fetch(Dataset::Sst, target_date, bounds),
            self.ocean.fetch(Dataset::Salinity, target_date, bounds),
        )?;

        let (chlorophyll_lagged, chlorophyll_lag_fell_back) =
            self.fetch_with_fallback(Dataset::Chlorophyll, chl_lag_date, bounds, &chlorophyll).await;
        let (sst_lagged, sst_lag_fell_back) =
            self.fetch_with_fallback(Dataset::Sst, sst_lag_date, bounds, &sst).await;

        let bundle = DatasetBundle {
            chlorophyll: Arc::new(chlorophyll),
            chlorophyll_lagged: Arc::new(chlorophyll_lagged),
            chlorophyll_lag_fell_back,
            sea_level: Arc::new(sea_level),
            sst: Arc::new(sst),
            sst_lagged: Arc::new(sst_lagged),
            sst_lag_fell_back,
            salinity: Arc::new(salinity),
        };

        self.bundle_cache.insert(bundle_key, bundle.clone()).await;
        Ok(bundle)
    }

    /// Fetch the lagged snapshot of `dataset`; on failure, fall back
    /// silently to the un-lagged field already fetched for `target_date`.
    async fn fetch_with_fallback(
        &self,
        dataset: Dataset,
        lagged_date: NaiveDate,
        bounds: Option<GeoBounds>,
        fallback: &GriddedField,
    ) -> (GriddedField, bool) {
        match self.ocean.fetch(dataset, lagged_date, bounds).await {
            Ok(field) => (field, false),
            Err(e) => {
                warn!(dataset = dataset.short_name(), error = %e, "lagged fetch failed, falling back to un-lagged field");
                (fallback.clone(), true)
            }
        }
    }

    async fn encode_cached_hsi(
        &self,
        request: &HotspotRequest,
        result: &HsiResult,
        _metadata: &ResponseMetadata,
    ) -> PipelineResult<Vec<Feature>> {
        let params = CacheParams {
            kind: "hotspots".to_string(),
            date: request.target_date.format("%Y-%m-%d").to_string(),
            species: Some(request.species.clone()),
            overlay_type: None,
            bounds: request.bounds.map(bounds_key_tuple),
            threshold: request.threshold.to_string(),
            density_factor: 1,
        };

        if let Some(cached) = self.geojson_cache.get(&params) {
            return Ok(cached
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect());
        }

        let options = EncodeOptions {
            threshold: request.threshold,
            density_factor: 1,
        };
        let features = geojson_encoder::encode_hsi(&self.grid, result, &options);
        self.geojson_cache.put(&params, &features)?;
        Ok(features)
    }
}

async fn fetch_pressure(
    provider: &PressureProvider,
    kind: PressureKind,
    date: NaiveDate,
    bounds: Option<GeoBounds>,
) -> Option<GriddedField> {
    Some(provider.fetch(kind, date, bounds).await)
}

fn validate_species(species: &str) -> PipelineResult<&'static SharkProfile> {
    profiles::lookup(species).ok_or_else(|| PipelineError::InvalidInput(format!("unknown species: {species}")))
}

fn validate_threshold(threshold: f64) -> PipelineResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::InvalidInput(format!(
            "threshold must be in [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

fn subtract_days(date: NaiveDate, days: i64) -> PipelineResult<NaiveDate> {
    date.checked_sub_days(Days::new(days.unsigned_abs()))
        .ok_or_else(|| PipelineError::Internal("date underflow computing lagged date".into()))
}

fn bounds_key_tuple(bounds: GeoBounds) -> (String, String, String, String) {
    (
        format!("{:.2}", bounds.north),
        format!("{:.2}", bounds.south),
        format!("{:.2}", bounds.east),
        format!("{:.2}", bounds.west),
    )
}

fn bounds_key_string(bounds: GeoBounds) -> String {
    let (n, s, e, w) = bounds_key_tuple(bounds);
    format!("{n}_{s}_{e}_{w}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_species_is_invalid_input() {
        let result = validate_species("megalodon");
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn threshold_out_of_range_is_invalid_input() {
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(-0.1).is_err());
        assert!(validate_threshold(0.5).is_ok());
    }

    #[test]
    fn subtract_days_handles_typical_lag() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let lagged = subtract_days(date, 14).unwrap();
        assert_eq!(lagged, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn great_white_lag_dates_use_distinct_t_lag_and_c_lag() {
        let profile = profiles::lookup("great_white_shark").unwrap();
        let target_date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

        let chl_lag_date = subtract_days(target_date, profile.preferences.c_lag_days).unwrap();
        let sst_lag_date = subtract_days(target_date, profile.preferences.t_lag_days).unwrap();

        assert_eq!(chl_lag_date, NaiveDate::from_ymd_opt(2023, 12, 6).unwrap());
        assert_eq!(sst_lag_date, NaiveDate::from_ymd_opt(2023, 12, 29).unwrap());
    }
}
