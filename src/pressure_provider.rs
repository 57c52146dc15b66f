//! Anthropogenic pressure provider: fishing effort and shipping
//! density from Global Fishing Watch, gridded onto the canonical grid and
//! cached short-term.
//!
//! GFW requires full-month queries — a single requested day is expanded to
//! its containing month before the API call, matching the upstream client's
//! own requirement. Any failure (missing API key, request error, a response
//! shape we don't recognize) degrades to an all-zero "neutral" field rather
//! than propagating: pressure is an optional enrichment, never a blocker for
//! computing a habitat index.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use moka::future::Cache;
use ndarray::Array2;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::field::{FieldMeta, GriddedField};
use crate::grid::{GeoBounds, Grid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureKind {
    FishingEffort,
    ShippingDensity,
}

impl PressureKind {
    fn variable_name(&self) -> &'static str {
        match self {
            PressureKind::FishingEffort => "fishing_pressure",
            PressureKind::ShippingDensity => "shipping_density",
        }
    }

    fn report_dataset(&self) -> &'static str {
        match self {
            PressureKind::FishingEffort => "fourwings/fishing-effort",
            PressureKind::ShippingDensity => "fourwings/vessel-presence",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GfwRecord {
    lat: f64,
    lon: f64,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct GfwReportResponse {
    #[serde(default)]
    entries: Vec<GfwRecord>,
}

#[derive(Clone, Hash, Eq, PartialEq)]
struct CacheKey {
    kind: &'static str,
    month_key: String,
    bounds_key: Option<String>,
}

fn bounds_key(bounds: &GeoBounds) -> String {
    format!(
        "{:.2}_{:.2}_{:.2}_{:.2}",
        bounds.north, bounds.south, bounds.east, bounds.west
    )
}

pub struct PressureProvider {
    grid: Grid,
    gfw_api_key: Option<String>,
    cache: Cache<CacheKey, Arc<GriddedField>>,
}

impl PressureProvider {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            grid: Grid::canonical(config.grid_step_deg),
            gfw_api_key: config.gfw_api_key.clone(),
            cache: Cache::builder()
                .time_to_live(config.pressure_cache_ttl)
                .build(),
        }
    }

    pub async fn fetch(
        &self,
        kind: PressureKind,
        date: NaiveDate,
        bounds: Option<GeoBounds>,
    ) -> GriddedField {
        let (month_start, month_end) = month_bounds(date);
        let key = CacheKey {
            kind: kind.variable_name(),
            month_key: month_start.format("%Y-%m").to_string(),
            bounds_key: bounds.as_ref().map(bounds_key),
        };

        if let Some(cached) = self.cache.get(&key).await {
            info!(kind = kind.variable_name(), "pressure cache hit");
            return (*cached).clone();
        }

        let field = self
            .fetch_uncached(kind, month_start, month_end, bounds)
            .await;

        self.cache.insert(key, Arc::new(field.clone())).await;
        field
    }

    async fn fetch_uncached(
        &self,
        kind: PressureKind,
        month_start: NaiveDate,
        month_end: NaiveDate,
        bounds: Option<GeoBounds>,
    ) -> GriddedField {
        let Some(api_key) = self.gfw_api_key.clone() else {
            warn!("GFW_API_KEY not configured, using neutral pressure field");
            return self.neutral_field(kind, month_start);
        };

        let region = bounds.unwrap_or(GeoBounds {
            north: 90.0,
            south: -90.0,
            east: 180.0,
            west: -180.0,
        });

        // Each call spawns onto its own task with a freshly built client,
        // the same worker-isolation shape as the Python client's
        // run-in-its-own-thread-and-event-loop pattern for 4Wings report
        // calls: concurrent pressure fetches never contend over one
        // connection pool or one set of request headers.
        let join_result = tokio::task::spawn(async move {
            fetch_report(&api_key, kind, month_start, month_end, region).await
        })
        .await;

        match join_result {
            Ok(Ok(records)) => self.grid_records(kind, month_start, records),
            Ok(Err(e)) => {
                warn!(error = %e, kind = kind.variable_name(), "GFW request failed, using neutral pressure field");
                self.neutral_field(kind, month_start)
            }
            Err(e) => {
                warn!(error = %e, "GFW fetch task panicked, using neutral pressure field");
                self.neutral_field(kind, month_start)
            }
        }
    }

    fn neutral_field(&self, kind: PressureKind, date: NaiveDate) -> GriddedField {
        GriddedField::zeros(
            self.grid.shape(),
            FieldMeta {
                variable: kind.variable_name().to_string(),
                source: "neutral fallback (no GFW data)".to_string(),
                units: "normalized".to_string(),
                observation_date: date,
            },
        )
    }

    /// Bin point records onto the canonical grid by nearest cell, summing
    /// values that land in the same cell — the Rust analogue of the
    /// upstream pipeline's `pd.cut` + `groupby(...).sum()` gridding step.
    fn grid_records(&self, kind: PressureKind, date: NaiveDate, records: Vec<GfwRecord>) -> GriddedField {
        let shape = self.grid.shape();
        let mut values = Array2::<f64>::zeros(shape);
        let half_step = self.grid.step / 2.0;

        for record in &records {
            let Some(i) = nearest_index(&self.grid.lats, record.lat, half_step) else {
                continue;
            };
            let Some(j) = nearest_index(&self.grid.lons, record.lon, half_step) else {
                continue;
            };
            values[(i, j)] += record.value;
        }

        GriddedField::new(
            values,
            Array2::from_elem(shape, false),
            FieldMeta {
                variable: kind.variable_name().to_string(),
                source: "Global Fishing Watch 4Wings API".to_string(),
                units: "normalized".to_string(),
                observation_date: date,
            },
        )
    }
}

fn nearest_index(coords: &[f64], x: f64, half_step: f64) -> Option<usize> {
    coords
        .iter()
        .position(|&c| (c - x).abs() <= half_step + f64::EPSILON)
}

fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("valid month start");
    let end = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year(), 12, 31).expect("valid Dec 31")
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
            .expect("valid next month start")
            .pred_opt()
            .expect("valid month end")
    };
    (start, end)
}

async fn fetch_report(
    api_key: &str,
    kind: PressureKind,
    start: NaiveDate,
    end: NaiveDate,
    region: GeoBounds,
) -> Result<Vec<GfwRecord>, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    let polygon = format!(
        "[[[{w},{s}],[{e},{s}],[{e},{n}],[{w},{n}],[{w},{s}]]]",
        w = region.west,
        e = region.east,
        n = region.north,
        s = region.south,
    );

    let response = client
        .post(format!(
            "https://gateway.api.globalfishingwatch.org/v3/{}",
            kind.report_dataset()
        ))
        .bearer_auth(api_key)
        .json(&serde_json::json!({
            "spatial-resolution": "LOW",
            "temporal-resolution": "MONTHLY",
            "start-date": start.format("%Y-%m-%d").to_string(),
            "end-date": end.format("%Y-%m-%d").to_string(),
            "geojson": { "type": "Polygon", "coordinates": [polygon] },
        }))
        .send()
        .await?
        .error_for_status()?;

    let parsed: GfwReportResponse = response.json().await?;
    Ok(parsed.entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_day_expands_to_full_month() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 17).unwrap();
        let (start, end) = month_bounds(date);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn december_month_bounds_handle_year_rollover() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();
        let (start, end) = month_bounds(date);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[tokio::test]
    async fn missing_api_key_yields_neutral_zero_field() {
        let mut config = PipelineConfig::default();
        config.gfw_api_key = None;
        let provider = PressureProvider::new(&config);

        let field = provider
            .fetch(
                PressureKind::FishingEffort,
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                None,
            )
            .await;

        assert!(field.values.iter().all(|&v| v == 0.0));
        assert!(field.missing.iter().all(|&m| !m));
    }
}
