//! Turns an [`HsiResult`] (or a bare overlay field) into
//! an ordered list of square-polygon GeoJSON features.

use geojson::{Feature, Geometry, JsonObject, JsonValue, Value};

use crate::field::GriddedField;
use crate::grid::Grid;
use crate::hsi_engine::HsiResult;

/// Emit only cells whose `hsi` is finite and `>= threshold`; `density_factor`
/// subsamples non-HSI overlay fields by taking every k-th row/column.
pub struct EncodeOptions {
    pub threshold: f64,
    pub density_factor: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            density_factor: 4,
        }
    }
}

fn square_polygon(lat: f64, lon: f64, half_step: f64) -> Geometry {
    let ring = vec![
        vec![lon - half_step, lat - half_step],
        vec![lon + half_step, lat - half_step],
        vec![lon + half_step, lat + half_step],
        vec![lon - half_step, lat + half_step],
        vec![lon - half_step, lat - half_step],
    ];
    Geometry::new(Value::Polygon(vec![ring]))
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn insert_field(properties: &mut JsonObject, key: &str, field: &GriddedField, i: usize, j: usize) {
    if field.missing[(i, j)] {
        return;
    }
    properties.insert(key.to_string(), JsonValue::from(sanitize(field.values[(i, j)])));
}

/// Encode the full HSI result into one feature per non-missing, over-threshold
/// grid cell, with sub-suitabilities and sub-indices attached as properties.
pub fn encode_hsi(grid: &Grid, result: &HsiResult, options: &EncodeOptions) -> Vec<Feature> {
    let half_step = grid.step / 2.0;
    let mut features = Vec::new();

    for (i, &lat) in grid.lats.iter().enumerate() {
        for (j, &lon) in grid.lons.iter().enumerate() {
            if result.hsi.missing[(i, j)] {
                continue;
            }
            let hsi_value = result.hsi.values[(i, j)];
            if !hsi_value.is_finite() || hsi_value < options.threshold {
                continue;
            }

            let mut properties = JsonObject::new();
            properties.insert("hsi".to_string(), JsonValue::from(sanitize(hsi_value)));
            properties.insert("lat".to_string(), JsonValue::from(lat));
            properties.insert("lon".to_string(), JsonValue::from(lon));

            for (name, field) in &result.sub_suitabilities {
                insert_field(&mut properties, name, field, i, j);
            }
            for (name, field) in &result.sub_indices {
                insert_field(&mut properties, name, field, i, j);
            }

            features.push(Feature {
                bbox: None,
                geometry: Some(square_polygon(lat, lon, half_step)),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
    }

    features
}

/// Encode a single field (a chlorophyll/oceanographic/salinity overlay, not
/// an HSI result) at reduced spatial density.
pub fn encode_overlay(grid: &Grid, field: &GriddedField, options: &EncodeOptions) -> Vec<Feature> {
    let k = options.density_factor.max(1);
    let half_step = grid.step * k as f64 / 2.0;
    let mut features = Vec::new();

    for i in (0..grid.n_lat()).step_by(k) {
        for j in (0..grid.n_lon()).step_by(k) {
            if field.missing[(i, j)] {
                continue;
            }
            let value = field.values[(i, j)];
            if !value.is_finite() || value < options.threshold {
                continue;
            }

            let lat = grid.lats[i];
            let lon = grid.lons[j];

            let mut properties = JsonObject::new();
            properties.insert(field.meta.variable.clone(), JsonValue::from(sanitize(value)));
            properties.insert("lat".to_string(), JsonValue::from(lat));
            properties.insert("lon".to_string(), JsonValue::from(lon));

            features.push(Feature {
                bbox: None,
                geometry: Some(square_polygon(lat, lon, half_step)),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldMeta;
    use crate::hsi_engine::Statistics;
    use chrono::NaiveDate;
    use ndarray::Array2;
    use std::collections::HashMap;

    fn meta() -> FieldMeta {
        FieldMeta {
            variable: "hsi".into(),
            source: "test".into(),
            units: "1".into(),
            observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn threshold_excludes_low_cells() {
        let grid = Grid::canonical(10.0);
        let shape = grid.shape();
        let mut values = Array2::<f64>::zeros(shape);
        values[(0, 0)] = 0.9;
        values[(1, 1)] = 0.1;

        let hsi = GriddedField::new(values, Array2::from_elem(shape, false), meta());
        let result = HsiResult {
            hsi,
            sub_suitabilities: HashMap::new(),
            sub_indices: HashMap::new(),
            statistics: Statistics {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                q90: 0.0,
                q95: 0.0,
                q99: 0.0,
                valid_count: 0,
            },
        };

        let options = EncodeOptions {
            threshold: 0.5,
            density_factor: 1,
        };
        let features = encode_hsi(&grid, &result, &options);
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn missing_cells_are_never_emitted() {
        let grid = Grid::canonical(10.0);
        let shape = grid.shape();
        let values = Array2::<f64>::from_elem(shape, 0.9);
        let hsi = GriddedField::new(values, Array2::from_elem(shape, true), meta());
        let result = HsiResult {
            hsi,
            sub_suitabilities: HashMap::new(),
            sub_indices: HashMap::new(),
            statistics: Statistics {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                q90: 0.0,
                q95: 0.0,
                q99: 0.0,
                valid_count: 0,
            },
        };

        let features = encode_hsi(&grid, &result, &EncodeOptions::default());
        assert!(features.is_empty());
    }
}
