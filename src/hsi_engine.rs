//! Habitat suitability index engine.
//!
//! Combines the suitability functions into a single `[0,1]` index, in
//! either of two modes carried on the species profile: the original
//! power-weighted geometric mean (`Legacy`) and a composite physicochemical
//! / prey / topography / anthropogenic model (`Enhanced`, the default).
//! Both modes are kept behind [`HsiMode`] rather than one replacing the
//! other — neither the data nor the downstream consumers of a legacy-mode
//! result should change shape.

use std::collections::HashMap;

use ndarray::Array2;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::field::{FieldMeta, GriddedField};
use crate::grid::Grid;
use crate::profiles::SharkProfile;
use crate::suitability;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsiMode {
    Legacy,
    Enhanced,
}

/// Inputs the engine needs for one computation. `sst`/`salinity` are
/// critical: a bundle with either missing entirely is rejected before any
/// suitability math runs. `chlorophyll`/`sea_level` are likewise required
/// here — the Orchestrator is responsible for failing the request earlier
/// (via the widened ocean-provider search) if either could not be obtained at all.
pub struct HsiInputs {
    pub sst: GriddedField,
    pub salinity: GriddedField,
    pub chlorophyll: GriddedField,
    pub sea_level: GriddedField,
    pub oxygen: Option<GriddedField>,
    pub depth: Option<GriddedField>,
    pub slope: Option<GriddedField>,
    /// Named prey-density fields beyond chlorophyll (e.g. forage fish
    /// indices); a guild whose field is unavailable falls back to `f_chl`.
    pub prey_fields: Vec<(String, GriddedField)>,
    pub fishing_pressure: Option<GriddedField>,
    pub shipping_density: Option<GriddedField>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q90: f64,
    pub q95: f64,
    pub q99: f64,
    pub valid_count: usize,
}

impl Statistics {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                q90: 0.0,
                q95: 0.0,
                q99: 0.0,
                valid_count: 0,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let percentile = |p: f64| -> f64 {
            let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        Self {
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            q90: percentile(0.90),
            q95: percentile(0.95),
            q99: percentile(0.99),
            valid_count: values.len(),
        }
    }
}

pub struct HsiResult {
    pub hsi: GriddedField,
    pub sub_suitabilities: HashMap<String, GriddedField>,
    pub sub_indices: HashMap<String, GriddedField>,
    pub statistics: Statistics,
}

pub struct HsiEngine<'a> {
    grid: &'a Grid,
}

impl<'a> HsiEngine<'a> {
    pub fn new(grid: &'a Grid) -> Self {
        Self { grid }
    }

    pub fn compute(&self, profile: &SharkProfile, mode: HsiMode, inputs: HsiInputs) -> PipelineResult<HsiResult> {
        validate_critical(&inputs)?;
        validate_shapes(self.grid.shape(), &inputs)?;

        match mode {
            HsiMode::Legacy => self.compute_legacy(profile, inputs),
            HsiMode::Enhanced => self.compute_enhanced(profile, inputs),
        }
    }

    fn compute_legacy(&self, profile: &SharkProfile, inputs: HsiInputs) -> PipelineResult<HsiResult> {
        let prefs = &profile.preferences;
        let weights = &profile.legacy_weights;

        let f_chl = suitability::f_chl(&inputs.chlorophyll);
        let f_temp = suitability::f_temp(
            &inputs.sst,
            (prefs.temp_optimal_min + prefs.temp_optimal_max) / 2.0,
            prefs.temp_tolerance,
        );
        let f_sal = suitability::f_sal(
            &inputs.salinity,
            prefs.salinity_min,
            prefs.salinity_optimal_min,
            prefs.salinity_optimal_max,
            prefs.salinity_max,
        );

        let eddy = suitability::f_eddy(&inputs.sea_level);
        let front = suitability::f_front(self.grid, &inputs.sea_level);
        let f_ocean = suitability::f_ocean(&eddy, &front, 0.5, 0.5);
        // Legacy mode substitutes the neutral 0.5 for a missing f_ocean cell
        // rather than letting it propagate (Open Question a).
        let f_ocean_filled = fill_missing_with(&f_ocean, 0.5);

        let w_c = weights.chlorophyll;
        let w_e = weights.sea_level_anomaly;
        let w_s = weights.temperature;
        let exponent = 1.0 / (w_c + w_e + w_s).max(f64::EPSILON);

        let shape = self.grid.shape();
        let mut hsi_values = Array2::<f64>::zeros(shape);
        let mut hsi_missing = Array2::<bool>::from_elem(shape, true);

        for idx in ndarray::indices(shape) {
            if f_chl.missing[idx] || f_temp.missing[idx] || f_sal.missing[idx] {
                continue;
            }
            let geo_mean = (f_chl.values[idx].powf(w_c)
                * f_ocean_filled.values[idx].powf(w_e)
                * f_temp.values[idx].powf(w_s))
            .powf(exponent);
            let hsi = f_sal.values[idx] * geo_mean;
            hsi_values[idx] = if hsi.is_finite() { hsi.clamp(0.0, 1.0) } else { 0.0 };
            hsi_missing[idx] = false;
        }

        let hsi_field = GriddedField::new(
            hsi_values,
            hsi_missing,
            FieldMeta {
                variable: "hsi".to_string(),
                source: "legacy".to_string(),
                units: "dimensionless".to_string(),
                observation_date: inputs.sst.meta.observation_date,
            },
        );

        let statistics = Statistics::from_values(&valid_finite_values(&hsi_field));

        let mut sub_suitabilities = HashMap::new();
        sub_suitabilities.insert("f_chl".to_string(), f_chl);
        sub_suitabilities.insert("f_temp".to_string(), f_temp);
        sub_suitabilities.insert("f_sal".to_string(), f_sal);
        sub_suitabilities.insert("f_ocean".to_string(), f_ocean);

        Ok(HsiResult {
            hsi: hsi_field,
            sub_suitabilities,
            sub_indices: HashMap::new(),
            statistics,
        })
    }

    fn compute_enhanced(&self, profile: &SharkProfile, inputs: HsiInputs) -> PipelineResult<HsiResult> {
        let prefs = &profile.preferences;
        let weights = &profile.enhanced_weights;
        let shape = self.grid.shape();

        let f_temp = suitability::f_temp(
            &inputs.sst,
            (prefs.temp_optimal_min + prefs.temp_optimal_max) / 2.0,
            prefs.temp_tolerance,
        );
        let f_sal = suitability::f_sal(
            &inputs.salinity,
            prefs.salinity_min,
            prefs.salinity_optimal_min,
            prefs.salinity_optimal_max,
            prefs.salinity_max,
        );

        let f_oxy = match &inputs.oxygen {
            Some(oxygen) => suitability::f_oxy(oxygen, prefs.oxygen_min, prefs.oxygen_optimal, prefs.oxygen_tolerance),
            None => derive_oxygen_from_temp_salinity(&inputs.sst, &inputs.salinity, prefs),
        };

        let eddy = suitability::f_eddy(&inputs.sea_level);
        let front = suitability::f_front(self.grid, &inputs.sea_level);
        let ocean_weights = &weights.ocean_features;
        let f_ocean = suitability::f_ocean(
            &eddy,
            &front,
            ocean_weights.eddy / (ocean_weights.eddy + ocean_weights.front).max(f64::EPSILON),
            ocean_weights.front / (ocean_weights.eddy + ocean_weights.front).max(f64::EPSILON),
        );

        let i_phys = geometric_mean_4(&f_temp, &f_sal, &f_oxy, &f_ocean, shape);

        let f_chl = suitability::f_chl(&inputs.chlorophyll);
        let mut i_prey = scale(&f_chl, weights.prey.chlorophyll);
        for (guild, prey_field) in &inputs.prey_fields {
            let f_guild = suitability::f_prey(prey_field);
            let guild_weight = weights.prey.guild_weight(guild).unwrap_or(0.0);
            i_prey = add_fields(&i_prey, &scale(&f_guild, guild_weight));
        }
        if inputs.prey_fields.is_empty() {
            // No separate prey guild density available; the chlorophyll
            // term alone stands in for every guild's diet weight.
            let total_prey_weight = weights.prey.pinnipeds + weights.prey.turtles + weights.prey.fish + weights.prey.cephalopods;
            i_prey = scale(&f_chl, weights.prey.chlorophyll + total_prey_weight);
        }

        let (i_topo, f_depth, f_slope) = match (&inputs.depth, &inputs.slope) {
            (Some(depth), Some(slope)) => {
                let fd = suitability::f_depth(
                    depth,
                    prefs.depth_min,
                    prefs.depth_optimal_min,
                    prefs.depth_optimal_max,
                    prefs.depth_max,
                );
                let fs = suitability::f_slope(slope, prefs.slope_optimal, prefs.slope_tolerance);
                let topo = geometric_mean_2(&fd, &fs, shape);
                (topo, Some(fd), Some(fs))
            }
            _ => (neutral_field(shape, "I_Topo", inputs.sst.meta.observation_date), None, None),
        };

        let fishing = inputs
            .fishing_pressure
            .as_ref()
            .map(suitability::f_pressure)
            .unwrap_or_else(|| neutral_field(shape, "f_fishing", inputs.sst.meta.observation_date));
        let shipping = inputs
            .shipping_density
            .as_ref()
            .map(suitability::f_pressure)
            .unwrap_or_else(|| neutral_field(shape, "f_shipping", inputs.sst.meta.observation_date));
        let i_anthro = elementwise_max(&fishing, &shipping, shape);

        let comp = &weights.composite;
        let mut hsi_values = Array2::<f64>::zeros(shape);
        let mut hsi_missing = Array2::<bool>::from_elem(shape, true);

        for idx in ndarray::indices(shape) {
            if i_phys.missing[idx] || i_prey.missing[idx] || i_topo.missing[idx] || i_anthro.missing[idx] {
                continue;
            }
            let raw = (comp.physicochemical * i_phys.values[idx]
                + comp.prey * i_prey.values[idx]
                + comp.topography * i_topo.values[idx])
                * (1.0 - i_anthro.values[idx]);
            hsi_values[idx] = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
            hsi_missing[idx] = false;
        }

        let hsi_field = GriddedField::new(
            hsi_values,
            hsi_missing,
            FieldMeta {
                variable: "hsi".to_string(),
                source: "enhanced".to_string(),
                units: "dimensionless".to_string(),
                observation_date: inputs.sst.meta.observation_date,
            },
        );

        let statistics = Statistics::from_values(&valid_finite_values(&hsi_field));

        let mut sub_suitabilities = HashMap::new();
        sub_suitabilities.insert("f_temp".to_string(), f_temp);
        sub_suitabilities.insert("f_sal".to_string(), f_sal);
        sub_suitabilities.insert("f_oxy".to_string(), f_oxy);
        sub_suitabilities.insert("f_ocean".to_string(), f_ocean);
        sub_suitabilities.insert("f_chl".to_string(), f_chl);
        sub_suitabilities.insert("f_fishing".to_string(), fishing);
        sub_suitabilities.insert("f_shipping".to_string(), shipping);
        if let Some(fd) = f_depth {
            sub_suitabilities.insert("f_depth".to_string(), fd);
        }
        if let Some(fs) = f_slope {
            sub_suitabilities.insert("f_slope".to_string(), fs);
        }

        let mut sub_indices = HashMap::new();
        sub_indices.insert("I_Phys".to_string(), i_phys);
        sub_indices.insert("I_Prey".to_string(), i_prey);
        sub_indices.insert("I_Topo".to_string(), i_topo);
        sub_indices.insert("I_Anthro".to_string(), i_anthro);

        Ok(HsiResult {
            hsi: hsi_field,
            sub_suitabilities,
            sub_indices,
            statistics,
        })
    }
}

fn validate_critical(inputs: &HsiInputs) -> PipelineResult<()> {
    if inputs.sst.valid_count() == 0 {
        return Err(PipelineError::InvalidInput("sst field has no valid cells".into()));
    }
    if inputs.salinity.valid_count() == 0 {
        return Err(PipelineError::InvalidInput("salinity field has no valid cells".into()));
    }
    Ok(())
}

fn validate_shapes(expected: (usize, usize), inputs: &HsiInputs) -> PipelineResult<()> {
    let check = |name: &str, shape: (usize, usize)| -> PipelineResult<()> {
        if shape != expected {
            return Err(PipelineError::Internal(format!(
                "{name} shape {shape:?} does not match grid shape {expected:?}"
            )));
        }
        Ok(())
    };
    check("sst", inputs.sst.shape())?;
    check("salinity", inputs.salinity.shape())?;
    check("chlorophyll", inputs.chlorophyll.shape())?;
    check("sea_level", inputs.sea_level.shape())?;
    Ok(())
}

fn valid_finite_values(field: &GriddedField) -> Vec<f64> {
    field
        .values
        .iter()
        .zip(field.missing.iter())
        .filter(|(v, &m)| !m && v.is_finite())
        .map(|(&v, _)| v)
        .collect()
}

fn fill_missing_with(field: &GriddedField, neutral: f64) -> GriddedField {
    let mut values = field.values.clone();
    for (idx, &m) in field.missing.indexed_iter() {
        if m {
            values[idx] = neutral;
        }
    }
    GriddedField::new(values, Array2::from_elem(field.shape(), false), field.meta.clone())
}

fn neutral_field(shape: (usize, usize), variable: &str, date: chrono::NaiveDate) -> GriddedField {
    GriddedField::new(
        Array2::from_elem(shape, 1.0),
        Array2::from_elem(shape, false),
        FieldMeta {
            variable: variable.to_string(),
            source: "neutral fallback".to_string(),
            units: "dimensionless".to_string(),
            observation_date: date,
        },
    )
}

fn geometric_mean_4(a: &GriddedField, b: &GriddedField, c: &GriddedField, d: &GriddedField, shape: (usize, usize)) -> GriddedField {
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);
    for idx in ndarray::indices(shape) {
        if a.missing[idx] || b.missing[idx] || c.missing[idx] || d.missing[idx] {
            continue;
        }
        let product = a.values[idx] * b.values[idx] * c.values[idx] * d.values[idx];
        values[idx] = product.max(0.0).powf(0.25);
        missing[idx] = false;
    }
    GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: "I_Phys".to_string(),
            source: "derived".to_string(),
            units: "dimensionless".to_string(),
            observation_date: a.meta.observation_date,
        },
    )
}

fn geometric_mean_2(a: &GriddedField, b: &GriddedField, shape: (usize, usize)) -> GriddedField {
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);
    for idx in ndarray::indices(shape) {
        if a.missing[idx] || b.missing[idx] {
            continue;
        }
        values[idx] = (a.values[idx] * b.values[idx]).max(0.0).sqrt();
        missing[idx] = false;
    }
    GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: "I_Topo".to_string(),
            source: "derived".to_string(),
            units: "dimensionless".to_string(),
            observation_date: a.meta.observation_date,
        },
    )
}

fn scale(field: &GriddedField, factor: f64) -> GriddedField {
    let mut values = field.values.clone();
    for v in values.iter_mut() {
        *v *= factor;
    }
    GriddedField::new(values, field.missing.clone(), field.meta.clone())
}

fn add_fields(a: &GriddedField, b: &GriddedField) -> GriddedField {
    let shape = a.shape();
    let mut values = a.values.clone();
    let mut missing = a.missing.clone();
    for idx in ndarray::indices(shape) {
        if b.missing[idx] {
            continue;
        }
        if missing[idx] {
            values[idx] = b.values[idx];
            missing[idx] = false;
        } else {
            values[idx] += b.values[idx];
        }
    }
    GriddedField::new(values, missing, a.meta.clone())
}

fn elementwise_max(a: &GriddedField, b: &GriddedField, shape: (usize, usize)) -> GriddedField {
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);
    for idx in ndarray::indices(shape) {
        if a.missing[idx] || b.missing[idx] {
            continue;
        }
        values[idx] = a.values[idx].max(b.values[idx]);
        missing[idx] = false;
    }
    GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: "I_Anthro".to_string(),
            source: "derived".to_string(),
            units: "dimensionless".to_string(),
            observation_date: a.meta.observation_date,
        },
    )
}

/// Empirical dissolved-oxygen saturation estimate from temperature and
/// salinity (Weiss 1970-style solubility approximation), used only when no
/// direct oxygen field was fetched — an approximation is still more
/// informative than the neutral fallback of `1`.
fn derive_oxygen_from_temp_salinity(
    sst: &GriddedField,
    salinity: &GriddedField,
    prefs: &crate::profiles::SpeciesPreferences,
) -> GriddedField {
    let shape = sst.shape();
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);

    for idx in ndarray::indices(shape) {
        if sst.missing[idx] || salinity.missing[idx] {
            continue;
        }
        let t = sst.values[idx];
        let s = salinity.values[idx];
        // Garcia & Gordon (1992)-style polynomial in temperature with a
        // linear salinity correction; adequate as a stand-in estimate, not
        // a substitute for a measured oxygen field.
        let saturation_mg_l =
            (14.652 - 0.41022 * t + 0.007991 * t.powi(2) - 0.000077774 * t.powi(3)) - 0.0841 * (s - 35.0) / 35.0;
        values[idx] = saturation_mg_l;
        missing[idx] = false;
    }

    let oxygen_field = GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: "oxygen_derived".to_string(),
            source: "derived from SST/salinity".to_string(),
            units: "mg/L".to_string(),
            observation_date: sst.meta.observation_date,
        },
    );

    suitability::f_oxy(&oxygen_field, prefs.oxygen_min, prefs.oxygen_optimal, prefs.oxygen_tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;
    use chrono::NaiveDate;

    fn uniform_field(value: f64, shape: (usize, usize)) -> GriddedField {
        GriddedField::new(
            Array2::from_elem(shape, value),
            Array2::from_elem(shape, false),
            FieldMeta {
                variable: "x".into(),
                source: "test".into(),
                units: "1".into(),
                observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        )
    }

    fn sample_inputs(shape: (usize, usize)) -> HsiInputs {
        HsiInputs {
            sst: uniform_field(25.0, shape),
            salinity: uniform_field(35.0, shape),
            chlorophyll: uniform_field(0.5, shape),
            sea_level: uniform_field(0.05, shape),
            oxygen: None,
            depth: None,
            slope: None,
            prey_fields: vec![],
            fishing_pressure: None,
            shipping_density: None,
        }
    }

    #[test]
    fn enhanced_mode_produces_values_in_unit_interval() {
        let grid = Grid::canonical(5.0);
        let engine = HsiEngine::new(&grid);
        let profile = profiles::lookup("tiger_shark").unwrap();
        let inputs = sample_inputs(grid.shape());

        let result = engine.compute(profile, HsiMode::Enhanced, inputs).unwrap();
        for &v in result.hsi.values.iter() {
            assert!((0.0..=1.0).contains(&v));
        }
        assert!(result.sub_indices.contains_key("I_Anthro"));
    }

    #[test]
    fn legacy_mode_produces_values_in_unit_interval() {
        let grid = Grid::canonical(5.0);
        let engine = HsiEngine::new(&grid);
        let profile = profiles::lookup("tiger_shark").unwrap();
        let inputs = sample_inputs(grid.shape());

        let result = engine.compute(profile, HsiMode::Legacy, inputs).unwrap();
        for &v in result.hsi.values.iter() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn missing_sst_is_fatal() {
        let grid = Grid::canonical(5.0);
        let engine = HsiEngine::new(&grid);
        let profile = profiles::lookup("tiger_shark").unwrap();
        let mut inputs = sample_inputs(grid.shape());
        inputs.sst = GriddedField::all_missing(grid.shape(), inputs.sst.meta.clone());

        let result = engine.compute(profile, HsiMode::Enhanced, inputs);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn shape_mismatch_is_internal_error() {
        let grid = Grid::canonical(5.0);
        let engine = HsiEngine::new(&grid);
        let profile = profiles::lookup("tiger_shark").unwrap();
        let mut inputs = sample_inputs(grid.shape());
        inputs.chlorophyll = uniform_field(0.5, (2, 2));

        let result = engine.compute(profile, HsiMode::Enhanced, inputs);
        assert!(matches!(result, Err(PipelineError::Internal(_))));
    }

    #[test]
    fn missing_topography_yields_neutral_topo_index() {
        let grid = Grid::canonical(5.0);
        let engine = HsiEngine::new(&grid);
        let profile = profiles::lookup("tiger_shark").unwrap();
        let inputs = sample_inputs(grid.shape());

        let result = engine.compute(profile, HsiMode::Enhanced, inputs).unwrap();
        let topo = &result.sub_indices["I_Topo"];
        assert!(topo.values.iter().all(|&v| v == 1.0));
    }
}
