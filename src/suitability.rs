//! Pure, side-effect-free suitability functions.
//!
//! Every function here propagates missing input cells as missing output
//! cells (never as zero) and clips its result to `[0, 1]`; none of them
//! touch a cache, a provider, or the network.

use ndarray::Array2;

use crate::field::{FieldMeta, GriddedField};
use crate::grid::Grid;

fn clip01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Apply `f` cell-by-cell; a cell missing in the input, or for which `f`
/// returns `None`, is missing in the output.
fn elementwise(field: &GriddedField, variable: &str, f: impl Fn(f64) -> Option<f64>) -> GriddedField {
    let shape = field.shape();
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);

    for ((idx, &v), &is_missing) in field.values.indexed_iter().zip(field.missing.iter()) {
        if is_missing {
            continue;
        }
        if let Some(out) = f(v) {
            values[idx] = clip01(out);
            missing[idx] = false;
        }
    }

    GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: variable.to_string(),
            source: "derived".to_string(),
            units: "dimensionless".to_string(),
            observation_date: field.meta.observation_date,
        },
    )
}

fn valid_values(field: &GriddedField) -> Vec<f64> {
    field
        .values
        .iter()
        .zip(field.missing.iter())
        .filter(|(_, &m)| !m)
        .map(|(&v, _)| v)
        .collect()
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Some(percentile(&sorted, 0.5))
}

/// Saturation: `C / (C + k_c)`. Negative concentrations are physically
/// meaningless and treated as missing rather than clamped.
pub fn f_chl(field: &GriddedField) -> GriddedField {
    const K_C: f64 = 0.5;
    elementwise(field, "f_chl", |c| {
        if c < 0.0 {
            None
        } else {
            Some(c / (c + K_C))
        }
    })
}

/// Gaussian about the species' optimum temperature.
pub fn f_temp(field: &GriddedField, optimal: f64, tolerance: f64) -> GriddedField {
    elementwise(field, "f_temp", |t| {
        Some((-(t - optimal).powi(2) / (2.0 * tolerance.powi(2))).exp())
    })
}

/// Trapezoidal ramp: `0` outside `[min, max]`, `1` on the optimum plateau,
/// linear ramps in between.
fn trapezoid(x: f64, min: f64, opt_min: f64, opt_max: f64, max: f64) -> f64 {
    if x < min || x > max {
        0.0
    } else if x < opt_min {
        (x - min) / (opt_min - min).max(f64::EPSILON)
    } else if x <= opt_max {
        1.0
    } else {
        (max - x) / (max - opt_max).max(f64::EPSILON)
    }
}

pub fn f_sal(field: &GriddedField, min: f64, opt_min: f64, opt_max: f64, max: f64) -> GriddedField {
    elementwise(field, "f_sal", |s| Some(trapezoid(s, min, opt_min, opt_max, max)))
}

pub fn f_depth(field: &GriddedField, min: f64, opt_min: f64, opt_max: f64, max: f64) -> GriddedField {
    elementwise(field, "f_depth", |d| Some(trapezoid(d, min, opt_min, opt_max, max)))
}

/// Sigmoid-above-threshold blended with a Gaussian about the optimum,
/// `0.7 * sigmoid + 0.3 * gaussian`.
pub fn f_oxy(field: &GriddedField, min: f64, optimal: f64, tolerance: f64) -> GriddedField {
    elementwise(field, "f_oxy", |o| {
        let sigmoid = 1.0 / (1.0 + (-(o - min) / tolerance.max(f64::EPSILON)).exp());
        let gaussian = (-(o - optimal).powi(2) / (2.0 * tolerance.powi(2))).exp();
        Some(0.7 * sigmoid + 0.3 * gaussian)
    })
}

pub fn f_slope(field: &GriddedField, optimal: f64, tolerance: f64) -> GriddedField {
    elementwise(field, "f_slope", |a| {
        Some((-(a - optimal).powi(2) / (2.0 * tolerance.powi(2))).exp())
    })
}

/// Saturation over a prey-density field; `k_prey` defaults to the field's
/// own median, falling back to `1.0` when the field has no valid cells.
pub fn f_prey(field: &GriddedField) -> GriddedField {
    let k_prey = median(&valid_values(field)).unwrap_or(1.0).max(f64::EPSILON);
    elementwise(field, "f_prey", |rho| Some(rho / (rho + k_prey)))
}

pub fn f_eddy(field: &GriddedField) -> GriddedField {
    elementwise(field, "f_eddy", |e| Some((-(e.powi(2)) / (2.0 * 0.1_f64.powi(2))).exp()))
}

/// Magnitude of the spatial gradient of `field`, converted to a front
/// suitability by `exp(-|grad| / 0.05)`.
pub fn f_front(grid: &Grid, field: &GriddedField) -> GriddedField {
    let (dlat, dlon) = grid.spatial_gradient(field);
    let shape = field.shape();
    let mut magnitude = Array2::<f64>::zeros(shape);
    let mut missing = field.missing.clone();

    for idx in ndarray::indices(shape) {
        if missing[idx] {
            continue;
        }
        magnitude[idx] = (dlat[idx].powi(2) + dlon[idx].powi(2)).sqrt();
    }

    let gradient_field = GriddedField::new(
        magnitude,
        std::mem::take(&mut missing),
        field.meta.clone(),
    );

    elementwise(&gradient_field, "f_front", |g| Some((-g / 0.05).exp()))
}

/// Weighted blend of eddy and front suitability into a single "ocean
/// dynamics" sub-index, consumed by the enhanced HSI's `I_Phys` term.
pub fn f_ocean(eddy: &GriddedField, front: &GriddedField, w_eddy: f64, w_front: f64) -> GriddedField {
    combine_weighted(eddy, front, w_eddy, w_front, "f_ocean")
}

fn combine_weighted(a: &GriddedField, b: &GriddedField, wa: f64, wb: f64, variable: &str) -> GriddedField {
    let shape = a.shape();
    let mut values = Array2::<f64>::zeros(shape);
    let mut missing = Array2::<bool>::from_elem(shape, true);

    for idx in ndarray::indices(shape) {
        if a.missing[idx] || b.missing[idx] {
            continue;
        }
        values[idx] = clip01(wa * a.values[idx] + wb * b.values[idx]);
        missing[idx] = false;
    }

    GriddedField::new(
        values,
        missing,
        FieldMeta {
            variable: variable.to_string(),
            source: "derived".to_string(),
            units: "dimensionless".to_string(),
            observation_date: a.meta.observation_date,
        },
    )
}

/// Percentile-normalized anthropogenic pressure: `clip(P / P_95, 0, 1)`.
/// `P_95` falls back to `1.0` when the field has no valid cells, which
/// makes any nonzero pressure saturate immediately rather than divide by
/// zero.
pub fn f_pressure(field: &GriddedField) -> GriddedField {
    let mut valid = valid_values(field);
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p95 = if valid.is_empty() { 1.0 } else { percentile(&valid, 0.95).max(f64::EPSILON) };
    elementwise(field, "f_pressure", |p| Some(p / p95))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn field_from(values: Vec<f64>, missing: Vec<bool>) -> GriddedField {
        let n = values.len();
        GriddedField::new(
            Array2::from_shape_vec((1, n), values).unwrap(),
            Array2::from_shape_vec((1, n), missing).unwrap(),
            FieldMeta {
                variable: "x".into(),
                source: "test".into(),
                units: "1".into(),
                observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        )
    }

    #[test]
    fn f_chl_negative_is_missing() {
        let field = field_from(vec![-1.0, 0.5], vec![false, false]);
        let out = f_chl(&field);
        assert!(out.missing[(0, 0)]);
        assert!(!out.missing[(0, 1)]);
        assert_relative_eq!(out.values[(0, 1)], 0.5 / 1.0, epsilon = 1e-9);
    }

    #[test]
    fn f_temp_peaks_at_optimum() {
        let field = field_from(vec![25.0], vec![false]);
        let out = f_temp(&field, 25.0, 4.0);
        assert_relative_eq!(out.values[(0, 0)], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn f_sal_zero_outside_range_one_on_plateau() {
        let field = field_from(vec![10.0, 34.0, 50.0], vec![false, false, false]);
        let out = f_sal(&field, 30.0, 33.0, 37.0, 40.0);
        assert_relative_eq!(out.values[(0, 0)], 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.values[(0, 1)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(out.values[(0, 2)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_propagates_not_zero() {
        let field = field_from(vec![1.0, 2.0], vec![false, true]);
        let out = f_chl(&field);
        assert!(!out.missing[(0, 0)]);
        assert!(out.missing[(0, 1)]);
    }

    #[test]
    fn f_pressure_empty_field_falls_back_to_p95_one() {
        let field = field_from(vec![f64::NAN], vec![true]);
        let out = f_pressure(&field);
        assert!(out.missing[(0, 0)]);
    }

    #[test]
    fn all_outputs_clipped_to_unit_interval() {
        let field = field_from(vec![1000.0], vec![false]);
        let out = f_chl(&field);
        assert!(out.values[(0, 0)] <= 1.0);
        assert!(out.values[(0, 0)] >= 0.0);
    }
}
