//! Canonical lat/lon grid, regridding, windowing, and spatial gradients.
//!
//! All gridded fields in the system are expected to live on the single
//! [`Grid`] returned by [`Grid::canonical`]; treat "not on `G`" as a type
//! error at call sites.

use crate::error::{PipelineError, PipelineResult};
use crate::field::GriddedField;
use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    /// Antimeridian-crossing windows have `west > east`.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if lat > self.north || lat < self.south {
            return false;
        }
        if self.crosses_antimeridian() {
            lon >= self.west || lon <= self.east
        } else {
            lon >= self.west && lon <= self.east
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub step: f64,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

impl Grid {
    /// The canonical global lattice: -90..=90 by `step`, -180..=180 by `step`.
    pub fn canonical(step: f64) -> Self {
        let lats = steps_inclusive(-90.0, 90.0, step);
        let lons = steps_inclusive(-180.0, 180.0, step);
        Self { step, lats, lons }
    }

    pub fn n_lat(&self) -> usize {
        self.lats.len()
    }

    pub fn n_lon(&self) -> usize {
        self.lons.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_lat(), self.n_lon())
    }

    /// Regrid a source array of arbitrary shape onto this grid via bilinear
    /// interpolation. Source longitudes may be in `[0, 360)`; this is
    /// detected by `min(lon) >= 0 && max(lon) > 180` and corrected by
    /// shifting into `[-180, 180)` and re-sorting before interpolating.
    /// Missing source cells are never interpolated across — a target cell
    /// whose surrounding source cells are all missing stays missing.
    pub fn regrid(
        &self,
        src_lats: &[f64],
        src_lons: &[f64],
        src_values: &Array2<f64>,
        src_missing: &Array2<bool>,
    ) -> PipelineResult<(Array2<f64>, Array2<bool>)> {
        if src_values.shape() != [src_lats.len(), src_lons.len()] {
            return Err(PipelineError::Internal(
                "regrid: source array shape does not match source coordinate lengths".into(),
            ));
        }

        let (lons, values, missing) = normalize_longitudes(src_lons, src_values, src_missing);

        let mut out_values = Array2::<f64>::zeros(self.shape());
        let mut out_missing = Array2::<bool>::from_elem(self.shape(), true);

        for (i, &lat) in self.lats.iter().enumerate() {
            let Some((ilo, ihi, wlat)) = bracket(src_lats, lat) else {
                continue;
            };
            for (j, &lon) in self.lons.iter().enumerate() {
                let Some((jlo, jhi, wlon)) = bracket(&lons, lon) else {
                    continue;
                };

                let corners = [
                    (ilo, jlo, (1.0 - wlat) * (1.0 - wlon)),
                    (ilo, jhi, (1.0 - wlat) * wlon),
                    (ihi, jlo, wlat * (1.0 - wlon)),
                    (ihi, jhi, wlat * wlon),
                ];

                let mut acc = 0.0;
                let mut weight_sum = 0.0;
                for (ci, cj, w) in corners {
                    if w <= 0.0 || missing[(ci, cj)] {
                        continue;
                    }
                    acc += values[(ci, cj)] * w;
                    weight_sum += w;
                }

                if weight_sum > 0.0 {
                    out_values[(i, j)] = acc / weight_sum;
                    out_missing[(i, j)] = false;
                }
            }
        }

        Ok((out_values, out_missing))
    }

    /// Restrict a field to the cells whose center falls inside `bounds`;
    /// cells outside become missing. The caller's array is untouched in
    /// place of the stored full-grid array (the raw cache always persists
    /// the full canonical grid per ).
    pub fn apply_bounds(&self, field: &GriddedField, bounds: GeoBounds) -> GriddedField {
        let mut values = field.values.clone();
        let mut missing = field.missing.clone();

        for (i, &lat) in self.lats.iter().enumerate() {
            for (j, &lon) in self.lons.iter().enumerate() {
                if !bounds.contains(lat, lon) {
                    missing[(i, j)] = true;
                    values[(i, j)] = 0.0;
                }
            }
        }

        GriddedField {
            values,
            missing,
            ..field.clone()
        }
    }

    /// Centered-difference spatial gradient `(d/dlat, d/dlon)`; edge rows and
    /// columns fall back to one-sided differences. Gradients straddling a
    /// missing value are themselves missing.
    pub fn spatial_gradient(&self, field: &GriddedField) -> (Array2<f64>, Array2<f64>) {
        let (nlat, nlon) = self.shape();
        let mut dlat = Array2::<f64>::zeros((nlat, nlon));
        let mut dlon = Array2::<f64>::zeros((nlat, nlon));

        for i in 0..nlat {
            for j in 0..nlon {
                if field.missing[(i, j)] {
                    continue;
                }

                dlat[(i, j)] = directional_derivative(field, &self.lats, i, |k| (k, j));
                dlon[(i, j)] = directional_derivative(field, &self.lons, j, |k| (i, k));
            }
        }

        (dlat, dlon)
    }
}

/// One-sided at the edges, centered in the interior, along whichever axis
/// `index_fn` walks (`coords` indexed by the axis being differentiated).
fn directional_derivative(
    field: &GriddedField,
    coords: &[f64],
    axis_index: usize,
    index_fn: impl Fn(usize) -> (usize, usize),
) -> f64 {
    let n = coords.len();
    let at = |k: usize| -> Option<f64> {
        let (r, c) = index_fn(k);
        if field.missing[(r, c)] {
            None
        } else {
            Some(field.values[(r, c)])
        }
    };

    if axis_index == 0 {
        match (at(0), at(1)) {
            (Some(v0), Some(v1)) => (v1 - v0) / (coords[1] - coords[0]),
            _ => 0.0,
        }
    } else if axis_index == n - 1 {
        match (at(n - 1), at(n - 2)) {
            (Some(vn), Some(vn1)) => (vn - vn1) / (coords[n - 1] - coords[n - 2]),
            _ => 0.0,
        }
    } else {
        match (at(axis_index - 1), at(axis_index + 1)) {
            (Some(vm), Some(vp)) => {
                (vp - vm) / (coords[axis_index + 1] - coords[axis_index - 1])
            }
            _ => 0.0,
        }
    }
}

fn steps_inclusive(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step).round() as usize + 1;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// If the source longitudes look like `[0, 360)`, shift to `[-180, 180)` and
/// sort ascending, reordering the value/missing columns in lockstep.
fn normalize_longitudes(
    src_lons: &[f64],
    values: &Array2<f64>,
    missing: &Array2<bool>,
) -> (Vec<f64>, Array2<f64>, Array2<bool>) {
    let min_lon = src_lons.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_lon = src_lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if !(min_lon >= 0.0 && max_lon > 180.0) {
        return (src_lons.to_vec(), values.clone(), missing.clone());
    }

    let shifted: Vec<f64> = src_lons
        .iter()
        .map(|&lon| if lon >= 180.0 { lon - 360.0 } else { lon })
        .collect();

    let mut order: Vec<usize> = (0..shifted.len()).collect();
    order.sort_by(|&a, &b| shifted[a].partial_cmp(&shifted[b]).unwrap());

    let sorted_lons: Vec<f64> = order.iter().map(|&k| shifted[k]).collect();
    let nrows = values.nrows();
    let mut sorted_values = Array2::<f64>::zeros((nrows, order.len()));
    let mut sorted_missing = Array2::<bool>::from_elem((nrows, order.len()), true);

    for (new_j, &old_j) in order.iter().enumerate() {
        for i in 0..nrows {
            sorted_values[(i, new_j)] = values[(i, old_j)];
            sorted_missing[(i, new_j)] = missing[(i, old_j)];
        }
    }

    (sorted_lons, sorted_values, sorted_missing)
}

/// Find `(lo, hi, weight)` such that `coords[lo] <= x <= coords[hi]` and
/// `weight` is the fractional distance from `lo` toward `hi`. Returns `None`
/// if `x` is outside the coordinate range.
fn bracket(coords: &[f64], x: f64) -> Option<(usize, usize, f64)> {
    if coords.is_empty() || x < coords[0] || x > *coords.last().unwrap() {
        return None;
    }
    if coords.len() == 1 {
        return Some((0, 0, 0.0));
    }

    match coords.binary_search_by(|v| v.partial_cmp(&x).unwrap()) {
        Ok(idx) => Some((idx, idx, 0.0)),
        Err(idx) => {
            let lo = idx - 1;
            let hi = idx;
            let span = coords[hi] - coords[lo];
            let w = if span.abs() < f64::EPSILON {
                0.0
            } else {
                (x - coords[lo]) / span
            };
            Some((lo, hi, w))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldMeta, GriddedField};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn canonical_grid_shape_matches_spec() {
        let g = Grid::canonical(0.25);
        assert_eq!(g.n_lat(), 721);
        assert_eq!(g.n_lon(), 1441);
    }

    #[test]
    fn bounds_normal_window() {
        let b = GeoBounds {
            north: 10.0,
            south: -10.0,
            east: 20.0,
            west: -20.0,
        };
        assert!(b.contains(0.0, 0.0));
        assert!(!b.contains(0.0, 21.0));
        assert!(!b.crosses_antimeridian());
    }

    #[test]
    fn bounds_antimeridian_window() {
        let b = GeoBounds {
            north: 10.0,
            south: -10.0,
            east: -170.0,
            west: 170.0,
        };
        assert!(b.crosses_antimeridian());
        assert!(b.contains(0.0, 175.0));
        assert!(b.contains(0.0, -175.0));
        assert!(!b.contains(0.0, 0.0));
    }

    #[test]
    fn regrid_identity_roundtrip() {
        let g = Grid::canonical(1.0);
        let values = Array2::<f64>::from_shape_fn(g.shape(), |(i, j)| (i + j) as f64);
        let missing = Array2::<bool>::from_elem(g.shape(), false);

        let (out_values, out_missing) = g.regrid(&g.lats, &g.lons, &values, &missing).unwrap();

        for ((v1, v2), m) in values.iter().zip(out_values.iter()).zip(out_missing.iter()) {
            assert!(!m);
            assert_relative_eq!(v1, v2, epsilon = 1e-9);
        }
    }

    #[test]
    fn regrid_longitude_normalization_matches() {
        let g = Grid::canonical(1.0);

        // Field authored on [-180, 180)
        let lons_neg: Vec<f64> = (0..360).map(|i| -180.0 + i as f64).collect();
        let values_neg = Array2::<f64>::from_shape_fn((g.n_lat(), lons_neg.len()), |(i, j)| {
            (i as f64) * 0.1 + (j as f64) * 0.01
        });
        let missing_neg = Array2::<bool>::from_elem((g.n_lat(), lons_neg.len()), false);

        // Same field authored on [0, 360)
        let lons_pos: Vec<f64> = (0..360).map(|i| i as f64).collect();
        let mut values_pos = Array2::<f64>::zeros((g.n_lat(), lons_pos.len()));
        for i in 0..g.n_lat() {
            for (j, &lon) in lons_pos.iter().enumerate() {
                let neg_lon = if lon >= 180.0 { lon - 360.0 } else { lon };
                let src_j = lons_neg.iter().position(|&l| (l - neg_lon).abs() < 1e-9).unwrap();
                values_pos[(i, j)] = values_neg[(i, src_j)];
            }
        }
        let missing_pos = Array2::<bool>::from_elem((g.n_lat(), lons_pos.len()), false);

        let (out_neg, _) = g.regrid(&g.lats, &lons_neg, &values_neg, &missing_neg).unwrap();
        let (out_pos, _) = g.regrid(&g.lats, &lons_pos, &values_pos, &missing_pos).unwrap();

        for (a, b) in out_neg.iter().zip(out_pos.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn gradient_edges_use_one_sided_difference() {
        let g = Grid::canonical(1.0);
        let values = Array2::<f64>::from_shape_fn(g.shape(), |(i, j)| (i + j) as f64);
        let missing = Array2::<bool>::from_elem(g.shape(), false);
        let field = GriddedField {
            values,
            missing,
            meta: FieldMeta {
                variable: "test".into(),
                source: "test".into(),
                units: "1".into(),
                observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        };

        let (dlat, dlon) = g.spatial_gradient(&field);
        assert_relative_eq!(dlat[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(dlon[(0, 0)], 1.0, epsilon = 1e-9);
    }
}
