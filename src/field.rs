//! `GriddedField` — the one data shape every provider ends up producing and
//! every downstream stage consumes.

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Attribution and units traveling alongside a field's values. Kept separate
/// from the array so cloning metadata (e.g. for a derived suitability field)
/// never risks touching the underlying data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub variable: String,
    pub source: String,
    pub units: String,
    pub observation_date: NaiveDate,
}

/// A named 2-D array on the canonical grid, with an explicit missing-value
/// mask (rather than relying on sentinel NaNs, which would make "missing
/// propagates, never fabricated" invariants harder to audit). Immutable
/// after construction; a pipeline invocation owns it exclusively until it is
/// either cached (shared read-only) or dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GriddedField {
    pub values: Array2<f64>,
    pub missing: Array2<bool>,
    pub meta: FieldMeta,
}

impl GriddedField {
    pub fn new(values: Array2<f64>, missing: Array2<bool>, meta: FieldMeta) -> Self {
        debug_assert_eq!(values.shape(), missing.shape());
        Self {
            values,
            missing,
            meta,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        let s = self.values.shape();
        (s[0], s[1])
    }

    /// An all-missing field of the given shape, used as a fallback when a
    /// dataset cannot be produced at all but downstream code still expects
    /// `Some(GriddedField)` for a lagged/optional slot.
    pub fn all_missing(shape: (usize, usize), meta: FieldMeta) -> Self {
        Self {
            values: Array2::zeros(shape),
            missing: Array2::from_elem(shape, true),
            meta,
        }
    }

    /// An all-zero, all-present field — the "neutral fallback" used for
    /// anthropogenic pressure when the upstream service is unavailable.
    pub fn zeros(shape: (usize, usize), meta: FieldMeta) -> Self {
        Self {
            values: Array2::zeros(shape),
            missing: Array2::from_elem(shape, false),
            meta,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.missing.iter().filter(|m| !**m).count()
    }

    /// Replace missing cells in `self` with values from `other` wherever
    /// `other` has them, keeping `self`'s own values where present. Optional
    /// gap-fill building block (e.g. merging a target date with `T±7d`); not
    /// currently called by the ocean provider's `fetch` path.
    pub fn fill_missing_from(&self, other: &GriddedField) -> GriddedField {
        let mut values = self.values.clone();
        let mut missing = self.missing.clone();

        for ((idx, m), ov) in missing.indexed_iter_mut().zip(other.values.iter()) {
            if *m && !other.missing[idx] {
                values[idx] = *ov;
                *m = false;
            }
        }

        GriddedField {
            values,
            missing,
            meta: self.meta.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FieldMeta {
        FieldMeta {
            variable: "x".into(),
            source: "test".into(),
            units: "1".into(),
            observation_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn fill_missing_prioritizes_target() {
        let mut values_a = Array2::<f64>::zeros((2, 2));
        values_a[(0, 0)] = 1.0;
        let mut missing_a = Array2::<bool>::from_elem((2, 2), true);
        missing_a[(0, 0)] = false;
        let a = GriddedField::new(values_a, missing_a, meta());

        let mut values_b = Array2::<f64>::zeros((2, 2));
        values_b[(0, 0)] = 99.0;
        values_b[(0, 1)] = 5.0;
        let missing_b = Array2::<bool>::from_elem((2, 2), false);
        let b = GriddedField::new(values_b, missing_b, meta());

        let merged = a.fill_missing_from(&b);
        assert_eq!(merged.values[(0, 0)], 1.0); // target wins
        assert_eq!(merged.values[(0, 1)], 5.0); // filled from b
        assert!(!merged.missing[(0, 1)]);
        assert!(merged.missing[(1, 1)]); // neither had it
    }
}
