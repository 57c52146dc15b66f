//! Cross-module coverage of the suitability/HSI/encoding pipeline, built from
//! synthetic `GriddedField`s rather than live datasets so the suite never
//! depends on network access or Earthdata/GFW credentials.

use chrono::NaiveDate;
use lapy_habitat::field::{FieldMeta, GriddedField};
use lapy_habitat::geojson_encoder::{self, EncodeOptions};
use lapy_habitat::grid::Grid;
use lapy_habitat::hsi_engine::{HsiEngine, HsiInputs, HsiMode};
use lapy_habitat::profiles;
use ndarray::Array2;

fn observation_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

fn field(shape: (usize, usize), value: f64, variable: &str) -> GriddedField {
    GriddedField::new(
        Array2::from_elem(shape, value),
        Array2::from_elem(shape, false),
        FieldMeta {
            variable: variable.to_string(),
            source: "synthetic".to_string(),
            units: "1".to_string(),
            observation_date: observation_date(),
        },
    )
}

fn baseline_inputs(shape: (usize, usize)) -> HsiInputs {
    HsiInputs {
        sst: field(shape, 25.0, "sst"),
        salinity: field(shape, 35.0, "salinity"),
        chlorophyll: field(shape, 0.5, "chlorophyll"),
        sea_level: field(shape, 0.05, "sea_level"),
        oxygen: None,
        depth: None,
        slope: None,
        prey_fields: vec![],
        fishing_pressure: None,
        shipping_density: None,
    }
}

#[test]
fn tiger_shark_enhanced_run_produces_bounded_hsi_and_geojson() {
    let grid = Grid::canonical(5.0);
    let shape = grid.shape();
    let profile = profiles::lookup("tiger_shark").expect("tiger_shark is registered");

    let engine = HsiEngine::new(&grid);
    let result = engine
        .compute(profile, HsiMode::Enhanced, baseline_inputs(shape))
        .expect("enhanced mode should succeed with sst/salinity present");

    assert!(result.statistics.valid_count > 0);
    for &v in result.hsi.values.iter() {
        assert!((0.0..=1.0).contains(&v), "hsi value {v} out of [0, 1]");
    }

    // No pressure fields were supplied, so anthropogenic pressure must fall
    // back to the neutral "no suppression" index rather than excluding cells.
    let i_anthro = &result.sub_indices["I_Anthro"];
    assert!(i_anthro.values.iter().all(|&v| v == 0.0));

    let features = geojson_encoder::encode_hsi(&grid, &result, &EncodeOptions::default());
    assert!(!features.is_empty());
    for feature in &features {
        let props = feature.properties.as_ref().expect("feature must carry properties");
        assert!(props.contains_key("hsi"));
        assert!(props.contains_key("I_Phys"));
    }
}

#[test]
fn legacy_mode_fills_missing_ocean_term_with_neutral_value() {
    let grid = Grid::canonical(5.0);
    let shape = grid.shape();
    let profile = profiles::lookup("great_white_shark").unwrap();

    let mut inputs = baseline_inputs(shape);
    // An all-missing sea-level field means both the eddy and front terms are
    // missing everywhere, so f_ocean should be entirely unavailable.
    inputs.sea_level = GriddedField::all_missing(shape, inputs.sea_level.meta.clone());

    let engine = HsiEngine::new(&grid);
    let result = engine
        .compute(profile, HsiMode::Legacy, inputs)
        .expect("legacy mode substitutes the neutral 0.5 rather than failing");

    assert!(result.statistics.valid_count > 0);
    for &v in result.hsi.values.iter() {
        assert!(v.is_finite());
        assert!((0.0..=1.0).contains(&v));
    }
}

#[test]
fn missing_critical_sst_is_rejected_before_any_math_runs() {
    let grid = Grid::canonical(5.0);
    let shape = grid.shape();
    let profile = profiles::lookup("whale_shark").unwrap();

    let mut inputs = baseline_inputs(shape);
    inputs.sst = GriddedField::all_missing(shape, inputs.sst.meta.clone());

    let engine = HsiEngine::new(&grid);
    let err = engine
        .compute(profile, HsiMode::Enhanced, inputs)
        .expect_err("an entirely-missing sst field must be rejected, not silently zeroed");
    assert!(err.to_string().contains("sst"));
}

#[test]
fn every_registered_species_runs_cleanly_in_both_modes() {
    let grid = Grid::canonical(10.0);
    let shape = grid.shape();
    let engine = HsiEngine::new(&grid);

    for species in profiles::known_species() {
        let profile = profiles::lookup(species).unwrap();
        for mode in [HsiMode::Legacy, HsiMode::Enhanced] {
            let result = engine
                .compute(profile, mode, baseline_inputs(shape))
                .unwrap_or_else(|e| panic!("{species} failed in {mode:?}: {e}"));
            assert!(result.statistics.valid_count > 0, "{species} produced no valid cells in {mode:?}");
        }
    }
}
