//! Species-parameterized suitability profiles.
//!
//! A `SharkProfile` carries both the legacy power-weighted formula's
//! exponents and the enhanced composite model's sub-index weights, so a
//! single species registry serves either HSI mode.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::warn;

/// Legacy-mode per-factor weights, combined as a weighted geometric mean:
/// `HSI = prod(f_i ^ w_i)`.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyWeights {
    pub chlorophyll: f64,
    pub temperature: f64,
    pub sea_level_anomaly: f64,
    pub salinity: f64,
}

/// Enhanced-mode sub-index weights. Each group is renormalized to
/// sum to 1.0 at construction time so a species definition can list
/// approximate weights without the author doing the arithmetic.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedWeights {
    pub physicochemical: PhysicochemicalWeights,
    pub prey: PreyWeights,
    pub ocean_features: OceanFeatureWeights,
    pub topography: TopographyWeights,
    /// Top-level blend of I_Phys / I_Prey / I_Topo / I_Anthro into HSI.
    pub composite: CompositeWeights,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhysicochemicalWeights {
    pub temperature: f64,
    pub salinity: f64,
    pub oxygen: f64,
}

/// Diet weights over the prey guilds `I_Prey` sums across, plus the
/// baseline chlorophyll weight `w_chl`. A guild whose density field is
/// unavailable falls back to `f_chl` in its place.
#[derive(Debug, Clone, Serialize)]
pub struct PreyWeights {
    pub chlorophyll: f64,
    pub pinnipeds: f64,
    pub turtles: f64,
    pub fish: f64,
    pub cephalopods: f64,
}

impl PreyWeights {
    pub fn guild_weight(&self, guild: &str) -> Option<f64> {
        match guild {
            "pinnipeds" => Some(self.pinnipeds),
            "turtles" => Some(self.turtles),
            "fish" => Some(self.fish),
            "cephalopods" => Some(self.cephalopods),
            _ => None,
        }
    }
}

/// Mix of the two oceanographic-feature suitabilities `f_ocean` blends:
/// eddy presence and frontal gradient strength.
#[derive(Debug, Clone, Serialize)]
pub struct OceanFeatureWeights {
    pub eddy: f64,
    pub front: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopographyWeights {
    pub depth: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeWeights {
    pub physicochemical: f64,
    pub prey: f64,
    pub topography: f64,
    pub anthropogenic: f64,
}

fn normalize(label: &str, pairs: &mut [(&str, &mut f64)]) {
    let sum: f64 = pairs.iter().map(|(_, w)| **w).sum();
    if sum <= 0.0 {
        warn!(group = label, "all weights zero or negative, leaving unnormalized");
        return;
    }
    if (sum - 1.0).abs() > 1e-9 {
        warn!(group = label, sum, "normalizing weights to sum to 1.0");
        for (_, w) in pairs.iter_mut() {
            **w /= sum;
        }
    }
}

/// Curated, per-species environmental preferences and temporal lags the
/// suitability functions and trophic-lag date resolution are parameterized
/// on — temperature in °C, salinity in PSU, depth in meters, slope in
/// degrees, oxygen in mg/L.
#[derive(Debug, Clone, Serialize)]
pub struct SpeciesPreferences {
    pub temp_optimal_min: f64,
    pub temp_optimal_max: f64,
    pub temp_tolerance: f64,

    /// Salinity trapezoid: `salinity_min < salinity_optimal_min ≤
    /// salinity_optimal_max < salinity_max`.
    pub salinity_min: f64,
    pub salinity_optimal_min: f64,
    pub salinity_optimal_max: f64,
    pub salinity_max: f64,

    pub oxygen_min: f64,
    pub oxygen_optimal: f64,
    pub oxygen_tolerance: f64,

    /// Depth trapezoid: `depth_min < depth_optimal_min ≤ depth_optimal_max
    /// < depth_max`.
    pub depth_min: f64,
    pub depth_optimal_min: f64,
    pub depth_optimal_max: f64,
    pub depth_max: f64,

    pub slope_optimal: f64,
    pub slope_tolerance: f64,

    /// Days between a chlorophyll bloom and the species' presence response;
    /// falls back to un-lagged data when a lagged snapshot is unavailable.
    pub c_lag_days: i64,
    /// Days between an SST shift and the species' presence response;
    /// falls back to un-lagged data when a lagged snapshot is unavailable.
    pub t_lag_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharkProfile {
    pub species: String,
    pub common_name: String,
    pub preferences: SpeciesPreferences,
    pub legacy_weights: LegacyWeights,
    pub enhanced_weights: EnhancedWeights,
}

impl SharkProfile {
    fn new(
        species: &str,
        common_name: &str,
        preferences: SpeciesPreferences,
        legacy_weights: LegacyWeights,
        mut enhanced_weights: EnhancedWeights,
    ) -> Self {
        normalize(
            "physicochemical",
            &mut [
                ("temperature", &mut enhanced_weights.physicochemical.temperature),
                ("salinity", &mut enhanced_weights.physicochemical.salinity),
                ("oxygen", &mut enhanced_weights.physicochemical.oxygen),
            ],
        );
        normalize(
            "prey",
            &mut [
                ("chlorophyll", &mut enhanced_weights.prey.chlorophyll),
                ("pinnipeds", &mut enhanced_weights.prey.pinnipeds),
                ("turtles", &mut enhanced_weights.prey.turtles),
                ("fish", &mut enhanced_weights.prey.fish),
                ("cephalopods", &mut enhanced_weights.prey.cephalopods),
            ],
        );
        normalize(
            "ocean_features",
            &mut [
                ("eddy", &mut enhanced_weights.ocean_features.eddy),
                ("front", &mut enhanced_weights.ocean_features.front),
            ],
        );
        normalize(
            "topography",
            &mut [
                ("depth", &mut enhanced_weights.topography.depth),
                ("slope", &mut enhanced_weights.topography.slope),
            ],
        );
        normalize(
            "composite",
            &mut [
                ("physicochemical", &mut enhanced_weights.composite.physicochemical),
                ("prey", &mut enhanced_weights.composite.prey),
                ("topography", &mut enhanced_weights.composite.topography),
                ("anthropogenic", &mut enhanced_weights.composite.anthropogenic),
            ],
        );

        Self {
            species: species.to_string(),
            common_name: common_name.to_string(),
            preferences,
            legacy_weights,
            enhanced_weights,
        }
    }
}

/// Species keyed by their lowercase `snake_case` identifier, e.g.
/// `"tiger_shark"`. Built once at first access; profiles never mutate after.
pub static SHARK_PROFILES: Lazy<HashMap<String, SharkProfile>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "tiger_shark".to_string(),
        SharkProfile::new(
            "tiger_shark",
            "Tiger Shark",
            SpeciesPreferences {
                temp_optimal_min: 22.0,
                temp_optimal_max: 28.0,
                temp_tolerance: 4.0,
                salinity_min: 30.0,
                salinity_optimal_min: 33.0,
                salinity_optimal_max: 37.0,
                salinity_max: 40.0,
                oxygen_min: 3.0,
                oxygen_optimal: 5.5,
                oxygen_tolerance: 1.5,
                depth_min: -50.0,
                depth_optimal_min: 0.0,
                depth_optimal_max: 350.0,
                depth_max: 550.0,
                slope_optimal: 3.0,
                slope_tolerance: 8.0,
                c_lag_days: 21,
                t_lag_days: 5,
            },
            LegacyWeights {
                chlorophyll: 0.3,
                temperature: 0.4,
                sea_level_anomaly: 0.1,
                salinity: 0.2,
            },
            EnhancedWeights {
                physicochemical: PhysicochemicalWeights {
                    temperature: 0.5,
                    salinity: 0.3,
                    oxygen: 0.2,
                },
                prey: PreyWeights {
                    chlorophyll: 0.4,
                    pinnipeds: 0.05,
                    turtles: 0.2,
                    fish: 0.25,
                    cephalopods: 0.1,
                },
                ocean_features: OceanFeatureWeights { eddy: 0.25, front: 0.75 },
                topography: TopographyWeights {
                    depth: 0.6,
                    slope: 0.4,
                },
                composite: CompositeWeights {
                    physicochemical: 0.3,
                    prey: 0.3,
                    topography: 0.25,
                    anthropogenic: 0.15,
                },
            },
        ),
    );

    m.insert(
        "great_white_shark".to_string(),
        SharkProfile::new(
            "great_white_shark",
            "Great White Shark",
            SpeciesPreferences {
                temp_optimal_min: 14.0,
                temp_optimal_max: 22.0,
                temp_tolerance: 5.0,
                salinity_min: 29.0,
                salinity_optimal_min: 32.0,
                salinity_optimal_max: 36.0,
                salinity_max: 39.0,
                oxygen_min: 4.0,
                oxygen_optimal: 6.5,
                oxygen_tolerance: 1.5,
                depth_min: -100.0,
                depth_optimal_min: 0.0,
                depth_optimal_max: 250.0,
                depth_max: 1200.0,
                slope_optimal: 6.0,
                slope_tolerance: 10.0,
                c_lag_days: 30,
                t_lag_days: 7,
            },
            LegacyWeights {
                chlorophyll: 0.2,
                temperature: 0.45,
                sea_level_anomaly: 0.15,
                salinity: 0.2,
            },
            EnhancedWeights {
                physicochemical: PhysicochemicalWeights {
                    temperature: 0.55,
                    salinity: 0.25,
                    oxygen: 0.2,
                },
                prey: PreyWeights {
                    chlorophyll: 0.15,
                    pinnipeds: 0.5,
                    turtles: 0.05,
                    fish: 0.2,
                    cephalopods: 0.1,
                },
                ocean_features: OceanFeatureWeights { eddy: 0.2, front: 0.8 },
                topography: TopographyWeights {
                    depth: 0.5,
                    slope: 0.5,
                },
                composite: CompositeWeights {
                    physicochemical: 0.35,
                    prey: 0.3,
                    topography: 0.2,
                    anthropogenic: 0.15,
                },
            },
        ),
    );

    m.insert(
        "whale_shark".to_string(),
        SharkProfile::new(
            "whale_shark",
            "Whale Shark",
            SpeciesPreferences {
                temp_optimal_min: 23.0,
                temp_optimal_max: 30.0,
                temp_tolerance: 3.0,
                salinity_min: 31.0,
                salinity_optimal_min: 34.0,
                salinity_optimal_max: 37.5,
                salinity_max: 40.0,
                oxygen_min: 3.5,
                oxygen_optimal: 5.0,
                oxygen_tolerance: 1.5,
                depth_min: -20.0,
                depth_optimal_min: 0.0,
                depth_optimal_max: 200.0,
                depth_max: 1900.0,
                slope_optimal: 1.0,
                slope_tolerance: 5.0,
                c_lag_days: 7,
                t_lag_days: 3,
            },
            LegacyWeights {
                chlorophyll: 0.45,
                temperature: 0.3,
                sea_level_anomaly: 0.1,
                salinity: 0.15,
            },
            EnhancedWeights {
                physicochemical: PhysicochemicalWeights {
                    temperature: 0.45,
                    salinity: 0.3,
                    oxygen: 0.25,
                },
                prey: PreyWeights {
                    chlorophyll: 0.7,
                    pinnipeds: 0.0,
                    turtles: 0.05,
                    fish: 0.1,
                    cephalopods: 0.15,
                },
                ocean_features: OceanFeatureWeights { eddy: 0.1, front: 0.9 },
                topography: TopographyWeights {
                    depth: 0.7,
                    slope: 0.3,
                },
                composite: CompositeWeights {
                    physicochemical: 0.25,
                    prey: 0.4,
                    topography: 0.2,
                    anthropogenic: 0.15,
                },
            },
        ),
    );

    m
});

pub fn lookup(species: &str) -> Option<&'static SharkProfile> {
    SHARK_PROFILES.get(species)
}

pub fn known_species() -> Vec<&'static str> {
    SHARK_PROFILES.keys().map(String::as_str).collect()
}
