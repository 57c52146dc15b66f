//! Static registry describing the four ocean datasets —
//! short names, units, candidate variable names (a dataset's producer names
//! its primary variable differently release to release), and the
//! physically-plausible range each is clipped to after quality filtering.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Chlorophyll,
    SeaLevel,
    Sst,
    Salinity,
}

impl Dataset {
    pub fn short_name(&self) -> &'static str {
        match self {
            Dataset::Chlorophyll => "chlorophyll",
            Dataset::SeaLevel => "sea_level",
            Dataset::Sst => "sst",
            Dataset::Salinity => "salinity",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Dataset::Chlorophyll => "mg/m3",
            Dataset::SeaLevel => "m",
            Dataset::Sst => "C",
            Dataset::Salinity => "psu",
        }
    }

    /// Whether the dataset is treated as time-insensitive: salinity
    /// is always cached and looked up under the `"latest"` sentinel, and any
    /// requested date is coerced to a configured known-good date before
    /// searching upstream.
    pub fn is_time_insensitive(&self) -> bool {
        matches!(self, Dataset::Salinity)
    }

    /// Candidate variable names tried in order when a granule's primary
    /// variable is absent; falls back to the file's first data variable if
    /// none match.
    pub fn variable_candidates(&self) -> &'static [&'static str] {
        match self {
            Dataset::Chlorophyll => &["chlor_a", "CHL", "chlorophyll", "chlor_a_mean"],
            Dataset::SeaLevel => &[
                "ssha",
                "ssha_smoothed",
                "SLA",
                "sea_level_anomaly",
                "adt",
                "sla",
                "ssh_anomaly",
                "ssh",
            ],
            Dataset::Sst => &["analysed_sst", "sst", "sea_surface_temperature", "sst_mean"],
            Dataset::Salinity => &["sss", "salinity", "smap_sss", "sea_surface_salinity"],
        }
    }

    /// `(min, max)` physically-plausible range; values outside are dropped
    /// as if missing rather than clamped.
    pub fn plausible_range(&self) -> (f64, f64) {
        match self {
            Dataset::Chlorophyll => (0.0, f64::INFINITY),
            Dataset::SeaLevel => (-2.0, 2.0),
            Dataset::Sst => (-2.0, 35.0),
            Dataset::Salinity => (0.0, 40.0),
        }
    }

    pub fn source_description(&self) -> &'static str {
        match self {
            Dataset::Chlorophyll => "PACE OCI Level-3 Binned Mapped Chlorophyll-a",
            Dataset::SeaLevel => "NASA-SSH Simple Gridded SSH V1",
            Dataset::Sst => "MUR Level-4 Global Foundation Sea Surface Temperature",
            Dataset::Salinity => "SMAP Sea Surface Salinity",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "chlorophyll" => Some(Dataset::Chlorophyll),
            "sea_level" => Some(Dataset::SeaLevel),
            "sst" => Some(Dataset::Sst),
            "salinity" => Some(Dataset::Salinity),
            _ => None,
        }
    }

    pub fn all() -> &'static [Dataset] {
        &[
            Dataset::Chlorophyll,
            Dataset::SeaLevel,
            Dataset::Sst,
            Dataset::Salinity,
        ]
    }
}

/// Search-window widening ladder (in days) tried in order when an initial
/// granule search comes back empty — generalized from the sea-level-specific
/// ladder in the source pipeline to any widenable dataset.
pub const SEARCH_WIDENING_DAYS: [i64; 4] = [7, 14, 30, 60];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salinity_is_time_insensitive_others_are_not() {
        assert!(Dataset::Salinity.is_time_insensitive());
        assert!(!Dataset::Sst.is_time_insensitive());
        assert!(!Dataset::Chlorophyll.is_time_insensitive());
        assert!(!Dataset::SeaLevel.is_time_insensitive());
    }

    #[test]
    fn round_trips_through_short_name() {
        for d in Dataset::all() {
            assert_eq!(Dataset::from_short_name(d.short_name()), Some(*d));
        }
    }

    #[test]
    fn plausible_ranges_match_spec() {
        assert_eq!(Dataset::Sst.plausible_range(), (-2.0, 35.0));
        assert_eq!(Dataset::SeaLevel.plausible_range(), (-2.0, 2.0));
        assert_eq!(Dataset::Salinity.plausible_range(), (0.0, 40.0));
    }
}
