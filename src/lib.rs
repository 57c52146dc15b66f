//! Shark habitat suitability pipeline: regrids ocean and anthropogenic-
//! pressure datasets onto a common lattice, scores per-cell habitat
//! suitability for a given species, and serves the result as GeoJSON or as
//! raw gridded arrays.
//!
//! [`orchestrator::PipelineOrchestrator`] is the entry point; everything
//! else is a component it wires together (grid/regridding, caching,
//! providers, suitability functions, the HSI engine, and the GeoJSON
//! encoder).

pub mod config;
pub mod datasets;
pub mod error;
pub mod field;
pub mod geojson_cache;
pub mod geojson_encoder;
pub mod grid;
pub mod hsi_engine;
pub mod ocean_provider;
pub mod orchestrator;
pub mod pressure_provider;
pub mod profiles;
pub mod raw_cache;
pub mod suitability;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{
    AvailabilityReport, HotspotRequest, HotspotResponse, OutputKind, OverlayKind, PipelineOrchestrator,
};
