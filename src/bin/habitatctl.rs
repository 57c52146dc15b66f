//! `habitatctl` — command-line surface over [`lapy_habitat::PipelineOrchestrator`].
//!
//! Subcommands mirror the external adapter described for the pipeline:
//! `hotspots` and `overlay` run the model, `species`/`datasets` list the
//! static registries, and `cache` drives maintenance. All tracing-subscriber
//! setup lives here, never in the library.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lapy_habitat::config::PipelineConfig;
use lapy_habitat::grid::GeoBounds;
use lapy_habitat::hsi_engine::HsiMode;
use lapy_habitat::orchestrator::{HotspotRequest, HotspotResponse, OutputKind, OverlayKind};
use lapy_habitat::{PipelineError, PipelineOrchestrator};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "habitatctl",
    about = "Score and serve shark habitat-suitability hotspots from satellite ocean data."
)]
struct Cli {
    /// Directory for the on-disk raw-dataset and GeoJSON caches.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a habitat-suitability surface for one species and date.
    Hotspots {
        #[arg(long)]
        species: String,
        /// Target date, YYYY-MM-DD.
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
        #[arg(long, value_enum, default_value = "geojson")]
        output: OutputArg,
        #[arg(long, value_enum, default_value = "enhanced")]
        mode: ModeArg,
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<GeoBounds>,
    },
    /// Fetch and encode a single dataset overlay without running the HSI engine.
    Overlay {
        #[arg(long, value_enum)]
        kind: OverlayArg,
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
        #[arg(long, default_value_t = 4)]
        density_factor: usize,
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<GeoBounds>,
    },
    /// List the registered shark species profiles.
    Species,
    /// List the ocean datasets the pipeline draws on.
    Datasets,
    /// Report whether each dataset is reachable for a given date.
    Availability {
        #[arg(long)]
        date: String,
    },
    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Sweep expired GeoJSON cache entries.
    Maintenance,
    /// Report GeoJSON cache entry count and on-disk size.
    Stats,
    /// Drop every cached GeoJSON response.
    Clear,
    /// Drop one cached hotspots response.
    Invalidate {
        #[arg(long)]
        species: String,
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
        #[arg(long, value_parser = parse_bounds)]
        bounds: Option<GeoBounds>,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputArg {
    Geojson,
    Raw,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Legacy,
    Enhanced,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OverlayArg {
    Chlorophyll,
    Oceanographic,
    Salinity,
}

fn parse_bounds(raw: &str) -> Result<GeoBounds, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    let [north, south, east, west] = parts.as_slice() else {
        return Err("expected north,south,east,west".to_string());
    };
    Ok(GeoBounds {
        north: north.trim().parse().map_err(|_| "bad north".to_string())?,
        south: south.trim().parse().map_err(|_| "bad south".to_string())?,
        east: east.trim().parse().map_err(|_| "bad east".to_string())?,
        west: west.trim().parse().map_err(|_| "bad west".to_string())?,
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PipelineError::InvalidInput(format!("bad date {raw:?}: {e}")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    let orchestrator = PipelineOrchestrator::new(&config)?;

    match cli.command {
        Command::Hotspots { species, date, threshold, output, mode, bounds } => {
            let request = HotspotRequest {
                target_date: parse_date(&date)?,
                species,
                bounds,
                threshold,
                output: match output {
                    OutputArg::Geojson => OutputKind::GeoJson,
                    OutputArg::Raw => OutputKind::Raw,
                },
                mode: match mode {
                    ModeArg::Legacy => HsiMode::Legacy,
                    ModeArg::Enhanced => HsiMode::Enhanced,
                },
            };
            match orchestrator.get_hotspots(request).await? {
                HotspotResponse::GeoJson(resp) => {
                    let body = serde_json::json!({
                        "type": "FeatureCollection",
                        "features": resp.features,
                        "metadata": resp.metadata,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                HotspotResponse::Raw(resp) => {
                    let body = serde_json::json!({
                        "statistics": resp.metadata.statistics,
                        "metadata": resp.metadata,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
            }
        }
        Command::Overlay { kind, date, threshold, density_factor, bounds } => {
            let kind = match kind {
                OverlayArg::Chlorophyll => OverlayKind::Chlorophyll,
                OverlayArg::Oceanographic => OverlayKind::Oceanographic,
                OverlayArg::Salinity => OverlayKind::Salinity,
            };
            let features = orchestrator
                .get_overlay(kind, parse_date(&date)?, bounds, threshold, density_factor)
                .await?;
            let body = serde_json::json!({ "type": "FeatureCollection", "features": features });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Species => {
            let profiles = orchestrator.get_species_profiles();
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }
        Command::Datasets => {
            for dataset in orchestrator.get_dataset_info() {
                println!("{}\t{}\t{}", dataset.short_name(), dataset.units(), dataset.source_description());
            }
        }
        Command::Availability { date } => {
            let availability = orchestrator.check_availability(parse_date(&date)?).await;
            println!("{}", serde_json::to_string_pretty(&availability)?);
        }
        Command::Cache { action } => match action {
            CacheAction::Maintenance => {
                let removed = orchestrator.cache_maintenance().await?;
                println!("removed {removed} expired cache entries");
            }
            CacheAction::Stats => {
                let stats = orchestrator.cache_stats()?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            CacheAction::Clear => {
                let removed = orchestrator.cache_clear()?;
                println!("cleared {removed} cache entries");
            }
            CacheAction::Invalidate { species, date, threshold, bounds } => {
                let removed = orchestrator.invalidate_hotspots(&species, parse_date(&date)?, bounds, threshold)?;
                println!("invalidated: {removed}");
            }
        },
    }

    Ok(())
}
