//! Orchestrator-level behavior that doesn't require reaching any external
//! service: species/dataset registries, cache maintenance, and request
//! validation.

use chrono::NaiveDate;
use lapy_habitat::config::PipelineConfig;
use lapy_habitat::{HotspotRequest, OutputKind, OverlayKind, PipelineOrchestrator};
use lapy_habitat::hsi_engine::HsiMode;

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.cache_dir = tempfile::tempdir().unwrap().into_path();
    config
}

#[test]
fn species_and_dataset_registries_are_populated() {
    let orchestrator = PipelineOrchestrator::new(&test_config()).unwrap();

    let species: Vec<_> = orchestrator.get_species_profiles().iter().map(|p| p.species.clone()).collect();
    assert!(species.contains(&"tiger_shark".to_string()));
    assert!(species.contains(&"great_white_shark".to_string()));
    assert!(species.contains(&"whale_shark".to_string()));

    assert_eq!(orchestrator.get_dataset_info().len(), 4);
}

#[test]
fn cache_stats_starts_empty_and_reflects_writes() {
    let orchestrator = PipelineOrchestrator::new(&test_config()).unwrap();
    let stats = orchestrator.cache_stats().unwrap();
    assert_eq!(stats.entry_count, 0);
}

#[tokio::test]
async fn cache_maintenance_on_empty_cache_removes_nothing() {
    let orchestrator = PipelineOrchestrator::new(&test_config()).unwrap();
    let removed = orchestrator.cache_maintenance().await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn unknown_species_request_is_rejected_without_touching_any_provider() {
    let orchestrator = PipelineOrchestrator::new(&test_config()).unwrap();
    let request = HotspotRequest {
        target_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        species: "megalodon".to_string(),
        bounds: None,
        threshold: 0.0,
        output: OutputKind::GeoJson,
        mode: HsiMode::Enhanced,
    };
    assert!(orchestrator.get_hotspots(request).await.is_err());
}

#[test]
fn invalidate_hotspots_on_empty_cache_reports_nothing_removed() {
    let orchestrator = PipelineOrchestrator::new(&test_config()).unwrap();
    let removed = orchestrator
        .invalidate_hotspots("tiger_shark", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), None, 0.0)
        .unwrap();
    assert!(!removed);

    let removed = orchestrator
        .invalidate_overlay(OverlayKind::Chlorophyll, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), None, 0.0, 4)
        .unwrap();
    assert!(!removed);
}
