//! Full sweeps of the simulated scope driven from configuration

use bode_sweep::config::BodeConfig;
use bode_sweep::data::{write_csv, write_json};
use bode_sweep::hardware::{DutModel, SimulatedScope};
use bode_sweep::sweep::{ResultSeries, SweepController, SweepSettings};
use bode_sweep::traits::Channel;
use std::path::Path;
use tempfile::tempdir;

fn repo_config() -> BodeConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/bode.toml");
    BodeConfig::load_from(path).unwrap()
}

#[test]
fn test_shipped_config_matches_defaults() {
    let config = repo_config();
    let settings = SweepSettings::from_config(&config).unwrap();
    let defaults = SweepSettings::from_config(&BodeConfig::default()).unwrap();

    assert_eq!(settings, defaults);
    assert_eq!(settings.plan.step_count(), 100);
    assert_eq!(settings.plan.start_hz(), 200_000.0);
    assert_eq!(settings.plan.stop_hz(), 2_000_000.0);
}

#[tokio::test]
async fn test_default_sweep_on_simulator() {
    let mut config = repo_config();
    config.acquisition.settle_ms = 0;
    let settings = SweepSettings::from_config(&config).unwrap();
    let mut scope = SimulatedScope::default().with_scales(
        config.acquisition.response_scale,
        config.acquisition.reference_scale,
    );
    let dut = scope.dut();

    let series = SweepController::new(&mut scope, settings.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(series.len(), 100);
    assert_eq!(series.frequencies(), settings.plan.frequencies());
    assert_eq!(series.carried_count(), 0);
    for point in &series {
        assert!((point.amplitude_db - dut.gain_db(point.frequency_hz)).abs() < 1e-9);
        assert!((point.phase_deg - dut.phase_deg(point.frequency_hz)).abs() < 1e-9);
    }
    // Response shrank with the roll-off; the reference never needed a change
    assert!(scope.scale(Channel::Response) < config.acquisition.response_scale);
    assert_eq!(scope.scale(Channel::Reference), config.acquisition.reference_scale);
}

#[tokio::test]
async fn test_deep_rolloff_reaches_scale_floor() {
    // 40 dB below the stimulus by the end of the sweep
    let mut config = BodeConfig::default();
    config.acquisition.settle_ms = 0;
    config.sweep.start_hz = 1_000.0;
    config.sweep.stop_hz = 1_000_000.0;
    config.sweep.steps = 31;
    config.sweep.spacing = bode_sweep::sweep::Spacing::Logarithmic;
    let settings = SweepSettings::from_config(&config).unwrap();
    let mut scope = SimulatedScope::new(DutModel::low_pass(0.01, 10_000.0));

    let series = SweepController::new(&mut scope, settings)
        .run()
        .await
        .unwrap();

    assert_eq!(series.len(), 31);
    assert_eq!(scope.scale(Channel::Response), 0.001);
    let last = series.last().unwrap();
    assert!(last.is_fully_measured());
    assert!(last.amplitude_db < -80.0);
}

async fn short_series() -> ResultSeries {
    let mut config = BodeConfig::default();
    config.acquisition.settle_ms = 0;
    config.sweep.steps = 12;
    let settings = SweepSettings::from_config(&config).unwrap();
    let mut scope = SimulatedScope::default();
    SweepController::new(&mut scope, settings)
        .run()
        .await
        .unwrap()
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn test_export_csv() {
    let series = short_series().await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("sweep.csv");

    write_csv(&series, &path).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 12);
    let first: f64 = rows[0][0].parse().unwrap();
    assert_eq!(first, 200_000.0);
    assert_eq!(&rows[11][3], "false");
}

#[tokio::test]
async fn test_export_json() {
    let series = short_series().await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("sweep.json");

    write_json(&series, &path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["points"].as_array().map(Vec::len), Some(12));
    assert!(value["finished_at"].is_string());
}
