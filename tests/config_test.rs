//! Configuration loading from files and the environment.

use rust_scan::config::ScanEngineConfig;
use rust_scan::error::ScanError;
use rust_scan::scan::ScanPattern;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_merges_with_defaults() {
    let file = write_config(
        r#"
[motion]
move_timeout = "250ms"

[continuous]
sample_rate_hz = 50.0
max_duration = "1m"

[scan]
x_max = 20.0
x_nb_points = 3
y_nb_points = 2
pattern = "COMB"
"#,
    );

    let config = ScanEngineConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.motion.move_timeout, Duration::from_millis(250));
    assert_eq!(config.motion.small_distance_threshold_mm, 5.0);
    assert_eq!(config.acquisition.max_uncertainty_attempts, 3);

    let continuous = config.continuous_config().unwrap();
    assert_eq!(continuous.sample_rate_hz(), 50.0);
    assert_eq!(continuous.max_duration(), Some(Duration::from_secs(60)));

    let scan = config.scan.to_domain().unwrap();
    assert_eq!(scan.pattern(), ScanPattern::Comb);
    assert_eq!(scan.total_points(), 6);
    assert_eq!(scan.zone().x_max(), 20.0);
}

#[test]
fn test_invalid_motion_profile_is_rejected_on_load() {
    let file = write_config(
        r#"
[motion.slow_profile]
min_speed = 5.0
target_speed = 1.0
acceleration = 0.5
deceleration = 0.5
"#,
    );

    let err = ScanEngineConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ScanError::Config(_)));
}

#[test]
fn test_semantic_errors_fail_validation() {
    let file = write_config(
        r#"
[scan]
x_nb_points = 0
"#,
    );

    let config = ScanEngineConfig::load_from(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ScanError::Configuration(_))
    ));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[application]
name = "from-file"
"#,
    );
    std::env::set_var("RUST_SCAN_APPLICATION__NAME", "from-env");

    let config = ScanEngineConfig::load_from(file.path()).unwrap();
    std::env::remove_var("RUST_SCAN_APPLICATION__NAME");

    assert_eq!(config.application.name, "from-env");
}

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/scan.toml");
    let config = ScanEngineConfig::load_from(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.scan.to_domain().unwrap().total_points(), 25);
}
