use log_sender::config::{generate::generate_starter_config, load_config, ConfigError};
use log_sender::export::RunOptions;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.export.batch_size, 50);
    assert_eq!(config.export.max_batches_per_run, 20);
    assert_eq!(config.export.interval, Duration::from_secs(300));
    assert_eq!(config.export.lock.ttl, Duration::from_secs(900));
    assert_eq!(config.platform.lang, "en");
    assert!(config.platform.site_url.is_none());
    assert!(!config.storage.path.starts_with("~"));
}

#[test]
fn test_run_options_follow_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(
        &config_path,
        r#"
storage:
  path: /tmp/log-sender-test.duckdb
platform:
  site_url: https://lms.example.org
  lang: de
export:
  batch_size: 25
  max_batches_per_run: 4
  lock:
    ttl: 5m
    wait: 1s
shipper:
  timeout: 10s
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let options = RunOptions::from(&config);

    assert_eq!(options.batch_size, 25);
    assert_eq!(options.max_batches_per_run, 4);
    assert_eq!(options.lock_ttl, Duration::from_secs(300));
    assert_eq!(options.lock_wait, Duration::from_secs(1));
    assert_eq!(options.lang, "de");
}

#[test]
fn test_missing_storage_section() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "export:\n  batch_size: 10\n").unwrap();

    let err = load_config(&config_path).unwrap_err();
    let err_msg = err.to_string();
    assert!(
        err_msg.contains("storage"),
        "Error should mention the missing section: {}",
        err_msg
    );
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert!(err.to_string().contains("absent.yml"));
}
