use std::path::PathBuf;
use std::time::Duration;

use playpen::config::{Config, ConfigError, EXAMPLE_CONFIG};

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_full.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.max_input_size, 2000);
    assert_eq!(config.timeout(), Duration::from_millis(1500));
    assert_eq!(config.base_path, PathBuf::from("/srv/playpen/runtime"));
    assert_eq!(config.manifest_name, "lang.toml");
    assert_eq!(
        config.worker_path,
        Some(PathBuf::from("/usr/local/bin/playpen-worker"))
    );
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_minimal.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.timeout_ms, 500);
    assert_eq!(config.max_input_size, 10_000);
    assert_eq!(config.base_path, PathBuf::from("runtime"));
}

#[test]
fn test_load_invalid_zero_timeout() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_timeout.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_zero_input_size() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_input_size.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_manifest_path() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_manifest_path.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_syntax() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_syntax.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file("/nonexistent/playpen.toml");
    assert!(result.is_err());
}

#[test]
fn test_example_config_matches_default() {
    let config = Config::parse_toml(EXAMPLE_CONFIG).expect("Failed to parse example");
    let default = Config::default();
    assert_eq!(config.max_input_size, default.max_input_size);
    assert_eq!(config.timeout_ms, default.timeout_ms);
    assert_eq!(config.manifest_name, default.manifest_name);
}
