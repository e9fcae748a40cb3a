//! Unit tests for the config module

use channel_warehouse::config::AppConfig;

#[test]
fn test_default_config_values() {
    let config = AppConfig::default();

    assert_eq!(config.source.fetch_limit, 100);
    assert_eq!(config.source.max_concurrent_channels, 4);
    assert!(config.source.channels.is_empty());
    assert_eq!(config.lake.root, "data");
    assert_eq!(config.warehouse.database_path, "data/warehouse.db");
    assert_eq!(config.warehouse.max_connections, 8);
    assert_eq!(config.pipeline.schedule_interval_secs, 86_400);
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.directory, None);
}

#[test]
fn test_config_validation_success() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_zero_fetch_limit() {
    let mut config = AppConfig::default();
    config.source.fetch_limit = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_zero_max_connections() {
    let mut config = AppConfig::default();
    config.warehouse.max_connections = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "invalid".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_valid_log_levels() {
    for level in ["trace", "debug", "info", "warn", "error"] {
        let mut config = AppConfig::default();
        config.logging.level = level.to_string();
        assert!(config.validate().is_ok(), "Failed for level: {level}");
    }
}

#[test]
fn test_config_validation_threshold_bounds() {
    let mut config = AppConfig::default();
    config.detection.confidence_threshold = 1.5;
    assert!(config.validate().is_err());

    config.detection.confidence_threshold = -0.1;
    assert!(config.validate().is_err());

    config.detection.confidence_threshold = 0.0;
    assert!(config.validate().is_ok());

    config.detection.confidence_threshold = 1.0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_rejects_bad_channel_names() {
    let mut config = AppConfig::default();
    config.source.channels = vec!["valid_channel".to_string(), "../escape".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_accepts_channel_list() {
    let mut config = AppConfig::default();
    config.source.channels = vec![
        "CheMed123".to_string(),
        "lobelia4cosmetics".to_string(),
        "tikvahpharma".to_string(),
    ];
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_zero_schedule_interval() {
    let mut config = AppConfig::default();
    config.pipeline.schedule_interval_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_empty_gateway_url() {
    let mut config = AppConfig::default();
    config.source.gateway_url = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_clone() {
    let config = AppConfig::default();
    let cloned = config.clone();
    assert_eq!(config.lake.root, cloned.lake.root);
    assert_eq!(config.logging.level, cloned.logging.level);
}
