use super::*;
use serde_json::json;

#[test]
fn test_defaults_are_valid() {
    let settings = Settings::default();
    assert_eq!(settings.validate(), Ok(()));
    assert_eq!(settings.buffer.flush_threshold, 20);
    assert_eq!(settings.buffer.flush_interval_secs, 300);
    assert!(settings.buffer.async_flush);
    assert_eq!(settings.restoration.token_budget, 4000);
    assert_eq!(settings.restoration.decision_limit, 10);
    assert_eq!(settings.restoration.medium_decisions_limit, 5);
    assert_eq!(settings.storage.db_path, None);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_get_leaf_and_section() {
    let settings = Settings::default();
    assert_eq!(settings.get("buffer.flush_threshold"), Ok(json!(20)));
    assert_eq!(settings.get("storage.db_path"), Ok(serde_json::Value::Null));

    let section = settings.get("restoration").unwrap();
    assert_eq!(section["learnings_limit"], json!(10));
}

#[test]
fn test_get_unknown_key() {
    let settings = Settings::default();
    assert_eq!(
        settings.get("buffer.nope"),
        Err(ConfigError::UnknownKey("buffer.nope".into()))
    );
    assert!(settings.get("buffer.flush_threshold.deeper").is_err());
}

#[test]
fn test_set_numeric_bool_and_string() {
    let mut settings = Settings::default();
    settings.set("buffer.flush_threshold", "50").unwrap();
    settings.set("buffer.async_flush", "false").unwrap();
    settings.set("logging.level", "debug").unwrap();
    settings.set("storage.db_path", "/var/lib/ctx.db").unwrap();

    assert_eq!(settings.buffer.flush_threshold, 50);
    assert!(!settings.buffer.async_flush);
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.storage.db_path, Some(PathBuf::from("/var/lib/ctx.db")));

    settings.set("storage.db_path", "null").unwrap();
    assert_eq!(settings.storage.db_path, None);
}

#[test]
fn test_set_zero_on_positive_field_fails_and_keeps_value() {
    let mut settings = Settings::default();
    let err = settings.set("buffer.flush_threshold", "0").unwrap_err();
    assert!(matches!(err, ConfigError::OutOfRange { ref key, .. } if key == "buffer.flush_threshold"));
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_set_negative_rejected_by_type() {
    let mut settings = Settings::default();
    let err = settings.set("restoration.token_budget", "-5").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert_eq!(settings.restoration.token_budget, 4000);
}

#[test]
fn test_set_percent_range() {
    let mut settings = Settings::default();
    settings
        .set("restoration.context_threshold_percent", "0")
        .unwrap();
    settings
        .set("restoration.context_threshold_percent", "100")
        .unwrap();
    let err = settings
        .set("restoration.context_threshold_percent", "150")
        .unwrap_err();
    assert!(matches!(err, ConfigError::OutOfRange { .. }));
    assert_eq!(settings.restoration.context_threshold_percent, 100);
}

#[test]
fn test_tier_limits_may_be_zero() {
    let mut settings = Settings::default();
    settings.set("restoration.learnings_limit", "0").unwrap();
    settings.set("restoration.file_edits_limit", "0").unwrap();
    assert_eq!(settings.restoration.learnings_limit, 0);
}

#[test]
fn test_set_wrong_type_and_unknown_key() {
    let mut settings = Settings::default();
    assert!(matches!(
        settings.set("buffer.async_flush", "sometimes"),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert_eq!(
        settings.set("buffer.missing", "1"),
        Err(ConfigError::UnknownKey("buffer.missing".into()))
    );
    assert_eq!(
        settings.set("buffer", "1"),
        Err(ConfigError::NotALeaf("buffer".into()))
    );
}

#[test]
fn test_set_bad_log_level() {
    let mut settings = Settings::default();
    assert!(settings.set("logging.level", "loud").is_err());
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_keys_lists_every_leaf() {
    let keys = Settings::default().keys();
    assert!(keys.contains(&"buffer.flush_threshold".to_string()));
    assert!(keys.contains(&"restoration.medium_decisions_limit".to_string()));
    assert!(keys.contains(&"storage.db_path".to_string()));
    assert!(!keys.contains(&"buffer".to_string()));
}

#[test]
fn test_load_missing_file_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let mut settings = Settings::default();
    settings.set("restoration.decision_limit", "3").unwrap();
    settings.save(&path).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded, settings);
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"buffer": {"flush_threshold": 5}}"#).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded.buffer.flush_threshold, 5);
    assert_eq!(loaded.buffer.flush_interval_secs, 300);
    assert_eq!(loaded.restoration, RestorationSettings::default());
}

#[test]
fn test_load_malformed_or_invalid_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load(&path).is_err());

    std::fs::write(&path, r#"{"storage": {"search_limit": 0}}"#).unwrap();
    assert!(Settings::load(&path).is_err());
}
