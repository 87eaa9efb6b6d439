//! Config Validation Tests
//!
//! Loads TOML files from disk through `AppConfig::load_from_file` and checks
//! the hard-error and warning layers independently.

use std::io::Write;

use stormslide::config::validation::{suspicious_values, validate_unknown_keys};
use stormslide::config::{AppConfig, ConfigError, Level2FailurePolicy};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn full_config_loads_from_file() {
    let file = write_config(
        r#"
[server]
addr = "127.0.0.1:5050"
prefetch_interval_secs = 300

[level2]
site = "KFWS"
lookback_days = 2
fixed_date = "2020/05/03"
data_dir = "/var/lib/stormslide"

[level3]
location = "KTLX"
limit = 25

[scan]
storm_motion_ms = 12.5
shear_threshold_ms = 35.0

[cache]
ttl_secs = 300
failure_ttl_secs = 30

[retry]
max_attempts = 5
retry_statuses = [500, 503]

[aggregator]
level2_failure = "fail"
"#,
    );

    let config = AppConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.server.addr, "127.0.0.1:5050");
    assert_eq!(config.level2.site, "KFWS");
    assert_eq!(config.level2.data_dir.to_str(), Some("/var/lib/stormslide"));
    assert_eq!(config.level3.limit, 25);
    assert_eq!(config.scan.storm_motion_ms, 12.5);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.retry.retry_statuses, vec![500, 503]);
    assert_eq!(config.aggregator.level2_failure, Level2FailurePolicy::Fail);
    // Untouched keys keep their defaults
    assert_eq!(config.cache.cooldown_secs, 10);
    assert_eq!(config.level3.query, "tvs:1,mda:1");
}

#[test]
fn invalid_values_are_rejected_with_every_problem() {
    let file = write_config(
        r#"
[scan]
shear_threshold_ms = 70.0
tvs_shear_threshold_ms = 60.0
max_sweeps = 0

[cache]
ttl_secs = 30
failure_ttl_secs = 60

[level3]
limit = 0
"#,
    );

    match AppConfig::load_from_file(file.path()) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 4, "{errors:?}");
            let text = errors.join("\n");
            assert!(text.contains("tvs_shear_threshold_ms"));
            assert!(text.contains("max_sweeps"));
            assert!(text.contains("failure_ttl_secs"));
            assert!(text.contains("level3.limit"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn unbounded_ttl_is_rejected() {
    let file = write_config("[cache]\nttl_secs = 9223372036854775807\nfailure_ttl_secs = 60\n");
    match AppConfig::load_from_file(file.path()) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 1, "{errors:?}");
            assert!(errors[0].contains("cache.ttl_secs"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("[scan\nshear_threshold_ms = ");
    assert!(matches!(
        AppConfig::load_from_file(file.path()),
        Err(ConfigError::Parse(..))
    ));
}

#[test]
fn unknown_policy_is_a_parse_error() {
    let file = write_config("[aggregator]\nlevel2_failure = \"ignore\"\n");
    assert!(matches!(
        AppConfig::load_from_file(file.path()),
        Err(ConfigError::Parse(..))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn typo_warns_but_still_loads() {
    let raw = "[cache]\nttl_sec = 120\n";
    let warnings = validate_unknown_keys(raw);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("cache.ttl_secs"));

    // The misspelt key is ignored, so the default TTL stands.
    let file = write_config(raw);
    let config = AppConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.cache.ttl_secs, 600);
}

#[test]
fn credentials_are_not_config_keys() {
    let warnings = validate_unknown_keys("[level3]\nclient_secret = \"abc\"\n");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "level3.client_secret");
}

#[test]
fn suspicious_values_warn_without_failing() {
    let file = write_config("[cache]\nttl_secs = 60\ncooldown_secs = 60\nfailure_ttl_secs = 0\n");
    let config = AppConfig::load_from_file(file.path()).unwrap();
    let fields: Vec<String> = suspicious_values(&config).into_iter().map(|w| w.field).collect();
    assert!(fields.contains(&"cache.cooldown_secs".to_string()));
    assert!(fields.contains(&"cache.failure_ttl_secs".to_string()));
}

#[test]
fn saved_config_round_trips_through_a_file() {
    let mut config = AppConfig::default();
    config.level2.fixed_date = Some("2020/05/03".to_string());
    let file = write_config(&config.to_toml().unwrap());

    let loaded = AppConfig::load_from_file(file.path()).unwrap();
    assert_eq!(loaded.scan, config.scan);
    assert_eq!(loaded.level2.fixed_date.as_deref(), Some("2020/05/03"));
    assert!(validate_unknown_keys(&config.to_toml().unwrap()).is_empty());
}
