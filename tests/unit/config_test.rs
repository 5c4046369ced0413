//! Tests for configuration validation

use prometheus_thread_control::config::{LimiterConfig, LimiterSetConfig};
use prometheus_thread_control::Capacity;
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_limiter_config_validation() {
    let valid = LimiterConfig {
        name: "fetch".to_string(),
        max_threads: 8,
        wait_timeout_ms: Some(500),
    };
    assert!(valid.validate().is_ok());
    assert_eq!(valid.capacity().limit(), Some(8));
    assert_eq!(valid.wait_timeout(), Some(Duration::from_millis(500)));
}

#[test]
fn test_limiter_config_invalid_name() {
    let invalid = LimiterConfig {
        name: "  ".to_string(),
        max_threads: 8,
        wait_timeout_ms: None,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_limiter_config_invalid_timeout() {
    let invalid = LimiterConfig {
        name: "fetch".to_string(),
        max_threads: 8,
        wait_timeout_ms: Some(0),
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_limiter_config_nonpositive_is_unbounded() {
    for max_threads in [0, -1, i64::MIN] {
        let cfg = LimiterConfig {
            max_threads,
            ..LimiterConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity(), Capacity::Unbounded);
    }
}

#[test]
fn test_limiter_config_per_cpu() {
    let cfg = LimiterConfig::per_cpu("cpu");
    assert_eq!(cfg.name, "cpu");
    assert_eq!(cfg.capacity(), Capacity::per_cpu());
}

#[test]
fn test_limiter_set_config_validation() {
    let mut limiters = HashMap::new();
    limiters.insert(
        "fetch".to_string(),
        LimiterConfig {
            name: "fetch".to_string(),
            max_threads: 4,
            wait_timeout_ms: None,
        },
    );
    let set = LimiterSetConfig { limiters };
    assert!(set.validate().is_ok());
}

#[test]
fn test_limiter_set_config_empty() {
    let set = LimiterSetConfig::default();
    assert!(set.validate().is_err());
}

#[test]
fn test_limiter_set_config_names_bad_entry() {
    let err = LimiterSetConfig::from_json_str(
        r#"{ "limiters": { "parse": { "name": "parse", "wait_timeout_ms": 0 } } }"#,
    )
    .unwrap_err();
    assert!(err.contains("parse"));
}

#[test]
fn test_limiter_set_config_from_json_defaults() {
    let set = LimiterSetConfig::from_json_str(r#"{ "limiters": { "io": {} } }"#).unwrap();
    let io = &set.limiters["io"];
    assert_eq!(io.name, "default");
    assert_eq!(io.max_threads, 0);
    assert_eq!(io.wait_timeout_ms, None);
}

#[test]
fn test_limiter_set_config_rejects_malformed_json() {
    let err = LimiterSetConfig::from_json_str("{ limiters: ").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_limiter_set_config_from_path() {
    let path = std::env::temp_dir().join(format!(
        "thread-control-config-{}.json",
        std::process::id()
    ));
    std::fs::write(
        &path,
        r#"{ "limiters": { "render": { "name": "render", "max_threads": 2 } } }"#,
    )
    .unwrap();

    let set = LimiterSetConfig::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(set.limiters["render"].capacity().limit(), Some(2));
}
