//! Tests for builder modules

use prometheus_thread_control::builders::{build_limiters, LimiterBuilder};
use prometheus_thread_control::config::{LimiterConfig, LimiterSetConfig};
use prometheus_thread_control::{Capacity, LimiterError};
use std::time::Duration;

#[test]
fn test_limiter_builder_defaults() {
    let builder = LimiterBuilder::new("pool1");
    assert_eq!(builder.name(), "pool1");
    assert_eq!(builder.capacity(), Capacity::Unbounded);

    let control = builder.build();
    assert_eq!(control.name(), "pool1");
    assert_eq!(control.join_timeout(), None);
}

#[test]
fn test_limiter_builder_fluent() {
    let control = LimiterBuilder::new("fetch")
        .max_threads(3)
        .wait_timeout(Duration::from_millis(250))
        .build();
    assert_eq!(control.capacity().limit(), Some(3));
    assert_eq!(control.join_timeout(), Some(Duration::from_millis(250)));
}

#[test]
fn test_limiter_builder_with_state() {
    let control = LimiterBuilder::new("acc")
        .max_threads(2)
        .build_with_state(Vec::<u32>::new());
    control.lock().push(7);
    assert_eq!(control.into_state(), vec![7]);
}

#[test]
fn test_limiter_builder_from_config() {
    let cfg = LimiterConfig {
        name: "render".to_string(),
        max_threads: 5,
        wait_timeout_ms: Some(100),
    };
    let builder = LimiterBuilder::from_config(&cfg).unwrap();
    assert_eq!(builder.name(), "render");
    assert_eq!(builder.capacity().limit(), Some(5));
}

#[test]
fn test_limiter_builder_rejects_invalid_config() {
    let cfg = LimiterConfig {
        name: String::new(),
        ..LimiterConfig::default()
    };
    let err = LimiterBuilder::from_config(&cfg).unwrap_err();
    assert!(matches!(err, LimiterError::InvalidConfig(_)));
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_limiter_builder_async() {
    let control = LimiterBuilder::new("async").max_threads(4).build_async();
    assert_eq!(control.name(), "async");
    assert_eq!(control.capacity().limit(), Some(4));
}

#[test]
fn test_build_limiters_from_set() {
    let set = LimiterSetConfig::from_json_str(
        r#"{
            "limiters": {
                "fetch": { "name": "fetch", "max_threads": 8 },
                "parse": { "name": "parse", "max_threads": -1 }
            }
        }"#,
    )
    .unwrap();

    let limiters = build_limiters(&set).unwrap();
    assert_eq!(limiters.len(), 2);
    assert_eq!(limiters["fetch"].capacity().limit(), Some(8));
    assert!(!limiters["parse"].capacity().is_bounded());
}

#[test]
fn test_build_limiters_rejects_empty_set() {
    let err = build_limiters(&LimiterSetConfig::default()).unwrap_err();
    assert!(matches!(err, LimiterError::InvalidConfig(_)));
}
