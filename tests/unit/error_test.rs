//! Tests for error types

use prometheus_thread_control::LimiterError;

#[test]
fn test_at_capacity_error() {
    let err = LimiterError::AtCapacity;
    assert_eq!(format!("{}", err), "limiter at capacity");
}

#[test]
fn test_timeout_error() {
    let err = LimiterError::Timeout;
    assert_eq!(format!("{}", err), "timed out waiting for limiter");
}

#[test]
fn test_overflow_error() {
    let err = LimiterError::Overflow;
    assert_eq!(format!("{}", err), "too many outstanding work units");
}

#[test]
fn test_unbalanced_error() {
    let err = LimiterError::Unbalanced;
    assert_eq!(format!("{}", err), "done called without a matching begin");
}

#[test]
fn test_invalid_config_error() {
    let err = LimiterError::InvalidConfig("name must not be empty".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: name must not be empty"
    );
}

#[test]
fn test_spawn_error_from_io() {
    let io = std::io::Error::other("no threads left");
    let err: LimiterError = io.into();
    assert!(matches!(err, LimiterError::Spawn(_)));
    assert_eq!(
        format!("{}", err),
        "failed to spawn worker thread: no threads left"
    );
}

#[test]
fn test_error_converts_into_app_result() {
    fn fails() -> prometheus_thread_control::AppResult<()> {
        Err(LimiterError::Timeout)?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<LimiterError>().is_some());
}
