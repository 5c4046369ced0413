//! Tests for utility functions

use prometheus_thread_control::util::{init_tracing, DEFAULT_FILTER};

#[test]
fn test_default_filter_targets_crate() {
    assert!(DEFAULT_FILTER.starts_with("prometheus_thread_control"));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
