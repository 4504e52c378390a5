//! Integration tests for logging setup
//!
//! A global subscriber can only be installed once per process, so this file
//! holds a single test that exercises both the first and the repeated call.

use bridge_traits::time::LogLevel;
use core_runtime::error::CoreError;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use tracing::info;

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_redaction(true);

    init_logging(config.clone()).unwrap();
    info!(cookie = "_yuque_session=abc", doc_id = 7, "Logging is up");

    let again = init_logging(config);
    assert!(matches!(again, Err(CoreError::Logging(_))));
}
