//! Integration test for `RuntimeConfig` environment-variable resolution
//! (spec §9, "configurable thresholds").

use std::time::Duration;

use wesley::config::RuntimeConfig;

/// All env vars are read inside one test to avoid cross-test races over
/// shared process environment state.
#[test]
fn env_overrides_are_applied_and_unset_vars_fall_back_to_defaults() {
    unsafe {
        std::env::set_var("WESLEY_MAX_CONCURRENCY", "16");
        std::env::set_var("WESLEY_LOCK_TIMEOUT_SECS", "9");
        std::env::remove_var("WESLEY_RETRY_BUDGET");
    }

    let config = RuntimeConfig::default();
    assert_eq!(config.max_concurrency, 16);
    assert_eq!(config.transaction_timeouts.lock_timeout, Duration::from_secs(9));
    assert_eq!(config.retry_budget, wesley::error::backoff::DEFAULT_RETRY_BUDGET);

    unsafe {
        std::env::remove_var("WESLEY_MAX_CONCURRENCY");
        std::env::remove_var("WESLEY_LOCK_TIMEOUT_SECS");
    }
}

#[test]
fn with_database_url_overrides_env_resolution() {
    let config = RuntimeConfig::default().with_database_url("postgres://test/db");
    assert_eq!(config.database_url.as_deref(), Some("postgres://test/db"));
}
