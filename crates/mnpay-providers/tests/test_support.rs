//! Shared helpers for provider integration tests

#![allow(dead_code)]

use mnpay_core::ClientConfig;

/// Config pointing at a mock server with a 10 ms backoff unit
pub fn fast_config(endpoint: &str) -> ClientConfig {
    ClientConfig::new(endpoint)
        .with_timeout_ms(2_000)
        .with_retry_delay_ms(10)
}

/// Epoch seconds `offset` from now, for absolute-expiry token bodies
pub fn epoch_in(offset_secs: i64) -> i64 {
    chrono::Utc::now().timestamp() + offset_secs
}
