//! Runtime configuration (spec.md §6).
//!
//! Everything here is env-var driven with documented defaults, in the
//! same `env::var(...).unwrap_or_else(...)` idiom the backend used for
//! its own startup configuration. Load-bearing algorithm constants
//! (decade bounds, stencil shape, confidence ramp, ...) live in
//! [`crate::oracle::constants`] instead — spec.md §6 is explicit that
//! nothing beyond what's listed here is meant to be tunable.

use std::env;
use std::time::Duration;

use crate::oracle::constants::{
    DEFAULT_BASELINE_WINDOW_BLOCKS, DEFAULT_FALLBACK_SEED_PRICE, DEFAULT_LIVE_WINDOW_SECS,
    DEFAULT_MATERIAL_CHANGE_RATIO, DEFAULT_PUBLISH_MIN_INTERVAL_MS, WITNESS_BYTES_MAX_DEFAULT,
};
use crate::oracle::source::SourceConfig;

/// The process-wide, env-loaded knobs spec.md §6 enumerates.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub zmq_rawtx_endpoint: String,
    pub zmq_rawblock_endpoint: String,
    pub source_channel_capacity: usize,

    pub witness_bytes_max: usize,

    pub live_window_secs: i64,
    pub baseline_window_blocks: u64,

    pub publish_min_interval: Duration,
    pub material_change_ratio: f64,

    /// Price assumed before the baseline estimator has produced its
    /// first meaningful estimate (spec.md §6: "the only externally
    /// configured number with semantic meaning").
    pub fallback_seed_price: f64,

    pub http_bind_addr: String,
}

impl OracleConfig {
    pub fn from_env() -> Self {
        Self {
            zmq_rawtx_endpoint: env_string("UTXORACLE_ZMQ_RAWTX", "tcp://127.0.0.1:28332"),
            zmq_rawblock_endpoint: env_string("UTXORACLE_ZMQ_RAWBLOCK", "tcp://127.0.0.1:28332"),
            source_channel_capacity: env_parsed("UTXORACLE_SOURCE_CHANNEL_CAPACITY", 4_096),

            witness_bytes_max: env_parsed("UTXORACLE_WITNESS_BYTES_MAX", WITNESS_BYTES_MAX_DEFAULT),

            live_window_secs: env_parsed("UTXORACLE_LIVE_WINDOW_SECS", DEFAULT_LIVE_WINDOW_SECS),
            baseline_window_blocks: env_parsed(
                "UTXORACLE_BASELINE_WINDOW_BLOCKS",
                DEFAULT_BASELINE_WINDOW_BLOCKS,
            ),

            publish_min_interval: Duration::from_millis(env_parsed(
                "UTXORACLE_PUBLISH_MIN_INTERVAL_MS",
                DEFAULT_PUBLISH_MIN_INTERVAL_MS,
            )),
            material_change_ratio: env_parsed(
                "UTXORACLE_MATERIAL_CHANGE_RATIO",
                DEFAULT_MATERIAL_CHANGE_RATIO,
            ),

            fallback_seed_price: env_parsed("UTXORACLE_FALLBACK_SEED_PRICE", DEFAULT_FALLBACK_SEED_PRICE),

            http_bind_addr: env_string("UTXORACLE_HTTP_BIND_ADDR", "0.0.0.0:8080"),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            zmq_rawtx_endpoint: self.zmq_rawtx_endpoint.clone(),
            zmq_rawblock_endpoint: self.zmq_rawblock_endpoint.clone(),
            ..SourceConfig::default()
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = OracleConfig::from_env();
        assert!(cfg.live_window_secs > 0);
        assert!(cfg.baseline_window_blocks > 0);
        assert!(cfg.fallback_seed_price > 0.0);
    }

    #[test]
    fn env_parsed_falls_back_on_missing_or_invalid() {
        let v: u64 = env_parsed("UTXORACLE_DOES_NOT_EXIST_KEY", 42);
        assert_eq!(v, 42);
    }
}
