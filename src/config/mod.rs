//! Configuration module for the Frameyard coordination server.
//!
//! This module provides comprehensive configuration management with support for:
//! - JSON configuration files
//! - Environment variable overrides
//! - Stdin input
//! - Sensible defaults
//!
//! # Module Structure
//!
//! - [`crate::config::types`]: Root `Config` struct plus its sections (store, persistence,
//!   protocol, rate limiting, admin).
//! - [`logging`]: Logging configuration.
//! - [`crate::config::loader`]: Configuration loading functions.
//! - [`crate::config::defaults`]: Default value functions.

// Submodules
pub mod defaults;
pub mod loader;
pub mod logging;
pub mod types;

// Re-exports for convenience
pub use defaults::default_port;

pub use loader::{load, validate_config};

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use types::{
    AdminConfig, Config, PersistenceConfig, ProtocolConfig, RateLimitConfig, RateLimitRule,
    StoreConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.store.room_cache_max, 80);
        assert_eq!(config.store.room_cache_idle_ms, 300_000);
        assert_eq!(config.store.reservation_ms, 180_000);
        assert_eq!(config.persistence.backup_interval_ms, 1_800_000);
        assert_eq!(config.persistence.backup_keep, 24);
        assert_eq!(config.persistence.data_dir, "./data");
        assert_eq!(config.protocol.max_data_url_bytes, 1_500_000);
        assert_eq!(config.protocol.max_message_size, 2_000_000);
        assert_eq!(config.rate_limit.submit_frame.window_secs, 60);
        assert_eq!(config.rate_limit.submit_frame.max, 10);
        assert_eq!(config.rate_limit.hello.max, 120);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.port, deserialized.port);
        assert_eq!(config.store.room_cache_max, deserialized.store.room_cache_max);
        assert_eq!(
            config.rate_limit.submit_frame.max,
            deserialized.rate_limit.submit_frame.max
        );
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults_for_missing_fields() {
        let partial = serde_json::json!({ "port": 4100 });
        let config: Config = serde_json::from_value(partial).unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.store.room_cache_max, 80);
    }
}
