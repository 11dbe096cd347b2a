//! Root configuration types.

use super::defaults::{
    default_admin_key, default_backup_interval_ms, default_backup_keep,
    default_backup_tick_secs, default_cors_origins, default_data_dir,
    default_eviction_interval_secs, default_max_data_url_bytes, default_max_message_size,
    default_port, default_rate_limit_max, default_rate_limit_window_secs,
    default_reservation_ms, default_room_cache_idle_ms, default_room_cache_max,
    default_room_themes,
};
use super::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Root configuration struct for Frameyard.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            store: StoreConfig::default(),
            persistence: PersistenceConfig::default(),
            protocol: ProtocolConfig::default(),
            rate_limit: RateLimitConfig::default(),
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// In-memory room cache behavior.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_room_cache_max")]
    pub room_cache_max: usize,
    #[serde(default = "default_room_cache_idle_ms")]
    pub room_cache_idle_ms: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    #[serde(default = "default_reservation_ms")]
    pub reservation_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            room_cache_max: default_room_cache_max(),
            room_cache_idle_ms: default_room_cache_idle_ms(),
            eviction_interval_secs: default_eviction_interval_secs(),
            reservation_ms: default_reservation_ms(),
        }
    }
}

/// On-disk persistence and backup behavior.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_backup_interval_ms")]
    pub backup_interval_ms: u64,
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
    #[serde(default = "default_backup_tick_secs")]
    pub backup_tick_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_interval_ms: default_backup_interval_ms(),
            backup_keep: default_backup_keep(),
            backup_tick_secs: default_backup_tick_secs(),
        }
    }
}

/// Protocol-level limits (room/frame shape, payload validation, CORS).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_data_url_bytes")]
    pub max_data_url_bytes: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_room_themes")]
    pub fallback_themes: Vec<String>,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_data_url_bytes: default_max_data_url_bytes(),
            max_message_size: default_max_message_size(),
            fallback_themes: default_room_themes(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Admin endpoint authorization.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AdminConfig {
    #[serde(default = "default_admin_key")]
    pub admin_key: Option<String>,
}

/// Window/max pair for one rate-limited verb.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct RateLimitRule {
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_max")]
    pub max: u32,
}

impl RateLimitRule {
    const fn new(window_secs: u64, max: u32) -> Self {
        Self { window_secs, max }
    }
}

/// Per-verb rate limit table, matching the inbound message verbs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_hello")]
    pub hello: RateLimitRule,
    #[serde(default = "default_get_frame")]
    pub get_frame: RateLimitRule,
    #[serde(default = "default_join_room")]
    pub join_room: RateLimitRule,
    #[serde(default = "default_resync")]
    pub resync: RateLimitRule,
    #[serde(default = "default_join_random_or_by_id")]
    pub join_random: RateLimitRule,
    #[serde(default = "default_join_random_or_by_id")]
    pub join_by_id: RateLimitRule,
    #[serde(default = "default_create_public_and_submit")]
    pub create_public_and_submit: RateLimitRule,
    #[serde(default = "default_submit_frame")]
    pub submit_frame: RateLimitRule,
    #[serde(default = "default_fallback")]
    pub default: RateLimitRule,
}

fn default_hello() -> RateLimitRule {
    RateLimitRule::new(10, 120)
}
fn default_get_frame() -> RateLimitRule {
    RateLimitRule::new(10, 90)
}
fn default_join_room() -> RateLimitRule {
    RateLimitRule::new(10, 40)
}
fn default_resync() -> RateLimitRule {
    RateLimitRule::new(10, 30)
}
fn default_join_random_or_by_id() -> RateLimitRule {
    RateLimitRule::new(10, 18)
}
fn default_create_public_and_submit() -> RateLimitRule {
    RateLimitRule::new(60, 12)
}
fn default_submit_frame() -> RateLimitRule {
    RateLimitRule::new(60, 10)
}
fn default_fallback() -> RateLimitRule {
    RateLimitRule::new(
        default_rate_limit_window_secs(),
        default_rate_limit_max(),
    )
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hello: default_hello(),
            get_frame: default_get_frame(),
            join_room: default_join_room(),
            resync: default_resync(),
            join_random: default_join_random_or_by_id(),
            join_by_id: default_join_random_or_by_id(),
            create_public_and_submit: default_create_public_and_submit(),
            submit_frame: default_submit_frame(),
            default: default_fallback(),
        }
    }
}
