//! Default value functions for configuration fields.
//!
//! This module contains all the default value functions used by serde's `#[serde(default = ...)]`
//! attributes throughout the configuration system. Functions are organized by category for
//! easier maintenance.

use super::logging::LogFormat;

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    3000
}

pub fn default_data_dir() -> String {
    "./data".to_string()
}

pub fn default_admin_key() -> Option<String> {
    None
}

// =============================================================================
// Room Store Defaults
// =============================================================================

pub const fn default_room_cache_max() -> usize {
    80
}

pub const fn default_room_cache_idle_ms() -> u64 {
    300_000 // 5 minutes
}

pub const fn default_eviction_interval_secs() -> u64 {
    15
}

// =============================================================================
// Reservation Defaults
// =============================================================================

pub const fn default_reservation_ms() -> u64 {
    180_000 // 3 minutes
}

// =============================================================================
// Backup Defaults
// =============================================================================

pub const fn default_backup_interval_ms() -> u64 {
    1_800_000 // 30 minutes
}

pub const fn default_backup_keep() -> usize {
    24
}

pub const fn default_backup_tick_secs() -> u64 {
    30
}

// =============================================================================
// Protocol Defaults
// =============================================================================

pub const fn default_frame_count() -> usize {
    60
}

pub const fn default_fps() -> u32 {
    12
}

pub const fn default_max_data_url_bytes() -> usize {
    1_500_000
}

pub const fn default_max_message_size() -> usize {
    2_000_000
}

pub fn default_room_themes() -> Vec<String> {
    vec![
        "走る犬".to_string(),
        "踊る猫".to_string(),
        "飛ぶ鳥".to_string(),
        "泳ぐ魚".to_string(),
        "跳ねるカエル".to_string(),
        "笑う顔".to_string(),
    ]
}

// =============================================================================
// Security / CORS Defaults
// =============================================================================

pub fn default_cors_origins() -> String {
    "*".to_string()
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

// =============================================================================
// Rate Limit Defaults
// =============================================================================

pub const fn default_rate_limit_window_secs() -> u64 {
    10
}

pub const fn default_rate_limit_max() -> u32 {
    50
}
