//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Runtime overrides come from environment variables through the `get_*` helpers.

use std::path::PathBuf;

/// Confidence above which a single frame is trusted without smoothing
pub const BYPASS_CONFIDENCE: f32 = 0.85;

/// Threshold returned for labels missing from the calibrated table
pub const DEFAULT_LABEL_THRESHOLD: f32 = 0.6;

/// Calibrated thresholds are clamped to this range
pub const MIN_CALIBRATED_THRESHOLD: f32 = 0.3;
pub const MAX_CALIBRATED_THRESHOLD: f32 = 0.95;

/// At most this many streams (hands) per cycle
pub const MAX_STREAMS: usize = 2;

/// Label rendered when no stream has an accepted prediction
pub const UNKNOWN_LABEL: &str = "unknown";

/// Separator used when both streams contribute to the combined label
pub const COMBINED_LABEL_SEPARATOR: &str = "+";

/// Default smoothing window (seconds)
pub const DEFAULT_TIME_WINDOW_SECS: f64 = 0.5;

/// Default history bound per stream
pub const DEFAULT_MAX_HISTORY: usize = 30;

/// Default pool capacity
pub const DEFAULT_MAX_CONCURRENT_INFERENCES: usize = 2;

/// Default wait on a worker before giving up (milliseconds)
pub const DEFAULT_BORROW_TIMEOUT_MS: u64 = 250;

/// Default partition read from the offline metrics document
pub const DEFAULT_METRICS_PARTITION: &str = "test";

/// Default latency ring bound
pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

/// Metrics maintenance (compaction) interval in milliseconds
pub const DEFAULT_METRICS_MAINTENANCE_MS: u64 = 5_000;

/// Default feature cache capacity (one entry per stream slot and role)
pub const DEFAULT_CACHE_CAPACITY: usize = 4;

/// Undelivered cycle results queued per event subscriber
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "gesture-core";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get ONNX model path from environment, if any
pub fn get_model_path() -> Option<PathBuf> {
    std::env::var("GESTURE_MODEL_PATH").ok().map(PathBuf::from)
}

/// Get offline metrics document path from environment, if any
pub fn get_metrics_path() -> Option<PathBuf> {
    std::env::var("GESTURE_METRICS_PATH").ok().map(PathBuf::from)
}

/// Get metrics partition name from environment or use default
pub fn get_metrics_partition() -> String {
    std::env::var("GESTURE_METRICS_PARTITION")
        .unwrap_or_else(|_| DEFAULT_METRICS_PARTITION.to_string())
}

/// Get pool capacity from environment or use default
pub fn get_max_concurrent_inferences() -> usize {
    std::env::var("GESTURE_MAX_CONCURRENT_INFERENCES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_INFERENCES)
}

/// Get borrow timeout from environment or use default
pub fn get_borrow_timeout_ms() -> u64 {
    std::env::var("GESTURE_BORROW_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_BORROW_TIMEOUT_MS)
}

/// Check if concurrent dispatch is enabled
pub fn is_concurrency_enabled() -> bool {
    std::env::var("GESTURE_CONCURRENCY")
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(true)
}

/// Get cycle log directory: env override, else the local data dir
pub fn get_cycle_log_dir() -> PathBuf {
    std::env::var("GESTURE_CYCLE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
                .join("cycles")
        })
}
