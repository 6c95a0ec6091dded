//! Smoothing Configuration
//!
//! Runtime-tunable parameters of the smoothing engine.
//! The live copy sits behind a lock; every cycle works on a snapshot taken
//! at cycle start, so concurrent updates only affect the next cycle.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    DEFAULT_MAX_CONCURRENT_INFERENCES, DEFAULT_MAX_HISTORY, DEFAULT_TIME_WINDOW_SECS,
};
use crate::error::{GestureError, GestureResult};

// ============================================================================
// SMOOTHING CONFIG
// ============================================================================

/// Smoothing configuration (can be loaded from config file)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// History entries older than this are pruned (seconds)
    pub time_window_secs: f64,
    /// Consensus winner must average at least this confidence
    pub min_confidence_threshold: f32,
    /// Below this many entries the raw sample passes through
    pub min_stable_frames: usize,
    /// Fraction of the history that must agree with the winner
    pub required_consensus_ratio: f32,
    /// Fan out multi-stream batches to parallel tasks
    pub concurrency_enabled: bool,
    /// Worker pool capacity
    pub max_concurrent_inferences: usize,
    /// Count bound of each stream history
    pub max_history: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            time_window_secs: DEFAULT_TIME_WINDOW_SECS,
            min_confidence_threshold: 0.6,
            min_stable_frames: 3,
            required_consensus_ratio: 0.6,
            concurrency_enabled: true,
            max_concurrent_inferences: DEFAULT_MAX_CONCURRENT_INFERENCES,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl SmoothingConfig {
    /// Responsive mode - short window, light consensus
    pub fn responsive() -> Self {
        Self {
            time_window_secs: 0.25,
            min_stable_frames: 2,
            required_consensus_ratio: 0.5,
            min_confidence_threshold: 0.5,
            ..Default::default()
        }
    }

    /// Stable mode - long window, strong consensus
    pub fn stable() -> Self {
        Self {
            time_window_secs: 1.0,
            min_stable_frames: 5,
            required_consensus_ratio: 0.75,
            min_confidence_threshold: 0.7,
            ..Default::default()
        }
    }

    /// Load from a JSON file, then validate
    pub fn load(path: &Path) -> GestureResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SmoothingConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("Loaded smoothing config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> GestureResult<()> {
        if !self.time_window_secs.is_finite() || self.time_window_secs <= 0.0 {
            return Err(GestureError::config(format!(
                "time_window_secs must be > 0, got {}",
                self.time_window_secs
            )));
        }
        if !unit_range(self.min_confidence_threshold) {
            return Err(GestureError::config(format!(
                "min_confidence_threshold must be in [0, 1], got {}",
                self.min_confidence_threshold
            )));
        }
        if self.min_stable_frames == 0 {
            return Err(GestureError::config("min_stable_frames must be >= 1"));
        }
        if !unit_range(self.required_consensus_ratio) {
            return Err(GestureError::config(format!(
                "required_consensus_ratio must be in [0, 1], got {}",
                self.required_consensus_ratio
            )));
        }
        if self.max_concurrent_inferences == 0 {
            return Err(GestureError::config("max_concurrent_inferences must be > 0"));
        }
        if self.max_history == 0 {
            return Err(GestureError::config("max_history must be >= 1"));
        }
        Ok(())
    }

    /// Window as a chrono duration (microsecond precision)
    pub fn time_window(&self) -> chrono::Duration {
        chrono::Duration::microseconds((self.time_window_secs * 1_000_000.0) as i64)
    }

    /// Apply one named parameter, returning the updated copy
    pub fn with(mut self, param: ConfigParam) -> Self {
        match param {
            ConfigParam::TimeWindow(v) => self.time_window_secs = v,
            ConfigParam::MinConfidenceThreshold(v) => self.min_confidence_threshold = v,
            ConfigParam::MinStableFrames(v) => self.min_stable_frames = v,
            ConfigParam::RequiredConsensusRatio(v) => self.required_consensus_ratio = v,
            ConfigParam::ConcurrencyEnabled(v) => self.concurrency_enabled = v,
            ConfigParam::MaxConcurrentInferences(v) => self.max_concurrent_inferences = v,
            ConfigParam::MaxHistory(v) => self.max_history = v,
        }
        self
    }
}

fn unit_range(v: f32) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

// ============================================================================
// RUNTIME SURFACE
// ============================================================================

/// One named parameter of the runtime configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "snake_case")]
pub enum ConfigParam {
    TimeWindow(f64),
    MinConfidenceThreshold(f32),
    MinStableFrames(usize),
    RequiredConsensusRatio(f32),
    ConcurrencyEnabled(bool),
    MaxConcurrentInferences(usize),
    MaxHistory(usize),
}

/// Live configuration shared between the control surface and the engine
#[derive(Debug)]
pub struct LiveConfig {
    current: RwLock<SmoothingConfig>,
}

impl LiveConfig {
    pub fn new(config: SmoothingConfig) -> GestureResult<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(config),
        })
    }

    /// Copy taken once per cycle
    pub fn snapshot(&self) -> SmoothingConfig {
        *self.current.read()
    }

    /// Validate and publish one parameter change
    pub fn update(&self, param: ConfigParam) -> GestureResult<SmoothingConfig> {
        let mut guard = self.current.write();
        let next = guard.with(param);
        next.validate()?;
        *guard = next;
        log::info!("Smoothing config updated: {:?}", param);
        Ok(next)
    }

    /// Replace the whole configuration
    pub fn replace(&self, config: SmoothingConfig) -> GestureResult<()> {
        config.validate()?;
        *self.current.write() = config;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
