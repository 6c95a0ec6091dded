//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema shared with the extraction side.**
//!
//! ## Rules:
//! 1. Add feature → increment HAND_LAYOUT_VERSION
//! 2. Change order → increment HAND_LAYOUT_VERSION
//! 3. Remove feature → increment HAND_LAYOUT_VERSION
//!
//! The upstream extractor may select a different subset of features. In that
//! case it hands over its own ordered name list and a custom layout is built
//! from it; the expected vector length always comes from the active layout.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{GestureError, GestureResult};

// ============================================================================
// DEFAULT HAND LAYOUT
// ============================================================================

/// Current hand layout version
pub const HAND_LAYOUT_VERSION: u8 = 1;

/// Feature names in exact order they appear in the vector
pub const HAND_FEATURE_LAYOUT: &[&str] = &[
    // === Finger extension ratios, 0 = curled, 1 = straight (0-4) ===
    "thumb_extension",
    "index_extension",
    "middle_extension",
    "ring_extension",
    "pinky_extension",

    // === Fingertip distances, normalized by hand scale (5-7) ===
    "thumb_index_distance",
    "thumb_middle_distance",
    "index_middle_distance",

    // === Tip to wrist distances (8-12) ===
    "thumb_tip_wrist",
    "index_tip_wrist",
    "middle_tip_wrist",
    "ring_tip_wrist",
    "pinky_tip_wrist",

    // === MCP joint angles, radians (13-16) ===
    "index_mcp_angle",
    "middle_mcp_angle",
    "ring_mcp_angle",
    "pinky_mcp_angle",

    // === PIP joint angles, radians (17-21) ===
    "index_pip_angle",
    "middle_pip_angle",
    "ring_pip_angle",
    "pinky_pip_angle",
    "thumb_ip_angle",

    // === Palm geometry (22-27) ===
    "palm_width",
    "palm_height",
    "hand_span",
    "palm_normal_x",
    "palm_normal_y",
    "palm_normal_z",

    // === Motion / scale (28-29) ===
    "wrist_velocity",
    "hand_scale",
];

/// Total number of features in the default layout
pub const HAND_FEATURE_COUNT: usize = 30;

// ============================================================================
// LAYOUT
// ============================================================================

/// Ordered, versioned feature layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub version: u8,
    pub names: Vec<String>,
}

impl FeatureLayout {
    /// The built-in 30 feature hand layout
    pub fn hand_default() -> Self {
        Self {
            version: HAND_LAYOUT_VERSION,
            names: HAND_FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Layout chosen by the upstream feature-selection step
    pub fn custom(version: u8, names: Vec<String>) -> GestureResult<Self> {
        if names.is_empty() {
            return Err(GestureError::config("feature layout must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(GestureError::config(format!("duplicate feature name: {}", name)));
            }
        }
        Ok(Self { version, names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// CRC32 over version and names, used to detect layout mismatches
    pub fn hash(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[self.version]);
        for name in &self.names {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize()
    }

    /// Get feature index by name (O(n) but features are few)
    pub fn index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::hand_default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
