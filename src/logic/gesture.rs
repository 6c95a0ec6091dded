//! Gesture vocabulary
//!
//! Built-in labels produced by the heuristic classifier and expected in the
//! label file of bundled models. Model labels outside this set are still
//! accepted everywhere; they simply have no description.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureType {
    None,
    Point,
    OpenPalm,
    Fist,
    ThumbsUp,
    Peace,
    OkSign,
    Pinch,
}

impl GestureType {
    pub const ALL: [GestureType; 8] = [
        GestureType::None,
        GestureType::Point,
        GestureType::OpenPalm,
        GestureType::Fist,
        GestureType::ThumbsUp,
        GestureType::Peace,
        GestureType::OkSign,
        GestureType::Pinch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureType::None => "none",
            GestureType::Point => "point",
            GestureType::OpenPalm => "open_palm",
            GestureType::Fist => "fist",
            GestureType::ThumbsUp => "thumbs_up",
            GestureType::Peace => "peace",
            GestureType::OkSign => "ok_sign",
            GestureType::Pinch => "pinch",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.as_str() == label)
    }

    /// Human readable meaning in an interactive scene
    pub fn description(&self) -> &'static str {
        match self {
            GestureType::None => "No gesture detected",
            GestureType::Point => "Pointing - select or indicate direction",
            GestureType::OpenPalm => "Open palm - stop or show menu",
            GestureType::Fist => "Fist - grab",
            GestureType::ThumbsUp => "Thumbs up - approval or confirmation",
            GestureType::Peace => "Peace sign - two items",
            GestureType::OkSign => "OK sign - confirmation",
            GestureType::Pinch => "Pinch - precise selection or zoom",
        }
    }
}

/// Description for any label, known or not
pub fn describe(label: &str) -> &'static str {
    GestureType::from_label(label)
        .map(|g| g.description())
        .unwrap_or("Unknown gesture")
}
