//! Smoothing Module
//!
//! Turns flickering per-frame predictions into stable labels.

pub mod history;
pub mod smoother;

pub use history::{HistoryBuffer, Vote};
pub use smoother::{SmoothingDecision, TemporalSmoother};
