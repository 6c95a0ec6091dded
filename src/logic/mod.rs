//! Logic Module - gesture engine
//!
//! ## Layout
//! - `features/` - feature layout, vectors, per-stream frame cache
//! - `model/` - classifier backends, worker pool, threshold calibration
//! - `smoothing/` - per-stream history and consensus filter
//! - `telemetry/` - latency metrics and the cycle log
//! - `dispatch.rs` - fan-out of a batch to the pool
//! - `predictor.rs` - the top-level cycle

pub mod config;
pub mod cycle;
pub mod dispatch;
pub mod events;
pub mod gesture;
pub mod predictor;
pub mod stream;

pub mod features;
pub mod model;
pub mod smoothing;
pub mod telemetry;

#[cfg(test)]
mod tests;
