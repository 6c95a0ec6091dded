//! Telemetry Module
//!
//! - `metrics.rs` - in-memory latency ring with best-effort recording
//! - `event.rs` - CycleEvent, the flattened per-cycle log record
//! - `recorder.rs` - append-only JSONL writer with size rotation

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::{CycleEvent, EventType, StreamRecord};
pub use metrics::{MaintenanceHandle, MetricsRecorder, MetricsSnapshot};
pub use recorder::{count_labels, list_log_files, read_events, CycleRecorder};
