//! Latency Metrics - best-effort ring of per-cycle latencies
//!
//! `record()` never waits: if the ring is busy (a snapshot or compaction is
//! running) the sample is counted as dropped and the producer moves on.
//!
//! Compaction:
//! - soft trim on record: above N entries, the oldest half goes
//! - maintenance pass: above 2N entries, only the newest N stay

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::DEFAULT_METRICS_CAPACITY;

pub struct MetricsRecorder {
    ring: Mutex<VecDeque<u64>>,
    /// N
    soft_limit: usize,
    recorded: AtomicU64,
    total_us: AtomicU64,
    dropped: AtomicU64,
}

/// Cheap view over the ring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub average_ms: f64,
    pub count: usize,
    /// Lifetime totals, unaffected by trimming
    pub recorded: u64,
    pub dropped: u64,
    pub lifetime_average_ms: f64,
}

impl MetricsRecorder {
    pub fn new(soft_limit: usize) -> Self {
        let soft_limit = soft_limit.max(2);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(soft_limit + 1)),
            soft_limit,
            recorded: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Fire-and-forget
    pub fn record(&self, latency: Duration) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        self.recorded.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);

        let Some(mut ring) = self.ring.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        ring.push_back(us);
        if ring.len() > self.soft_limit {
            let excess = ring.len() / 2;
            ring.drain(..excess);
        }
    }

    /// Safety-net compaction, run periodically by the maintenance thread
    pub fn compact(&self) -> usize {
        let mut ring = self.ring.lock();
        let before = ring.len();
        if before > self.soft_limit * 2 {
            ring.drain(..before - self.soft_limit);
        } else if before > self.soft_limit {
            ring.drain(..before / 2);
        }
        before - ring.len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (sum, count) = {
            let ring = self.ring.lock();
            (ring.iter().sum::<u64>(), ring.len())
        };
        let recorded = self.recorded.load(Ordering::Relaxed);
        let total_us = self.total_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            average_ms: if count > 0 { sum as f64 / count as f64 / 1000.0 } else { 0.0 },
            count,
            recorded,
            dropped: self.dropped.load(Ordering::Relaxed),
            lifetime_average_ms: if recorded > 0 { total_us as f64 / recorded as f64 / 1000.0 } else { 0.0 },
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }

    /// Background thread running `compact()` every `interval`
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> std::io::Result<MaintenanceHandle> {
        let recorder = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("metrics-maintenance".to_string())
            .spawn(move || {
                log::debug!("Metrics maintenance started ({:?})", interval);
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::park_timeout(interval);
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    let removed = recorder.compact();
                    if removed > 0 {
                        log::debug!("Metrics maintenance trimmed {} samples", removed);
                    }
                }
            })?;

        Ok(MaintenanceHandle {
            stop,
            thread: Some(thread),
        })
    }

    #[cfg(test)]
    fn push_unbounded(&self, us: u64, n: usize) {
        let mut ring = self.ring.lock();
        for _ in 0..n {
            ring.push_back(us);
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

/// Stops and joins the maintenance thread on drop
pub struct MaintenanceHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("Metrics maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_average() {
        let metrics = MetricsRecorder::new(10);
        metrics.record(Duration::from_millis(2));
        metrics.record(Duration::from_millis(4));

        let snap = metrics.snapshot();
        assert_eq!(snap.count, 2);
        assert!((snap.average_ms - 3.0).abs() < 1e-9);
        assert_eq!(snap.recorded, 2);
    }

    #[test]
    fn test_soft_trim_keeps_newest_half() {
        let metrics = MetricsRecorder::new(10);
        for i in 0..=10u64 {
            metrics.record(Duration::from_micros(i));
        }
        // 11 > 10 → oldest 5 dropped
        assert_eq!(metrics.len(), 6);
        assert!(metrics.len() <= metrics.soft_limit());

        for i in 0..1000u64 {
            metrics.record(Duration::from_micros(i));
            assert!(metrics.len() <= 10);
        }
        assert_eq!(metrics.snapshot().recorded, 1011);
    }

    #[test]
    fn test_hard_trim_keeps_newest_n() {
        let metrics = MetricsRecorder::new(10);
        metrics.push_unbounded(1, 15);
        metrics.push_unbounded(9, 10);
        assert_eq!(metrics.len(), 25);

        assert_eq!(metrics.compact(), 15);
        assert_eq!(metrics.len(), 10);
        // Only the newest (value 9) survive
        assert!((metrics.snapshot().average_ms - 0.009).abs() < 1e-12);
    }

    #[test]
    fn test_compact_below_limit_is_noop() {
        let metrics = MetricsRecorder::new(10);
        metrics.record(Duration::from_millis(1));
        assert_eq!(metrics.compact(), 0);
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_record_never_blocks_when_ring_busy() {
        let metrics = MetricsRecorder::new(10);
        let guard = metrics.ring.lock();
        metrics.record(Duration::from_millis(1));
        drop(guard);

        let snap = metrics.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.recorded, 1);
    }

    #[test]
    fn test_maintenance_thread_compacts() {
        let metrics = Arc::new(MetricsRecorder::new(4));
        metrics.push_unbounded(1, 20);

        let mut handle = metrics.spawn_maintenance(Duration::from_millis(5)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while metrics.len() > 4 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        assert!(metrics.len() <= 4);
    }
}
