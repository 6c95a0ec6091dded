//! Inference Worker Pool
//!
//! Fixed set of classifier instances handed out one per inference call.
//! `borrow()` waits on a condvar until an instance is idle, up to the
//! configured timeout, then fails with `ResourceExhaustion`.
//!
//! ## Shared fallback contract
//! If construction produced no instance at all, the pool can still serve
//! calls from a single fallback classifier. Those calls get a
//! `WorkerHandle::Shared`: the instance is NOT exclusively owned and may run
//! on several threads at the same time. The `Classifier: Sync` bound is what
//! makes this sound; a backend that cannot tolerate concurrent calls must
//! serialize internally (as `OnnxClassifier` does with its session lock).

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::classifier::{ClassScores, Classifier};
use crate::error::{GestureError, GestureResult};

/// Builds the i-th pooled instance
pub type ClassifierFactory = dyn Fn(usize) -> GestureResult<Box<dyn Classifier>> + Send + Sync;

// ============================================================================
// STATE
// ============================================================================

struct PoolState {
    idle: Vec<Box<dyn Classifier>>,
    borrowed: usize,
}

pub struct WorkerPool {
    /// Instances actually constructed (0 = fallback only)
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
    fallback: Option<Arc<dyn Classifier>>,
    borrow_timeout: Duration,
    borrows: AtomicU64,
    timeouts: AtomicU64,
    fallback_uses: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub borrowed: usize,
    pub borrows: u64,
    pub timeouts: u64,
    pub fallback_uses: u64,
    pub has_fallback: bool,
}

impl WorkerPool {
    /// Build `capacity` instances through `factory`.
    ///
    /// Instances that fail to build are logged and skipped. Zero capacity,
    /// or no instance and no fallback, is `ResourceExhaustion`.
    pub fn build(
        capacity: usize,
        factory: &ClassifierFactory,
        fallback: Option<Arc<dyn Classifier>>,
        borrow_timeout: Duration,
    ) -> GestureResult<Self> {
        if capacity == 0 {
            return Err(GestureError::exhausted("worker pool capacity must be > 0"));
        }

        let mut instances = Vec::with_capacity(capacity);
        for i in 0..capacity {
            match factory(i) {
                Ok(instance) => instances.push(instance),
                Err(e) => log::warn!("Worker {} failed to build: {}", i, e),
            }
        }

        if instances.len() < capacity {
            log::warn!(
                "Worker pool built {}/{} instances{}",
                instances.len(),
                capacity,
                if instances.is_empty() && fallback.is_some() { ", using shared fallback" } else { "" }
            );
        }

        Self::from_instances(instances, fallback, borrow_timeout)
    }

    /// Pool over ready-made instances
    pub fn from_instances(
        instances: Vec<Box<dyn Classifier>>,
        fallback: Option<Arc<dyn Classifier>>,
        borrow_timeout: Duration,
    ) -> GestureResult<Self> {
        if instances.is_empty() && fallback.is_none() {
            return Err(GestureError::exhausted(
                "no classifier instance could be constructed and no fallback is configured",
            ));
        }

        log::info!(
            "Worker pool ready: {} instance(s), fallback: {}",
            instances.len(),
            fallback.as_ref().map(|f| f.name()).unwrap_or("none")
        );

        Ok(Self {
            capacity: instances.len(),
            state: Mutex::new(PoolState {
                idle: instances,
                borrowed: 0,
            }),
            available: Condvar::new(),
            fallback,
            borrow_timeout,
            borrows: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            fallback_uses: AtomicU64::new(0),
        })
    }

    /// Wait for an idle instance, at most `borrow_timeout`
    pub fn borrow(&self) -> GestureResult<WorkerHandle<'_>> {
        if self.capacity == 0 {
            return match &self.fallback {
                Some(shared) => {
                    self.fallback_uses.fetch_add(1, Ordering::Relaxed);
                    Ok(WorkerHandle::Shared(Arc::clone(shared)))
                }
                None => Err(GestureError::exhausted("worker pool has no instances")),
            };
        }

        let deadline = Instant::now() + self.borrow_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(instance) = state.idle.pop() {
                state.borrowed += 1;
                self.borrows.fetch_add(1, Ordering::Relaxed);
                return Ok(WorkerHandle::Owned(OwnedWorker {
                    pool: self,
                    instance: Some(instance),
                }));
            }

            if self.available.wait_until(&mut state, deadline).timed_out() && state.idle.is_empty() {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(GestureError::exhausted(format!(
                    "no worker freed within {:?} ({} in use)",
                    self.borrow_timeout, state.borrowed
                )));
            }
        }
    }

    /// Return a handle explicitly; dropping it has the same effect
    pub fn release(&self, mut handle: WorkerHandle<'_>) {
        handle.release();
    }

    fn give_back(&self, instance: Box<dyn Classifier>) {
        let mut state = self.state.lock();
        state.idle.push(instance);
        state.borrowed = state.borrowed.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle instances right now
    pub fn available(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            available: state.idle.len(),
            borrowed: state.borrowed,
            borrows: self.borrows.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            has_fallback: self.fallback.is_some(),
        }
    }
}

// ============================================================================
// HANDLES
// ============================================================================

/// Exclusive use of one pooled instance, or shared use of the fallback
pub enum WorkerHandle<'a> {
    Owned(OwnedWorker<'a>),
    Shared(Arc<dyn Classifier>),
}

/// Goes back to the pool on release or drop, whichever comes first
pub struct OwnedWorker<'a> {
    pool: &'a WorkerPool,
    instance: Option<Box<dyn Classifier>>,
}

impl OwnedWorker<'_> {
    fn release(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.give_back(instance);
        }
    }
}

impl Drop for OwnedWorker<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl WorkerHandle<'_> {
    pub fn is_shared(&self) -> bool {
        matches!(self, WorkerHandle::Shared(_))
    }

    pub fn is_released(&self) -> bool {
        match self {
            WorkerHandle::Owned(w) => w.instance.is_none(),
            WorkerHandle::Shared(_) => false,
        }
    }

    /// Idempotent; a shared handle has nothing to return
    pub fn release(&mut self) {
        if let WorkerHandle::Owned(worker) = self {
            worker.release();
        }
    }

    pub fn classify(&self, features: &[f32]) -> GestureResult<ClassScores> {
        match self {
            WorkerHandle::Owned(worker) => match &worker.instance {
                Some(instance) => instance.classify(features),
                None => Err(GestureError::exhausted("worker handle already released")),
            },
            WorkerHandle::Shared(shared) => shared.classify(features),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(&'static str);

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&self, _features: &[f32]) -> GestureResult<ClassScores> {
            Ok(ClassScores::new(vec![(self.0.to_string(), 0.7)]))
        }
    }

    fn pool(k: usize, timeout_ms: u64) -> WorkerPool {
        let factory = |_: usize| -> GestureResult<Box<dyn Classifier>> { Ok(Box::new(Fixed("fist"))) };
        WorkerPool::build(k, &factory, None, Duration::from_millis(timeout_ms)).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let factory = |_: usize| -> GestureResult<Box<dyn Classifier>> { Ok(Box::new(Fixed("fist"))) };
        let result = WorkerPool::build(0, &factory, None, Duration::from_millis(10));
        assert!(matches!(result, Err(GestureError::ResourceExhaustion(_))));
    }

    #[test]
    fn test_matched_borrow_release_leaves_no_leak() {
        let pool = pool(3, 50);
        for _ in 0..100 {
            let a = pool.borrow().unwrap();
            let b = pool.borrow().unwrap();
            assert_eq!(pool.available(), 1);
            pool.release(a);
            drop(b);
        }
        assert_eq!(pool.available(), pool.capacity());
        assert_eq!(pool.stats().borrowed, 0);
        assert_eq!(pool.stats().borrows, 200);
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = pool(1, 10);
        let mut handle = pool.borrow().unwrap();
        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(handle.classify(&[]).is_err());
        drop(handle);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_borrow_times_out_when_exhausted() {
        let pool = pool(1, 20);
        let _held = pool.borrow().unwrap();
        let start = Instant::now();
        let result = pool.borrow();
        assert!(matches!(result, Err(GestureError::ResourceExhaustion(_))));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let pool = pool(1, 2_000);
        std::thread::scope(|s| {
            let held = pool.borrow().unwrap();
            let waiter = s.spawn(|| pool.borrow().map(|h| h.is_shared()));
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
            assert_eq!(waiter.join().unwrap().unwrap(), false);
        });
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_capacity_bounds_concurrency() {
        let pool = pool(2, 2_000);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    let handle = pool.borrow().unwrap();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(handle);
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_shared_fallback_when_construction_fails() {
        let factory = |_: usize| -> GestureResult<Box<dyn Classifier>> {
            Err(GestureError::inference("model missing"))
        };
        let fallback: Arc<dyn Classifier> = Arc::new(Fixed("none"));
        let pool = WorkerPool::build(2, &factory, Some(fallback), Duration::from_millis(10)).unwrap();

        assert_eq!(pool.capacity(), 0);
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        assert!(a.is_shared() && b.is_shared());
        assert_eq!(a.classify(&[]).unwrap().top().unwrap().0, "none");
        assert_eq!(pool.stats().fallback_uses, 2);
    }

    #[test]
    fn test_no_instances_no_fallback() {
        let factory = |_: usize| -> GestureResult<Box<dyn Classifier>> {
            Err(GestureError::inference("model missing"))
        };
        let result = WorkerPool::build(2, &factory, None, Duration::from_millis(10));
        assert!(matches!(result, Err(GestureError::ResourceExhaustion(_))));
    }
}
