//! Event Hub - fan-out of cycle results to interested parties
//!
//! Two ways to listen:
//! - per-label callbacks, fired for every stream whose label was accepted
//! - channel subscribers, receiving every non-empty cycle
//!
//! Subscriber channels are bounded. When a subscriber falls behind, new
//! results are dropped for it and counted rather than queued.
//!
//! Callbacks run on the thread that finished the cycle; keep them short.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::constants::DEFAULT_SUBSCRIBER_CAPACITY;

use crate::logic::cycle::CycleResult;
use crate::logic::stream::PredictionSample;

/// Event names
pub mod names {
    pub const GESTURE_ACCEPTED: &str = "gesture:accepted";
    pub const CYCLE_COMPLETED: &str = "cycle:completed";
}

pub type GestureCallback = Arc<dyn Fn(&PredictionSample) + Send + Sync>;

#[derive(Default)]
pub struct EventHub {
    callbacks: RwLock<HashMap<String, Vec<GestureCallback>>>,
    subscribers: Mutex<Vec<SyncSender<Arc<CycleResult>>>>,
    dropped: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` whenever `label` is accepted on any stream
    pub fn on_gesture<F>(&self, label: impl Into<String>, callback: F)
    where
        F: Fn(&PredictionSample) + Send + Sync + 'static,
    {
        let label = label.into();
        log::debug!("Callback registered for '{}'", label);
        self.callbacks
            .write()
            .entry(label)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn clear_callbacks(&self, label: &str) {
        self.callbacks.write().remove(label);
    }

    /// Channel receiving every completed cycle, holding at most
    /// `DEFAULT_SUBSCRIBER_CAPACITY` undelivered results
    pub fn subscribe(&self) -> Receiver<Arc<CycleResult>> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<Arc<CycleResult>> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Results dropped because a subscriber queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn emit(&self, result: &CycleResult) {
        // Snapshot so callbacks may register more callbacks
        let matched: Vec<(PredictionSample, Vec<GestureCallback>)> = {
            let callbacks = self.callbacks.read();
            result
                .accepted()
                .filter_map(|sample| {
                    callbacks
                        .get(&sample.label)
                        .map(|cbs| (sample.clone(), cbs.clone()))
                })
                .collect()
        };

        for (sample, callbacks) in matched {
            log::trace!("{} {} on {}", names::GESTURE_ACCEPTED, sample.label, sample.stream);
            for callback in callbacks {
                callback(&sample);
            }
        }

        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let shared = Arc::new(result.clone());
        let before = subscribers.len();
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&shared)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("{} subscriber full, cycle {} dropped", names::CYCLE_COMPLETED, result.cycle_id);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if subscribers.len() < before {
            log::debug!("Dropped {} closed {} subscriber(s)", before - subscribers.len(), names::CYCLE_COMPLETED);
        }
    }
}
