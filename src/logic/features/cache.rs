//! Feature Cache - last computed frame per stream
//!
//! Lets the dispatcher skip inference when a stream delivers the exact same
//! feature vector again (frozen tracker, duplicated frame).
//!
//! Two eviction policies:
//! - `InsertionOrder`: evicts the first-inserted key, even if it was read
//!   recently. This is the historical behavior, kept for compatibility.
//! - `LeastRecentlyUsed`: evicts the key read or written least recently.
//!   Default.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::logic::stream::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    InsertionOrder,
    #[default]
    LeastRecentlyUsed,
}

/// Feature vector plus the top prediction computed for it
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFrame {
    pub features: Vec<f32>,
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<StreamId, CachedFrame>,
    /// Front = next eviction candidate
    order: VecDeque<StreamId>,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
pub struct FeatureCache {
    capacity: usize,
    policy: EvictionPolicy,
    state: Mutex<CacheState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl FeatureCache {
    /// Capacity 0 is bumped to 1
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &StreamId) -> Option<CachedFrame> {
        let mut state = self.state.lock();
        let frame = state.entries.get(key).cloned()?;
        if self.policy == EvictionPolicy::LeastRecentlyUsed {
            touch(&mut state.order, key);
        }
        Some(frame)
    }

    /// Cached prediction if the stream's last vector equals `features`
    pub fn lookup(&self, key: &StreamId, features: &[f32]) -> Option<(String, f32)> {
        let mut state = self.state.lock();
        let hit = match state.entries.get(key) {
            Some(frame) if frame.features.as_slice() == features => {
                Some((frame.label.clone(), frame.confidence))
            }
            _ => None,
        };
        if hit.is_some() {
            state.hits += 1;
            if self.policy == EvictionPolicy::LeastRecentlyUsed {
                touch(&mut state.order, key);
            }
        } else {
            state.misses += 1;
        }
        hit
    }

    /// Insert or overwrite; returns the evicted key, if any
    pub fn insert(&self, key: StreamId, frame: CachedFrame) -> Option<StreamId> {
        let mut state = self.state.lock();

        if state.entries.insert(key, frame).is_some() {
            if self.policy == EvictionPolicy::LeastRecentlyUsed {
                touch(&mut state.order, &key);
            }
            return None;
        }

        state.order.push_back(key);
        if state.entries.len() <= self.capacity {
            return None;
        }

        let evicted = state.order.pop_front()?;
        state.entries.remove(&evicted);
        log::debug!("Feature cache evicted {}", evicted);
        Some(evicted)
    }

    pub fn remove(&self, key: &StreamId) {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.order.retain(|k| k != key);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &StreamId) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
        }
    }
}

fn touch(order: &mut VecDeque<StreamId>, key: &StreamId) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
        order.push_back(*key);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::stream::Handedness;

    fn frame(v: f32) -> CachedFrame {
        CachedFrame {
            features: vec![v; 4],
            label: "fist".to_string(),
            confidence: 0.7,
        }
    }

    fn keys() -> [StreamId; 3] {
        [
            StreamId::new(0, Handedness::Left),
            StreamId::new(1, Handedness::Right),
            StreamId::new(0, Handedness::Unassigned),
        ]
    }

    #[test]
    fn test_insertion_order_evicts_first_inserted() {
        let cache = FeatureCache::new(2, EvictionPolicy::InsertionOrder);
        let [a, b, c] = keys();

        cache.insert(a, frame(1.0));
        cache.insert(b, frame(2.0));
        // Reading `a` does not protect it under insertion order
        assert!(cache.get(&a).is_some());

        let evicted = cache.insert(c, frame(3.0));
        assert_eq!(evicted, Some(a));
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn test_lru_differs_from_insertion_order() {
        let cache = FeatureCache::new(2, EvictionPolicy::LeastRecentlyUsed);
        let [a, b, c] = keys();

        cache.insert(a, frame(1.0));
        cache.insert(b, frame(2.0));
        assert!(cache.get(&a).is_some());

        let evicted = cache.insert(c, frame(3.0));
        assert_eq!(evicted, Some(b));
        assert!(cache.contains(&a));
    }

    #[test]
    fn test_without_access_both_policies_evict_first() {
        for policy in [EvictionPolicy::InsertionOrder, EvictionPolicy::LeastRecentlyUsed] {
            let cache = FeatureCache::new(2, policy);
            let [a, b, c] = keys();
            cache.insert(a, frame(1.0));
            cache.insert(b, frame(2.0));
            assert_eq!(cache.insert(c, frame(3.0)), Some(a));
            assert_eq!(cache.len(), 2);
        }
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = FeatureCache::new(1, EvictionPolicy::InsertionOrder);
        let [a, _, _] = keys();
        cache.insert(a, frame(1.0));
        assert_eq!(cache.insert(a, frame(2.0)), None);
        assert_eq!(cache.get(&a).unwrap().features, vec![2.0; 4]);
    }

    #[test]
    fn test_lookup_requires_identical_features() {
        let cache = FeatureCache::new(2, EvictionPolicy::default());
        let [a, _, _] = keys();
        cache.insert(a, frame(1.0));

        assert_eq!(cache.lookup(&a, &[1.0; 4]), Some(("fist".to_string(), 0.7)));
        assert_eq!(cache.lookup(&a, &[1.5; 4]), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
