//! History Buffer - rolling window of samples for one stream
//!
//! Bounded both in time (relative to the newest sample) and in count.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::logic::stream::PredictionSample;

#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    entries: VecDeque<PredictionSample>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, then prune by age and count (oldest first)
    pub fn insert(&mut self, sample: PredictionSample, window: Duration, max_count: usize) {
        let now = sample.timestamp;
        self.entries.push_back(sample);

        while let Some(oldest) = self.entries.front() {
            if now - oldest.timestamp > window {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        while self.entries.len() > max_count.max(1) {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PredictionSample> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&PredictionSample> {
        self.entries.back()
    }

    /// Winning label by average confidence.
    ///
    /// Ties on average go to the label seen more often, then to the
    /// lexicographically smaller label.
    pub fn vote(&self) -> Option<Vote> {
        let mut tally: Vec<(&str, f64, usize)> = Vec::new();
        for sample in &self.entries {
            match tally.iter_mut().find(|(label, _, _)| *label == sample.label) {
                Some(entry) => {
                    entry.1 += sample.confidence as f64;
                    entry.2 += 1;
                }
                None => tally.push((sample.label.as_str(), sample.confidence as f64, 1)),
            }
        }

        let total = self.entries.len();
        tally
            .into_iter()
            .map(|(label, sum, count)| (label, sum / count as f64, count))
            .max_by(|(la, avg_a, ca), (lb, avg_b, cb)| {
                let by_avg = if (avg_a - avg_b).abs() <= 1e-9 {
                    std::cmp::Ordering::Equal
                } else {
                    avg_a.total_cmp(avg_b)
                };
                by_avg.then(ca.cmp(cb)).then_with(|| lb.cmp(la))
            })
            .map(|(label, avg, count)| Vote {
                label: label.to_string(),
                avg_confidence: avg as f32,
                count,
                ratio: count as f32 / total as f32,
            })
    }
}

/// Outcome of a consensus vote over one history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub label: String,
    pub avg_confidence: f32,
    pub count: usize,
    /// count / history length
    pub ratio: f32,
}

// ============================================================================
// TESTS
// ============================================================================
