//! Temporal Smoother - debounced consensus label per stream
//!
//! Each stream owns its own `Mutex<HistoryBuffer>`. The outer map is only
//! write-locked when a stream is seen for the first time, so updates for the
//! left and right hand never wait on each other.
//!
//! `reset_all` bumps a generation counter before clearing. A cycle that read
//! the generation before the reset cannot write into the cleared histories.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::history::{HistoryBuffer, Vote};
use crate::constants::BYPASS_CONFIDENCE;
use crate::logic::config::SmoothingConfig;
use crate::logic::stream::{PredictionSample, StreamId};

/// How a sample was handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum SmoothingDecision {
    /// Confidence above the bypass threshold, trusted as is
    Bypass { sample: PredictionSample },
    /// Not enough history yet, raw sample passed through
    WarmingUp { sample: PredictionSample, history_len: usize },
    /// Consensus reached
    Consensus { sample: PredictionSample, vote: Vote },
    /// History disagrees or is too weak, no stable label this cycle
    Suppressed { vote: Option<Vote>, history_len: usize },
    /// Histories were reset after the cycle started, sample discarded
    Stale { generation: u64 },
}

impl SmoothingDecision {
    pub fn sample(&self) -> Option<&PredictionSample> {
        match self {
            SmoothingDecision::Bypass { sample }
            | SmoothingDecision::WarmingUp { sample, .. }
            | SmoothingDecision::Consensus { sample, .. } => Some(sample),
            SmoothingDecision::Suppressed { .. } | SmoothingDecision::Stale { .. } => None,
        }
    }

    pub fn into_sample(self) -> Option<PredictionSample> {
        match self {
            SmoothingDecision::Bypass { sample }
            | SmoothingDecision::WarmingUp { sample, .. }
            | SmoothingDecision::Consensus { sample, .. } => Some(sample),
            SmoothingDecision::Suppressed { .. } | SmoothingDecision::Stale { .. } => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            SmoothingDecision::Bypass { .. } => "bypass",
            SmoothingDecision::WarmingUp { .. } => "warming_up",
            SmoothingDecision::Consensus { .. } => "consensus",
            SmoothingDecision::Suppressed { .. } => "suppressed",
            SmoothingDecision::Stale { .. } => "stale",
        }
    }
}

#[derive(Default)]
pub struct TemporalSmoother {
    histories: RwLock<HashMap<StreamId, Arc<Mutex<HistoryBuffer>>>>,
    generation: AtomicU64,
}

impl TemporalSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// History of a stream, created on first use
    fn history(&self, stream: StreamId) -> Arc<Mutex<HistoryBuffer>> {
        if let Some(history) = self.histories.read().get(&stream) {
            return Arc::clone(history);
        }
        let mut map = self.histories.write();
        Arc::clone(map.entry(stream).or_default())
    }

    pub fn update(&self, stream: StreamId, sample: PredictionSample, config: &SmoothingConfig) -> Option<PredictionSample> {
        self.update_detailed(stream, sample, config).into_sample()
    }

    /// Current history generation, read before taking a config snapshot
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn update_detailed(
        &self,
        stream: StreamId,
        sample: PredictionSample,
        config: &SmoothingConfig,
    ) -> SmoothingDecision {
        self.update_in_generation(stream, sample, config, self.generation())
    }

    /// Like `update_detailed`, but discards the sample when the histories
    /// were reset after `generation` was read
    pub fn update_in_generation(
        &self,
        stream: StreamId,
        sample: PredictionSample,
        config: &SmoothingConfig,
        generation: u64,
    ) -> SmoothingDecision {
        if sample.confidence > BYPASS_CONFIDENCE {
            return SmoothingDecision::Bypass { sample };
        }

        let history = self.history(stream);
        let mut history = history.lock();
        // Checked under the history lock; reset_all bumps before it clears
        if generation != self.generation() {
            log::debug!("Stream {} sample from generation {} discarded", stream, generation);
            return SmoothingDecision::Stale { generation };
        }
        let timestamp = sample.timestamp;
        history.insert(sample.clone(), config.time_window(), config.max_history);

        let history_len = history.len();
        if history_len < config.min_stable_frames {
            return SmoothingDecision::WarmingUp { sample, history_len };
        }

        let vote = history.vote();
        drop(history);

        match vote {
            Some(vote)
                if vote.ratio >= config.required_consensus_ratio
                    && vote.avg_confidence >= config.min_confidence_threshold =>
            {
                let smoothed = PredictionSample {
                    stream,
                    label: vote.label.clone(),
                    confidence: vote.avg_confidence,
                    timestamp,
                };
                SmoothingDecision::Consensus { sample: smoothed, vote }
            }
            vote => {
                log::trace!("Stream {} suppressed: {:?}", stream, vote);
                SmoothingDecision::Suppressed { vote, history_len }
            }
        }
    }

    pub fn history_len(&self, stream: &StreamId) -> usize {
        self.histories
            .read()
            .get(stream)
            .map(|h| h.lock().len())
            .unwrap_or(0)
    }

    /// Copy of a stream's current history, oldest first
    pub fn history_snapshot(&self, stream: &StreamId) -> Vec<PredictionSample> {
        self.histories
            .read()
            .get(stream)
            .map(|h| h.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn reset(&self, stream: &StreamId) {
        if let Some(history) = self.histories.read().get(stream) {
            history.lock().clear();
        }
    }

    pub fn reset_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for history in self.histories.read().values() {
            history.lock().clear();
        }
        log::debug!("All stream histories cleared");
    }
}

// ============================================================================
// TESTS
// ============================================================================
