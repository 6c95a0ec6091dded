//! Stream Dispatcher - fans a batch out to the worker pool
//!
//! Multi-stream batches run one scoped thread per stream when concurrency is
//! enabled; otherwise streams are classified one after the other. Either way
//! each stream borrows its own worker, and a failing stream only removes
//! itself from the result.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::{GestureError, GestureResult};
use crate::logic::config::SmoothingConfig;
use crate::logic::features::{CachedFrame, FeatureCache, FeatureVector};
use crate::logic::model::WorkerPool;
use crate::logic::stream::{PredictionSample, StreamId};

/// Raw (pre-smoothing) result for one stream
#[derive(Debug)]
pub struct StreamOutcome {
    pub stream: StreamId,
    pub result: GestureResult<PredictionSample>,
    /// Served from the feature cache, no worker borrowed
    pub cached: bool,
}

#[derive(Default)]
pub struct StreamDispatcher {
    cache: Option<Arc<FeatureCache>>,
}

impl StreamDispatcher {
    pub fn new(cache: Option<Arc<FeatureCache>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Option<&Arc<FeatureCache>> {
        self.cache.as_ref()
    }

    /// Successful samples only, tagged by stream
    pub fn predict(
        &self,
        pool: &WorkerPool,
        batch: &[(StreamId, FeatureVector)],
        config: &SmoothingConfig,
        timestamp: DateTime<Utc>,
    ) -> Vec<PredictionSample> {
        self.dispatch(pool, batch, config, timestamp)
            .into_iter()
            .filter_map(|outcome| outcome.result.ok())
            .collect()
    }

    /// One outcome per batch item, failures included.
    /// Concurrent completions are keyed by stream, order is not meaningful.
    pub fn dispatch(
        &self,
        pool: &WorkerPool,
        batch: &[(StreamId, FeatureVector)],
        config: &SmoothingConfig,
        timestamp: DateTime<Utc>,
    ) -> Vec<StreamOutcome> {
        if batch.is_empty() {
            return Vec::new();
        }

        if config.concurrency_enabled && batch.len() > 1 {
            self.dispatch_concurrent(pool, batch, timestamp)
        } else {
            batch
                .iter()
                .map(|(stream, features)| self.infer_one(pool, *stream, features, timestamp))
                .collect()
        }
    }

    fn dispatch_concurrent(
        &self,
        pool: &WorkerPool,
        batch: &[(StreamId, FeatureVector)],
        timestamp: DateTime<Utc>,
    ) -> Vec<StreamOutcome> {
        std::thread::scope(|scope| {
            let tasks: Vec<_> = batch
                .iter()
                .map(|(stream, features)| {
                    let stream = *stream;
                    let task = std::thread::Builder::new()
                        .name(format!("infer-{}", stream))
                        .spawn_scoped(scope, move || self.infer_one(pool, stream, features, timestamp));
                    (stream, features, task)
                })
                .collect();

            // Join barrier
            tasks
                .into_iter()
                .map(|(stream, features, task)| match task {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        log::error!("Inference task for {} panicked", stream);
                        StreamOutcome {
                            stream,
                            result: Err(GestureError::inference("inference task panicked")),
                            cached: false,
                        }
                    }),
                    Err(e) => {
                        log::warn!("Could not spawn inference task for {} ({}), running inline", stream, e);
                        self.infer_one(pool, stream, features, timestamp)
                    }
                })
                .collect()
        })
    }

    fn infer_one(
        &self,
        pool: &WorkerPool,
        stream: StreamId,
        features: &FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> StreamOutcome {
        if let Some(cache) = &self.cache {
            if let Some((label, confidence)) = cache.lookup(&stream, features.as_slice()) {
                return StreamOutcome {
                    stream,
                    result: Ok(PredictionSample::new(stream, label, confidence, timestamp)),
                    cached: true,
                };
            }
        }

        let result = self.classify(pool, stream, features, timestamp);
        if let Err(e) = &result {
            log::warn!("Stream {} dropped from cycle: {}", stream, e);
        }
        StreamOutcome {
            stream,
            result,
            cached: false,
        }
    }

    fn classify(
        &self,
        pool: &WorkerPool,
        stream: StreamId,
        features: &FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> GestureResult<PredictionSample> {
        let scores = {
            let worker = pool.borrow()?;
            worker.classify(features.as_slice())?
        };

        let (label, confidence) = scores
            .top()
            .ok_or_else(|| GestureError::inference("classifier returned an empty distribution"))?;
        let sample = PredictionSample::new(stream, label, confidence, timestamp);

        if let Some(cache) = &self.cache {
            cache.insert(
                stream,
                CachedFrame {
                    features: features.values.clone(),
                    label: sample.label.clone(),
                    confidence: sample.confidence,
                },
            );
        }

        Ok(sample)
    }
}
