//! Predictor - top-level gesture engine
//!
//! One cycle:
//! 1. validate the batch (≤ 2 streams, unique slots, matching layout)
//! 2. snapshot the live config
//! 3. dispatch to the worker pool (feature cache first)
//! 4. smooth each stream, then apply its calibrated threshold
//! 5. combine, record latency, notify listeners
//!
//! Control calls (`update_config`, `calibrate`, `reset`) may race with
//! cycles; a running cycle keeps the config, pool and threshold table it
//! started with.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::{
    self, DEFAULT_CACHE_CAPACITY, DEFAULT_METRICS_CAPACITY, DEFAULT_METRICS_MAINTENANCE_MS, MAX_STREAMS,
};
use crate::error::{GestureError, GestureResult};
use crate::logic::config::{ConfigParam, LiveConfig, SmoothingConfig};
use crate::logic::cycle::{combine_labels, CycleResult, StreamVerdict};
use crate::logic::dispatch::{StreamDispatcher, StreamOutcome};
use crate::logic::events::EventHub;
use crate::logic::features::{CacheStats, EvictionPolicy, FeatureCache, FeatureLayout, FeatureVector};
use crate::logic::gesture::GestureType;
use crate::logic::model::{
    Classifier, ClassifierFactory, HeuristicClassifier, MetricsDocument, OnnxClassifier, PoolStats,
    ThresholdCalibrator, ThresholdConfig, ThresholdTable, WorkerPool,
};
use crate::logic::smoothing::TemporalSmoother;
use crate::logic::stream::{PredictionSample, StreamId};
use crate::logic::telemetry::{CycleEvent, CycleRecorder, MaintenanceHandle, MetricsRecorder, MetricsSnapshot};

// ============================================================================
// BUILDER
// ============================================================================

pub struct PredictorBuilder {
    layout: FeatureLayout,
    config: SmoothingConfig,
    factory: Option<Arc<ClassifierFactory>>,
    fallback: Option<Arc<dyn Classifier>>,
    borrow_timeout: Duration,
    cache: Option<(usize, EvictionPolicy)>,
    thresholds: ThresholdConfig,
    partition: String,
    metrics_file: Option<PathBuf>,
    metrics_capacity: usize,
    maintenance_interval: Option<Duration>,
    cycle_log_dir: Option<PathBuf>,
}

impl Default for PredictorBuilder {
    fn default() -> Self {
        Self {
            layout: FeatureLayout::hand_default(),
            config: SmoothingConfig::default(),
            factory: None,
            fallback: None,
            borrow_timeout: Duration::from_millis(constants::DEFAULT_BORROW_TIMEOUT_MS),
            cache: Some((DEFAULT_CACHE_CAPACITY, EvictionPolicy::default())),
            thresholds: ThresholdConfig::default(),
            partition: constants::DEFAULT_METRICS_PARTITION.to_string(),
            metrics_file: None,
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
            maintenance_interval: Some(Duration::from_millis(DEFAULT_METRICS_MAINTENANCE_MS)),
            cycle_log_dir: None,
        }
    }
}

impl PredictorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded from `GESTURE_*` environment variables.
    ///
    /// With a model path, pooled instances run the ONNX model and the
    /// heuristic classifier becomes the shared fallback.
    pub fn from_env() -> GestureResult<Self> {
        let mut builder = Self::new()
            .borrow_timeout(Duration::from_millis(constants::get_borrow_timeout_ms()))
            .partition(constants::get_metrics_partition());

        builder.config.concurrency_enabled = constants::is_concurrency_enabled();
        builder.config.max_concurrent_inferences = constants::get_max_concurrent_inferences();

        if let Some(path) = constants::get_metrics_path() {
            builder = builder.metrics_file(path);
        }
        if let Some(path) = constants::get_model_path() {
            builder = builder.onnx_model(path).heuristic_fallback()?;
        }
        Ok(builder)
    }

    pub fn layout(mut self, layout: FeatureLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn config(mut self, config: SmoothingConfig) -> Self {
        self.config = config;
        self
    }

    /// Factory for pooled instances, called once per slot
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize) -> GestureResult<Box<dyn Classifier>> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Pooled instances load the ONNX model at `path`
    pub fn onnx_model(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let features = self.layout.len();
        self.factory(move |_| -> GestureResult<Box<dyn Classifier>> {
            Ok(Box::new(OnnxClassifier::load(&path, features)?))
        })
    }

    pub fn fallback(mut self, fallback: Arc<dyn Classifier>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn heuristic_fallback(self) -> GestureResult<Self> {
        let heuristic = HeuristicClassifier::new(&self.layout)?;
        Ok(self.fallback(Arc::new(heuristic)))
    }

    pub fn borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    pub fn cache(mut self, capacity: usize, policy: EvictionPolicy) -> Self {
        self.cache = Some((capacity, policy));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Offline metrics document calibrated at build time
    pub fn metrics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_file = Some(path.into());
        self
    }

    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = capacity;
        self
    }

    /// Background metrics compaction; `None` disables the thread
    pub fn metrics_maintenance(mut self, interval: Option<Duration>) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Enable the JSONL cycle log in `dir`
    pub fn cycle_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cycle_log_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> GestureResult<Predictor> {
        let live = LiveConfig::new(self.config)?;

        let factory = match self.factory {
            Some(factory) => factory,
            None => heuristic_factory(&self.layout)?,
        };

        let pool = WorkerPool::build(
            self.config.max_concurrent_inferences,
            factory.as_ref(),
            self.fallback.clone(),
            self.borrow_timeout,
        )?;

        self.thresholds.validate()?;
        let calibrator = ThresholdCalibrator::new(self.thresholds, self.partition);
        if let Some(path) = &self.metrics_file {
            // Fail-soft: default thresholds stay in place
            if let Err(e) = calibrator.load_file(path) {
                log::warn!("Calibration from {:?} failed: {}", path, e);
            }
        }

        let cache = self
            .cache
            .filter(|(capacity, _)| *capacity > 0)
            .map(|(capacity, policy)| Arc::new(FeatureCache::new(capacity, policy)));

        let recorder = match self.cycle_log_dir {
            Some(dir) => Some(Mutex::new(CycleRecorder::new(dir)?)),
            None => None,
        };

        let metrics = Arc::new(MetricsRecorder::new(self.metrics_capacity));
        let maintenance = match self.maintenance_interval {
            Some(interval) => Some(metrics.spawn_maintenance(interval)?),
            None => None,
        };

        log::info!(
            "Predictor ready: {} features (layout {:08x}), {} worker(s), cache: {}",
            self.layout.len(),
            self.layout.hash(),
            pool.capacity(),
            cache.as_ref().map(|c| c.capacity().to_string()).unwrap_or_else(|| "off".to_string())
        );

        Ok(Predictor {
            layout: self.layout,
            config: live,
            pool: RwLock::new(Arc::new(pool)),
            factory,
            fallback: self.fallback,
            borrow_timeout: self.borrow_timeout,
            dispatcher: StreamDispatcher::new(cache),
            smoother: TemporalSmoother::new(),
            calibrator,
            metrics,
            _maintenance: maintenance,
            events: EventHub::new(),
            recorder,
            control: Mutex::new(()),
            cycles: AtomicU64::new(0),
        })
    }
}

fn heuristic_factory(layout: &FeatureLayout) -> GestureResult<Arc<ClassifierFactory>> {
    // Fail at build time on a layout the rules cannot read
    HeuristicClassifier::new(layout)?;
    let layout = layout.clone();
    let factory: Arc<ClassifierFactory> = Arc::new(move |_: usize| -> GestureResult<Box<dyn Classifier>> {
        Ok(Box::new(HeuristicClassifier::new(&layout)?))
    });
    Ok(factory)
}

// ============================================================================
// PREDICTOR
// ============================================================================

pub struct Predictor {
    layout: FeatureLayout,
    config: LiveConfig,
    /// Swapped whole when the capacity changes
    pool: RwLock<Arc<WorkerPool>>,
    factory: Arc<ClassifierFactory>,
    fallback: Option<Arc<dyn Classifier>>,
    borrow_timeout: Duration,
    dispatcher: StreamDispatcher,
    smoother: TemporalSmoother,
    calibrator: ThresholdCalibrator,
    metrics: Arc<MetricsRecorder>,
    /// Stops the compaction thread on drop
    _maintenance: Option<MaintenanceHandle>,
    events: EventHub,
    recorder: Option<Mutex<CycleRecorder>>,
    /// Serializes control-surface updates
    control: Mutex<()>,
    cycles: AtomicU64,
}

impl Predictor {
    pub fn builder() -> PredictorBuilder {
        PredictorBuilder::new()
    }

    pub fn process(&self, batch: &[(StreamId, FeatureVector)]) -> GestureResult<CycleResult> {
        self.process_at(batch, Utc::now())
    }

    /// Run one cycle with an explicit timestamp
    pub fn process_at(
        &self,
        batch: &[(StreamId, FeatureVector)],
        timestamp: DateTime<Utc>,
    ) -> GestureResult<CycleResult> {
        if batch.is_empty() {
            return Ok(CycleResult::empty(self.cycles.load(Ordering::Relaxed), timestamp));
        }
        self.validate_batch(batch)?;

        let started = Instant::now();
        let cycle_id = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        // Generation first: a config update publishes before it resets
        let generation = self.smoother.generation();
        let config = self.config.snapshot();
        let pool = self.pool();
        let table = self.calibrator.table();

        let mut verdicts: Vec<StreamVerdict> = self
            .dispatcher
            .dispatch(&pool, batch, &config, timestamp)
            .into_iter()
            .map(|outcome| self.judge(outcome, &config, &table, generation))
            .collect();
        verdicts.sort_by_key(|v| v.stream);

        let combined_label = combine_labels(&verdicts);
        let latency = started.elapsed();
        self.metrics.record(latency);

        let result = CycleResult {
            cycle_id,
            timestamp,
            verdicts,
            combined_label,
            latency_us: latency.as_micros().min(u64::MAX as u128) as u64,
        };

        log::trace!("Cycle {} -> {}", cycle_id, result.combined_label);
        self.events.emit(&result);
        self.record(CycleEvent::cycle(&result));
        Ok(result)
    }

    /// Accepted, smoothed sample per stream; `None` means no stable result
    pub fn predict(&self, batch: &[(StreamId, FeatureVector)]) -> GestureResult<Vec<(StreamId, Option<PredictionSample>)>> {
        let result = self.process(batch)?;
        Ok(result
            .verdicts
            .iter()
            .map(|v| (v.stream, v.accepted_sample().cloned()))
            .collect())
    }

    fn validate_batch(&self, batch: &[(StreamId, FeatureVector)]) -> GestureResult<()> {
        if batch.len() > MAX_STREAMS {
            return Err(GestureError::config(format!(
                "batch has {} streams, at most {} allowed",
                batch.len(),
                MAX_STREAMS
            )));
        }

        for (i, (stream, features)) in batch.iter().enumerate() {
            stream.validate()?;
            if batch[..i].iter().any(|(other, _)| other.slot == stream.slot) {
                return Err(GestureError::config(format!("duplicate stream slot {}", stream.slot)));
            }
            features
                .validate(&self.layout)
                .map_err(|e| GestureError::config(format!("stream {}: {}", stream, e)))?;
        }
        Ok(())
    }

    fn judge(
        &self,
        outcome: StreamOutcome,
        config: &SmoothingConfig,
        table: &ThresholdTable,
        generation: u64,
    ) -> StreamVerdict {
        let raw = match outcome.result {
            Ok(raw) => raw,
            Err(e) => return StreamVerdict::failed(outcome.stream, e.to_string()),
        };

        let decision = self
            .smoother
            .update_in_generation(outcome.stream, raw.clone(), config, generation);
        let (threshold, accepted) = match decision.sample() {
            // "none" is a classifier outcome, never a gesture to report
            Some(sample) if sample.label == GestureType::None.as_str() => (None, false),
            Some(sample) => {
                let threshold = table.lookup(&sample.label);
                (Some(threshold), sample.confidence > threshold)
            }
            None => (None, false),
        };

        StreamVerdict {
            stream: outcome.stream,
            raw: Some(raw),
            decision: Some(decision),
            threshold,
            accepted,
            cached: outcome.cached,
            error: None,
        }
    }

    fn record(&self, event: CycleEvent) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.lock().record(&event) {
                log::error!("Failed to record {} event: {}", event.event_type.as_str(), e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Configuration surface
    // ------------------------------------------------------------------------

    pub fn config(&self) -> SmoothingConfig {
        self.config.snapshot()
    }

    /// Apply one parameter change. Clears every stream history; a capacity
    /// change also rebuilds the worker pool.
    pub fn update_config(&self, param: ConfigParam) -> GestureResult<SmoothingConfig> {
        let _control = self.control.lock();
        let current = self.config.snapshot();
        let next = current.with(param);
        next.validate()?;

        if next.max_concurrent_inferences != current.max_concurrent_inferences {
            self.rebuild_pool(next.max_concurrent_inferences)?;
        }
        let next = self.config.update(param)?;

        self.smoother.reset_all();
        self.record(CycleEvent::config_changed(format!("{:?}", param)));
        Ok(next)
    }

    /// Swap the whole configuration, same rules as `update_config`
    pub fn replace_config(&self, config: SmoothingConfig) -> GestureResult<()> {
        let _control = self.control.lock();
        config.validate()?;

        if config.max_concurrent_inferences != self.config.snapshot().max_concurrent_inferences {
            self.rebuild_pool(config.max_concurrent_inferences)?;
        }
        self.config.replace(config)?;

        self.smoother.reset_all();
        self.record(CycleEvent::config_changed("replaced"));
        Ok(())
    }

    fn rebuild_pool(&self, capacity: usize) -> GestureResult<()> {
        let pool = WorkerPool::build(capacity, self.factory.as_ref(), self.fallback.clone(), self.borrow_timeout)?;
        // Cycles already running keep their Arc to the old pool
        *self.pool.write() = Arc::new(pool);
        log::info!("Worker pool rebuilt with capacity {}", capacity);
        Ok(())
    }

    /// Clear every stream history
    pub fn reset(&self) {
        self.smoother.reset_all();
        if let Some(cache) = self.dispatcher.cache() {
            cache.clear();
        }
    }

    pub fn reset_stream(&self, stream: &StreamId) {
        self.smoother.reset(stream);
        if let Some(cache) = self.dispatcher.cache() {
            cache.remove(stream);
        }
    }

    // ------------------------------------------------------------------------
    // Calibration
    // ------------------------------------------------------------------------

    /// On error the previous table stays active
    pub fn calibrate(&self, doc: &MetricsDocument) -> GestureResult<Arc<ThresholdTable>> {
        let table = self.calibrator.calibrate(doc).map_err(|e| {
            log::warn!("Calibration rejected: {}", e);
            e
        })?;
        self.record(CycleEvent::calibrated(format!(
            "{} labels from '{}'",
            table.len(),
            table.partition.as_deref().unwrap_or("?")
        )));
        Ok(table)
    }

    pub fn calibrate_json(&self, content: &str) -> GestureResult<Arc<ThresholdTable>> {
        let doc = MetricsDocument::from_json(content).map_err(|e| {
            log::warn!("Calibration rejected: {}", e);
            e
        })?;
        self.calibrate(&doc)
    }

    pub fn load_metrics(&self, path: &Path) -> GestureResult<Arc<ThresholdTable>> {
        let doc = MetricsDocument::load(path).map_err(|e| {
            log::warn!("Could not load metrics from {:?}: {}", path, e);
            e
        })?;
        self.calibrate(&doc)
    }

    pub fn thresholds(&self) -> Arc<ThresholdTable> {
        self.calibrator.table()
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared handle to the latency ring
    pub fn metrics_recorder(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    fn pool(&self) -> Arc<WorkerPool> {
        self.pool.read().clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool().stats()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.dispatcher.cache().map(|c| c.stats())
    }

    pub fn history_len(&self, stream: &StreamId) -> usize {
        self.smoother.history_len(stream)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn cycle_log_file(&self) -> Option<PathBuf> {
        self.recorder
            .as_ref()
            .map(|r| r.lock().current_file().to_path_buf())
    }
}
