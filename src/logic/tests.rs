use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::config::{ConfigParam, SmoothingConfig};
use super::dispatch::StreamDispatcher;
use super::features::{FeatureLayout, FeatureVector};
use super::model::{ClassScores, Classifier, ThresholdConfig, WorkerPool};
use super::predictor::Predictor;
use super::stream::{Handedness, StreamId};
use super::telemetry::read_events;
use crate::error::{GestureError, GestureResult};

/// Fails on any vector whose first value is negative
struct MarkerClassifier;

impl Classifier for MarkerClassifier {
    fn name(&self) -> &str {
        "marker"
    }

    fn classify(&self, features: &[f32]) -> GestureResult<ClassScores> {
        if features.first().copied().unwrap_or(0.0) < 0.0 {
            return Err(GestureError::inference("marker rejected frame"));
        }
        Ok(ClassScores::new(vec![("point".to_string(), 0.7), ("fist".to_string(), 0.3)]))
    }
}

/// Reports entry, then blocks until released
struct GatedClassifier {
    entered: SyncSender<()>,
    release: Arc<parking_lot::Mutex<Receiver<()>>>,
}

impl Classifier for GatedClassifier {
    fn name(&self) -> &str {
        "gated"
    }

    fn classify(&self, _features: &[f32]) -> GestureResult<ClassScores> {
        let _ = self.entered.send(());
        let _ = self.release.lock().recv();
        Ok(ClassScores::new(vec![("point".to_string(), 0.7)]))
    }
}

fn hand(layout: &FeatureLayout, extended: &[&str]) -> FeatureVector {
    let mut features = FeatureVector::zeroed(layout);
    for finger in extended {
        assert!(features.set_by_name(layout, &format!("{}_extension", finger), 1.0));
    }
    features
}

fn fist(layout: &FeatureLayout) -> FeatureVector {
    hand(layout, &[])
}

fn peace(layout: &FeatureLayout) -> FeatureVector {
    hand(layout, &["index", "middle"])
}

fn predictor() -> Predictor {
    Predictor::builder().no_cache().build().unwrap()
}

#[test]
fn test_concurrent_dispatch_isolates_failing_stream() {
    let pool = WorkerPool::from_instances(
        vec![Box::new(MarkerClassifier), Box::new(MarkerClassifier)],
        None,
        Duration::from_millis(500),
    )
    .unwrap();
    let dispatcher = StreamDispatcher::default();
    let config = SmoothingConfig {
        concurrency_enabled: true,
        max_concurrent_inferences: 2,
        ..Default::default()
    };

    let batch = vec![
        (StreamId::left(), FeatureVector::from_vec(vec![-1.0, 0.0])),
        (StreamId::right(), FeatureVector::from_vec(vec![1.0, 0.0])),
    ];

    let samples = dispatcher.predict(&pool, &batch, &config, Utc::now());
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].stream, StreamId::right());
    assert_eq!(samples[0].label, "point");

    // Both workers back in the pool
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_sequential_dispatch_matches_concurrent() {
    let pool = WorkerPool::from_instances(vec![Box::new(MarkerClassifier)], None, Duration::from_millis(200)).unwrap();
    let dispatcher = StreamDispatcher::default();
    let config = SmoothingConfig {
        concurrency_enabled: false,
        ..Default::default()
    };

    let batch = vec![
        (StreamId::left(), FeatureVector::from_vec(vec![1.0])),
        (StreamId::right(), FeatureVector::from_vec(vec![-1.0])),
    ];
    let outcomes = dispatcher.dispatch(&pool, &batch, &config, Utc::now());
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(GestureError::InferenceFailure(_))));
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_empty_batch_has_no_side_effects() {
    let predictor = predictor();
    let result = predictor.process(&[]).unwrap();

    assert!(result.verdicts.is_empty());
    assert!(result.is_unknown());
    assert_eq!(predictor.cycles(), 0);
    assert_eq!(predictor.metrics().recorded, 0);
}

#[test]
fn test_two_hands_combined_label() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    let result = predictor
        .process(&[(StreamId::right(), peace(&layout)), (StreamId::left(), fist(&layout))])
        .unwrap();

    // Fist at 0.9 bypasses smoothing, peace at 0.8 is warming up
    assert_eq!(result.verdict(&StreamId::left()).unwrap().label(), "fist");
    assert_eq!(result.verdict(&StreamId::right()).unwrap().label(), "peace");
    assert_eq!(result.combined_label, "fist+peace");
    assert_eq!(result.verdicts[0].stream, StreamId::left());
    assert_eq!(predictor.metrics().count, 1);
}

#[test]
fn test_batch_validation_errors_are_configuration_errors() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    let too_many = vec![
        (StreamId::left(), fist(&layout)),
        (StreamId::right(), fist(&layout)),
        (StreamId::new(1, Handedness::Unassigned), fist(&layout)),
    ];
    assert!(matches!(predictor.process(&too_many), Err(GestureError::Configuration(_))));

    let duplicate = vec![(StreamId::left(), fist(&layout)), (StreamId::new(0, Handedness::Right), fist(&layout))];
    assert!(matches!(predictor.process(&duplicate), Err(GestureError::Configuration(_))));

    let bad_slot = vec![(StreamId::new(5, Handedness::Unassigned), fist(&layout))];
    assert!(matches!(predictor.process(&bad_slot), Err(GestureError::Configuration(_))));

    let short = vec![(StreamId::left(), FeatureVector::from_vec(vec![0.0; 3]))];
    assert!(matches!(predictor.process(&short), Err(GestureError::Configuration(_))));

    assert_eq!(predictor.cycles(), 0);
}

#[test]
fn test_config_update_clears_history_and_resizes_pool() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    predictor.process(&[(StreamId::right(), peace(&layout))]).unwrap();
    assert_eq!(predictor.history_len(&StreamId::right()), 1);

    predictor.update_config(ConfigParam::TimeWindow(1.0)).unwrap();
    assert_eq!(predictor.history_len(&StreamId::right()), 0);
    assert_eq!(predictor.config().time_window_secs, 1.0);

    predictor.update_config(ConfigParam::MaxConcurrentInferences(3)).unwrap();
    assert_eq!(predictor.pool_stats().capacity, 3);

    // Rejected update leaves everything in place
    assert!(predictor.update_config(ConfigParam::MaxConcurrentInferences(0)).is_err());
    assert_eq!(predictor.pool_stats().capacity, 3);
    assert_eq!(predictor.config().max_concurrent_inferences, 3);
}

#[test]
fn test_calibration_is_fail_soft() {
    let predictor = predictor();
    let layout = predictor.layout().clone();
    let batch = [(StreamId::left(), fist(&layout)), (StreamId::right(), peace(&layout))];

    assert!(predictor.calibrate_json("{not json").is_err());
    assert!(predictor.thresholds().is_empty());

    // Poor offline metrics for peace push its threshold to 0.9
    let table = predictor
        .calibrate_json(r#"{"test": {"peace": {"precision": 0.0, "recall": 0.0, "f1": 0.0}}}"#)
        .unwrap();
    assert!((table.lookup("peace") - 0.9).abs() < 1e-6);

    let result = predictor.process(&batch).unwrap();
    assert!(!result.verdict(&StreamId::right()).unwrap().accepted);
    assert_eq!(result.combined_label, "fist");

    // Out-of-range metric rejected, previous table kept
    let bad = r#"{"test": {"peace": {"precision": 1.5, "recall": 0.5, "f1": 0.5}}}"#;
    assert!(matches!(predictor.calibrate_json(bad), Err(GestureError::CalibrationData(_))));
    assert!((predictor.thresholds().lookup("peace") - 0.9).abs() < 1e-6);
}

#[test]
fn test_events_reach_callbacks_and_subscribers() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    let fists = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fists);
    predictor.events().on_gesture("fist", move |sample| {
        assert_eq!(sample.stream, StreamId::left());
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let rx = predictor.events().subscribe();

    predictor.process(&[(StreamId::left(), fist(&layout))]).unwrap();
    predictor.process(&[(StreamId::left(), fist(&layout))]).unwrap();

    assert_eq!(fists.load(Ordering::SeqCst), 2);
    let first = rx.try_recv().unwrap();
    assert_eq!(first.cycle_id, 1);
    assert_eq!(rx.try_recv().unwrap().cycle_id, 2);
}

#[test]
fn test_feature_cache_skips_repeat_inference() {
    let predictor = Predictor::builder().build().unwrap();
    let layout = predictor.layout().clone();
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    let first = predictor.process_at(&[(StreamId::left(), fist(&layout))], t0).unwrap();
    let second = predictor
        .process_at(&[(StreamId::left(), fist(&layout))], t0 + chrono::Duration::milliseconds(33))
        .unwrap();

    assert!(!first.verdicts[0].cached);
    assert!(second.verdicts[0].cached);
    assert_eq!(second.combined_label, "fist");
    assert_eq!(predictor.cache_stats().unwrap().hits, 1);
}

#[test]
fn test_shared_fallback_serves_when_factory_fails() {
    let predictor = Predictor::builder()
        .no_cache()
        .factory(|_| Err(GestureError::inference("model missing")))
        .heuristic_fallback()
        .unwrap()
        .build()
        .unwrap();
    let layout = predictor.layout().clone();

    let stats = predictor.pool_stats();
    assert_eq!(stats.capacity, 0);
    assert!(stats.has_fallback);

    let result = predictor
        .process(&[(StreamId::left(), fist(&layout)), (StreamId::right(), peace(&layout))])
        .unwrap();
    assert_eq!(result.combined_label, "fist+peace");
}

#[test]
fn test_no_instances_and_no_fallback_fails_build() {
    let result = Predictor::builder()
        .factory(|_| Err(GestureError::inference("model missing")))
        .build();
    assert!(matches!(result, Err(GestureError::ResourceExhaustion(_))));
}

#[test]
fn test_cycle_log_records_each_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = Predictor::builder().no_cache().cycle_log(dir.path()).build().unwrap();
    let layout = predictor.layout().clone();

    predictor.process(&[(StreamId::left(), fist(&layout))]).unwrap();
    predictor.update_config(ConfigParam::MinStableFrames(2)).unwrap();
    predictor.process(&[(StreamId::right(), peace(&layout))]).unwrap();

    let events = read_events(&predictor.cycle_log_file().unwrap()).unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].combined_label.as_deref(), Some("fist"));
    assert_eq!(events[1].event_type.as_str(), "config_changed");
    assert_eq!(events[2].streams[0].path.as_deref(), Some("warming_up"));
}

#[test]
fn test_concurrent_cycles_and_config_updates() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    std::thread::scope(|s| {
        for _ in 0..4 {
            let predictor = &predictor;
            let layout = &layout;
            s.spawn(move || {
                for _ in 0..50 {
                    let result = predictor
                        .process(&[(StreamId::left(), fist(layout)), (StreamId::right(), peace(layout))])
                        .unwrap();
                    assert_eq!(result.verdicts.len(), 2);
                }
            });
        }
        s.spawn(|| {
            for capacity in [1, 3, 2] {
                predictor
                    .update_config(ConfigParam::MaxConcurrentInferences(capacity))
                    .unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
        });
    });

    assert_eq!(predictor.cycles(), 200);
    assert_eq!(predictor.pool_stats().capacity, 2);
}

#[test]
fn test_unrecognized_hand_is_unknown_not_none() {
    let predictor = predictor();
    let layout = predictor.layout().clone();

    // Index and ring extended with an open thumb matches no rule
    let mut odd = hand(&layout, &["index", "ring"]);
    assert!(odd.set_by_name(&layout, "thumb_index_distance", 0.3));

    let result = predictor
        .process(&[(StreamId::left(), fist(&layout)), (StreamId::right(), odd)])
        .unwrap();

    let right = result.verdict(&StreamId::right()).unwrap();
    assert_eq!(right.raw.as_ref().unwrap().label, "none");
    assert!(!right.accepted);
    assert_eq!(right.label(), "unknown");
    assert_eq!(result.combined_label, "fist");
}

#[test]
fn test_none_label_never_fires_callbacks() {
    let predictor = predictor();
    let layout = predictor.layout().clone();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    predictor.events().on_gesture("none", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut odd = hand(&layout, &["index", "ring"]);
    assert!(odd.set_by_name(&layout, "thumb_index_distance", 0.3));
    for _ in 0..5 {
        let result = predictor.process(&[(StreamId::left(), odd.clone())]).unwrap();
        assert!(result.is_unknown());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_invalid_threshold_config_fails_build() {
    let inverted = ThresholdConfig {
        min_threshold: 0.9,
        max_threshold: 0.3,
        ..Default::default()
    };
    let result = Predictor::builder().thresholds(inverted).build();
    assert!(matches!(result, Err(GestureError::Configuration(_))));

    let nan = ThresholdConfig {
        default_threshold: f32::NAN,
        ..Default::default()
    };
    assert!(matches!(
        Predictor::builder().thresholds(nan).build(),
        Err(GestureError::Configuration(_))
    ));
}

#[test]
fn test_confidence_equal_to_threshold_is_rejected() {
    let at_threshold = Predictor::builder()
        .no_cache()
        .factory(|_: usize| -> GestureResult<Box<dyn Classifier>> { Ok(Box::new(MarkerClassifier)) })
        .thresholds(ThresholdConfig {
            default_threshold: 0.7,
            ..Default::default()
        })
        .build()
        .unwrap();
    let batch = [(StreamId::left(), FeatureVector::from_vec(vec![0.0; 30]))];

    // Marker reports point at 0.7, warming up passes it through unchanged
    let result = at_threshold.process(&batch).unwrap();
    let verdict = result.verdict(&StreamId::left()).unwrap();
    assert_eq!(verdict.threshold, Some(0.7));
    assert!(!verdict.accepted);
    assert_eq!(result.combined_label, "unknown");

    let below = Predictor::builder()
        .no_cache()
        .factory(|_: usize| -> GestureResult<Box<dyn Classifier>> { Ok(Box::new(MarkerClassifier)) })
        .thresholds(ThresholdConfig {
            default_threshold: 0.69,
            ..Default::default()
        })
        .build()
        .unwrap();
    assert_eq!(below.process(&batch).unwrap().combined_label, "point");
}

#[test]
fn test_cycle_in_flight_during_config_update_leaves_history_clear() {
    let (entered_tx, entered_rx) = mpsc::sync_channel(4);
    let (release_tx, release_rx) = mpsc::sync_channel(4);
    let release = Arc::new(parking_lot::Mutex::new(release_rx));

    let predictor = Predictor::builder()
        .no_cache()
        .factory(move |_: usize| -> GestureResult<Box<dyn Classifier>> {
            Ok(Box::new(GatedClassifier {
                entered: entered_tx.clone(),
                release: Arc::clone(&release),
            }))
        })
        .build()
        .unwrap();
    let batch = [(StreamId::left(), FeatureVector::from_vec(vec![0.0; 30]))];

    std::thread::scope(|s| {
        let cycle = s.spawn(|| predictor.process(&batch).unwrap());

        // Cycle holds its old snapshot while the update lands
        entered_rx.recv().unwrap();
        predictor.update_config(ConfigParam::TimeWindow(1.0)).unwrap();
        release_tx.send(()).unwrap();

        let result = cycle.join().unwrap();
        let verdict = result.verdict(&StreamId::left()).unwrap();
        assert_eq!(verdict.decision.as_ref().unwrap().path(), "stale");
        assert!(!verdict.accepted);
    });

    assert_eq!(predictor.history_len(&StreamId::left()), 0);

    // Next cycle uses the new generation and records normally
    release_tx.send(()).unwrap();
    predictor.process(&batch).unwrap();
    assert_eq!(predictor.history_len(&StreamId::left()), 1);
}
