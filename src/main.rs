//! Gesture Replay - feeds recorded frames through the engine
//!
//! Usage:
//!   gesture-replay <frames.jsonl> [--config <smoothing.json>] [--metrics <metrics.json>] [--log-dir <dir>]
//!
//! One frame per line:
//!   {"timestamp": "2026-01-01T00:00:00Z", "streams": [{"stream": {"slot": 0, "role": "left"}, "features": [..]}]}
//!
//! `GESTURE_*` environment variables apply as in the library.

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use gesture_core::constants::{APP_NAME, APP_VERSION};
use gesture_core::{FeatureVector, GestureResult, GestureType, PredictorBuilder, SmoothingConfig, StreamId};

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    streams: Vec<FrameStream>,
}

#[derive(Debug, Deserialize)]
struct FrameStream {
    stream: StreamId,
    features: Vec<f32>,
}

/// Replay recorded gesture frames through the engine
#[derive(Parser, Debug)]
#[command(name = "gesture-replay", version, about)]
struct Args {
    /// JSONL file with one frame per line
    frames: PathBuf,

    /// Smoothing config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Offline metrics JSON for threshold calibration
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Directory for the JSONL cycle log
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn run(args: Args) -> GestureResult<()> {
    let mut builder = PredictorBuilder::from_env()?;
    if let Some(path) = &args.config {
        builder = builder.config(SmoothingConfig::load(path)?);
    }
    if let Some(path) = args.metrics {
        builder = builder.metrics_file(path);
    }
    if let Some(dir) = args.log_dir {
        builder = builder.cycle_log(dir);
    }
    let predictor = builder.build()?;
    let layout = predictor.layout().clone();

    let reader = BufReader::new(std::fs::File::open(&args.frames)?);
    let mut skipped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Line {}: invalid frame ({})", line_no + 1, e);
                skipped += 1;
                continue;
            }
        };

        let batch: Vec<(StreamId, FeatureVector)> = frame
            .streams
            .into_iter()
            .map(|s| (s.stream, FeatureVector::with_layout(&layout, s.features)))
            .collect();

        let result = match predictor.process_at(&batch, frame.timestamp.unwrap_or_else(Utc::now)) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Line {}: {}", line_no + 1, e);
                skipped += 1;
                continue;
            }
        };

        println!(
            "{}\t{}\t{:.3}ms\t{}",
            result.cycle_id,
            result.combined_label,
            result.latency_us as f64 / 1000.0,
            GestureType::from_label(&result.combined_label)
                .map(|g| g.description())
                .unwrap_or("")
        );
    }

    let snapshot = predictor.metrics();
    log::info!(
        "Replayed {} cycles ({} skipped), avg latency {:.3}ms",
        predictor.cycles(),
        skipped,
        snapshot.lifetime_average_ms
    );
    println!("{}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{} ({})", e, e.kind());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_frames_and_options() {
        let args = Args::try_parse_from([
            "gesture-replay",
            "frames.jsonl",
            "--metrics",
            "metrics.json",
            "--log-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(args.frames, PathBuf::from("frames.jsonl"));
        assert_eq!(args.metrics, Some(PathBuf::from("metrics.json")));
        assert_eq!(args.log_dir, Some(PathBuf::from("out")));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_missing_frames_or_unknown_option_is_rejected() {
        assert!(Args::try_parse_from(["gesture-replay"]).is_err());
        assert!(Args::try_parse_from(["gesture-replay", "f.jsonl", "--bogus"]).is_err());
        assert!(Args::try_parse_from(["gesture-replay", "f.jsonl", "--config"]).is_err());
    }
}
