//! Cycle Recorder
//!
//! Append-only JSONL writer for cycle events, rotated by size.

use chrono::{Datelike, Timelike, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::event::CycleEvent;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum file size before rotation (20 MB)
pub const MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Log file extension
const LOG_EXT: &str = "jsonl";

// ============================================================================
// RECORDER
// ============================================================================

pub struct CycleRecorder {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
    base_dir: PathBuf,
    max_file_size: u64,
    sequence: u32,
    events_recorded: u64,
}

impl CycleRecorder {
    pub fn new(base_dir: PathBuf) -> std::io::Result<Self> {
        Self::with_max_size(base_dir, MAX_FILE_SIZE)
    }

    pub fn with_max_size(base_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let (file_path, file) = Self::open_new_file(&base_dir, 0)?;

        Ok(Self {
            writer: BufWriter::new(file),
            current_file: file_path,
            current_size: 0,
            base_dir,
            max_file_size: max_file_size.max(1),
            sequence: 0,
            events_recorded: 0,
        })
    }

    /// Open a new log file named by timestamp and rotation sequence
    fn open_new_file(base_dir: &Path, sequence: u32) -> std::io::Result<(PathBuf, File)> {
        let now = Utc::now();
        let filename = format!(
            "cycles_{}_{:02}_{:02}_{:02}{:02}{:02}_{:03}.{}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            sequence,
            LOG_EXT
        );
        let file_path = base_dir.join(&filename);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        log::info!("Opened cycle log: {:?}", file_path);
        Ok((file_path, file))
    }

    pub fn record(&mut self, event: &CycleEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();

        if self.current_size > 0 && self.current_size + bytes.len() as u64 + 1 > self.max_file_size {
            self.rotate()?;
        }

        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;
        self.writer.flush()?;

        self.events_recorded += 1;
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;

        self.sequence = self.sequence.wrapping_add(1);
        let (new_path, new_file) = Self::open_new_file(&self.base_dir, self.sequence)?;
        self.writer = BufWriter::new(new_file);

        log::info!("Rotated from {:?} to {:?}", self.current_file, new_path);
        self.current_file = new_path;
        self.current_size = 0;

        Ok(())
    }

    pub fn current_file(&self) -> &Path {
        &self.current_file
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn events_count(&self) -> u64 {
        self.events_recorded
    }
}

impl Drop for CycleRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("Failed to flush cycle log: {}", e);
        }
    }
}

// ============================================================================
// QUERY API
// ============================================================================

/// Read all events from a log file, skipping unparseable lines
pub fn read_events(file_path: &Path) -> std::io::Result<Vec<CycleEvent>> {
    let reader = BufReader::new(File::open(file_path)?);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CycleEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => log::debug!("Skipping malformed cycle line: {}", e),
        }
    }

    Ok(events)
}

/// Count of each combined label across a log file
pub fn count_labels(file_path: &Path) -> std::io::Result<std::collections::BTreeMap<String, u64>> {
    let mut counts = std::collections::BTreeMap::new();
    for event in read_events(file_path)? {
        if let Some(label) = event.combined_label {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// All log files in a directory, oldest first
pub fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == LOG_EXT) {
                files.push(path);
            }
        }
    }

    // Names carry the timestamp
    files.sort();
    Ok(files)
}

// ============================================================================
// TESTS
// ============================================================================
