//! Append-only workout history.
//!
//! Completed sessions are appended to a JSONL (JSON Lines) file with
//! file locking for safe concurrent access, and can be exported to CSV
//! for analysis elsewhere.

use crate::{CompletionSummary, Result, SessionDetail};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One completed workout session as recorded in history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: u64,
    pub user_id: u64,
    pub exercise: String,
    pub level: u32,
    pub completed_at: DateTime<Utc>,
    pub total_reps_completed: u32,
    pub total_reps_failed: u32,
    pub total_calories_burned: f64,
    pub duration_seconds: f64,
    pub experience_gained: u32,
}

impl SessionRecord {
    /// Build a history record from a completed session and its summary
    pub fn from_completion(detail: &SessionDetail, summary: &CompletionSummary) -> Self {
        Self {
            session_id: summary.session_id,
            user_id: detail.session.user_id,
            exercise: detail.exercise.name.clone(),
            level: detail.level.level,
            completed_at: detail.session.end_time.unwrap_or_else(Utc::now),
            total_reps_completed: summary.total_reps_completed,
            total_reps_failed: summary.total_reps_failed,
            total_calories_burned: summary.total_calories_burned,
            duration_seconds: summary.duration_seconds,
            experience_gained: summary.experience_gained,
        }
    }
}

/// History sink trait for persisting completed sessions
pub trait HistorySink {
    fn append(&mut self, record: &SessionRecord) -> Result<()>;
}

/// JSONL-based history sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl HistorySink for JsonlSink {
    fn append(&mut self, record: &SessionRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!(session_id = record.session_id, "appended session to history");
        Ok(())
    }
}

/// Read all records from a history file, skipping unparseable lines
pub fn read_records(path: &Path) -> Result<Vec<SessionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SessionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("failed to parse history line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("read {} records from history", records.len());
    Ok(records)
}

/// CSV row format for exported history
#[derive(Debug, Serialize)]
struct CsvRow {
    session_id: u64,
    user_id: u64,
    exercise: String,
    level: u32,
    completed_at: String,
    reps_completed: u32,
    reps_failed: u32,
    calories: f64,
    duration_seconds: f64,
    experience: u32,
}

impl From<&SessionRecord> for CsvRow {
    fn from(record: &SessionRecord) -> Self {
        CsvRow {
            session_id: record.session_id,
            user_id: record.user_id,
            exercise: record.exercise.clone(),
            level: record.level,
            completed_at: record.completed_at.to_rfc3339(),
            reps_completed: record.total_reps_completed,
            reps_failed: record.total_reps_failed,
            calories: record.total_calories_burned,
            duration_seconds: record.duration_seconds,
            experience: record.experience_gained,
        }
    }
}

/// Export the full history to a CSV file, returning the row count.
///
/// The CSV is written to a temp file in the target directory, synced,
/// and renamed over the destination so readers never see a partial
/// export.
pub fn export_csv(history_path: &Path, csv_path: &Path) -> Result<usize> {
    let records = read_records(history_path)?;

    let parent = csv_path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "csv path missing parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let temp = tempfile::NamedTempFile::new_in(parent)?;
    let mut writer = csv::Writer::from_writer(temp.as_file());

    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    drop(writer);
    temp.as_file().sync_all()?;
    temp.persist(csv_path).map_err(|e| crate::Error::Io(e.error))?;

    tracing::info!("exported {} history records to CSV", records.len());
    Ok(records.len())
}
