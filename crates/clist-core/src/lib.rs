//! Core domain model for the cause-list ingester.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "clist-core";

/// Upper bound on the source text kept with each entry.
pub const MAX_RAW_TEXT_CHARS: usize = 500;

/// Number of progress lines retained by a run (newest first).
pub const PROGRESS_LOG_CAPACITY: usize = 50;

/// One scheduled hearing item from a court's cause list.
///
/// Identity within a document is `(serial_no, case_no)`. Connected cases share
/// a serial but never a case number. Text fields that could not be extracted
/// are left empty rather than failing the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CauseEntry {
    pub serial_no: String,
    pub court_no: String,
    pub case_no: String,
    pub petitioner: String,
    pub respondent: String,
    pub advocate: String,
    pub case_type: String,
    pub hearing_date: NaiveDate,
    pub hearing_time: Option<NaiveTime>,
    pub raw_text: String,
    pub is_flagged: bool,
}

impl CauseEntry {
    pub fn new(
        serial_no: impl Into<String>,
        court_no: impl Into<String>,
        case_no: impl Into<String>,
        hearing_date: NaiveDate,
    ) -> Self {
        Self {
            serial_no: serial_no.into(),
            court_no: court_no.into(),
            case_no: case_no.into(),
            petitioner: String::new(),
            respondent: String::new(),
            advocate: String::new(),
            case_type: String::new(),
            hearing_date,
            hearing_time: None,
            raw_text: String::new(),
            is_flagged: false,
        }
    }

    /// An entry without a case number cannot be searched or reconciled.
    pub fn is_usable(&self) -> bool {
        !self.case_no.trim().is_empty()
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.serial_no, &self.case_no)
    }

    pub fn set_raw_text(&mut self, text: &str) {
        self.raw_text = bounded_text(text, MAX_RAW_TEXT_CHARS);
    }
}

/// Trim and cut `text` to at most `max_chars` characters (not bytes).
pub fn bounded_text(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => trimmed[..byte_idx].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Error,
    Running,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Error => "ERROR",
            RunStatus::Running => "RUNNING",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(RunStatus::Success),
            "ERROR" => Some(RunStatus::Error),
            "RUNNING" => Some(RunStatus::Running),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted audit record, one per ingestion run. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: Uuid,
    pub status: RunStatus,
    pub records_extracted: u64,
    pub notes: Option<String>,
    pub run_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn new(
        status: RunStatus,
        records_extracted: u64,
        notes: Option<String>,
        run_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            records_extracted,
            notes,
            run_date,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Point-in-time copy of the run state handed to progress pollers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunProgress {
    pub running: bool,
    pub cancel_requested: bool,
    pub current_action: String,
    pub logs: Vec<ProgressLine>,
}

/// Result of one `trigger` call as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub status: RunStatus,
    pub records_extracted: u64,
    pub notes: Option<String>,
    pub synthetic: bool,
}

/// Summary of the most recent run plus the size of the stored list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    NeverRun,
    LastRun {
        last_status: RunStatus,
        last_run: NaiveDate,
        last_extraction_count: u64,
        total_records: u64,
    },
}

impl IngestStatus {
    pub fn from_latest(latest: Option<&RunLogEntry>, total_records: u64) -> Self {
        match latest {
            None => IngestStatus::NeverRun,
            Some(entry) => IngestStatus::LastRun {
                last_status: entry.status,
                last_run: entry.run_date,
                last_extraction_count: entry.records_extracted,
                total_records,
            },
        }
    }
}
