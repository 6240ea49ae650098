//! Per-task progress records
//!
//! Each task owns one JSON file under `<home>/progress/`. Writers merge into
//! the existing record and overwrite it whole; readers poll without any
//! coordination. When no record exists yet, the reader falls back to
//! inferring one from the job ledger.

use std::fmt;
use std::fs;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::ledger::{Job, JobLedger, JobStatus};
use crate::storage::Storage;

/// Status published in a progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Validate,
    Cache,
    Cloning,
    Mapped,
    Analyzing,
    Documenting,
    Done,
    Completed,
    Error,
    Timeout,
    Canceled,
    Pending,
    Unknown,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Starting => "starting",
            ProgressStatus::Validate => "validate",
            ProgressStatus::Cache => "cache",
            ProgressStatus::Cloning => "cloning",
            ProgressStatus::Mapped => "mapped",
            ProgressStatus::Analyzing => "analyzing",
            ProgressStatus::Documenting => "documenting",
            ProgressStatus::Done => "done",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
            ProgressStatus::Timeout => "timeout",
            ProgressStatus::Canceled => "canceled",
            ProgressStatus::Pending => "pending",
            ProgressStatus::Unknown => "unknown",
        }
    }

    /// Human label shown by pollers.
    pub fn label(&self) -> &'static str {
        match self {
            ProgressStatus::Starting => "Starting",
            ProgressStatus::Validate => "Validating",
            ProgressStatus::Cache => "Caching",
            ProgressStatus::Cloning => "Cloning",
            ProgressStatus::Mapped => "Mapped",
            ProgressStatus::Analyzing => "Analyzing",
            ProgressStatus::Documenting => "Documenting",
            ProgressStatus::Done => "Done",
            ProgressStatus::Completed => "Completed",
            ProgressStatus::Error => "Error",
            ProgressStatus::Timeout => "Timeout",
            ProgressStatus::Canceled => "Canceled",
            ProgressStatus::Pending => "Pending",
            ProgressStatus::Unknown => "Unknown",
        }
    }

    /// No further progress will be published for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Done
                | ProgressStatus::Completed
                | ProgressStatus::Error
                | ProgressStatus::Timeout
                | ProgressStatus::Canceled
        )
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        serde_json::from_value(Value::String(value.trim().to_ascii_lowercase()))
            .map_err(|_| Error::InvalidArgument(format!("unknown progress status '{value}'")))
    }
}

/// Progress snapshot for one task
///
/// Deserialization is lenient: a known key holding a value of the wrong type
/// (a numeric `stage`, a null `message`) stays in `extra` under its own name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ProgressRecord {
    pub task_id: String,
    pub status: ProgressStatus,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_path: Option<String>,
    /// Any other keys writers merged in (`cached`, `action`, `stderr`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressRecord {
    pub fn new(task_id: impl Into<String>, status: ProgressStatus, percent: u8) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            percent,
            stage: None,
            message: None,
            canceled: None,
            doc_path: None,
            extra: Map::new(),
        }
    }

    /// Record for a task nobody has heard of.
    pub fn unknown(task_id: impl Into<String>) -> Self {
        Self::new(task_id, ProgressStatus::Unknown, 0)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.unwrap_or(false)
    }

    /// Look up a merged key that has no dedicated field.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for ProgressRecord {
    fn from(mut fields: Map<String, Value>) -> Self {
        let task_id = match fields.remove("task_id") {
            Some(Value::String(id)) => id,
            _ => String::new(),
        };
        let status = fields
            .remove("status")
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(ProgressStatus::Unknown);
        let percent = fields
            .remove("percent")
            .and_then(|value| value.as_f64())
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);

        let mut record = ProgressRecord::new(task_id, status, percent);
        record.stage = take_string(&mut fields, "stage");
        record.message = take_string(&mut fields, "message");
        record.doc_path = take_string(&mut fields, "doc_path");
        if let Some(Value::Bool(flag)) = fields.get("canceled") {
            record.canceled = Some(*flag);
            fields.remove("canceled");
        }
        record.extra = fields;
        record
    }
}

/// Move `key` out of `fields` only when it holds a string.
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

/// Percent published for a ledger stage when no progress file exists.
pub fn stage_percent(stage: Option<&str>) -> u8 {
    match stage {
        Some("validate") => 5,
        Some("cache") => 15,
        Some("clone") => 40,
        Some("map") | Some("mapped") => 60,
        Some("analyze") => 75,
        Some("analyzed") => 80,
        Some("docs") => 90,
        Some("complete") => 100,
        _ => 10,
    }
}

/// Derive a progress record from a ledger job.
pub fn infer_from_job(job: &Job) -> ProgressRecord {
    let stage = job.details.get("stage").and_then(Value::as_str);
    let mut percent = stage_percent(stage);

    let status = match job.status {
        JobStatus::Completed => {
            percent = 100;
            ProgressStatus::Done
        }
        JobStatus::Error => {
            percent = percent.max(100);
            ProgressStatus::Error
        }
        JobStatus::Timeout => {
            percent = percent.max(100);
            ProgressStatus::Timeout
        }
        JobStatus::Canceled => ProgressStatus::Canceled,
        JobStatus::Pending | JobStatus::InProgress => ProgressStatus::Pending,
    };

    let mut record = ProgressRecord::new(job.id.clone(), status, percent);
    record.stage = stage.map(str::to_string);
    record.message = job
        .details
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| job.details.get("note").and_then(Value::as_str))
        .map(str::to_string);
    record.doc_path = job
        .details
        .get("doc_path")
        .and_then(Value::as_str)
        .map(str::to_string);
    record
}

/// Reader/writer for progress records
#[derive(Debug, Clone)]
pub struct ProgressStore {
    storage: Storage,
    ledger: JobLedger,
}

impl ProgressStore {
    pub fn new(storage: Storage) -> Self {
        let ledger = JobLedger::for_storage(&storage);
        Self { storage, ledger }
    }

    /// Current record, falling back to ledger inference, then `unknown`.
    pub fn get(&self, task_id: &str) -> ProgressRecord {
        if let Some(record) = self.read_persisted(task_id) {
            return record;
        }

        match self.ledger.get(task_id) {
            Some(job) => infer_from_job(&job),
            None => ProgressRecord::unknown(task_id),
        }
    }

    /// Publish a status and percent, merging `extra` into the record.
    ///
    /// `extra` is expected to be a JSON object; other values are ignored.
    pub fn set(&self, task_id: &str, status: ProgressStatus, percent: i64, extra: Option<Value>) {
        let mut fields = self.current_fields(task_id);
        if let Some(Value::Object(extra)) = extra {
            fields.extend(extra);
        }
        fields.insert("task_id".to_string(), Value::from(task_id));
        fields.insert("status".to_string(), Value::from(status.as_str()));
        fields.insert("percent".to_string(), Value::from(percent.clamp(0, 100)));

        tracing::debug!(task_id, %status, percent, "progress");
        self.persist(task_id, fields);
    }

    /// Flag the task canceled, keeping its percent.
    pub fn mark_canceled(&self, task_id: &str, message: Option<&str>) {
        let mut fields = self.current_fields(task_id);
        fields.insert("task_id".to_string(), Value::from(task_id));
        fields.insert(
            "status".to_string(),
            Value::from(ProgressStatus::Canceled.as_str()),
        );
        fields.entry("percent").or_insert_with(|| Value::from(0));
        fields.insert("canceled".to_string(), Value::Bool(true));
        if let Some(message) = message.filter(|m| !m.is_empty()) {
            fields.insert("message".to_string(), Value::from(message));
        }

        tracing::debug!(task_id, "progress canceled");
        self.persist(task_id, fields);
    }

    pub fn is_canceled(&self, task_id: &str) -> bool {
        self.get(task_id).is_canceled()
    }

    /// Remove the record; absent records are fine.
    pub fn clear(&self, task_id: &str) {
        let path = self.storage.progress_file(task_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(task_id, path = %path.display(), error = %err, "failed to clear progress")
            }
        }
    }

    fn read_persisted(&self, task_id: &str) -> Option<ProgressRecord> {
        let path = self.storage.progress_file(task_id);
        if !path.exists() {
            return None;
        }
        match self.storage.read_json::<ProgressRecord>(&path) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::debug!(task_id, error = %err, "unreadable progress record");
                None
            }
        }
    }

    fn current_fields(&self, task_id: &str) -> Map<String, Value> {
        match serde_json::to_value(self.get(task_id)) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Write the merged fields as-is. A cancel that landed on disk since the
    /// fields were read is carried forward.
    fn persist(&self, task_id: &str, mut fields: Map<String, Value>) {
        if self
            .read_persisted(task_id)
            .is_some_and(|record| record.is_canceled())
        {
            fields.insert("canceled".to_string(), Value::Bool(true));
        }

        let path = self.storage.progress_file(task_id);
        if let Err(err) = self.storage.write_json(&path, &Value::Object(fields)) {
            tracing::warn!(task_id, error = %err, "failed to persist progress");
        }
    }
}
