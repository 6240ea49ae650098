//! Job ledger
//!
//! All jobs live in one JSON array at `<home>/jobs.json`. Every mutation
//! reads the whole array, changes one record and rewrites the array, with
//! the writer lock held for the duration so mutations never interleave.
//!
//! The ledger is an observability aid: the public mutation methods log and
//! swallow persistence failures. `try_*` variants surface them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::Storage;

/// Default priority for new jobs
pub const DEFAULT_PRIORITY: &str = "medium";

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Canceled,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Canceled => "canceled",
            JobStatus::Error => "error",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Error | JobStatus::Timeout
        )
    }

    /// Role shown alongside a job in this status.
    pub fn agent(&self) -> AgentRole {
        match self {
            JobStatus::Completed => AgentRole::DocGenerator,
            JobStatus::Error | JobStatus::Canceled | JobStatus::Timeout => AgentRole::Supervisor,
            JobStatus::Pending | JobStatus::InProgress => AgentRole::CodeAnalyzer,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" | "in-progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "canceled" | "cancelled" => Ok(JobStatus::Canceled),
            "error" => Ok(JobStatus::Error),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(Error::InvalidArgument(format!(
                "unknown job status '{other}' (expected pending|in_progress|completed|canceled|error|timeout)"
            ))),
        }
    }
}

/// Display role attached to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    CodeAnalyzer,
    DocGenerator,
    Supervisor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::CodeAnalyzer => "CodeAnalyzer",
            AgentRole::DocGenerator => "DocGenerator",
            AgentRole::Supervisor => "Supervisor",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub status: JobStatus,
}

/// Ledger record for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub repo_url: String,
    pub status: JobStatus,
    pub agent: AgentRole,
    pub priority: String,
    /// Local creation time, to the second, for listing consumers
    #[serde(default)]
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Job {
    /// Fresh pending job.
    pub fn new(id: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut details = Map::new();
        details.insert("stage".to_string(), Value::from("start"));

        Self {
            id: id.into(),
            repo_url: repo_url.into(),
            status: JobStatus::Pending,
            agent: AgentRole::CodeAnalyzer,
            priority: DEFAULT_PRIORITY.to_string(),
            date: now
                .with_timezone(&Local)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string(),
            created_at: now,
            updated_at: now,
            ended_at: None,
            details,
            history: vec![HistoryEntry {
                at: now,
                status: JobStatus::Pending,
            }],
        }
    }

    /// Apply a status transition. No transition table is enforced.
    pub fn apply(&mut self, status: JobStatus, details: Option<Map<String, Value>>) {
        let now = Utc::now();
        self.status = status;

        if let Some(details) = details {
            if let Some(priority) = details.get("priority").and_then(Value::as_str) {
                self.priority = priority.to_string();
            }
            self.details.extend(details);
        }

        // The role always follows the status, whatever the caller passed.
        self.agent = status.agent();
        self.details
            .insert("agent".to_string(), Value::from(self.agent.as_str()));

        self.updated_at = now;
        self.history.push(HistoryEntry { at: now, status });
        if status.is_terminal() {
            self.ended_at = Some(now);
        }
    }

    pub fn stage(&self) -> Option<&str> {
        self.details.get("stage").and_then(Value::as_str)
    }

    /// Case-insensitive match over id, url and agent tags.
    fn matches_query(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }

        let detail_agent = self
            .details
            .get("agent")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();

        self.id.to_lowercase().contains(query)
            || self.repo_url.to_lowercase().contains(query)
            || agent_matches(query, &self.agent.as_str().to_lowercase())
            || agent_matches(query, &detail_agent)
    }
}

/// Substring match tolerating a missing or extra trailing `s`.
fn agent_matches(query: &str, agent: &str) -> bool {
    if agent.is_empty() {
        return false;
    }
    if agent.contains(query) {
        return true;
    }
    if let Some(singular) = query.strip_suffix('s') {
        if !singular.is_empty() && agent.contains(singular) {
            return true;
        }
    }
    agent.contains(&format!("{query}s"))
}

/// Filter for `JobLedger::search`
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub query: Option<String>,
    pub status: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        let query = self
            .query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .unwrap_or_default();
        if !job.matches_query(&query) {
            return false;
        }

        match self.status.as_deref().map(|s| s.trim().to_lowercase()) {
            Some(status) if !status.is_empty() && status != "any" => status == job.status.as_str(),
            _ => true,
        }
    }
}

/// Persisted collection of jobs
#[derive(Debug, Clone)]
pub struct JobLedger {
    path: PathBuf,
}

impl JobLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_storage(storage: &Storage) -> Self {
        Self::new(storage.jobs_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a job, replacing any record with the same id.
    pub fn create(&self, task_id: &str, repo_url: &str) {
        if let Err(err) = self.try_create(task_id, repo_url) {
            tracing::warn!(task_id, error = %err, "failed to create job");
        }
    }

    pub fn try_create(&self, task_id: &str, repo_url: &str) -> Result<Job> {
        self.mutate(|jobs| {
            jobs.retain(|job| job.id != task_id);
            let job = Job::new(task_id, repo_url);
            jobs.push(job.clone());
            Ok(job)
        })
    }

    /// Record a status transition; unknown ids are ignored.
    ///
    /// `details` is expected to be a JSON object; other values are ignored.
    pub fn update(&self, task_id: &str, status: JobStatus, details: Option<Value>) {
        match self.try_update(task_id, status, details) {
            Ok(Some(_)) => {}
            Ok(None) => tracing::debug!(task_id, "update for unknown job"),
            Err(err) => tracing::warn!(task_id, error = %err, "failed to update job"),
        }
    }

    pub fn try_update(
        &self,
        task_id: &str,
        status: JobStatus,
        details: Option<Value>,
    ) -> Result<Option<Job>> {
        let details = match details {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };
        self.mutate(|jobs| {
            let Some(job) = jobs.iter_mut().find(|job| job.id == task_id) else {
                return Ok(None);
            };
            job.apply(status, details);
            Ok(Some(job.clone()))
        })
    }

    /// All jobs in insertion order; unreadable ledgers read as empty.
    pub fn list(&self) -> Vec<Job> {
        self.load()
    }

    pub fn get(&self, task_id: &str) -> Option<Job> {
        self.load().into_iter().find(|job| job.id == task_id)
    }

    pub fn search(&self, query: Option<&str>, status: Option<&str>) -> Vec<Job> {
        let filter = JobFilter {
            query: query.map(str::to_string),
            status: status.map(str::to_string),
        };
        self.load()
            .into_iter()
            .filter(|job| filter.matches(job))
            .collect()
    }

    fn load(&self) -> Vec<Job> {
        match read_jobs(&self.path) {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "unreadable job ledger");
                Vec::new()
            }
        }
    }

    fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Job>) -> Result<T>,
    {
        let _lock = FileLock::acquire(lock::lock_path_for(&self.path), DEFAULT_LOCK_TIMEOUT_MS)?;

        let mut jobs = match read_jobs(&self.path) {
            Ok(jobs) => jobs,
            Err(Error::Json(err)) => {
                tracing::warn!(path = %self.path.display(), error = %err, "resetting corrupt job ledger");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let result = f(&mut jobs)?;

        let json = serde_json::to_vec_pretty(&jobs)?;
        lock::write_atomic(&self.path, &json)?;
        Ok(result)
    }
}

fn read_jobs(path: &Path) -> Result<Vec<Job>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ledger() -> (TempDir, JobLedger) {
        let temp = TempDir::new().unwrap();
        let ledger = JobLedger::new(temp.path().join("jobs.json"));
        (temp, ledger)
    }

    #[test]
    fn create_then_complete() {
        let (_temp, ledger) = ledger();
        ledger.create("t1", "https://github.com/acme/widgets");
        ledger.update("t1", JobStatus::Completed, Some(json!({})));

        let job = ledger.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.agent, AgentRole::DocGenerator);
        assert!(job.ended_at.is_some());
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.history[0].status, JobStatus::Pending);
        assert_eq!(job.history[1].status, JobStatus::Completed);
    }

    #[test]
    fn create_defaults() {
        let (_temp, ledger) = ledger();
        let job = ledger.try_create("t1", "https://github.com/acme/widgets").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.agent, AgentRole::CodeAnalyzer);
        assert_eq!(job.priority, "medium");
        assert_eq!(job.stage(), Some("start"));
        assert!(job.ended_at.is_none());
        assert_eq!(job.created_at, job.updated_at);
        assert_eq!(job.date.len(), "2024-01-01T00:00:00".len());

        ledger.update("t1", JobStatus::Completed, None);
        assert_eq!(ledger.get("t1").unwrap().date, job.date);
    }

    #[test]
    fn recreate_collapses_on_id() {
        let (_temp, ledger) = ledger();
        ledger.create("t1", "https://github.com/acme/widgets");
        ledger.update("t1", JobStatus::Error, None);
        ledger.create("t2", "https://github.com/acme/gadgets");
        ledger.create("t1", "https://github.com/acme/widgets");

        let jobs = ledger.list();
        assert_eq!(jobs.len(), 2);
        let job = ledger.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.history.len(), 1);
    }

    #[test]
    fn agent_follows_status_not_caller() {
        let (_temp, ledger) = ledger();
        ledger.create("t1", "https://github.com/acme/widgets");
        ledger.update(
            "t1",
            JobStatus::Timeout,
            Some(json!({"agent": "DocGenerator", "priority": "high", "stage": "clone"})),
        );

        let job = ledger.get("t1").unwrap();
        assert_eq!(job.agent, AgentRole::Supervisor);
        assert_eq!(job.details["agent"], "Supervisor");
        assert_eq!(job.priority, "high");
        assert_eq!(job.stage(), Some("clone"));
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn non_terminal_update_keeps_end_open() {
        let (_temp, ledger) = ledger();
        ledger.create("t1", "https://github.com/acme/widgets");
        ledger.update("t1", JobStatus::InProgress, Some(json!({"stage": "cache"})));

        let job = ledger.get("t1").unwrap();
        assert!(job.ended_at.is_none());
        assert_eq!(job.agent, AgentRole::CodeAnalyzer);
        assert_eq!(job.stage(), Some("cache"));
    }

    #[test]
    fn update_unknown_job_is_noop() {
        let (_temp, ledger) = ledger();
        let updated = ledger.try_update("ghost", JobStatus::Error, None).unwrap();
        assert!(updated.is_none());
        assert!(ledger.list().is_empty());
    }

    #[test]
    fn permissive_transitions() {
        let (_temp, ledger) = ledger();
        ledger.create("t1", "https://github.com/acme/widgets");
        ledger.update("t1", JobStatus::Completed, None);
        ledger.update("t1", JobStatus::Pending, None);

        let job = ledger.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.history.len(), 3);
    }

    #[test]
    fn search_matches_id_url_and_agent_plural() {
        let (_temp, ledger) = ledger();
        ledger.create("alpha-1", "https://github.com/acme/widgets");
        ledger.create("beta-2", "https://github.com/other/gadgets");
        ledger.update("beta-2", JobStatus::Completed, None);

        assert_eq!(ledger.search(Some("ALPHA"), None).len(), 1);
        assert_eq!(ledger.search(Some("gadgets"), None).len(), 1);
        assert_eq!(ledger.search(Some("docgenerators"), None)[0].id, "beta-2");
        assert_eq!(ledger.search(Some("docgenerator"), None)[0].id, "beta-2");
        assert_eq!(ledger.search(Some("codeanalyzer"), None)[0].id, "alpha-1");
        assert_eq!(ledger.search(None, None).len(), 2);
        assert!(ledger.search(Some("nothing-here"), None).is_empty());
    }

    #[test]
    fn search_status_filter() {
        let (_temp, ledger) = ledger();
        ledger.create("a", "https://github.com/acme/widgets");
        ledger.create("b", "https://github.com/acme/gadgets");
        ledger.update("b", JobStatus::Canceled, None);

        let canceled = ledger.search(None, Some("CANCELED"));
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id, "b");
        assert_eq!(ledger.search(Some("acme"), Some("any")).len(), 2);
        assert_eq!(ledger.search(Some("acme"), Some("")).len(), 2);
        assert!(ledger.search(Some("widgets"), Some("canceled")).is_empty());
    }

    #[test]
    fn corrupt_ledger_reads_empty_and_recovers() {
        let (temp, ledger) = ledger();
        std::fs::write(temp.path().join("jobs.json"), "{not json").unwrap();
        assert!(ledger.list().is_empty());

        ledger.create("t1", "https://github.com/acme/widgets");
        assert_eq!(ledger.list().len(), 1);
    }

    #[test]
    fn concurrent_creates_are_all_kept() {
        let (_temp, ledger) = ledger();
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger
                        .try_create(&format!("task-{idx}"), "https://github.com/acme/widgets")
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.list().len(), 8);
    }

    #[test]
    fn status_parsing() {
        assert_eq!("In_Progress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Canceled);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
