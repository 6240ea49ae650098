//! Fetch orchestration
//!
//! `Pipeline` drives one task through validate -> cache (or clone) -> map,
//! mirroring each stage into the job ledger and closing the job with the
//! terminal status the progress record ended in. It owns the process
//! registry shared by every executor it hands out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::RepoCache;
use crate::cancel::{CancelToken, ProcessRegistry};
use crate::clone::{CloneExecutor, CloneOptions, CloneSettings, INVALID_URL_MESSAGE};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{JobLedger, JobStatus};
use crate::progress::{ProgressRecord, ProgressStatus, ProgressStore};
use crate::source;
use crate::storage::Storage;

/// One fetch invocation
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub task_id: String,
    pub url: String,
    /// Rebuild the cache slot even when it is valid
    pub refresh: bool,
    /// Clone into scratch space instead of the cache
    pub use_cache: bool,
    pub options: CloneOptions,
}

impl FetchRequest {
    pub fn new(task_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            url: url.into(),
            refresh: false,
            use_cache: true,
            options: CloneOptions::default(),
        }
    }
}

/// Result of a fetch: the working copy, if any, plus the final record
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub task_id: String,
    pub path: Option<PathBuf>,
    pub record: ProgressRecord,
}

impl FetchOutcome {
    /// Map a failed fetch onto the error taxonomy.
    pub fn into_result(self) -> Result<PathBuf> {
        if let Some(path) = self.path {
            return Ok(path);
        }

        let message = self
            .record
            .message
            .clone()
            .unwrap_or_else(|| self.record.status.label().to_string());

        Err(match self.record.status {
            ProgressStatus::Canceled => Error::Canceled(message),
            ProgressStatus::Timeout => Error::Timeout(message),
            _ => match self.record.extra_str("error_kind") {
                Some("validation") => Error::Validation(message),
                Some("tool_unavailable") => Error::ToolUnavailable(
                    message
                        .strip_suffix(" not found in PATH")
                        .unwrap_or("git")
                        .to_string(),
                ),
                Some("process_failure") => Error::ProcessFailure {
                    code: self
                        .record
                        .extra
                        .get("exit_code")
                        .and_then(Value::as_i64)
                        .unwrap_or(-1) as i32,
                    stderr_tail: self
                        .record
                        .extra
                        .get("stderr")
                        .and_then(Value::as_array)
                        .map(|lines| {
                            lines
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                },
                _ => Error::OperationFailed(message),
            },
        })
    }
}

/// Orchestrates fetches for any number of tasks
#[derive(Debug, Clone)]
pub struct Pipeline {
    storage: Storage,
    config: Config,
    store: ProgressStore,
    ledger: JobLedger,
    registry: Arc<ProcessRegistry>,
    executor: CloneExecutor,
    cache: RepoCache,
}

impl Pipeline {
    pub fn new(storage: Storage, config: Config) -> Self {
        let store = ProgressStore::new(storage.clone());
        let ledger = JobLedger::for_storage(&storage);
        let registry = Arc::new(ProcessRegistry::new());
        let executor = CloneExecutor::new(
            store.clone(),
            Arc::clone(&registry),
            CloneSettings::from_config(&config, &storage),
        );
        let cache = RepoCache::new(storage.cache_dir(), executor.clone());

        Self {
            storage,
            config,
            store,
            ledger,
            registry,
            executor,
            cache,
        }
    }

    /// Resolve the home directory, create it, and load its config.
    pub fn open(home: Option<&Path>) -> Result<Self> {
        let storage = Storage::resolve(home);
        storage.init()?;
        let config = Config::load_from_home(storage.home());
        Ok(Self::new(storage, config))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    pub fn executor(&self) -> &CloneExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Clone options from config defaults.
    pub fn default_options(&self) -> CloneOptions {
        CloneOptions::from_config(&self.config.clone)
    }

    /// Run one task to a working copy or a terminal record.
    pub fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let task_id = request.task_id.as_str();
        tracing::info!(task_id, url = %request.url, cache = request.use_cache, "fetch started");

        // A cancel aimed at an earlier run of this id must not leak into this one.
        self.registry.release(task_id);
        self.store.clear(task_id);
        let token = self.registry.token(task_id);
        self.ledger.create(task_id, &request.url);

        self.store.set(
            task_id,
            ProgressStatus::Validate,
            5,
            Some(json!({ "stage": "validate" })),
        );
        self.ledger.update(
            task_id,
            JobStatus::InProgress,
            Some(json!({ "stage": "validate" })),
        );

        let path = self.run_stages(request, &token);
        self.registry.release(task_id);

        let record = self.store.get(task_id);
        match &path {
            Some(path) => {
                tracing::info!(task_id, path = %path.display(), "fetch finished");
            }
            None => {
                let status = match record.status {
                    ProgressStatus::Canceled => JobStatus::Canceled,
                    ProgressStatus::Timeout => JobStatus::Timeout,
                    _ => JobStatus::Error,
                };
                tracing::info!(task_id, %status, "fetch ended without a working copy");
                let mut details = json!({ "message": record.message.clone() });
                if let Some(stage) = &record.stage {
                    details["stage"] = Value::from(stage.as_str());
                }
                self.ledger.update(task_id, status, Some(details));
            }
        }

        FetchOutcome {
            task_id: task_id.to_string(),
            path,
            record,
        }
    }

    fn run_stages(&self, request: &FetchRequest, token: &CancelToken) -> Option<PathBuf> {
        let task_id = request.task_id.as_str();

        if let Err(err) = source::validate(&request.url, &self.config.source.allowed_host) {
            tracing::debug!(task_id, error = %err, "rejected url");
            self.store.set(
                task_id,
                ProgressStatus::Error,
                100,
                Some(json!({
                    "stage": "validate",
                    "message": INVALID_URL_MESSAGE,
                    "error_kind": err.kind(),
                })),
            );
            return None;
        }

        if token.is_canceled() || self.store.is_canceled(task_id) {
            self.store.mark_canceled(task_id, Some("Canceled by user"));
            return None;
        }

        let stage = if request.use_cache { "cache" } else { "clone" };
        self.ledger.update(
            task_id,
            JobStatus::InProgress,
            Some(json!({ "stage": stage })),
        );

        let path = if request.use_cache {
            self.cache
                .ensure_cached_repo(task_id, &request.url, request.refresh, &request.options)
        } else {
            self.executor
                .clone_repo(task_id, &request.url, &request.options)
        }?;

        self.ledger.update(
            task_id,
            JobStatus::InProgress,
            Some(json!({ "stage": "map", "repo_path": path.display().to_string() })),
        );
        self.store.set(
            task_id,
            ProgressStatus::Mapped,
            60,
            Some(json!({ "stage": "map" })),
        );
        Some(path)
    }

    /// Run `fetch` on its own thread.
    pub fn spawn_fetch(&self, request: FetchRequest) -> JoinHandle<FetchOutcome> {
        let pipeline = self.clone();
        thread::spawn(move || pipeline.fetch(&request))
    }

    /// Cancel a task; `true` when a running clone was stopped.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.registry.cancel_token(task_id);
        self.executor.cancel(task_id)
    }

    /// Completion hook for downstream stages.
    pub fn complete(&self, task_id: &str, doc_path: Option<&str>) {
        let mut extra = json!({ "stage": "complete" });
        if let Some(doc_path) = doc_path {
            extra["doc_path"] = Value::from(doc_path);
        }
        self.store
            .set(task_id, ProgressStatus::Done, 100, Some(extra.clone()));
        self.ledger.update(task_id, JobStatus::Completed, Some(extra));
    }
}
