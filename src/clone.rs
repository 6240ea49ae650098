//! Supervised shallow clones
//!
//! `CloneExecutor` runs one `git clone --progress --depth=N` child per task.
//! A reader thread forwards stderr lines (git redraws its progress with
//! carriage returns, so both `\r` and `\n` end a line) over a channel; the
//! supervising loop waits at most one poll interval per line and checks
//! cancellation and the deadline on every iteration.
//!
//! The public entry points never fail. Every failure ends as a terminal
//! progress record and a `None` path.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::cancel::{self, CancelToken, ProcessRegistry};
use crate::config::{CloneConfig, Config};
use crate::error::{Error, Result};
use crate::progress::{ProgressStatus, ProgressStore};
use crate::source;
use crate::storage::Storage;

/// Number of trailing stderr lines kept for failure reports
pub const STDERR_TAIL: usize = 5;

/// Message published when a URL fails validation
pub const INVALID_URL_MESSAGE: &str = "Invalid GitHub URL";

/// Per-call clone parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneOptions {
    /// Wall-clock limit
    pub timeout: Duration,
    /// History depth
    pub depth: u32,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self::from_config(&CloneConfig::default())
    }
}

impl CloneOptions {
    pub fn from_config(config: &CloneConfig) -> Self {
        Self {
            timeout: config.timeout(),
            depth: config.depth,
        }
    }
}

/// Executor-wide settings
#[derive(Debug, Clone)]
pub struct CloneSettings {
    pub git_program: PathBuf,
    pub poll_interval: Duration,
    pub kill_grace: Duration,
    pub allowed_host: String,
    /// Parent of the per-task scratch directories
    pub scratch_root: PathBuf,
}

impl CloneSettings {
    pub fn from_config(config: &Config, storage: &Storage) -> Self {
        Self {
            git_program: config.clone.git_program.clone(),
            poll_interval: config.clone.poll_interval(),
            kill_grace: config.clone.kill_grace(),
            allowed_host: config.source.allowed_host.clone(),
            scratch_root: storage.tmp_dir(),
        }
    }
}

/// Linear map of git's 0..=100 onto a slice of the task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub status: ProgressStatus,
    pub stage: &'static str,
    pub low: u8,
    pub high: u8,
}

impl ProgressBand {
    pub fn map(&self, percent: u8) -> u8 {
        let percent = u32::from(percent.min(100));
        let span = u32::from(self.high.saturating_sub(self.low));
        self.low + (span * percent / 100) as u8
    }
}

/// Git progress lines map onto 20..80 under `cloning`.
const CLONE_BAND: ProgressBand = ProgressBand {
    status: ProgressStatus::Cloning,
    stage: "clone",
    low: 20,
    high: 80,
};

/// How a supervised clone reports itself
#[derive(Debug, Clone)]
pub(crate) struct CloneProfile {
    pub band: ProgressBand,
    /// Status and percent published once the child is running
    pub start_status: ProgressStatus,
    pub start_percent: u8,
    /// Extra keys for the start record
    pub start_extra: Value,
    pub cancel_message: &'static str,
    pub timeout_message: &'static str,
    /// Stage attached to failure records, if any
    pub failure_stage: Option<&'static str>,
}

impl CloneProfile {
    /// Scratch clone: progress 20..80 under `cloning`.
    pub(crate) fn scratch() -> Self {
        Self {
            band: CLONE_BAND,
            start_status: ProgressStatus::Cloning,
            start_percent: 20,
            start_extra: json!({ "stage": "clone" }),
            cancel_message: "Canceled by user",
            timeout_message: "Clone timed out",
            failure_stage: None,
        }
    }

    /// Clone into the cache: starts at 15 under `cache`, then reports the
    /// same 20..80 `cloning` band as a scratch clone.
    pub(crate) fn cache() -> Self {
        Self {
            band: CLONE_BAND,
            start_status: ProgressStatus::Cache,
            start_percent: 15,
            start_extra: json!({ "stage": "cache", "action": "cloning" }),
            cancel_message: "Canceled during cache",
            timeout_message: "Cache clone timed out",
            failure_stage: Some("cache"),
        }
    }
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:Receiving objects|Resolving deltas|Checking out files|Updating files):\s+(\d+)%",
        )
        .expect("progress regex must compile")
    })
}

/// Extract the percent from one git progress line.
pub fn parse_progress(line: &str) -> Option<u8> {
    let caps = progress_regex().captures(line)?;
    let value: u32 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

/// Spawns and supervises clone children for tasks
#[derive(Debug, Clone)]
pub struct CloneExecutor {
    store: ProgressStore,
    registry: Arc<ProcessRegistry>,
    settings: CloneSettings,
}

impl CloneExecutor {
    pub fn new(store: ProgressStore, registry: Arc<ProcessRegistry>, settings: CloneSettings) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &CloneSettings {
        &self.settings
    }

    /// Clone `url` into a fresh scratch directory.
    ///
    /// Publishes `cloning` progress while running and `mapped` at 60 on
    /// success. Returns `None` after publishing a terminal record on
    /// validation failure, spawn failure, nonzero exit, timeout or cancel.
    pub fn clone_repo(&self, task_id: &str, url: &str, opts: &CloneOptions) -> Option<PathBuf> {
        let profile = CloneProfile::scratch();

        if let Err(err) = source::validate(url, &self.settings.allowed_host) {
            self.publish_failure(task_id, &err, &profile);
            return None;
        }

        let scratch = match self.scratch_dir(task_id) {
            Ok(dir) => dir,
            Err(err) => {
                self.publish_failure(task_id, &err, &profile);
                return None;
            }
        };
        let mut name = source::sanitize_name(&source::display_name(url));
        if name.is_empty() {
            name = "repo".to_string();
        }
        let dest = scratch.join(name);

        match self.run(task_id, url, &dest, opts, &profile) {
            Ok(()) => {
                tracing::info!(task_id, path = %dest.display(), "clone finished");
                self.store.set(
                    task_id,
                    ProgressStatus::Mapped,
                    60,
                    Some(json!({ "stage": "map" })),
                );
                Some(dest)
            }
            Err(err) => {
                remove_dir_quietly(&scratch);
                self.publish_failure(task_id, &err, &profile);
                None
            }
        }
    }

    /// Stop the task's running clone.
    ///
    /// Returns `false`, after still marking the task canceled, when no
    /// child is registered for it.
    pub fn cancel(&self, task_id: &str) -> bool {
        if self.registry.terminate(task_id, self.settings.kill_grace) {
            tracing::info!(task_id, "clone canceled");
            self.store.mark_canceled(task_id, Some("Canceled by user"));
            true
        } else {
            self.store.mark_canceled(task_id, Some("No running process"));
            false
        }
    }

    fn scratch_dir(&self, task_id: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.settings.scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", crate::storage::sanitize_task_id(task_id)))
            .tempdir_in(&self.settings.scratch_root)?;
        Ok(dir.keep())
    }

    /// Spawn the child into `dest` and supervise it to completion.
    pub(crate) fn run(
        &self,
        task_id: &str,
        url: &str,
        dest: &Path,
        opts: &CloneOptions,
        profile: &CloneProfile,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut child = self.spawn(url, dest, opts.depth)?;
        let stderr = child.stderr.take();
        let child = self.registry.register_child(task_id, child);
        let token = self.registry.token(task_id);

        self.store.set(
            task_id,
            profile.start_status,
            i64::from(profile.start_percent),
            Some(profile.start_extra.clone()),
        );

        let lines = match stderr {
            Some(stderr) => spawn_line_reader(stderr),
            None => mpsc::channel::<String>().1,
        };

        let result = self.supervise(task_id, &child, &lines, &token, opts, profile);
        self.registry.unregister_child(task_id);
        result
    }

    fn spawn(&self, url: &str, dest: &Path, depth: u32) -> Result<Child> {
        let program = &self.settings.git_program;
        tracing::debug!(program = %program.display(), url, dest = %dest.display(), depth, "spawning clone");

        Command::new(program)
            .arg("clone")
            .arg("--progress")
            .arg(format!("--depth={depth}"))
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    Error::ToolUnavailable(program.display().to_string())
                } else {
                    Error::Io(err)
                }
            })
    }

    fn supervise(
        &self,
        task_id: &str,
        child: &Arc<Mutex<Child>>,
        lines: &Receiver<String>,
        token: &CancelToken,
        opts: &CloneOptions,
        profile: &CloneProfile,
    ) -> Result<()> {
        let started = Instant::now();
        let poll = self.settings.poll_interval;
        let mut watcher = LineWatcher::new(profile.band);

        loop {
            if token.is_canceled() || self.store.is_canceled(task_id) {
                self.stop(child);
                return Err(Error::Canceled(profile.cancel_message.to_string()));
            }
            if started.elapsed() > opts.timeout {
                self.stop(child);
                return Err(Error::Timeout(profile.timeout_message.to_string()));
            }

            match lines.recv_timeout(poll) {
                Ok(line) => watcher.observe(&self.store, task_id, &line),
                Err(RecvTimeoutError::Timeout) => {
                    if try_status(child)?.is_some() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if try_status(child)?.is_some() {
                        break;
                    }
                    thread::sleep(poll);
                }
            }
        }

        // Pick up whatever the reader still had buffered.
        while let Ok(line) = lines.recv_timeout(poll) {
            watcher.observe(&self.store, task_id, &line);
        }

        let status = wait_status(child)?;
        if status.success() {
            return Ok(());
        }
        // A concurrent cancel may have killed the child before the loop saw the flag.
        if token.is_canceled() || self.store.is_canceled(task_id) {
            return Err(Error::Canceled(profile.cancel_message.to_string()));
        }
        Err(Error::ProcessFailure {
            code: status.code().unwrap_or(-1),
            stderr_tail: watcher.into_tail(),
        })
    }

    fn stop(&self, child: &Arc<Mutex<Child>>) {
        let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
        cancel::terminate_child(&mut child, self.settings.kill_grace);
    }

    /// Turn a failure into the task's terminal progress record.
    pub(crate) fn publish_failure(&self, task_id: &str, err: &Error, profile: &CloneProfile) {
        tracing::debug!(task_id, error = %err, kind = err.kind(), "clone failed");

        let mut extra = Map::new();
        if let Some(stage) = profile.failure_stage {
            extra.insert("stage".to_string(), Value::from(stage));
        }
        extra.insert("error_kind".to_string(), Value::from(err.kind()));

        match err {
            Error::Canceled(message) => {
                self.store.mark_canceled(task_id, Some(message.as_str()));
            }
            Error::Timeout(message) => {
                extra.insert("message".to_string(), Value::from(message.as_str()));
                self.store
                    .set(task_id, ProgressStatus::Timeout, 100, Some(Value::Object(extra)));
            }
            _ => {
                let message = match err {
                    Error::Validation(_) => INVALID_URL_MESSAGE.to_string(),
                    other => other.to_string(),
                };
                extra.insert("message".to_string(), Value::from(message));
                if let Error::ProcessFailure { code, stderr_tail } = err {
                    extra.insert("exit_code".to_string(), Value::from(*code));
                    extra.insert("stderr".to_string(), json!(stderr_tail));
                }
                self.store
                    .set(task_id, ProgressStatus::Error, 100, Some(Value::Object(extra)));
            }
        }
    }
}

/// Tracks recent lines and publishes percent changes.
struct LineWatcher {
    band: ProgressBand,
    tail: VecDeque<String>,
    last_published: Option<u8>,
}

impl LineWatcher {
    fn new(band: ProgressBand) -> Self {
        Self {
            band,
            tail: VecDeque::with_capacity(STDERR_TAIL),
            last_published: None,
        }
    }

    fn observe(&mut self, store: &ProgressStore, task_id: &str, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.tail.len() == STDERR_TAIL {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());

        let Some(raw) = parse_progress(line) else {
            return;
        };
        let mapped = self.band.map(raw);
        if self.last_published == Some(mapped) {
            return;
        }
        self.last_published = Some(mapped);
        tracing::debug!(task_id, raw, mapped, "clone progress");
        store.set(
            task_id,
            self.band.status,
            i64::from(mapped),
            Some(json!({ "stage": self.band.stage })),
        );
    }

    fn into_tail(self) -> Vec<String> {
        self.tail.into()
    }
}

fn try_status(child: &Arc<Mutex<Child>>) -> Result<Option<ExitStatus>> {
    let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
    Ok(child.try_wait()?)
}

fn wait_status(child: &Arc<Mutex<Child>>) -> Result<ExitStatus> {
    let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
    Ok(child.wait()?)
}

/// Forward stderr as lines split on `\r` and `\n`.
fn spawn_line_reader(mut stderr: ChildStderr) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let n = match stderr.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for &byte in &chunk[..n] {
                if byte == b'\r' || byte == b'\n' {
                    if !pending.is_empty() {
                        let line = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    });
    rx
}

pub(crate) fn remove_dir_quietly(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_git_progress_lines() {
        assert_eq!(parse_progress("Receiving objects:  45% (450/1000)"), Some(45));
        assert_eq!(parse_progress("remote: Resolving deltas: 100% (3/3), done."), Some(100));
        assert_eq!(parse_progress("Checking out files:   7% (1/14)"), Some(7));
        assert_eq!(parse_progress("Updating files:  50% (7/14)"), Some(50));
        assert_eq!(parse_progress("Cloning into 'widgets'..."), None);
        assert_eq!(parse_progress("remote: Counting objects: 50% (1/2)"), None);
    }

    #[test]
    fn bands_map_linearly() {
        let clone = CloneProfile::scratch().band;
        assert_eq!(clone.map(0), 20);
        assert_eq!(clone.map(45), 47);
        assert_eq!(clone.map(100), 80);

        let cache = CloneProfile::cache();
        assert_eq!(cache.band, clone);
        assert_eq!(cache.start_percent, 15);
    }

    #[test]
    fn watcher_publishes_only_changes_and_keeps_tail() {
        let temp = TempDir::new().unwrap();
        let store = ProgressStore::new(Storage::new(temp.path()));
        let mut watcher = LineWatcher::new(CloneProfile::scratch().band);

        for line in [
            "Cloning into 'widgets'...",
            "Receiving objects:  10% (1/10)",
            "Receiving objects:  10% (1/10)",
            "Receiving objects:  50% (5/10)",
            "fatal: something",
            "",
            "done.",
        ] {
            watcher.observe(&store, "t1", line);
        }

        let record = store.get("t1");
        assert_eq!(record.status, ProgressStatus::Cloning);
        assert_eq!(record.percent, 50);
        assert_eq!(record.stage.as_deref(), Some("clone"));

        let tail = watcher.into_tail();
        assert_eq!(tail.len(), STDERR_TAIL);
        assert_eq!(tail.last().map(String::as_str), Some("done."));
        assert_eq!(tail[0], "Receiving objects:  10% (1/10)");
    }

    fn executor(temp: &TempDir, git_program: &str) -> CloneExecutor {
        let storage = Storage::new(temp.path());
        let mut config = Config::default();
        config.clone.git_program = PathBuf::from(git_program);
        CloneExecutor::new(
            ProgressStore::new(storage.clone()),
            Arc::new(ProcessRegistry::new()),
            CloneSettings::from_config(&config, &storage),
        )
    }

    #[test]
    fn invalid_url_publishes_error() {
        let temp = TempDir::new().unwrap();
        let exec = executor(&temp, "git");

        let path = exec.clone_repo("t1", "https://example.com/acme/widgets", &CloneOptions::default());
        assert!(path.is_none());

        let record = exec.store().get("t1");
        assert_eq!(record.status, ProgressStatus::Error);
        assert_eq!(record.percent, 100);
        assert_eq!(record.message.as_deref(), Some(INVALID_URL_MESSAGE));
        assert_eq!(record.extra_str("error_kind"), Some("validation"));
    }

    #[test]
    fn missing_client_publishes_error() {
        let temp = TempDir::new().unwrap();
        let exec = executor(&temp, "cg-missing-git-client");

        let path = exec.clone_repo("t1", "https://github.com/acme/widgets", &CloneOptions::default());
        assert!(path.is_none());

        let record = exec.store().get("t1");
        assert_eq!(record.status, ProgressStatus::Error);
        assert_eq!(
            record.message.as_deref(),
            Some("cg-missing-git-client not found in PATH")
        );
        assert_eq!(record.extra_str("error_kind"), Some("tool_unavailable"));

        let leftovers = fs::read_dir(temp.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn cancel_without_process_marks_task() {
        let temp = TempDir::new().unwrap();
        let exec = executor(&temp, "git");

        assert!(!exec.cancel("idle"));
        let record = exec.store().get("idle");
        assert_eq!(record.status, ProgressStatus::Canceled);
        assert_eq!(record.message.as_deref(), Some("No running process"));
    }
}
