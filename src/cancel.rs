//! Cooperative cancellation and the live-process registry
//!
//! A `CancelToken` is a shared flag the clone supervisor polls once per loop
//! iteration. The `ProcessRegistry` maps task ids to their token and to the
//! child process currently running for the task. The registry is owned by
//! whoever drives the pipeline and handed to executors by `Arc`.

use std::collections::HashMap;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Poll step while waiting for a signaled child to exit
#[cfg(unix)]
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Shared cancel flag for one task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Entries {
    tokens: HashMap<String, CancelToken>,
    children: HashMap<String, Arc<Mutex<Child>>>,
}

/// Task id -> token and live child
#[derive(Default)]
pub struct ProcessRegistry {
    entries: Mutex<Entries>,
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("running", &self.running())
            .finish()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic while holding the lock leaves the maps consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token for a task, created on first use.
    pub fn token(&self, task_id: &str) -> CancelToken {
        self.lock()
            .tokens
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    /// Track a spawned child; returns the shared handle the supervisor polls.
    pub fn register_child(&self, task_id: &str, child: Child) -> Arc<Mutex<Child>> {
        let handle = Arc::new(Mutex::new(child));
        self.lock()
            .children
            .insert(task_id.to_string(), Arc::clone(&handle));
        handle
    }

    pub fn unregister_child(&self, task_id: &str) {
        self.lock().children.remove(task_id);
    }

    /// Forget everything about a task.
    pub fn release(&self, task_id: &str) {
        let mut entries = self.lock();
        entries.children.remove(task_id);
        entries.tokens.remove(task_id);
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.lock().children.contains_key(task_id)
    }

    /// Task ids with a live child, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().children.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Set the task's token if it has one. Unknown ids get no entry.
    ///
    /// Returns whether a token was found.
    pub fn cancel_token(&self, task_id: &str) -> bool {
        match self.lock().tokens.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Set the task's token and stop its child if one is registered.
    ///
    /// Returns whether a child was found.
    pub fn terminate(&self, task_id: &str, grace: Duration) -> bool {
        let child = {
            let entries = self.lock();
            if let Some(token) = entries.tokens.get(task_id) {
                token.cancel();
            }
            entries.children.get(task_id).cloned()
        };

        match child {
            Some(child) => {
                let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
                terminate_child(&mut child, grace);
                true
            }
            None => false,
        }
    }
}

/// Ask the child to stop, then force it after `grace`, and reap it.
#[cfg(unix)]
pub fn terminate_child(child: &mut Child, grace: Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::time::Instant;

    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(err) = kill(pid, Signal::SIGTERM) {
        tracing::warn!(pid = child.id(), error = %err, "SIGTERM failed");
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(EXIT_POLL),
            Err(_) => break,
        }
    }

    if let Err(err) = child.kill() {
        tracing::warn!(pid = child.id(), error = %err, "kill failed");
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
pub fn terminate_child(child: &mut Child, _grace: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    if let Err(err) = child.kill() {
        tracing::warn!(pid = child.id(), error = %err, "kill failed");
    }
    let _ = child.wait();
}
