//! Content-addressed repository cache
//!
//! One slot per source URL at `<cache>/<name>-<hash8>`. A slot is valid when
//! the directory holds a `.git` entry; there is no expiry. Clones land in a
//! staging directory next to the slot and are renamed into place only after
//! the child exits cleanly, so an interrupted clone never leaves a slot that
//! passes the validity check.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::clone::{self, CloneExecutor, CloneOptions, CloneProfile};
use crate::error::Result;
use crate::git::{self, HeadInfo};
use crate::progress::ProgressStatus;
use crate::source;
use crate::storage::sanitize_task_id;

/// Snapshot of one cache slot
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub url: String,
    pub key: String,
    pub path: PathBuf,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadInfo>,
}

/// Deduplicating clone cache keyed by URL
#[derive(Debug, Clone)]
pub struct RepoCache {
    root: PathBuf,
    executor: CloneExecutor,
}

impl RepoCache {
    pub fn new(root: impl Into<PathBuf>, executor: CloneExecutor) -> Self {
        Self {
            root: root.into(),
            executor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Slot directory for `url`, whether or not it exists.
    pub fn slot_path(&self, url: &str) -> PathBuf {
        self.root.join(source::cache_key(url))
    }

    /// The slot for `url` if it holds a working copy.
    pub fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let slot = self.slot_path(url);
        is_valid_slot(&slot).then_some(slot)
    }

    /// Return a cached working copy of `url`, cloning it first if needed.
    ///
    /// With `refresh` set the slot is always rebuilt. Failures are published
    /// to the task's progress record and yield `None`.
    pub fn ensure_cached_repo(
        &self,
        task_id: &str,
        url: &str,
        refresh: bool,
        opts: &CloneOptions,
    ) -> Option<PathBuf> {
        let profile = CloneProfile::cache();
        let store = self.executor.store();

        if let Err(err) = source::validate(url, &self.executor.settings().allowed_host) {
            self.executor.publish_failure(task_id, &err, &profile);
            return None;
        }

        if !refresh {
            if let Some(path) = self.cached_path(url) {
                tracing::info!(task_id, path = %path.display(), "cache hit");
                store.set(
                    task_id,
                    ProgressStatus::Cache,
                    25,
                    Some(json!({ "stage": "cache", "cached": true })),
                );
                return Some(path);
            }
        }

        let slot = self.slot_path(url);
        match self.fill(task_id, url, &slot, opts, &profile) {
            Ok(()) => {
                tracing::info!(task_id, path = %slot.display(), "cache filled");
                store.set(
                    task_id,
                    ProgressStatus::Cache,
                    25,
                    Some(json!({ "stage": "cache", "cached": false })),
                );
                Some(slot)
            }
            Err(err) => {
                self.executor.publish_failure(task_id, &err, &profile);
                None
            }
        }
    }

    fn fill(
        &self,
        task_id: &str,
        url: &str,
        slot: &Path,
        opts: &CloneOptions,
        profile: &CloneProfile,
    ) -> Result<()> {
        remove_dir_if_present(slot)?;
        fs::create_dir_all(&self.root)?;
        git::require(&self.executor.settings().git_program)?;

        let staging = self.staging_path(url, task_id);
        remove_dir_if_present(&staging)?;

        if let Err(err) = self.executor.run(task_id, url, &staging, opts, profile) {
            clone::remove_dir_quietly(&staging);
            return Err(err);
        }

        if let Err(err) = fs::rename(&staging, slot) {
            clone::remove_dir_quietly(&staging);
            // Another task filled the slot first; its copy is as good as ours.
            if is_valid_slot(slot) {
                tracing::debug!(task_id, path = %slot.display(), "slot filled concurrently");
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn staging_path(&self, url: &str, task_id: &str) -> PathBuf {
        self.root.join(format!(
            ".{}.{}.partial",
            source::cache_key(url),
            sanitize_task_id(task_id)
        ))
    }

    /// Drop the slot for `url`. Returns whether anything was removed.
    pub fn invalidate(&self, url: &str) -> Result<bool> {
        let slot = self.slot_path(url);
        let removed = remove_dir_if_present(&slot)?;
        if removed {
            tracing::info!(path = %slot.display(), "cache invalidated");
        }
        Ok(removed)
    }

    pub fn info(&self, url: &str) -> CacheInfo {
        let path = self.slot_path(url);
        let valid = is_valid_slot(&path);
        let head = if valid {
            match git::head_info(&path) {
                Ok(head) => Some(head),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "no readable HEAD");
                    None
                }
            }
        } else {
            None
        };

        CacheInfo {
            url: url.to_string(),
            key: source::cache_key(url),
            path,
            valid,
            head,
        }
    }
}

fn is_valid_slot(path: &Path) -> bool {
    path.is_dir() && path.join(".git").exists()
}

fn remove_dir_if_present(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::ProcessRegistry;
    use crate::clone::CloneSettings;
    use crate::config::Config;
    use crate::progress::ProgressStore;
    use crate::storage::Storage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cache(temp: &TempDir) -> RepoCache {
        let storage = Storage::new(temp.path());
        let executor = CloneExecutor::new(
            ProgressStore::new(storage.clone()),
            Arc::new(ProcessRegistry::new()),
            CloneSettings::from_config(&Config::default(), &storage),
        );
        RepoCache::new(storage.cache_dir(), executor)
    }

    #[test]
    fn slot_name_follows_key() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let slot = cache.slot_path("https://github.com/acme/widgets");
        let name = slot.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("widgets-"));
        assert_eq!(name.len(), "widgets-".len() + 8);
        assert_eq!(slot.parent(), Some(temp.path().join("cache").as_path()));
    }

    #[test]
    fn validity_requires_git_marker() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = "https://github.com/acme/widgets";
        let slot = cache.slot_path(url);

        fs::create_dir_all(&slot).unwrap();
        assert!(cache.cached_path(url).is_none());
        assert!(!cache.info(url).valid);

        fs::create_dir_all(slot.join(".git")).unwrap();
        assert_eq!(cache.cached_path(url), Some(slot));
    }

    #[test]
    fn hit_publishes_cached_record() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = "https://github.com/acme/widgets";
        fs::create_dir_all(cache.slot_path(url).join(".git")).unwrap();

        let path = cache.ensure_cached_repo("t1", url, false, &CloneOptions::default());
        assert_eq!(path, Some(cache.slot_path(url)));

        let record = cache.executor.store().get("t1");
        assert_eq!(record.status, ProgressStatus::Cache);
        assert_eq!(record.percent, 25);
        assert_eq!(record.extra.get("cached"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn invalid_url_fails_with_cache_stage() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);

        let path = cache.ensure_cached_repo("t1", "https://example.com/x", false, &CloneOptions::default());
        assert!(path.is_none());

        let record = cache.executor.store().get("t1");
        assert_eq!(record.status, ProgressStatus::Error);
        assert_eq!(record.stage.as_deref(), Some("cache"));
        assert_eq!(record.message.as_deref(), Some(clone::INVALID_URL_MESSAGE));
    }

    #[test]
    fn invalidate_is_noop_when_absent() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = "https://github.com/acme/widgets";

        assert!(!cache.invalidate(url).unwrap());
        fs::create_dir_all(cache.slot_path(url).join(".git")).unwrap();
        assert!(cache.invalidate(url).unwrap());
        assert!(cache.cached_path(url).is_none());
    }
}
