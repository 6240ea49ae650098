//! Storage layout for codegenius
//!
//! Everything lives under a single home directory:
//!
//! ```text
//! <home>/
//!   cg.toml                 # Optional configuration
//!   jobs.json               # Job ledger (JSON array)
//!   jobs.json.lock          # Ledger writer lock
//!   progress/<task>.json    # One progress record per task
//!   cache/<name>-<hash8>/   # Cached working copies
//!   tmp/                    # Scratch clones
//! ```
//!
//! The home is resolved from `--home`/`CG_HOME`, then the platform data
//! directory, then `./outputs`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::lock;

/// Config file name inside the home directory
pub const CONFIG_FILE: &str = "cg.toml";

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "CG_HOME";

/// Storage manager for codegenius state
#[derive(Debug, Clone)]
pub struct Storage {
    home: PathBuf,
}

impl Storage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the home directory: explicit path, then the platform data dir.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            return Self::new(path);
        }

        match directories::ProjectDirs::from("", "", "codegenius") {
            Some(dirs) => Self::new(dirs.data_dir()),
            None => Self::new("outputs"),
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.home.join("jobs.json")
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.home.join("progress")
    }

    /// Progress file for a task; the id is sanitized into a file name.
    pub fn progress_file(&self, task_id: &str) -> PathBuf {
        self.progress_dir()
            .join(format!("{}.json", sanitize_task_id(task_id)))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }

    /// Create the directory skeleton.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.progress_dir())?;
        fs::create_dir_all(self.cache_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }

    // =========================================================================
    // JSON helpers
    // =========================================================================

    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        lock::write_atomic(path, &json)
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Reduce a task id to `[A-Za-z0-9_-]`; an empty result becomes `default`.
pub fn sanitize_task_id(task_id: &str) -> String {
    let safe: String = task_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        "default".to_string()
    } else {
        safe
    }
}
