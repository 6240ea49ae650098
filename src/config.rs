//! Configuration loading and management
//!
//! Handles parsing of `<home>/cg.toml`. Every field has a default, so an
//! empty or missing file yields the stock configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Clone supervision settings
    #[serde(default)]
    pub clone: CloneConfig,

    /// Source URL acceptance
    #[serde(default)]
    pub source: SourceConfig,
}

/// Clone supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Wall-clock limit for a single clone
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// History depth for shallow clones
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Bounded wait for one diagnostic line per loop iteration
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait after SIGTERM before SIGKILL
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Version-control client to invoke
    #[serde(default = "default_git_program")]
    pub git_program: PathBuf,
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_depth() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_kill_grace_ms() -> u64 {
    500
}

fn default_git_program() -> PathBuf {
    PathBuf::from("git")
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            depth: default_depth(),
            poll_interval_ms: default_poll_interval_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            git_program: default_git_program(),
        }
    }
}

impl CloneConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "clone.timeout_secs must be > 0".to_string(),
            ));
        }
        if self.depth == 0 {
            return Err(Error::InvalidConfig("clone.depth must be >= 1".to_string()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > 5000 {
            return Err(Error::InvalidConfig(
                "clone.poll_interval_ms must be within 1..=5000".to_string(),
            ));
        }
        if self.git_program.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "clone.git_program cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Source URL acceptance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Hosting domain a repository URL must reference
    #[serde(default = "default_allowed_host")]
    pub allowed_host: String,
}

fn default_allowed_host() -> String {
    "github.com".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            allowed_host: default_allowed_host(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `cg.toml` from the home directory, or return defaults
    pub fn load_from_home(home: &Path) -> Self {
        let config_path = home.join(crate::storage::CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.clone.validate()?;
        if self.source.allowed_host.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "source.allowed_host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.clone.timeout_secs, 180);
        assert_eq!(cfg.clone.depth, 1);
        assert_eq!(cfg.clone.poll_interval_ms, 100);
        assert_eq!(cfg.clone.kill_grace_ms, 500);
        assert_eq!(cfg.clone.git_program, PathBuf::from("git"));
        assert_eq!(cfg.source.allowed_host, "github.com");
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cg.toml");
        let content = r#"
[clone]
timeout_secs = 30
depth = 5
poll_interval_ms = 20
git_program = "/usr/local/bin/git"

[source]
allowed_host = "gitlab.com"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.clone.timeout_secs, 30);
        assert_eq!(cfg.clone.depth, 5);
        assert_eq!(cfg.clone.poll_interval_ms, 20);
        assert_eq!(cfg.clone.kill_grace_ms, 500);
        assert_eq!(cfg.clone.git_program, PathBuf::from("/usr/local/bin/git"));
        assert_eq!(cfg.source.allowed_host, "gitlab.com");
    }

    #[test]
    fn zero_depth_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cg.toml");
        fs::write(&path, "[clone]\ndepth = 0").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn load_from_home_defaults_on_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("cg.toml"), "[clone]\ntimeout_secs = \"soon\"")
            .expect("write config");

        let cfg = Config::load_from_home(dir.path());
        assert_eq!(cfg.clone.timeout_secs, 180);
    }

    #[test]
    fn load_from_home_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_home(dir.path());
        assert_eq!(cfg.source.allowed_host, "github.com");
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("timeout_secs = 180"));
        assert!(written.contains("allowed_host = \"github.com\""));
    }
}
