#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use codegenius::config::Config;
use codegenius::pipeline::Pipeline;
use codegenius::storage::Storage;
use tempfile::TempDir;

pub const WIDGETS_URL: &str = "https://github.com/acme/widgets";

/// How the stub git client behaves after printing progress
#[derive(Debug, Clone, Copy)]
pub enum StubMode {
    /// Create `<dest>/.git` and exit 0
    Succeed,
    /// Never finish on its own
    Hang,
    /// Print a fatal line and exit 128
    Fail,
}

/// Isolated cg home with a stub git client
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Storage::new(dir.path()).init().expect("init home");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.dir.path())
    }

    pub fn calls_file(&self) -> PathBuf {
        self.dir.path().join("git-calls.log")
    }

    /// Number of times the stub was invoked.
    pub fn clone_calls(&self) -> usize {
        fs::read_to_string(self.calls_file())
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Write an executable stub git client and return its path.
    #[cfg(unix)]
    pub fn write_stub_git(&self, mode: StubMode) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let tail = match mode {
            StubMode::Succeed => "mkdir -p \"$dest/.git\"\nexit 0\n",
            StubMode::Hang => "exec sleep 30\n",
            StubMode::Fail => {
                "printf 'fatal: repository not found\\n' >&2\nexit 128\n"
            }
        };
        let script = format!(
            "#!/bin/sh\n\
             echo \"$@\" >> '{calls}'\n\
             for arg in \"$@\"; do dest=\"$arg\"; done\n\
             printf \"Cloning into '%s'...\\n\" \"$dest\" >&2\n\
             printf 'Receiving objects:  10%% (1/10)\\rReceiving objects:  50%% (5/10)\\r' >&2\n\
             printf 'Receiving objects: 100%% (10/10), done.\\n' >&2\n\
             {tail}",
            calls = self.calls_file().display(),
        );

        let path = self.dir.path().join("stub-git");
        fs::write(&path, script).expect("write stub git");
        let mut perms = fs::metadata(&path).expect("stub metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod stub git");
        path
    }

    /// Config pointing at `git_program` with fast polling.
    pub fn config(&self, git_program: &Path) -> Config {
        let mut config = Config::default();
        config.clone.git_program = git_program.to_path_buf();
        config.clone.poll_interval_ms = 20;
        config.clone.kill_grace_ms = 200;
        config
    }

    pub fn pipeline(&self, git_program: &Path) -> Pipeline {
        Pipeline::new(self.storage(), self.config(git_program))
    }

    /// Persist config as `cg.toml` for CLI tests.
    pub fn write_config(&self, git_program: &Path) {
        self.config(git_program)
            .save(&self.storage().config_file())
            .expect("save config");
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Entries of `dir` whose names end in `.partial`.
pub fn partial_dirs(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.to_string_lossy().ends_with(".partial"))
                .collect()
        })
        .unwrap_or_default()
}
