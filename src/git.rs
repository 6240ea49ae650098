//! Git client discovery and working-copy queries.
//!
//! Cloning shells out to the `git` binary so progress can be streamed; the
//! cache inspects finished working copies through libgit2.

use std::env;
use std::path::{Path, PathBuf};

use git2::Repository;
use serde::Serialize;

use crate::error::{Error, Result};

/// Basic information about a working copy's HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadInfo {
    /// Commit id as hex.
    pub oid: String,
    /// Shorthand name (e.g., "main") when available.
    pub shorthand: Option<String>,
    /// First line of the commit message.
    pub summary: Option<String>,
}

/// Resolve the git client to an executable path.
///
/// A bare program name is searched on `PATH`; anything with a directory
/// component is checked as given.
pub fn locate(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Like `locate`, but reports a missing client as `ToolUnavailable`.
pub fn require(program: &Path) -> Result<PathBuf> {
    locate(program).ok_or_else(|| Error::ToolUnavailable(program.display().to_string()))
}

/// Return information about HEAD of the working copy at `path`.
pub fn head_info(path: &Path) -> Result<HeadInfo> {
    let repo = Repository::open(path)?;
    let head = repo.head()?;
    let commit = head.peel_to_commit()?;

    Ok(HeadInfo {
        oid: commit.id().to_string(),
        shorthand: head.shorthand().map(|name| name.to_string()),
        summary: commit.summary().map(|s| s.to_string()),
    })
}
