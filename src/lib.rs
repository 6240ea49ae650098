//! codegenius - repository fetch core
//!
//! Turns a remote repository URL into a locally cached working copy while
//! publishing live, cancellable, time-limited progress.
//!
//! # Core Concepts
//!
//! - **Progress records**: one JSON file per task, polled by observers
//! - **Supervised clones**: a `git clone` child watched for progress,
//!   cancellation and its deadline
//! - **Repository cache**: one slot per URL, keyed by name and URL hash
//! - **Job ledger**: coarse lifecycle state for every task
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `cg.toml`
//! - `error`: Error types and result aliases
//! - `storage`: Home directory layout and JSON helpers
//! - `lock`: File locking and atomic writes
//! - `progress`: Progress records and ledger inference
//! - `ledger`: Job ledger
//! - `cancel`: Cancel tokens and the live-process registry
//! - `source`: URL validation and cache keys
//! - `git`: Git client discovery and HEAD inspection via libgit2
//! - `clone`: Supervised shallow clones
//! - `cache`: Content-addressed repository cache
//! - `pipeline`: Stage orchestration across cache, clone and ledger
//! - `output`: Shared CLI output formatting

pub mod cache;
pub mod cancel;
pub mod cli;
pub mod clone;
pub mod config;
pub mod error;
pub mod git;
pub mod ledger;
pub mod lock;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod storage;

pub use cache::RepoCache;
pub use clone::{CloneExecutor, CloneOptions};
pub use error::{Error, Result};
pub use ledger::{Job, JobLedger, JobStatus};
pub use pipeline::{FetchRequest, Pipeline};
pub use progress::{ProgressRecord, ProgressStatus, ProgressStore};
