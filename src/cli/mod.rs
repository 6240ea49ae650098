//! Command-line interface for cg
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is implemented in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::output::OutputOptions;
use crate::pipeline::Pipeline;

mod cache;
mod cancel;
mod fetch;
mod jobs;
mod progress;

/// cg - Codebase Genius repository fetcher
///
/// Fetches repositories into a local cache with live, cancellable progress
/// and a persistent job ledger.
#[derive(Parser, Debug)]
#[command(name = "cg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// State directory (progress, ledger, cache)
    #[arg(long, global = true, env = "CG_HOME")]
    pub home: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a repository into the cache (or a scratch clone)
    Fetch {
        /// Repository URL (https://github.com/<owner>/<repo>)
        url: String,

        /// Task id to report under (defaults to a fresh UUID)
        #[arg(long)]
        task_id: Option<String>,

        /// Rebuild the cache entry even if it is valid
        #[arg(long)]
        refresh: bool,

        /// Clone into scratch space, bypassing the cache
        #[arg(long)]
        no_cache: bool,

        /// Clone time limit in seconds (defaults to clone.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,

        /// History depth (defaults to clone.depth)
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Show a task's progress record
    Progress {
        /// Task id
        task_id: String,

        /// Keep polling until the task settles
        #[arg(long)]
        watch: bool,

        /// Poll interval for --watch, in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Delete a task's progress record
    Clear {
        /// Task id
        task_id: String,
    },

    /// Cancel a task's clone
    Cancel {
        /// Task id
        task_id: String,
    },

    /// Mark a task completed (downstream completion hook)
    Complete {
        /// Task id
        task_id: String,

        /// Location of the generated documentation
        #[arg(long)]
        doc_path: Option<String>,
    },

    /// Job ledger queries
    #[command(subcommand)]
    Jobs(JobsCommands),

    /// Repository cache management
    #[command(subcommand)]
    Cache(CacheCommands),
}

/// Job ledger subcommands
#[derive(Subcommand, Debug)]
pub enum JobsCommands {
    /// List jobs in creation order
    List {
        /// Only jobs with this status (pending, in_progress, completed, canceled, error, timeout, any)
        #[arg(long)]
        status: Option<String>,
    },

    /// Search jobs by id, URL or agent
    Search {
        /// Case-insensitive search term
        query: Option<String>,

        /// Only jobs with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one job
    Show {
        /// Task id
        task_id: String,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print the cache slot for a URL
    Path {
        /// Repository URL
        url: String,
    },

    /// Describe the cache slot for a URL
    Info {
        /// Repository URL
        url: String,
    },

    /// Remove the cache slot for a URL
    Invalidate {
        /// Repository URL
        url: String,
    },
}

impl Cli {
    fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = self.output();
        let pipeline = Pipeline::open(self.home.as_deref())?;
        tracing::debug!(home = %pipeline.storage().home().display(), "opened home");

        match self.command {
            Commands::Fetch {
                url,
                task_id,
                refresh,
                no_cache,
                timeout,
                depth,
            } => fetch::run(
                &pipeline,
                fetch::FetchOptions {
                    url,
                    task_id,
                    refresh,
                    no_cache,
                    timeout,
                    depth,
                    verbose: self.verbose,
                    output,
                },
            ),
            Commands::Progress {
                task_id,
                watch,
                interval_ms,
            } => progress::run_show(
                &pipeline,
                progress::ShowOptions {
                    task_id,
                    watch,
                    interval_ms,
                    output,
                },
            ),
            Commands::Clear { task_id } => progress::run_clear(&pipeline, &task_id, output),
            Commands::Cancel { task_id } => cancel::run(&pipeline, &task_id, output),
            Commands::Complete { task_id, doc_path } => {
                progress::run_complete(&pipeline, &task_id, doc_path.as_deref(), output)
            }
            Commands::Jobs(cmd) => match cmd {
                JobsCommands::List { status } => jobs::run_list(
                    &pipeline,
                    jobs::ListOptions {
                        query: None,
                        status,
                        command: "jobs list",
                        output,
                    },
                ),
                JobsCommands::Search { query, status } => jobs::run_list(
                    &pipeline,
                    jobs::ListOptions {
                        query,
                        status,
                        command: "jobs search",
                        output,
                    },
                ),
                JobsCommands::Show { task_id } => jobs::run_show(&pipeline, &task_id, output),
            },
            Commands::Cache(cmd) => match cmd {
                CacheCommands::Path { url } => cache::run_path(&pipeline, &url, output),
                CacheCommands::Info { url } => cache::run_info(&pipeline, &url, output),
                CacheCommands::Invalidate { url } => {
                    cache::run_invalidate(&pipeline, &url, output)
                }
            },
        }
    }
}
