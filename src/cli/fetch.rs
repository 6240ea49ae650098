//! cg fetch command implementation
//!
//! Runs the fetch on a worker thread and relays progress changes to stderr
//! while waiting for it.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::pipeline::{FetchRequest, Pipeline};
use crate::progress::ProgressStatus;

/// Options for the fetch command
pub struct FetchOptions {
    pub url: String,
    pub task_id: Option<String>,
    pub refresh: bool,
    pub no_cache: bool,
    pub timeout: Option<u64>,
    pub depth: Option<u32>,
    pub verbose: bool,
    pub output: OutputOptions,
}

#[derive(serde::Serialize)]
struct FetchReport {
    task_id: String,
    url: String,
    path: PathBuf,
    cached: bool,
    status: ProgressStatus,
    percent: u8,
}

pub fn run(pipeline: &Pipeline, options: FetchOptions) -> Result<()> {
    let task_id = options
        .task_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut clone_options = pipeline.default_options();
    if let Some(secs) = options.timeout {
        if secs == 0 {
            return Err(Error::InvalidArgument("--timeout must be > 0".to_string()));
        }
        clone_options.timeout = Duration::from_secs(secs);
    }
    if let Some(depth) = options.depth {
        if depth == 0 {
            return Err(Error::InvalidArgument("--depth must be >= 1".to_string()));
        }
        clone_options.depth = depth;
    }

    let request = FetchRequest {
        task_id: task_id.clone(),
        url: options.url.clone(),
        refresh: options.refresh,
        use_cache: !options.no_cache,
        options: clone_options,
    };

    let relay = !options.output.json && !options.output.quiet;
    let poll = pipeline.config().clone.poll_interval();
    let handle = pipeline.spawn_fetch(request);

    let mut last: Option<(ProgressStatus, u8)> = None;
    while !handle.is_finished() {
        if relay {
            let record = pipeline.store().get(&task_id);
            let current = (record.status, record.percent);
            if last != Some(current) && record.status != ProgressStatus::Unknown {
                if options.verbose {
                    eprintln!(
                        "[{task_id}] {:>3}% {}",
                        record.percent,
                        record.status.label()
                    );
                } else {
                    eprintln!("{:>3}% {}", record.percent, record.status.label());
                }
                last = Some(current);
            }
        }
        std::thread::sleep(poll);
    }

    let outcome = handle
        .join()
        .map_err(|_| Error::OperationFailed(format!("fetch worker for {task_id} panicked")))?;
    let record = outcome.record.clone();
    let path = outcome.into_result()?;

    let cached = record
        .extra
        .get("cached")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let report = FetchReport {
        task_id: task_id.clone(),
        url: options.url.clone(),
        path: path.clone(),
        cached,
        status: record.status,
        percent: record.percent,
    };

    let header = if options.no_cache {
        "cg fetch: cloned"
    } else if cached {
        "cg fetch: cache hit"
    } else {
        "cg fetch: cached"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("task", task_id.clone());
    human.push_summary("path", path.display().to_string());
    human.push_summary("progress", format!("{}% {}", record.percent, record.status));
    if options.no_cache {
        human.push_warning("scratch clones are not reused; remove the directory when done");
    } else {
        human.push_next_step(format!("cg cache info {}", options.url));
    }
    human.push_next_step(format!("cg jobs show {task_id}"));

    emit_success(options.output, "fetch", &report, Some(&human))
}
