//! cg progress, clear and complete command implementations

use std::time::Duration;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressRecord, ProgressStatus};

/// Options for the progress command
pub struct ShowOptions {
    pub task_id: String,
    pub watch: bool,
    pub interval_ms: u64,
    pub output: OutputOptions,
}

/// A fetch has nothing more to report once it maps or ends. Unknown tasks
/// never start reporting, so watching them stops at once.
fn settled(record: &ProgressRecord) -> bool {
    record.status.is_terminal()
        || matches!(record.status, ProgressStatus::Mapped | ProgressStatus::Unknown)
}

pub fn run_show(pipeline: &Pipeline, options: ShowOptions) -> Result<()> {
    let store = pipeline.store();
    let mut record = store.get(&options.task_id);

    if options.watch {
        let interval = Duration::from_millis(options.interval_ms.max(10));
        let relay = !options.output.json && !options.output.quiet;
        let mut last = None;
        loop {
            if relay && last.as_ref() != Some(&(record.status, record.percent)) {
                println!("{:>3}% {}", record.percent, record.status.label());
                last = Some((record.status, record.percent));
            }
            if settled(&record) {
                break;
            }
            std::thread::sleep(interval);
            record = store.get(&options.task_id);
        }
    }

    let mut human = HumanOutput::new(format!(
        "cg progress: {} {}%",
        record.status.label(),
        record.percent
    ));
    human.push_summary("task", record.task_id.clone());
    if let Some(stage) = &record.stage {
        human.push_summary("stage", stage.clone());
    }
    if let Some(message) = &record.message {
        human.push_summary("message", message.clone());
    }
    if let Some(doc_path) = &record.doc_path {
        human.push_summary("docs", doc_path.clone());
    }
    for (key, value) in &record.extra {
        human.push_detail(format!("{key}: {value}"));
    }
    match record.status {
        ProgressStatus::Unknown => {
            human.push_warning("no progress record or job for this task");
            human.push_next_step("cg jobs list");
        }
        ProgressStatus::Timeout | ProgressStatus::Error => {
            human.push_next_step(format!("cg jobs show {}", record.task_id));
        }
        _ => {}
    }

    emit_success(options.output, "progress", &record, Some(&human))
}

#[derive(serde::Serialize)]
struct ClearReport {
    task_id: String,
    cleared: bool,
}

pub fn run_clear(pipeline: &Pipeline, task_id: &str, output: OutputOptions) -> Result<()> {
    let existed = pipeline.storage().progress_file(task_id).exists();
    pipeline.store().clear(task_id);

    let report = ClearReport {
        task_id: task_id.to_string(),
        cleared: existed,
    };
    let header = if existed {
        "cg clear: progress removed"
    } else {
        "cg clear: nothing to remove"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("task", task_id.to_string());

    emit_success(output, "clear", &report, Some(&human))
}

pub fn run_complete(
    pipeline: &Pipeline,
    task_id: &str,
    doc_path: Option<&str>,
    output: OutputOptions,
) -> Result<()> {
    pipeline.complete(task_id, doc_path);
    let record = pipeline.store().get(task_id);

    let mut human = HumanOutput::new("cg complete: task done");
    human.push_summary("task", task_id.to_string());
    if let Some(doc_path) = doc_path {
        human.push_summary("docs", doc_path.to_string());
    }
    if pipeline.ledger().get(task_id).is_none() {
        human.push_warning("no ledger job for this task; only progress was updated");
    }

    emit_success(output, "complete", &record, Some(&human))
}
