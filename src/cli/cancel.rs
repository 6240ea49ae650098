//! cg cancel command implementation
//!
//! A clone running in this process is stopped directly. A clone running in
//! another cg process sees the persisted cancel flag on its next poll.

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::pipeline::Pipeline;
use crate::progress::ProgressStatus;

#[derive(serde::Serialize)]
struct CancelReport {
    task_id: String,
    /// A child process in this invocation was terminated
    stopped: bool,
    /// The task was still in flight when the flag was set
    requested: bool,
    previous_status: ProgressStatus,
}

pub fn run(pipeline: &Pipeline, task_id: &str, output: OutputOptions) -> Result<()> {
    let before = pipeline.store().get(task_id);
    let in_flight = !before.status.is_terminal()
        && !matches!(
            before.status,
            ProgressStatus::Unknown | ProgressStatus::Mapped
        );

    let stopped = pipeline.cancel(task_id);

    let report = CancelReport {
        task_id: task_id.to_string(),
        stopped,
        requested: in_flight,
        previous_status: before.status,
    };

    let header = if stopped {
        "cg cancel: clone stopped"
    } else if in_flight {
        "cg cancel: cancel requested"
    } else {
        "cg cancel: no running process"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("task", task_id.to_string());
    human.push_summary(
        "previous",
        format!("{} {}%", before.status, before.percent),
    );
    if in_flight && !stopped {
        human.push_next_step(format!("cg progress {task_id} --watch"));
    }

    emit_success(output, "cancel", &report, Some(&human))
}
