//! cg jobs command implementations

use crate::error::{Error, Result};
use crate::ledger::JobStatus;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::pipeline::Pipeline;

/// Options for jobs list/search
pub struct ListOptions {
    pub query: Option<String>,
    pub status: Option<String>,
    pub command: &'static str,
    pub output: OutputOptions,
}

pub fn run_list(pipeline: &Pipeline, options: ListOptions) -> Result<()> {
    if let Some(status) = options.status.as_deref() {
        let status = status.trim();
        if !status.is_empty() && !status.eq_ignore_ascii_case("any") {
            status.parse::<JobStatus>()?;
        }
    }

    let jobs = pipeline
        .ledger()
        .search(options.query.as_deref(), options.status.as_deref());

    let mut human = HumanOutput::new(format!("cg {}: {} job(s)", options.command, jobs.len()));
    if let Some(query) = &options.query {
        human.push_summary("query", query.clone());
    }
    if let Some(status) = &options.status {
        human.push_summary("status", status.clone());
    }
    for job in &jobs {
        human.push_detail(format!(
            "{}  {:<11}  {:<12}  {}",
            job.id, job.status, job.agent, job.repo_url
        ));
    }
    if jobs.is_empty() {
        human.push_next_step("cg fetch <url>");
    }

    emit_success(options.output, options.command, &jobs, Some(&human))
}

pub fn run_show(pipeline: &Pipeline, task_id: &str, output: OutputOptions) -> Result<()> {
    let job = pipeline
        .ledger()
        .get(task_id)
        .ok_or_else(|| Error::JobNotFound(task_id.to_string()))?;

    let mut human = HumanOutput::new(format!("cg jobs show: {}", job.status));
    human.push_summary("id", job.id.clone());
    human.push_summary("repo", job.repo_url.clone());
    human.push_summary("agent", job.agent.to_string());
    human.push_summary("priority", job.priority.clone());
    human.push_summary("created", job.created_at.to_rfc3339());
    human.push_summary("updated", job.updated_at.to_rfc3339());
    if let Some(ended) = job.ended_at {
        human.push_summary("ended", ended.to_rfc3339());
    }
    for (key, value) in &job.details {
        human.push_detail(format!("{key}: {value}"));
    }
    for entry in &job.history {
        human.push_detail(format!("{} -> {}", entry.at.to_rfc3339(), entry.status));
    }
    if !job.status.is_terminal() {
        human.push_next_step(format!("cg progress {} --watch", job.id));
    }

    emit_success(output, "jobs show", &job, Some(&human))
}
