//! cg cache command implementations

use std::path::PathBuf;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::pipeline::Pipeline;
use crate::source;

#[derive(serde::Serialize)]
struct PathReport {
    url: String,
    path: PathBuf,
    valid: bool,
}

pub fn run_path(pipeline: &Pipeline, url: &str, output: OutputOptions) -> Result<()> {
    source::validate(url, &pipeline.config().source.allowed_host)?;
    let cache = pipeline.cache();
    let report = PathReport {
        url: url.to_string(),
        path: cache.slot_path(url),
        valid: cache.cached_path(url).is_some(),
    };

    // Plain path on stdout so the command composes in shell pipelines.
    if !output.json {
        if !output.quiet {
            println!("{}", report.path.display());
        }
        return Ok(());
    }
    emit_success(output, "cache path", &report, None)
}

pub fn run_info(pipeline: &Pipeline, url: &str, output: OutputOptions) -> Result<()> {
    source::validate(url, &pipeline.config().source.allowed_host)?;
    let info = pipeline.cache().info(url);

    let header = if info.valid {
        "cg cache info: cached"
    } else {
        "cg cache info: not cached"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("key", info.key.clone());
    human.push_summary("path", info.path.display().to_string());
    if let Some(head) = &info.head {
        human.push_summary("head", head.oid.clone());
        if let Some(branch) = &head.shorthand {
            human.push_summary("branch", branch.clone());
        }
        if let Some(summary) = &head.summary {
            human.push_detail(summary.clone());
        }
    } else if info.valid {
        human.push_warning("HEAD could not be read");
    }
    if info.valid {
        human.push_next_step(format!("cg cache invalidate {url}"));
    } else {
        human.push_next_step(format!("cg fetch {url}"));
    }

    emit_success(output, "cache info", &info, Some(&human))
}

#[derive(serde::Serialize)]
struct InvalidateReport {
    url: String,
    path: PathBuf,
    removed: bool,
}

pub fn run_invalidate(pipeline: &Pipeline, url: &str, output: OutputOptions) -> Result<()> {
    source::validate(url, &pipeline.config().source.allowed_host)?;
    let cache = pipeline.cache();
    let removed = cache.invalidate(url)?;
    let report = InvalidateReport {
        url: url.to_string(),
        path: cache.slot_path(url),
        removed,
    };

    let header = if removed {
        "cg cache invalidate: removed"
    } else {
        "cg cache invalidate: nothing cached"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("path", report.path.display().to_string());

    emit_success(output, "cache invalidate", &report, Some(&human))
}
