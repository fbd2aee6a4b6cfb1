//! Appending resolved maintainers to the maintainer cache.
//!
//! Each line reads `<maintainer> <job_name> <status_fields...>`. Jobs without a known
//! maintainer, including failed lookups, get the `_` placeholder.

use super::dispatch::ResultTable;
use super::memo::Resolution;
use crate::error::Result;
use crate::paths;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// Placeholder for "no maintainer known".
pub const SENTINEL: &str = "_";

/// Status fields of each job, keyed by full job name.
pub type JobsInfo = HashMap<String, Vec<String>>;

/// Render the cache lines for `results`, in table order.
pub fn format_lines(results: &ResultTable, jobs_info: &JobsInfo) -> Vec<String> {
    let mut lines = Vec::new();

    for (job_name, resolution) in results.iter() {
        let Some(fields) = jobs_info.get(job_name) else {
            warn!(job = %job_name, "No status fields for resolved job, skipping");
            continue;
        };
        let suffix = fields.join(" ");
        let line = |maintainer: &str| {
            if suffix.is_empty() {
                format!("{maintainer} {job_name}")
            } else {
                format!("{maintainer} {job_name} {suffix}")
            }
        };

        match resolution {
            Resolution::Maintainers(list) if !list.is_empty() => {
                for maintainer in list {
                    lines.push(line(maintainer.github.as_deref().unwrap_or(SENTINEL)));
                }
            }
            _ => lines.push(line(SENTINEL)),
        }
    }

    lines
}

/// Append the cache lines for `results` to `path`, creating it if needed.
///
/// The file is never truncated; running twice writes every line twice. Returns the number
/// of lines written.
pub fn append_maintainers_cache(
    path: &Path,
    results: &ResultTable,
    jobs_info: &JobsInfo,
) -> Result<usize> {
    paths::ensure_parent(path)?;

    let lines = format_lines(results, jobs_info);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut out = BufWriter::new(file);
    for line in &lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;

    Ok(lines.len())
}
