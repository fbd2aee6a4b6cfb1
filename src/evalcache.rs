//! Per-evaluation status cache (`data/evalcache/<eval>.cache`).
//!
//! One line per job: `<attr> <build_id> <name> <system> <status>`. The status is the
//! remainder of the line and may contain spaces (`Dependency failed`).

use crate::error::{Result, ZhfError};
use crate::paths;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Status string Hydra uses for builds that failed because a dependency did.
pub const DEPENDENCY_FAILED: &str = "Dependency failed";

/// Status string of a successful build.
pub const SUCCEEDED: &str = "Succeeded";

/// A single build row of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalBuild {
    /// Job attribute, e.g. `hello.x86_64-linux`.
    pub attr: String,
    pub build_id: u64,
    /// Derivation name, e.g. `hello-2.12.1`.
    pub name: String,
    pub system: String,
    pub status: String,
}

impl EvalBuild {
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.attr, self.build_id, self.name, self.system, self.status
        )
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim_end().splitn(5, ' ').collect();
        if parts.len() != 5 {
            return Err(ZhfError::MalformedLine {
                line: line.to_string(),
                reason: format!("expected 5 fields, found {}", parts.len()),
            });
        }
        let build_id = parts[1].parse().map_err(|_| ZhfError::MalformedLine {
            line: line.to_string(),
            reason: format!("invalid build id '{}'", parts[1]),
        })?;

        Ok(Self {
            attr: parts[0].to_string(),
            build_id,
            name: parts[2].to_string(),
            system: parts[3].to_string(),
            status: parts[4].to_string(),
        })
    }
}

/// Write a status cache, replacing any existing file. Rows are sorted by attribute.
pub fn write_eval_cache(path: &Path, builds: &[EvalBuild]) -> Result<()> {
    paths::ensure_parent(path)?;

    let mut sorted: Vec<&EvalBuild> = builds.iter().collect();
    sorted.sort_by(|a, b| a.attr.cmp(&b.attr));

    let mut out = BufWriter::new(File::create(path)?);
    for build in sorted {
        writeln!(out, "{}", build.to_line())?;
    }
    out.flush()?;
    Ok(())
}

/// Read the non-empty lines of a cache file.
///
/// A missing file is reported as [`ZhfError::MissingCache`] so callers can abort the run with
/// a clear message instead of producing empty output.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ZhfError::MissingCache(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Read and parse a whole status cache.
pub fn read_eval_cache(path: &Path) -> Result<Vec<EvalBuild>> {
    read_lines(path)?
        .iter()
        .map(|line| EvalBuild::parse_line(line))
        .collect()
}
