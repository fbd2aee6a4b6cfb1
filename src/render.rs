//! Static HTML pages listing failed builds per maintainer.
//!
//! Output layout under the public directory:
//!
//! - `failed/by-maintainer/<maintainer>.html` - direct and indirect failures of one maintainer
//! - `failed/overview.html` - every maintainer with their number of failures
//! - `failed/all.html` - every failed attribute once

use crate::error::{Result, ZhfError};
use crate::evalcache::{self, DEPENDENCY_FAILED, SUCCEEDED};
use crate::maintainers::SENTINEL;
use crate::paths;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// One line of a maintainer cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainedBuild {
    pub maintainer: String,
    pub attr: String,
    pub build_id: u64,
    pub name: String,
    pub system: String,
    pub status: String,
}

impl MaintainedBuild {
    pub fn parse_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim_end().splitn(6, ' ').collect();
        if parts.len() != 6 {
            return Err(ZhfError::MalformedLine {
                line: line.to_string(),
                reason: format!("expected 6 fields, found {}", parts.len()),
            });
        }
        let build_id = parts[2].parse().map_err(|_| ZhfError::MalformedLine {
            line: line.to_string(),
            reason: format!("invalid build id '{}'", parts[2]),
        })?;

        Ok(Self {
            maintainer: parts[0].to_string(),
            attr: parts[1].to_string(),
            build_id,
            name: parts[3].to_string(),
            system: parts[4].to_string(),
            status: parts[5].to_string(),
        })
    }

    fn is_indirect(&self) -> bool {
        self.status == DEPENDENCY_FAILED
    }
}

/// Failed builds grouped by maintainer, each group sorted by attribute.
pub type FailuresByMaintainer = BTreeMap<String, Vec<MaintainedBuild>>;

/// Read the maintainer caches of `evals` and group their failures by maintainer.
///
/// Succeeded builds are dropped, and so are maintainers left without failures.
pub fn load_failures(data_dir: &Path, evals: &[u64]) -> Result<FailuresByMaintainer> {
    let mut grouped = FailuresByMaintainer::new();

    for &eval in evals {
        let path = paths::maintainers_cache_path(data_dir, eval);
        for line in evalcache::read_lines(&path)? {
            let build = MaintainedBuild::parse_line(&line)?;
            if build.status == SUCCEEDED {
                continue;
            }
            grouped
                .entry(build.maintainer.clone())
                .or_default()
                .push(build);
        }
    }

    for builds in grouped.values_mut() {
        builds.sort_by(|a, b| a.attr.cmp(&b.attr));
    }
    grouped.retain(|_, builds| !builds.is_empty());
    Ok(grouped)
}

/// What [`render_site`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub maintainers: usize,
    pub failed_attrs: usize,
}

/// Write all pages for `failures` below `public_dir`.
pub fn render_site(
    public_dir: &Path,
    hydra_url: &str,
    failures: &FailuresByMaintainer,
) -> Result<RenderSummary> {
    let hydra_url = hydra_url.trim_end_matches('/');
    let by_maintainer = paths::by_maintainer_dir(public_dir);
    paths::ensure_dir(&by_maintainer)?;

    for (maintainer, builds) in failures {
        let page = render_maintainer_page(hydra_url, maintainer, builds);
        std::fs::write(by_maintainer.join(page_file_name(maintainer)), page)?;
    }

    let failed_dir = paths::failed_dir(public_dir);
    std::fs::write(failed_dir.join("overview.html"), render_overview(failures))?;

    let all = all_failures(failures);
    std::fs::write(failed_dir.join("all.html"), render_all(hydra_url, &all))?;

    let summary = RenderSummary {
        maintainers: failures.len(),
        failed_attrs: all.len(),
    };
    info!(
        maintainers = summary.maintainers,
        failed_attrs = summary.failed_attrs,
        "Rendered maintainer pages"
    );
    Ok(summary)
}

/// Escape text for use in HTML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// File name of a maintainer's page. Anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn page_file_name(maintainer: &str) -> String {
    let safe: String = maintainer
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.html")
}

fn display_name(maintainer: &str) -> &str {
    if maintainer == SENTINEL {
        "nobody"
    } else {
        maintainer
    }
}

/// Each failed attribute once, with every maintainer it was listed under.
fn all_failures(failures: &FailuresByMaintainer) -> BTreeMap<&str, (&MaintainedBuild, BTreeSet<&str>)> {
    let mut all: BTreeMap<&str, (&MaintainedBuild, BTreeSet<&str>)> = BTreeMap::new();
    for builds in failures.values() {
        for build in builds {
            all.entry(build.attr.as_str())
                .or_insert_with(|| (build, BTreeSet::new()))
                .1
                .insert(display_name(&build.maintainer));
        }
    }
    all
}

fn page_head(out: &mut String, title: &str, root: &str) {
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{title}</title>\n\
         <link rel=\"stylesheet\" href=\"{root}style.css\">\n\
         </head>\n<body>\n<h1><a href=\"{root}index.html\" title=\"Go Home\">&#8962;</a> {title}</h1>\n",
        title = escape(title),
    );
}

const JUMP_LINKS: &str =
    "<p>Jump to: <a href='#direct'>Direct Failures</a>&nbsp;&bull;&nbsp;<a href='#indirect'>Indirect Failures</a></p>\n";

/// A failures table. `with_maintainers` adds a maintainer column.
fn failure_table<'a, I>(out: &mut String, hydra_url: &str, rows: I, with_maintainers: bool)
where
    I: Iterator<Item = (&'a MaintainedBuild, Option<String>)>,
{
    let columns = if with_maintainers { 5 } else { 4 };
    out.push_str("<table>\n<thead><tr><th>Attribute</th><th>Job name</th><th>Platform</th>");
    if with_maintainers {
        out.push_str("<th>Maintainers</th>");
    }
    out.push_str("<th>Result</th></tr></thead>\n<tbody>\n");

    let mut empty = true;
    for (build, maintainers) in rows {
        empty = false;
        let _ = write!(
            out,
            "<tr><td><a href=\"{}/build/{}\">{}</a></td><td>{}</td><td>{}</td>",
            escape(hydra_url),
            build.build_id,
            escape(&build.attr),
            escape(&build.name),
            escape(&build.system),
        );
        if let Some(maintainers) = maintainers {
            let _ = write!(out, "<td>{}</td>", escape(&maintainers));
        }
        let _ = writeln!(out, "<td>{}</td></tr>", escape(&build.status));
    }
    if empty {
        let _ = writeln!(out, "<tr><td colspan=\"{columns}\" class=\"none\">None 🎉</td></tr>");
    }
    out.push_str("</tbody>\n</table>\n");
}

fn direct_and_indirect<'a, I>(out: &mut String, hydra_url: &str, rows: I, with_maintainers: bool)
where
    I: Iterator<Item = (&'a MaintainedBuild, Option<String>)> + Clone,
{
    out.push_str(JUMP_LINKS);
    out.push_str("<h2 id=\"direct\">Direct failures</h2>\n<p>These packages fail to build themselves.</p>\n");
    failure_table(
        out,
        hydra_url,
        rows.clone().filter(|(b, _)| !b.is_indirect()),
        with_maintainers,
    );
    out.push_str(JUMP_LINKS);
    out.push_str("<h2 id=\"indirect\">Indirect failures</h2>\n<p>These packages have a dependency that failed to build.</p>\n");
    failure_table(
        out,
        hydra_url,
        rows.filter(|(b, _)| b.is_indirect()),
        with_maintainers,
    );
}

pub fn render_maintainer_page(hydra_url: &str, maintainer: &str, builds: &[MaintainedBuild]) -> String {
    let mut out = String::new();
    page_head(
        &mut out,
        &format!("Hydra failures for packages maintained by {}", display_name(maintainer)),
        "../../",
    );
    direct_and_indirect(&mut out, hydra_url, builds.iter().map(|b| (b, None)), false);
    out.push_str("</body>\n</html>\n");
    out
}

pub fn render_overview(failures: &FailuresByMaintainer) -> String {
    let mut out = String::new();
    page_head(&mut out, "Hydra failures by maintainer", "../");
    out.push_str(
        "<p>If your name is not in this list, then you don't maintain any failed packages. Congratulations!</p>\n<ul>\n",
    );
    for (maintainer, builds) in failures {
        let _ = writeln!(
            out,
            "<li><a href='by-maintainer/{}'>{}</a> ({})</li>",
            escape(&page_file_name(maintainer)),
            escape(display_name(maintainer)),
            builds.len(),
        );
    }
    out.push_str("</ul>\n</body>\n</html>\n");
    out
}

fn render_all(
    hydra_url: &str,
    all: &BTreeMap<&str, (&MaintainedBuild, BTreeSet<&str>)>,
) -> String {
    let mut out = String::new();
    page_head(&mut out, "All Hydra failures", "../");
    let rows = all.values().map(|(build, maintainers)| {
        let names: Vec<&str> = maintainers.iter().copied().collect();
        (*build, Some(names.join(", ")))
    });
    direct_and_indirect(&mut out, hydra_url, rows, true);
    out.push_str("</body>\n</html>\n");
    out
}
