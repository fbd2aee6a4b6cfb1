//! Extracting data from Hydra's HTML pages.
//!
//! Hydra offers no API for these tables, so rows are read by fixed column position.

use crate::context::Context;
use crate::error::{Result, ZhfError};
use crate::evalcache::EvalBuild;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::warn;

/// A finished evaluation of a jobset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalSummary {
    pub id: u64,
    /// Evaluation time as shown in the page's `<time title=...>`.
    pub timestamp: String,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ZhfError::Markup(format!("bad selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse `/jobset/<project>/<jobset>/evals`.
///
/// Only evaluations that are finished (no `badge-secondary`, i.e. queued builds) and built
/// anything at all (a `badge-success`) are returned.
pub fn parse_jobset_evals(html: &str) -> Result<Vec<EvalSummary>> {
    let doc = Html::parse_document(html);
    let tbody = selector("tbody")?;
    let tr = selector("tr")?;
    let pending = selector(".badge-secondary")?;
    let succeeded = selector(".badge-success")?;
    let link = selector("a")?;
    let time = selector("time")?;

    let table = doc
        .select(&tbody)
        .next()
        .ok_or_else(|| ZhfError::Markup("No evaluation table found".to_string()))?;

    let mut evals = Vec::new();
    for row in table.select(&tr) {
        if row.select(&pending).next().is_some() {
            continue;
        }
        if row.select(&succeeded).next().is_none() {
            continue;
        }

        let id_text = row
            .select(&link)
            .next()
            .map(text_of)
            .ok_or_else(|| ZhfError::Markup("No link found in evaluation row".to_string()))?;
        let id = id_text
            .parse::<u64>()
            .map_err(|_| ZhfError::Markup(format!("Evaluation id '{id_text}' is not a number")))?;
        let timestamp = row
            .select(&time)
            .next()
            .and_then(|t| t.value().attr("title"))
            .ok_or_else(|| ZhfError::Markup(format!("No time found for evaluation {id}")))?
            .to_string();

        evals.push(EvalSummary { id, timestamp });
    }

    Ok(evals)
}

/// The newest finished evaluation on a jobset's evaluation page.
pub fn latest_finished_eval(html: &str) -> Result<EvalSummary> {
    parse_jobset_evals(html)?
        .into_iter()
        .next()
        .ok_or_else(|| ZhfError::Markup("No finished eval found".to_string()))
}

/// Parse `/eval/<id>?full=1` into build rows, keeping the systems tracked in `context`.
///
/// Rows are deduplicated by attribute and returned sorted by attribute.
pub fn parse_eval_builds(html: &str, context: Context) -> Result<Vec<EvalBuild>> {
    let doc = Html::parse_document(html);
    let tbody = selector("tbody")?;
    let tr = selector("tr")?;
    let td = selector("td")?;
    let img = selector("img")?;
    let link = selector("a")?;
    let tt = selector("tt")?;

    let mut builds: BTreeMap<String, EvalBuild> = BTreeMap::new();

    for table in doc.select(&tbody) {
        for row in table.select(&tr) {
            let cols: Vec<ElementRef<'_>> = row.select(&td).collect();
            match cols.len() {
                // Input changes, removed jobs and inputs.
                0 | 2 | 5 => continue,
                6 => {}
                n => {
                    warn!(columns = n, "Skipping row with unexpected column count");
                    continue;
                }
            }

            let Some(status) = cols[0].select(&img).next() else {
                continue;
            };
            let Some(status) = status.value().attr("title") else {
                warn!("Job has no status");
                continue;
            };
            let Some(attr) = cols[2].select(&link).next().map(text_of) else {
                warn!("Job has no attribute name");
                continue;
            };
            let build_id = match cols[1].select(&link).next().map(text_of) {
                Some(id) => match id.parse::<u64>() {
                    Ok(id) => id,
                    Err(_) => {
                        warn!(attr = %attr, build_id = %id, "Job has a non-numeric build ID");
                        continue;
                    }
                },
                None => {
                    warn!(attr = %attr, "Job has no build ID");
                    continue;
                }
            };
            let Some(system) = cols[5].select(&tt).next().map(text_of) else {
                warn!(attr = %attr, "Job has no system");
                continue;
            };

            if !context.tracks_system(&system) {
                continue;
            }

            builds.insert(
                attr.clone(),
                EvalBuild {
                    attr,
                    build_id,
                    name: text_of(cols[4]),
                    system,
                    status: status.trim().to_string(),
                },
            );
        }
    }

    Ok(builds.into_values().collect())
}

/// A build step that failed while building another job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    /// Store path of the step, e.g. `/nix/store/<hash>-openssl-3.0.13`.
    pub store_path: String,
    /// Store path without the store directory and hash.
    pub path_name: String,
    /// Build that failed. Hydra links the propagated build when the step was cached.
    pub build_id: u64,
}

/// What a build page says about why the build did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSteps {
    pub system: String,
    /// Job name from the details tab.
    pub package: String,
    /// Failed steps in page order, one per store path.
    pub failed: Vec<FailedStep>,
}

/// Name part of a store path: `/nix/store/<hash>-openssl-3.0` becomes `openssl-3.0`.
fn store_path_name(store_path: &str) -> &str {
    store_path
        .strip_prefix("/nix/store/")
        .and_then(|rest| rest.split_once('-'))
        .map(|(_, name)| name)
        .unwrap_or(store_path)
}

/// Build ID from a link such as `https://hydra.nixos.org/build/123/nixlog/1`.
fn linked_build_id(href: &str) -> Option<u64> {
    href.split('/')
        .skip_while(|segment| *segment != "build")
        .nth(1)
        .and_then(|id| id.parse().ok())
}

/// Parse `/build/<id>`, collecting the failed steps from the build steps tab.
///
/// Only rows whose status mentions `Failed` or `Cached` and that link a log or a build count.
/// Rows without such a link belong to retried steps and are skipped.
pub fn parse_build_steps(html: &str) -> Result<BuildSteps> {
    let doc = Html::parse_document(html);
    let info_tt = selector(".info-table tt")?;
    let details_tt = selector("#tabs-details .info-table tt")?;
    let steps_table = selector("#tabs-buildsteps table.clickable-rows")?;
    let tr = selector("tr")?;
    let td = selector("td")?;
    let link = selector("a")?;
    let tt = selector("tt")?;

    let system = doc
        .select(&info_tt)
        .next()
        .map(text_of)
        .ok_or_else(|| ZhfError::Markup("No architecture found".to_string()))?;
    let package = doc
        .select(&details_tt)
        .nth(2)
        .map(text_of)
        .ok_or_else(|| ZhfError::Markup("No package name found".to_string()))?;
    let table = doc
        .select(&steps_table)
        .next()
        .ok_or_else(|| ZhfError::Markup("No build steps found".to_string()))?;

    let mut failed: Vec<FailedStep> = Vec::new();
    for row in table.select(&tr) {
        let cols: Vec<ElementRef<'_>> = row.select(&td).collect();
        if cols.len() != 5 {
            continue;
        }
        let status = text_of(cols[4]);
        if !status.contains("Failed") && !status.contains("Cached") {
            continue;
        }

        let mut href = None;
        for a in cols[4].select(&link) {
            let text = text_of(a);
            if href.is_none() && text == "log" {
                href = a.value().attr("href");
            }
            if text.starts_with("build ") {
                href = a.value().attr("href");
            }
        }
        let Some(href) = href else {
            continue;
        };

        let store_path = cols[1]
            .select(&tt)
            .next()
            .map(text_of)
            .ok_or_else(|| ZhfError::Markup("No store path found".to_string()))?;
        let store_path = store_path.split(',').next().unwrap_or_default().trim().to_string();
        let build_id = linked_build_id(href)
            .ok_or_else(|| ZhfError::Markup(format!("No build ID in link '{href}'")))?;

        let step = FailedStep {
            path_name: store_path_name(&store_path).to_string(),
            store_path,
            build_id,
        };
        // A restarted evaluation lists the same step again.
        match failed.iter_mut().find(|s| s.store_path == step.store_path) {
            Some(existing) => *existing = step,
            None => failed.push(step),
        }
    }

    Ok(BuildSteps {
        system,
        package,
        failed,
    })
}
