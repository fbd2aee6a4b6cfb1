//! Failed dependencies behind `Dependency failed` builds.
//!
//! For every such build of an evaluation the build page is scraped for the steps that failed.
//! Two caches are written per evaluation:
//!
//! - `data/depcache/<eval>.cache` - `<dependency build>;<job>;<build>`, one line per build
//! - `data/mostimportantcache/<eval>.cache` - `<store path name>;<system>;<dependency build>`,
//!   one line per failed store path of each build
//!
//! Counting lines of the second cache gives the dependencies whose failure blocks the most jobs.

use crate::error::Result;
use crate::evalcache::{self, DEPENDENCY_FAILED};
use crate::hydra::{BuildSteps, HydraClient, parse_build_steps};
use crate::paths;
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info};

/// Parallel requests sent to Hydra.
pub const DEFAULT_PARALLEL_REQUESTS: usize = 4;

/// Source of build pages.
pub trait BuildPages: Sync {
    fn build_page(&self, build_id: u64) -> Result<String>;
}

impl BuildPages for HydraClient {
    fn build_page(&self, build_id: u64) -> Result<String> {
        HydraClient::build_page(self, build_id)
    }
}

/// What a `failed-deps` run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailedDepsSummary {
    /// Evaluations whose caches were written.
    pub crawled: usize,
    /// Evaluations whose caches already existed.
    pub cached: usize,
    /// Build pages fetched.
    pub builds: usize,
    /// Build pages that could not be fetched or parsed.
    pub failures: usize,
    /// Stale cache files removed.
    pub purged: usize,
}

/// Build IDs of the `Dependency failed` rows of a status cache.
pub fn dependency_failed_builds(status_cache: &Path) -> Result<Vec<u64>> {
    Ok(evalcache::read_eval_cache(status_cache)?
        .into_iter()
        .filter(|build| build.status == DEPENDENCY_FAILED)
        .map(|build| build.build_id)
        .collect())
}

/// Fetch and parse the pages of `build_ids` with `workers` concurrent requests.
///
/// A page that fails is logged and left out; the others are unaffected.
pub fn fetch_failed_steps(
    pages: &dyn BuildPages,
    build_ids: &[u64],
    workers: usize,
    show_progress: bool,
) -> BTreeMap<u64, BuildSteps> {
    if build_ids.is_empty() {
        return BTreeMap::new();
    }

    let workers = workers.max(1).min(build_ids.len());
    let progress = progress_bar(build_ids.len(), show_progress);
    let results = Mutex::new(BTreeMap::new());
    let (task_tx, task_rx) = bounded::<u64>(workers * 2);

    thread::scope(|s| {
        for worker_id in 0..workers {
            let rx = task_rx.clone();
            let results = &results;
            let progress = &progress;

            s.spawn(move || {
                while let Ok(build_id) = rx.recv() {
                    match pages.build_page(build_id).and_then(|html| parse_build_steps(&html)) {
                        Ok(steps) => {
                            debug!(build = build_id, failed = steps.failed.len(), "Build steps parsed");
                            results
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(build_id, steps);
                        }
                        Err(e) => {
                            error!(build = build_id, worker_id, error = %e, "Failed fetching dependencies");
                        }
                    }
                    progress.inc(1);
                }
            });
        }
        drop(task_rx);

        for &build_id in build_ids {
            if task_tx.send(build_id).is_err() {
                break;
            }
        }
        drop(task_tx);
    });

    progress.finish_and_clear();
    results.into_inner().unwrap_or_else(PoisonError::into_inner)
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} builds ({eta})")
    {
        pb.set_style(style.progress_chars("█▓▒░  "));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Dependency cache line of a build: its last failed step, if any.
pub fn dep_cache_line(build_id: u64, steps: &BuildSteps) -> Option<String> {
    steps
        .failed
        .last()
        .map(|step| format!("{};{};{build_id}", step.build_id, steps.package))
}

/// Most-important cache lines of a build, one per failed store path.
pub fn most_important_lines(steps: &BuildSteps) -> Vec<String> {
    steps
        .failed
        .iter()
        .map(|step| format!("{};{};{}", step.path_name, steps.system, step.build_id))
        .collect()
}

/// Write `lines` to `<path>.new` and move it over `path`.
fn write_replacing(path: &Path, lines: &[String]) -> Result<()> {
    paths::ensure_parent(path)?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".new");

    let mut out = std::io::BufWriter::new(std::fs::File::create(&staging)?);
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    drop(out);
    std::fs::rename(&staging, path)?;
    Ok(())
}

/// Remove `<eval>.cache` files in `dir` for evaluations not in `keep`.
pub fn purge_stale(dir: &Path, keep: &[u64]) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut purged = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(eval) = entry.file_name().to_str().and_then(paths::cache_file_eval) else {
            continue;
        };
        if !keep.contains(&eval) {
            info!(eval, dir = %dir.display(), "Purging cache of evaluation");
            std::fs::remove_file(entry.path())?;
            purged += 1;
        }
    }
    Ok(purged)
}

/// Crawl the failed dependencies of `evals` and drop caches of evaluations not listed.
///
/// Evaluations whose two caches both exist are skipped. A missing status cache aborts the run.
pub fn crawl_failed_deps(
    pages: &dyn BuildPages,
    data_dir: &Path,
    evals: &[u64],
    workers: usize,
    show_progress: bool,
) -> Result<FailedDepsSummary> {
    let dep_dir = paths::dep_cache_dir(data_dir);
    let important_dir = paths::most_important_cache_dir(data_dir);
    paths::ensure_dir(&dep_dir)?;
    paths::ensure_dir(&important_dir)?;

    let mut summary = FailedDepsSummary::default();
    for &eval in evals {
        let dep_cache = paths::cache_file(&dep_dir, eval);
        let important_cache = paths::cache_file(&important_dir, eval);
        if dep_cache.exists() && important_cache.exists() {
            info!(eval, "Skipping evaluation, dependencies are already cached");
            summary.cached += 1;
            continue;
        }

        let build_ids = dependency_failed_builds(&paths::eval_cache_path(data_dir, eval))?;
        info!(eval, builds = build_ids.len(), "Found builds with failed dependencies");

        let steps = fetch_failed_steps(pages, &build_ids, workers, show_progress);
        summary.builds += build_ids.len();
        summary.failures += build_ids.len() - steps.len();

        let dep_lines: Vec<String> = steps
            .iter()
            .filter_map(|(&build_id, s)| dep_cache_line(build_id, s))
            .collect();
        let important_lines: Vec<String> = steps.values().flat_map(most_important_lines).collect();
        write_replacing(&important_cache, &important_lines)?;
        write_replacing(&dep_cache, &dep_lines)?;
        summary.crawled += 1;
    }

    summary.purged = purge_stale(&dep_dir, evals)? + purge_stale(&important_dir, evals)?;
    info!(
        crawled = summary.crawled,
        cached = summary.cached,
        failures = summary.failures,
        purged = summary.purged,
        "Failed dependencies crawled"
    );
    Ok(summary)
}
