//! Maintainer lookup for failed Hydra jobs.
//!
//! For one evaluation: read its status cache, keep the failed jobs, resolve their
//! maintainers on a worker pool (one `nix eval` per package, not per architecture) and append
//! the result to the evaluation's maintainer cache.

pub mod classify;
pub mod dispatch;
pub mod memo;
pub mod nix;
pub mod resolver;
pub mod writer;

pub use classify::{JobRecord, classify, lookup_key};
pub use dispatch::{Dispatcher, ResultTable};
pub use memo::{Maintainer, MaintainerMemo, Resolution};
pub use nix::NixEvaluator;
pub use resolver::{EvalError, Evaluator, resolve};
pub use writer::{JobsInfo, SENTINEL, append_maintainers_cache};

use crate::context::Context;
use crate::error::Result;
use crate::{evalcache, nixpkgs, paths};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, info_span, warn};

/// One evaluation to fetch maintainers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub eval_id: u64,
    /// nixpkgs revision the evaluation was built from.
    pub revision: String,
    pub context: Context,
}

/// Settings shared by every evaluation of a `fetch-maintainers` run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub data_dir: PathBuf,
    pub workers: usize,
    pub eval_timeout: Duration,
    pub nix_bin: PathBuf,
    pub nixpkgs_url: String,
    /// Patch applied to the checkout for NixOS evaluations.
    pub nixos_patch: Option<PathBuf>,
    /// Use `data/nixpkgs` as it is instead of fetching the revision.
    pub skip_checkout: bool,
    pub show_progress: bool,
}

impl FetchOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            workers: dispatch::default_workers(),
            eval_timeout: nix::DEFAULT_EVAL_TIMEOUT,
            nix_bin: PathBuf::from("nix"),
            nixpkgs_url: nixpkgs::NIXPKGS_URL.to_string(),
            nixos_patch: None,
            skip_checkout: false,
            show_progress: false,
        }
    }
}

/// What a resolution batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Failed jobs looked up.
    pub jobs: usize,
    /// Distinct lookup keys, i.e. evaluator calls.
    pub lookups: usize,
    pub failures: usize,
    pub lines_written: usize,
}

/// Classify status cache lines, returning the jobs to resolve and their status fields.
pub fn collect_jobs<S: AsRef<str>>(
    lines: &[S],
    context: Context,
) -> (Vec<(JobRecord, Context)>, JobsInfo) {
    let mut jobs = Vec::new();
    let mut jobs_info = JobsInfo::new();

    for job in lines
        .iter()
        .filter_map(|line| classify(line.as_ref(), context))
    {
        jobs_info.insert(job.job_name.clone(), job.status_fields.clone());
        jobs.push((job, context));
    }

    (jobs, jobs_info)
}

/// Resolve the failed jobs of one status cache and append them to `output`.
///
/// Fails only if the status cache cannot be read or the output cannot be written; lookup
/// failures end up as placeholders in the output.
pub fn resolve_eval(
    status_cache: &Path,
    output: &Path,
    context: Context,
    dispatcher: &Dispatcher,
    evaluator: &dyn Evaluator,
) -> Result<FetchSummary> {
    let lines = evalcache::read_lines(status_cache)?;
    let (jobs, jobs_info) = collect_jobs(&lines, context);
    info!(
        total = lines.len(),
        failed = jobs.len(),
        "Classified status cache"
    );

    let memo = MaintainerMemo::new();
    let results = dispatcher.dispatch(&jobs, &memo, evaluator);
    let lines_written = append_maintainers_cache(output, &results, &jobs_info)?;

    Ok(FetchSummary {
        jobs: results.len(),
        lookups: memo.len(),
        failures: results.failures(),
        lines_written,
    })
}

/// Patch to apply after checking out nixpkgs for `context`.
///
/// `release-combined.nix` strips `meta.maintainers` unless patched, so a NixOS lookup without a
/// patch resolves every job to `_`.
fn checkout_patch(options: &FetchOptions, context: Context) -> Option<&Path> {
    match context {
        Context::Nixpkgs => None,
        Context::NixOs => {
            if options.nixos_patch.is_none() {
                warn!("No --nixos-patch given, NixOS jobs will resolve to '_'");
            }
            options.nixos_patch.as_deref()
        }
    }
}

/// Fetch maintainers for one evaluation: check out its nixpkgs revision, then resolve.
pub fn fetch_maintainers(options: &FetchOptions, target: &FetchTarget) -> Result<FetchSummary> {
    let _span = info_span!("fetch_maintainers", eval = target.eval_id, context = %target.context)
        .entered();

    let status_cache = paths::eval_cache_path(&options.data_dir, target.eval_id);
    if !status_cache.exists() {
        return Err(crate::error::ZhfError::MissingCache(status_cache));
    }

    let nixpkgs_dir = paths::nixpkgs_dir(&options.data_dir);
    if options.skip_checkout {
        info!(path = %nixpkgs_dir.display(), "Using existing nixpkgs checkout");
    } else {
        let patch = checkout_patch(options, target.context);
        nixpkgs::prepare(&nixpkgs_dir, &options.nixpkgs_url, &target.revision, patch)?;
    }

    let evaluator = NixEvaluator::new(&nixpkgs_dir)
        .with_nix_bin(&options.nix_bin)
        .with_timeout(options.eval_timeout);
    let dispatcher = Dispatcher::new(options.workers).with_progress(options.show_progress);
    let output = paths::maintainers_cache_path(&options.data_dir, target.eval_id);

    let summary = resolve_eval(
        &status_cache,
        &output,
        target.context,
        &dispatcher,
        &evaluator,
    )?;
    info!(
        jobs = summary.jobs,
        lookups = summary.lookups,
        failures = summary.failures,
        lines = summary.lines_written,
        "Maintainer cache updated"
    );
    Ok(summary)
}
