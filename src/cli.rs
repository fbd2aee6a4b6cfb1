//! Command-line interface definitions using clap.

use crate::context::Context;
use crate::error::{Result, ZhfError};
use crate::failed_deps::DEFAULT_PARALLEL_REQUESTS;
use crate::hydra::DEFAULT_HYDRA_URL;
use crate::logging::LogFormat;
use crate::maintainers::FetchTarget;
use crate::nixpkgs::NIXPKGS_URL;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Track Hydra build failures and the maintainers responsible for them.
#[derive(Parser, Debug)]
#[command(name = "zhf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the caches and the nixpkgs checkout.
    #[arg(long, env = "ZHF_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory the HTML pages are written to.
    #[arg(long, env = "ZHF_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Base URL of the Hydra instance.
    #[arg(long, env = "ZHF_HYDRA_URL", default_value = DEFAULT_HYDRA_URL)]
    pub hydra_url: String,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log format (pretty, compact, json).
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the newest finished evaluation of a jobset.
    CrawlJobset(CrawlJobsetArgs),

    /// Crawl evaluations into status caches.
    CrawlEvals(CrawlEvalsArgs),

    /// Find the failed dependencies of `Dependency failed` builds.
    FailedDeps(FailedDepsArgs),

    /// Look up the maintainers of failed jobs.
    FetchMaintainers(FetchMaintainersArgs),

    /// Render per-maintainer failure pages.
    RenderMaintainers(RenderMaintainersArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "zhf",
            &mut std::io::stdout(),
        );
    }
}

#[derive(Parser, Debug)]
pub struct CrawlJobsetArgs {
    /// Hydra project, e.g. `nixos`.
    pub project: String,

    /// Jobset within the project, e.g. `trunk-combined`.
    pub jobset: String,
}

#[derive(Parser, Debug)]
pub struct CrawlEvalsArgs {
    /// Pairs of `<eval_id> <context>`, where context is `nixos` (1) or `nixpkgs` (0).
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<String>,
}

impl CrawlEvalsArgs {
    pub fn targets(&self) -> Result<Vec<(u64, Context)>> {
        parse_crawl_targets(&self.targets)
    }
}

#[derive(Parser, Debug)]
pub struct FailedDepsArgs {
    /// Evaluations to crawl. Caches of evaluations not listed are removed.
    #[arg(required = true)]
    pub evals: Vec<u64>,

    /// Number of concurrent requests to Hydra.
    #[arg(short, long, default_value_t = DEFAULT_PARALLEL_REQUESTS)]
    pub jobs: usize,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Parser, Debug)]
pub struct FetchMaintainersArgs {
    /// Triples of `<eval_id> <revision> <context>`.
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Number of concurrent `nix eval` workers (defaults to the number of CPUs).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Seconds before a single `nix eval` is abandoned.
    #[arg(long, default_value_t = 300)]
    pub eval_timeout: u64,

    /// The nix binary to evaluate with.
    #[arg(long, env = "ZHF_NIX_BIN", default_value = "nix")]
    pub nix_bin: PathBuf,

    /// Patch applied to nixpkgs before evaluating NixOS jobs.
    #[arg(long)]
    pub nixos_patch: Option<PathBuf>,

    /// Repository the nixpkgs checkout is fetched from.
    #[arg(long, env = "ZHF_NIXPKGS_URL", default_value = NIXPKGS_URL)]
    pub nixpkgs_url: String,

    /// Evaluate against the nixpkgs checkout as it is, without fetching the revision.
    #[arg(long)]
    pub skip_checkout: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

impl FetchMaintainersArgs {
    pub fn targets(&self) -> Result<Vec<FetchTarget>> {
        parse_fetch_targets(&self.targets)
    }
}

#[derive(Parser, Debug)]
pub struct RenderMaintainersArgs {
    /// Evaluations whose maintainer caches are rendered.
    #[arg(required = true)]
    pub evals: Vec<u64>,
}

fn parse_eval_id(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| ZhfError::InvalidArgs(format!("'{value}' is not an evaluation id")))
}

fn parse_context(value: &str) -> Result<Context> {
    value.parse().map_err(ZhfError::InvalidArgs)
}

/// Group positional arguments into `(eval_id, context)` pairs.
pub fn parse_crawl_targets<S: AsRef<str>>(args: &[S]) -> Result<Vec<(u64, Context)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(ZhfError::InvalidArgs(format!(
            "expected pairs of <eval_id> <context>, got {} argument(s)",
            args.len()
        )));
    }
    args.chunks(2)
        .map(|pair| Ok((parse_eval_id(pair[0].as_ref())?, parse_context(pair[1].as_ref())?)))
        .collect()
}

/// Group positional arguments into `(eval_id, revision, context)` triples.
pub fn parse_fetch_targets<S: AsRef<str>>(args: &[S]) -> Result<Vec<FetchTarget>> {
    if args.is_empty() || args.len() % 3 != 0 {
        return Err(ZhfError::InvalidArgs(format!(
            "expected triples of <eval_id> <revision> <context>, got {} argument(s)",
            args.len()
        )));
    }
    args.chunks(3)
        .map(|triple| {
            Ok(FetchTarget {
                eval_id: parse_eval_id(triple[0].as_ref())?,
                revision: triple[1].as_ref().to_string(),
                context: parse_context(triple[2].as_ref())?,
            })
        })
        .collect()
}
