//! zhf - Zero Hydra Failures tracker

use anyhow::{Context as _, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::{IsTerminal, Write};
use std::time::Duration;
use tracing::info;

use zhf::cli::{
    Cli, Commands, CrawlEvalsArgs, CrawlJobsetArgs, FailedDepsArgs, FetchMaintainersArgs,
    RenderMaintainersArgs,
};
use zhf::failed_deps;
use zhf::hydra::{self, CrawlOutcome, HydraClient};
use zhf::logging::{self, LogConfig};
use zhf::maintainers::{self, FetchOptions};
use zhf::render;

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let mut log_config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if let Some(ref path) = cli.log_file {
        log_config = log_config.with_file(path.clone());
    }
    logging::init(log_config);

    let result = match &cli.command {
        Commands::CrawlJobset(args) => cmd_crawl_jobset(&cli, args),
        Commands::CrawlEvals(args) => cmd_crawl_evals(&cli, args),
        Commands::FailedDeps(args) => cmd_failed_deps(&cli, args),
        Commands::FetchMaintainers(args) => cmd_fetch_maintainers(&cli, args),
        Commands::RenderMaintainers(args) => cmd_render_maintainers(&cli, args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Print `<eval_id> <timestamp>` of the newest finished evaluation of the jobset.
fn cmd_crawl_jobset(cli: &Cli, args: &CrawlJobsetArgs) -> Result<()> {
    let client = HydraClient::new(&cli.hydra_url)?;
    let eval = client
        .latest_finished_eval(&args.project, &args.jobset)
        .with_context(|| format!("Failed to crawl jobset {}/{}", args.project, args.jobset))?;

    writeln!(std::io::stdout().lock(), "{} {}", eval.id, eval.timestamp)?;
    info!(eval = eval.id, "Jobset crawled");
    Ok(())
}

fn cmd_crawl_evals(cli: &Cli, args: &CrawlEvalsArgs) -> Result<()> {
    let targets = args.targets()?;
    let client = HydraClient::new(&cli.hydra_url)?;

    let mut written = 0;
    for (eval_id, context) in targets {
        match hydra::crawl_eval(&client, &cli.data_dir, eval_id, context)
            .with_context(|| format!("Failed to crawl evaluation {eval_id}"))?
        {
            CrawlOutcome::Cached => {}
            CrawlOutcome::Written(_) => written += 1,
        }
    }
    info!(written, "Evaluations crawled");
    Ok(())
}

fn cmd_failed_deps(cli: &Cli, args: &FailedDepsArgs) -> Result<()> {
    let client = HydraClient::new(&cli.hydra_url)?;
    let show_progress = !args.no_progress && !cli.quiet && std::io::stderr().is_terminal();
    failed_deps::crawl_failed_deps(&client, &cli.data_dir, &args.evals, args.jobs, show_progress)
        .context("Failed to crawl failed dependencies")?;
    Ok(())
}

fn cmd_fetch_maintainers(cli: &Cli, args: &FetchMaintainersArgs) -> Result<()> {
    let targets = args.targets()?;

    let mut options = FetchOptions::new(&cli.data_dir);
    if let Some(jobs) = args.jobs {
        options.workers = jobs;
    }
    options.eval_timeout = Duration::from_secs(args.eval_timeout);
    options.nix_bin = args.nix_bin.clone();
    options.nixpkgs_url = args.nixpkgs_url.clone();
    options.nixos_patch = args.nixos_patch.clone();
    options.skip_checkout = args.skip_checkout;
    options.show_progress = !args.no_progress && !cli.quiet && std::io::stderr().is_terminal();

    for target in &targets {
        maintainers::fetch_maintainers(&options, target).with_context(|| {
            format!("Failed to fetch maintainers for evaluation {}", target.eval_id)
        })?;
    }
    Ok(())
}

fn cmd_render_maintainers(cli: &Cli, args: &RenderMaintainersArgs) -> Result<()> {
    let failures = render::load_failures(&cli.data_dir, &args.evals)?;
    render::render_site(&cli.public_dir, &cli.hydra_url, &failures)
        .with_context(|| format!("Failed to render pages into {}", cli.public_dir.display()))?;
    Ok(())
}
