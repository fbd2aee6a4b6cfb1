//! Crawling evaluation data from a Hydra instance.

pub mod parse;

pub use parse::{
    BuildSteps, EvalSummary, FailedStep, latest_finished_eval, parse_build_steps,
    parse_eval_builds, parse_jobset_evals,
};

use crate::context::Context;
use crate::error::{Result, ZhfError};
use crate::evalcache::{self, EvalBuild};
use crate::paths;
use reqwest::blocking::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The public NixOS Hydra.
pub const DEFAULT_HYDRA_URL: &str = "https://hydra.nixos.org";

/// Maximum number of retry attempts for a page fetch.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (in milliseconds).
const BASE_DELAY_MS: u64 = 1000;

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Full evaluation pages of large jobsets take a while to render.
const READ_TIMEOUT_SECS: u64 = 300;

const USER_AGENT: &str = concat!("zhf/", env!("CARGO_PKG_VERSION"), " (hydra failure tracker)");

/// Retry `operation` with exponential backoff while `retryable` says the error is transient.
fn retry_with_backoff<T, F, R>(
    max_retries: u32,
    base_delay: Duration,
    retryable: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    R: Fn(&ZhfError) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && retryable(&e) => {
                let delay = base_delay * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Request failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Network failures and server errors are worth retrying; client errors are not.
fn is_transient(err: &ZhfError) -> bool {
    match err {
        ZhfError::Network(_) => true,
        ZhfError::Http { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Blocking client for Hydra's HTML interface.
pub struct HydraClient {
    base_url: String,
    client: Client,
}

impl HydraClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .map_err(ZhfError::Network)?;

        Ok(Self::with_client(base_url, client))
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a page body, retrying transient failures.
    pub fn get_page(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");

        retry_with_backoff(
            MAX_RETRIES,
            Duration::from_millis(BASE_DELAY_MS),
            is_transient,
            || {
                let response = self.client.get(&url).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ZhfError::Http {
                        status: status.as_u16(),
                        url: url.clone(),
                    });
                }
                Ok(response.text()?)
            },
        )
    }

    /// The newest finished evaluation of a jobset.
    pub fn latest_finished_eval(&self, project: &str, jobset: &str) -> Result<EvalSummary> {
        let html = self.get_page(&format!("/jobset/{project}/{jobset}/evals"))?;
        latest_finished_eval(&html)
    }

    /// Raw page of a single build.
    pub fn build_page(&self, build_id: u64) -> Result<String> {
        self.get_page(&format!("/build/{build_id}"))
    }

    /// All builds of an evaluation that are tracked in `context`.
    pub fn eval_builds(&self, eval_id: u64, context: Context) -> Result<Vec<EvalBuild>> {
        let html = self.get_page(&format!("/eval/{eval_id}?full=1"))?;
        parse_eval_builds(&html, context)
    }
}

/// Outcome of crawling one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The status cache already existed.
    Cached,
    /// The status cache was written with this many builds.
    Written(usize),
}

/// Crawl an evaluation into its status cache unless that cache already exists.
pub fn crawl_eval(
    client: &HydraClient,
    data_dir: &Path,
    eval_id: u64,
    context: Context,
) -> Result<CrawlOutcome> {
    let cache = paths::eval_cache_path(data_dir, eval_id);
    if cache.exists() {
        info!(eval = eval_id, "Evaluation is already cached");
        return Ok(CrawlOutcome::Cached);
    }

    let builds = client.eval_builds(eval_id, context)?;
    evalcache::write_eval_cache(&cache, &builds)?;
    info!(eval = eval_id, builds = builds.len(), context = %context, "Evaluation cached");
    Ok(CrawlOutcome::Written(builds.len()))
}
