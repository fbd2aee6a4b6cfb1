//! Resolving the maintainers of a single job.

use super::classify::JobRecord;
use super::memo::{Maintainer, MaintainerMemo, Resolution};
use crate::context::Context;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single evaluator call failed. Never escapes the job it belongs to.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("evaluator exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("unparseable evaluator output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can list the maintainers of an attribute path.
pub trait Evaluator: Send + Sync {
    /// Maintainers of `attr_path` (the job attribute, not including `.meta.maintainers`).
    fn maintainers(&self, context: Context, attr_path: &str) -> Result<Vec<Maintainer>, EvalError>;
}

/// Resolve the maintainers of `job`, consulting `memo` first.
///
/// Jobs sharing a lookup key share one evaluator call. Failures come back as
/// [`Resolution::Failed`] and are memoized like any other answer.
pub fn resolve(
    job: &JobRecord,
    context: Context,
    memo: &MaintainerMemo,
    evaluator: &dyn Evaluator,
) -> Resolution {
    let key = job.lookup_key();
    let attr = job.eval_attr(context);

    let (resolution, evaluated) = memo.get_or_resolve(key, || {
        match evaluator.maintainers(context, attr) {
            Ok(maintainers) => Resolution::Maintainers(maintainers),
            Err(e) => {
                warn!(job = %job.job_name, attr = %attr, error = %e, "Maintainer lookup failed");
                Resolution::Failed(e.to_string())
            }
        }
    });

    if !evaluated {
        debug!(job = %job.job_name, key = %key, "Reusing memoized maintainers");
    }
    resolution
}
