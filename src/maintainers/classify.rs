//! Picking failed jobs out of a status cache.

use crate::context::{Context, NIXPKGS_NAMESPACE};

/// A failed job that is a candidate for maintainer lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Full job name including the architecture, and the `nixpkgs.` namespace for jobs of the
    /// plain package set.
    pub job_name: String,
    /// Every token after the job name, status last. Written back verbatim.
    pub status_fields: Vec<String>,
}

impl JobRecord {
    /// Job name with its architecture segment removed. Jobs of the same package on
    /// different systems share this key.
    pub fn lookup_key(&self) -> &str {
        lookup_key(&self.job_name)
    }

    /// Attribute path handed to the evaluator. The plain package set's expression tree has
    /// no `nixpkgs` root, so the namespace label is dropped again.
    pub fn eval_attr(&self, context: Context) -> &str {
        match context {
            Context::NixOs => &self.job_name,
            Context::Nixpkgs => self
                .job_name
                .split_once('.')
                .map(|(_, rest)| rest)
                .unwrap_or(&self.job_name),
        }
    }
}

/// Strip the last dot-separated segment. Names without a dot are their own key.
pub fn lookup_key(job_name: &str) -> &str {
    job_name
        .rsplit_once('.')
        .map(|(key, _)| key)
        .unwrap_or(job_name)
}

/// Decide whether a status cache line is a failed job and, if so, parse it.
///
/// Lines with fewer than two tokens, an empty job name, or a last token not containing
/// `failed` (case-insensitive) are rejected.
pub fn classify(line: &str, context: Context) -> Option<JobRecord> {
    let tokens: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(' ').collect();
    if tokens.len() < 2 {
        return None;
    }

    let status = tokens[tokens.len() - 1].trim().to_lowercase();
    if !status.contains("failed") {
        return None;
    }

    let name = tokens[0].trim();
    if name.is_empty() {
        return None;
    }
    let job_name = match context {
        Context::NixOs => name.to_string(),
        Context::Nixpkgs => format!("{NIXPKGS_NAMESPACE}.{name}"),
    };
    let mut status_fields: Vec<String> = tokens[1..].iter().map(|t| t.to_string()).collect();
    if let Some(last) = status_fields.last_mut() {
        *last = last.trim().to_string();
    }

    Some(JobRecord {
        job_name,
        status_fields,
    })
}
