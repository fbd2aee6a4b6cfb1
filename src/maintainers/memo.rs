//! Resolution results and the per-run lookup memo.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// A maintainer record as found in `meta.maintainers`.
///
/// Only the fields used downstream are kept; everything else in the record is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    /// GitHub handle, the identifier written to the maintainer cache.
    #[serde(default)]
    pub github: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Maintainer {
    pub fn with_github(handle: impl Into<String>) -> Self {
        Self {
            github: Some(handle.into()),
            name: None,
            email: None,
        }
    }
}

/// Outcome of looking up the maintainers of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The evaluator answered; the list may be empty.
    Maintainers(Vec<Maintainer>),
    /// The lookup failed. The reason is for diagnostics only.
    Failed(String),
}

impl Resolution {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Maintainers of a successful lookup, empty for failures.
    pub fn maintainers(&self) -> &[Maintainer] {
        match self {
            Self::Maintainers(list) => list,
            Self::Failed(_) => &[],
        }
    }
}

/// Memo from lookup key to resolution, shared by all workers of a batch.
///
/// Each key owns a write-once cell. Workers that miss on the same key at the same time all
/// wait on that one cell, so the evaluator runs at most once per key.
#[derive(Debug, Default)]
pub struct MaintainerMemo {
    cells: Mutex<HashMap<String, Arc<OnceLock<Resolution>>>>,
}

impl MaintainerMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized resolution of `key`, if one has been stored.
    pub fn get(&self, key: &str) -> Option<Resolution> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Return the resolution of `key`, running `resolve` only if no other caller has.
    ///
    /// The flag is true when this call ran `resolve`.
    pub fn get_or_resolve<F>(&self, key: &str, resolve: F) -> (Resolution, bool)
    where
        F: FnOnce() -> Resolution,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        // The map lock is released here; only callers of this key block on the cell.
        let mut ran = false;
        let resolution = cell.get_or_init(|| {
            ran = true;
            resolve()
        });
        (resolution.clone(), ran)
    }

    /// Number of keys with a stored resolution.
    pub fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|cell| cell.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
