//! Layout of the data and public directories.

use std::path::{Path, PathBuf};

/// Directory holding the per-evaluation status caches.
pub const EVAL_CACHE_DIR: &str = "evalcache";

/// Directory holding the per-evaluation maintainer caches.
pub const MAINTAINERS_CACHE_DIR: &str = "maintainerscache";

/// Directory holding, per evaluation, the failed dependency of each `Dependency failed` build.
pub const DEP_CACHE_DIR: &str = "depcache";

/// Directory holding, per evaluation, every failed dependency store path.
pub const MOST_IMPORTANT_CACHE_DIR: &str = "mostimportantcache";

/// Directory of the nixpkgs checkout used for maintainer lookups.
pub const NIXPKGS_DIR: &str = "nixpkgs";

/// Status cache of an evaluation, e.g. `data/evalcache/1801234.cache`.
pub fn eval_cache_path(data_dir: &Path, eval_id: u64) -> PathBuf {
    data_dir.join(EVAL_CACHE_DIR).join(format!("{eval_id}.cache"))
}

/// Maintainer cache of an evaluation, e.g. `data/maintainerscache/1801234.cache`.
pub fn maintainers_cache_path(data_dir: &Path, eval_id: u64) -> PathBuf {
    data_dir
        .join(MAINTAINERS_CACHE_DIR)
        .join(format!("{eval_id}.cache"))
}

pub fn dep_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(DEP_CACHE_DIR)
}

pub fn most_important_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(MOST_IMPORTANT_CACHE_DIR)
}

/// Cache file of an evaluation inside one of the per-evaluation cache directories.
pub fn cache_file(cache_dir: &Path, eval_id: u64) -> PathBuf {
    cache_dir.join(format!("{eval_id}.cache"))
}

/// Evaluation ID of a cache file name such as `1801234.cache`.
pub fn cache_file_eval(file_name: &str) -> Option<u64> {
    file_name.strip_suffix(".cache")?.parse().ok()
}

pub fn nixpkgs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(NIXPKGS_DIR)
}

/// Root of the rendered failure pages (`public/failed`).
pub fn failed_dir(public_dir: &Path) -> PathBuf {
    public_dir.join("failed")
}

pub fn by_maintainer_dir(public_dir: &Path) -> PathBuf {
    failed_dir(public_dir).join("by-maintainer")
}

/// Create a directory and any missing parents.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Create the parent directory of a file path if it is missing.
pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}
