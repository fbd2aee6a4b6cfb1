//! Keeping a nixpkgs checkout at the revision an evaluation was built from.

use crate::error::{Result, ZhfError};
use git2::{ObjectType, Oid, Repository, ResetType};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Upstream nixpkgs repository.
pub const NIXPKGS_URL: &str = "https://github.com/NixOS/nixpkgs.git";

const REMOTE_NAME: &str = "origin";

/// A nixpkgs work tree managed by zhf.
pub struct NixpkgsCheckout {
    repo: Repository,
    path: PathBuf,
}

impl NixpkgsCheckout {
    /// Open the repository at `path`, initializing an empty one if there is none yet.
    pub fn open_or_init<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = match Repository::open(&path) {
            Ok(repo) => repo,
            Err(_) => {
                std::fs::create_dir_all(&path)?;
                info!(path = %path.display(), "Initializing nixpkgs repository");
                Repository::init(&path)?
            }
        };
        Ok(Self { repo, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make `origin` point at `url`, creating the remote if it does not exist.
    pub fn ensure_origin(&self, url: &str) -> Result<()> {
        match self.repo.find_remote(REMOTE_NAME) {
            Ok(remote) if remote.url() == Some(url) => {}
            Ok(_) => self.repo.remote_set_url(REMOTE_NAME, url)?,
            Err(_) => {
                self.repo.remote(REMOTE_NAME, url)?;
            }
        }
        Ok(())
    }

    /// Fetch `rev` from `origin` and hard-reset the work tree to it.
    ///
    /// `rev` may be a commit hash or a ref name on the remote.
    pub fn checkout(&self, rev: &str) -> Result<()> {
        info!(rev = %rev, "Fetching nixpkgs revision");
        let mut remote = self.repo.find_remote(REMOTE_NAME)?;
        remote.fetch(&[rev], None, None)?;

        let object = match Oid::from_str(rev).and_then(|oid| self.repo.find_object(oid, None)) {
            Ok(object) => object,
            Err(_) => self.repo.revparse_single("FETCH_HEAD")?,
        };
        let commit = object.peel(ObjectType::Commit)?;
        self.repo.reset(&commit, ResetType::Hard, None)?;
        debug!(commit = %commit.id(), "Work tree reset");
        Ok(())
    }

    /// Apply a patch to the work tree with `git apply`.
    pub fn apply_patch(&self, patch: &Path) -> Result<()> {
        info!(patch = %patch.display(), "Applying patch to nixpkgs");
        let patch = std::fs::canonicalize(patch)?;
        let output = Command::new("git")
            .current_dir(&self.path)
            .arg("apply")
            .arg(&patch)
            .output()?;

        if !output.status.success() {
            return Err(ZhfError::Patch {
                path: patch,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Bring the checkout at `path` to `rev`, applying `patch` afterwards if given.
pub fn prepare(path: &Path, url: &str, rev: &str, patch: Option<&Path>) -> Result<()> {
    let checkout = NixpkgsCheckout::open_or_init(path)?;
    checkout.ensure_origin(url)?;
    checkout.checkout(rev)?;
    if let Some(patch) = patch {
        checkout.apply_patch(patch)?;
    }
    Ok(())
}
