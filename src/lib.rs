//! zhf - tracking Hydra build failures for Zero Hydra Failures.
//!
//! Evaluations are crawled from Hydra into status caches, the failed jobs are mapped to their
//! nixpkgs maintainers with `nix eval`, and per-maintainer HTML pages are rendered from that.

pub mod cli;
pub mod context;
pub mod error;
pub mod evalcache;
pub mod failed_deps;
pub mod hydra;
pub mod logging;
pub mod maintainers;
pub mod nixpkgs;
pub mod paths;
pub mod render;
