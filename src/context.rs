//! Which package set an evaluation belongs to.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Hydra jobsets come in two shapes: the NixOS aggregate (`nixos/release-combined.nix`) and
/// the plain package set (`pkgs/top-level/release.nix`). Job names, expression files and the
/// systems worth tracking all differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// The NixOS aggregate jobset.
    NixOs,
    /// The plain nixpkgs jobset.
    Nixpkgs,
}

/// Namespace label prefixed to job names of the plain package set.
pub const NIXPKGS_NAMESPACE: &str = "nixpkgs";

/// Systems kept when crawling a plain nixpkgs evaluation. Linux jobs are covered by the
/// NixOS aggregate already.
pub const NIXPKGS_SYSTEMS: &[&str] = &["x86_64-darwin", "aarch64-darwin"];

impl Context {
    /// Expression file the evaluator is pointed at, relative to a nixpkgs checkout.
    pub fn expression_file(self, nixpkgs_dir: &Path) -> PathBuf {
        match self {
            Self::NixOs => nixpkgs_dir.join("nixos").join("release-combined.nix"),
            Self::Nixpkgs => nixpkgs_dir
                .join("pkgs")
                .join("top-level")
                .join("release.nix"),
        }
    }

    /// Whether builds for `system` are tracked in this context.
    pub fn tracks_system(self, system: &str) -> bool {
        match self {
            Self::NixOs => true,
            Self::Nixpkgs => NIXPKGS_SYSTEMS.contains(&system),
        }
    }
}

impl FromStr for Context {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "true" | "nixos" => Ok(Self::NixOs),
            "0" | "false" | "nixpkgs" => Ok(Self::Nixpkgs),
            _ => Err(format!(
                "Unknown context: '{}'. Use 1/true/nixos or 0/false/nixpkgs",
                s
            )),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NixOs => write!(f, "nixos"),
            Self::Nixpkgs => write!(f, "nixpkgs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_spellings() {
        assert_eq!("1".parse::<Context>().unwrap(), Context::NixOs);
        assert_eq!("True".parse::<Context>().unwrap(), Context::NixOs);
        assert_eq!("0".parse::<Context>().unwrap(), Context::Nixpkgs);
        assert_eq!("false".parse::<Context>().unwrap(), Context::Nixpkgs);
        assert_eq!("nixpkgs".parse::<Context>().unwrap(), Context::Nixpkgs);
        assert!("2".parse::<Context>().is_err());
    }

    #[test]
    fn test_expression_files() {
        let root = Path::new("data/nixpkgs");
        assert_eq!(
            Context::NixOs.expression_file(root),
            PathBuf::from("data/nixpkgs/nixos/release-combined.nix")
        );
        assert_eq!(
            Context::Nixpkgs.expression_file(root),
            PathBuf::from("data/nixpkgs/pkgs/top-level/release.nix")
        );
    }

    #[test]
    fn test_tracked_systems() {
        assert!(Context::NixOs.tracks_system("x86_64-linux"));
        assert!(Context::Nixpkgs.tracks_system("aarch64-darwin"));
        assert!(!Context::Nixpkgs.tracks_system("x86_64-linux"));
    }
}
