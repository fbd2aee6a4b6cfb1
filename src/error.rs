//! Error types for zhf.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for zhf.
#[derive(Error, Debug)]
pub enum ZhfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Cache file {} not found. Run the producing command first.", .0.display())]
    MissingCache(PathBuf),

    #[error("Malformed cache line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("Unexpected page markup: {0}")]
    Markup(String),

    #[error("{0}")]
    InvalidArgs(String),

    #[error("Failed to apply patch {}: {stderr}", .path.display())]
    Patch { path: PathBuf, stderr: String },
}

/// Result type alias for zhf operations.
pub type Result<T> = std::result::Result<T, ZhfError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_missing_cache_message_names_path() {
        let err = ZhfError::MissingCache(PathBuf::from("data/evalcache/42.cache"));
        let msg = err.to_string();
        assert!(msg.contains("data/evalcache/42.cache"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_malformed_line_message() {
        let err = ZhfError::MalformedLine {
            line: "hello 12x".to_string(),
            reason: "invalid build id".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("hello 12x"));
        assert!(msg.contains("invalid build id"));
    }

    #[test]
    fn test_http_error_message() {
        let err = ZhfError::Http {
            status: 503,
            url: "https://hydra.nixos.org/eval/1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("/eval/1"));
    }

    #[test]
    fn test_invalid_args_passthrough() {
        let err = ZhfError::InvalidArgs("expected pairs".to_string());
        assert_eq!(err.to_string(), "expected pairs");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: ZhfError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("[1,").unwrap_err();
        let err: ZhfError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
