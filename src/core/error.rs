use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::ConfigError;

/// Why a single mirror attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Network(String),
    Status(u16),
    Integrity { expected: String, actual: String },
    Truncated { expected: u64, received: u64 },
    Io(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network(msg) => write!(f, "network error: {msg}"),
            FailureReason::Status(code) => write!(f, "HTTP {code}"),
            FailureReason::Integrity { expected, actual } => {
                write!(f, "digest mismatch (expected {expected}, got {actual})")
            }
            FailureReason::Truncated { expected, received } => {
                write!(f, "truncated transfer ({received} of {expected} bytes)")
            }
            FailureReason::Io(msg) => write!(f, "staging write failed: {msg}"),
        }
    }
}

/// One failed attempt against one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub url: String,
    pub reason: FailureReason,
}

impl fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.url, self.reason)
    }
}

fn join_failures(failures: &[MirrorFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Central error type for the launcher.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("All mirrors failed for {destination:?}: {}", join_failures(.failures))]
    DownloadExhausted {
        destination: PathBuf,
        failures: Vec<MirrorFailure>,
    },

    #[error("Version endpoint {url} unusable: {reason}")]
    VersionEndpoint { url: String, reason: String },

    // ── Integrity ───────────────────────────────────────
    #[error("Digest mismatch for {path:?}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Invalid digest {0:?}")]
    InvalidDigest(String),

    // ── Compatibility ───────────────────────────────────
    #[error(
        "Game version {game_version} is not supported by mod {mod_version:?} (supported: {})",
        .supported.join(", ")
    )]
    IncompatibleVersion {
        game_version: String,
        mod_version: Option<String>,
        supported: Vec<String>,
    },

    #[error("Prefix at {root:?} cannot be used: {reason}")]
    IncompatiblePrefix { root: PathBuf, reason: String },

    #[error("Prefix at {root:?} is held by another instance (pid {pid}); wait for it to exit and retry")]
    PrefixBusy { root: PathBuf, pid: u32 },

    #[error("No usable translation layer: {0}")]
    RuntimeNotFound(String),

    // ── Launch ──────────────────────────────────────────
    #[error("Could not start {program:?}: {reason}")]
    Launch { program: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Serialization / config ──────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

/// Coarse classification used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Usage,
    Update,
    IncompatibleVersion,
    Environment,
    Launch,
    Cancelled,
}

impl ErrorCategory {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Usage => 1,
            ErrorCategory::Update => 2,
            ErrorCategory::IncompatibleVersion => 3,
            ErrorCategory::Environment => 4,
            ErrorCategory::Launch => 5,
            ErrorCategory::Cancelled => 130,
        }
    }
}

impl LauncherError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }

    /// Category of the failure, independent of which stage raised it.
    ///
    /// IO and JSON errors have no stage of their own; the orchestrator
    /// re-wraps them per stage via [`LauncherError::category_in`].
    pub fn category(&self) -> ErrorCategory {
        self.category_in(ErrorCategory::Update)
    }

    pub fn category_in(&self, stage: ErrorCategory) -> ErrorCategory {
        match self {
            LauncherError::Http(_)
            | LauncherError::Network { .. }
            | LauncherError::DownloadFailed { .. }
            | LauncherError::DownloadExhausted { .. }
            | LauncherError::VersionEndpoint { .. }
            | LauncherError::IntegrityMismatch { .. } => ErrorCategory::Update,
            LauncherError::IncompatibleVersion { .. } => ErrorCategory::IncompatibleVersion,
            LauncherError::IncompatiblePrefix { .. }
            | LauncherError::PrefixBusy { .. }
            | LauncherError::RuntimeNotFound(_) => ErrorCategory::Environment,
            LauncherError::Launch { .. } => ErrorCategory::Launch,
            LauncherError::Cancelled => ErrorCategory::Cancelled,
            LauncherError::Config(_) | LauncherError::InvalidDigest(_) => ErrorCategory::Usage,
            LauncherError::Io { .. } | LauncherError::Json(_) | LauncherError::Other(_) => stage,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_lists_every_mirror() {
        let err = LauncherError::DownloadExhausted {
            destination: PathBuf::from("/tmp/core.dll"),
            failures: vec![
                MirrorFailure {
                    url: "http://a/core.dll".into(),
                    reason: FailureReason::Network("timed out".into()),
                },
                MirrorFailure {
                    url: "http://b/core.dll".into(),
                    reason: FailureReason::Status(404),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("http://a/core.dll: network error: timed out"));
        assert!(message.contains("http://b/core.dll: HTTP 404"));
    }

    #[test]
    fn categories_map_to_distinct_exit_codes() {
        let busy = LauncherError::PrefixBusy {
            root: PathBuf::from("/p"),
            pid: 1,
        };
        assert_eq!(busy.category().exit_code(), 4);
        assert_eq!(LauncherError::Cancelled.category().exit_code(), 130);

        let io = LauncherError::io("/x", std::io::Error::other("boom"));
        assert_eq!(io.category_in(ErrorCategory::Launch), ErrorCategory::Launch);
    }
}
