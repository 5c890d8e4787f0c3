//! Error types for path and filesystem operations
//!
//! Every filesystem failure is classified into the closed [`FsError`]
//! taxonomy at the bridge boundary. Components above the bridge propagate
//! these values unchanged unless they explicitly recover (the glob selector
//! recovers branch-level permission errors in lenient mode).

use crate::bridge::Syscall;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for arpath operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors surfaced by path parsing, the syscall bridge, and everything above it
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist
    #[error("{call}: {}: not found", path.display())]
    NotFound {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// The caller lacks permission for the operation
    #[error("{call}: {}: permission denied", path.display())]
    PermissionDenied {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// The target already exists
    #[error("{call}: {}: already exists", path.display())]
    AlreadyExists {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// A directory was required but something else was found
    #[error("{call}: {}: not a directory", path.display())]
    NotADirectory {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// A non-directory was required but a directory was found
    #[error("{call}: {}: is a directory", path.display())]
    IsADirectory {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// Resource exhaustion persisted after bounded retries
    #[error("{call}: {}: resources exhausted after {attempts} attempts: {source}", path.display())]
    ResourceExhausted {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Last underlying error
        #[source]
        source: io::Error,
    },

    /// Text could not be parsed as a path (never produced by filesystem calls)
    #[error("malformed path {text:?}: {reason}")]
    MalformedPath {
        /// Offending input, lossily rendered
        text: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Glob pattern could not be compiled (never produced by filesystem calls)
    #[error("invalid glob pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The dispatched call disappeared before reporting back
    #[error("{call}: {}: cancelled", path.display())]
    Cancelled {
        /// Operation that was cancelled
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
    },

    /// Any other platform error; the raw OS code is kept for diagnostics
    #[error("{call}: {}: {source} (os error {code:?})", path.display())]
    Unknown {
        /// Operation that failed
        call: Syscall,
        /// Path the operation targeted
        path: PathBuf,
        /// Raw OS error code, if the platform provided one
        code: Option<i32>,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Classify an `io::Error` returned by `call` on `path`
    #[must_use]
    pub fn from_io(call: Syscall, path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { call, path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { call, path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { call, path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { call, path },
            io::ErrorKind::IsADirectory => Self::IsADirectory { call, path },
            _ => match err.raw_os_error() {
                Some(libc::ENOTDIR) => Self::NotADirectory { call, path },
                Some(libc::EISDIR) => Self::IsADirectory { call, path },
                Some(libc::EACCES | libc::EPERM) => Self::PermissionDenied { call, path },
                code => Self::Unknown {
                    call,
                    path,
                    code,
                    source: err,
                },
            },
        }
    }

    /// Shorthand for a parse-time path rejection
    pub(crate) fn malformed(text: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedPath {
            text: text.into(),
            reason,
        }
    }

    /// Shorthand for a pattern compile failure
    pub(crate) fn invalid_pattern(pattern: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason,
        }
    }

    /// Errors the glob selector may absorb by abandoning a single branch
    #[must_use]
    pub fn is_branch_recoverable(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::NotADirectory { .. })
    }

    /// Whether this is a `NotFound` error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A path that cannot be resolved to anything: a symlink loop, a
    /// stale descriptor, or a name too long to look up
    #[must_use]
    pub fn is_unresolvable(&self) -> bool {
        matches!(
            self,
            Self::Unknown {
                code: Some(libc::ELOOP | libc::EBADF | libc::ENAMETOOLONG),
                ..
            }
        )
    }

    /// The path the failing operation targeted, when there was one
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::AlreadyExists { path, .. }
            | Self::NotADirectory { path, .. }
            | Self::IsADirectory { path, .. }
            | Self::ResourceExhausted { path, .. }
            | Self::Cancelled { path, .. }
            | Self::Unknown { path, .. } => Some(path),
            Self::MalformedPath { .. } | Self::InvalidPattern { .. } => None,
        }
    }
}

/// Transient errors worth retrying: fd table full, would block, out of memory
pub(crate) fn is_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::EAGAIN | libc::ENOMEM)
    )
}
