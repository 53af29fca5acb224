//! Error types for Keep
//!
//! Sink and query operations never hand these to callers: a diagnostic logger must
//! not take down the application it instruments. They flow through the internal
//! read/write helpers, get logged, and degrade to an empty result or a no-op.

use thiserror::Error;

/// Errors produced inside Keep
#[derive(Debug, Error)]
pub enum KeepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Keep operations
pub type Result<T> = std::result::Result<T, KeepError>;

/// Categories of disk errors for log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Short description of this error kind
    pub fn describe(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full",
            DiskErrorKind::PermissionDenied => "permission denied",
            DiskErrorKind::NotFound => "file or directory not found",
            DiskErrorKind::Other => "io error",
        }
    }
}

/// Categorize an IO error
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC = 28, EDQUOT = 122 (Linux) / 69 (macOS)
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

impl KeepError {
    /// Disk error category, when this is an IO error
    pub fn disk_kind(&self) -> Option<DiskErrorKind> {
        match self {
            KeepError::Io(e) => Some(categorize_io_error(e)),
            _ => None,
        }
    }
}
