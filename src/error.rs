//! Error types for the splitter.
//!
//! This module defines all error types that can occur while driving the
//! document-processor host and writing extracted blocks.

use std::path::PathBuf;

/// Result type alias for splitter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while splitting a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source document could not be opened (missing file, host refused, unresolvable lock)
    #[error("Failed to open {path}: {reason}")]
    Open {
        /// Source document path
        path: PathBuf,
        /// Reason reported by the host or the filesystem
        reason: String,
    },

    /// Host process could not be started
    #[error("Failed to launch automation host: {0}")]
    Launch(String),

    /// Anchor position of a single marker could not be read
    #[error("Failed to read anchor of marker #{ordinal}: {reason}")]
    MarkerRead {
        /// Ordinal of the marker in the chain (0-based)
        ordinal: usize,
        /// Reason for the failure
        reason: String,
    },

    /// Moving the cursor or extending the selection failed
    #[error("Selection failed: {0}")]
    Selection(String),

    /// Save-as-selection failed or produced no file
    #[error("Save to {path} failed: {reason}")]
    Save {
        /// Target output path
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Closing and reopening the source failed, including the restart escalation
    #[error("Failed to reacquire session for {path} after {attempts} attempts: {reason}")]
    Reacquire {
        /// Source document path
        path: PathBuf,
        /// Number of reopen attempts made before escalating
        attempts: u32,
        /// Last reason reported
        reason: String,
    },

    /// Marker chain links back to an already visited control
    #[error("Marker chain loops back to control {0}")]
    CircularChain(u64),

    /// Generic failure reported by the host
    #[error("Host error: {0}")]
    Host(#[from] crate::host::HostError),

    /// Output name template is unusable
    #[error("Invalid name pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending template
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// Unknown document format tag
    #[error("Unsupported document format: {0}")]
    InvalidFormat(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch manifest could not be read
    #[error("Manifest error at line {line}: {reason}")]
    Manifest {
        /// 1-based line (or record) number
        line: usize,
        /// Reason for the failure
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends a whole batch rather than a single block.
    ///
    /// Open failures, launch failures and exhausted reacquire escalation are
    /// fatal; everything else is recorded against the block and the run goes on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Open { .. } | Error::Launch(_) | Error::Reacquire { .. })
    }

    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn save(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Save {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
