//! Domain-specific error types for pcap-metrics.
//!
//! Uses `thiserror` for the errors the capture pipeline can surface, which
//! integrate with the broader `anyhow` error handling of the binary.

use thiserror::Error;

/// Fatal errors raised while reading a capture file.
///
/// Per-frame decode problems are never reported through this type: a frame
/// that cannot be decoded is simply excluded from the analysis.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The file is not a recognized capture container, or its structure is
    /// inconsistent (bad magic, malformed block, unknown interface).
    #[error("Invalid capture format: {reason}")]
    Format { reason: String },

    /// A header announces more bytes than remain in the file.
    #[error(
        "Truncated capture at frame {frame} (offset {offset}): expected {expected} bytes, got {available}"
    )]
    Truncated {
        frame: u64,
        offset: u64,
        expected: u64,
        available: u64,
    },

    /// The file could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// True for `Format` errors.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// True for `Truncated` errors.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
