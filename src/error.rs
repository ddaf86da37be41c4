//! Error types for the docdiff library.
//!
//! A comparison either produces a complete [`crate::output::ComparisonResult`]
//! or fails as a whole; there are no partial results. Every failure is a
//! [`ComparisonError`], split into two classes:
//!
//! * **User errors**: the request itself is bad (corrupt file, unsupported
//!   media type, out-of-range parameter). Surfaced to the caller verbatim and
//!   never worth retrying. See [`ComparisonError::is_user_error`].
//!
//! * **Internal errors**: something that should not happen on valid input
//!   (encoder failure, worker panic, pdfium missing). Logged with enough
//!   context to reproduce and reported as an internal failure.
//!
//! Weak or failed feature alignment is deliberately *not* an error: the
//! pipeline falls back to a geometric fit and records `alignment_failed` in
//! the result metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, attached to internal processing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compose,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Compose => "compose",
            Stage::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// All errors returned by the docdiff library.
#[derive(Debug, Error)]
pub enum ComparisonError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input buffer could not be decoded as the declared media type.
    #[error("Failed to decode '{media_type}' input: {detail}")]
    Decode { media_type: String, detail: String },

    /// The declared media type is not on the allow-list.
    #[error("Unsupported media type '{media_type}'. Allowed: {allowed}")]
    UnsupportedMediaType { media_type: String, allowed: String },

    /// The input buffer exceeds the configured size limit.
    #[error("Input too large: {:.1}MB (max {:.0}MB)", megabytes(.size), megabytes(.max))]
    FileTooLarge { size: usize, max: usize },

    /// An input file could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A colour override is not a `#RRGGBB` hex string.
    #[error("Invalid colour for '{key}': '{value}' (expected #RRGGBB)")]
    InvalidColor { key: String, value: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or its directory) to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A stage failed on input that should have been valid.
    #[error("Processing failed during {stage}: {detail}")]
    Processing { stage: Stage, detail: String },

    /// The service stayed saturated for longer than the queue timeout.
    #[error("Comparison queue timed out after {waited_ms}ms")]
    QueueTimeout { waited_ms: u64 },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn megabytes(bytes: &usize) -> f64 {
    *bytes as f64 / 1_048_576.0
}

impl ComparisonError {
    /// `true` for errors caused by the request (the 4xx class).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ComparisonError::Decode { .. }
                | ComparisonError::UnsupportedMediaType { .. }
                | ComparisonError::FileTooLarge { .. }
                | ComparisonError::ReadFailed { .. }
                | ComparisonError::InvalidConfig(_)
                | ComparisonError::InvalidColor { .. }
        )
    }

    /// HTTP status a gateway should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ComparisonError::FileTooLarge { .. } => 413,
            ComparisonError::QueueTimeout { .. } => 503,
            e if e.is_user_error() => 400,
            _ => 500,
        }
    }

    pub(crate) fn decode(media_type: &str, detail: impl fmt::Display) -> Self {
        ComparisonError::Decode {
            media_type: media_type.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn processing(stage: Stage, detail: impl fmt::Display) -> Self {
        ComparisonError::Processing {
            stage,
            detail: detail.to_string(),
        }
    }
}
