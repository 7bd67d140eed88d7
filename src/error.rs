use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum YeokjaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transcriber error: {0}")]
    Transcriber(String),

    #[error("Transcription produced no speech segments")]
    EmptyTranscript,

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Subtitle error: {0}")]
    Subtitle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Pipeline cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, YeokjaError>;

/// Why a batch (or a single segment) did not come back translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Reply was not the strict JSON shape, or its index set differed.
    MalformedReply,
    Timeout,
    TransportFailure,
    /// Terminal: a single segment still failed after its retries.
    UnrecoverableSegment,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MalformedReply => "malformed reply",
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport failure",
            Self::UnrecoverableSegment => "unrecoverable segment",
        };
        f.write_str(name)
    }
}

/// A failed protocol exchange. Always carries the index range it covered,
/// since that range is what the fallback splitter works on.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("batch [{}, {}) failed with {kind}: {detail}", range.start, range.end)]
pub struct BatchError {
    pub range: Range<usize>,
    pub kind: FailureKind,
    pub detail: String,
}

impl BatchError {
    pub fn new(range: Range<usize>, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            range,
            kind,
            detail: detail.into(),
        }
    }

    pub fn malformed(range: Range<usize>, detail: impl Into<String>) -> Self {
        Self::new(range, FailureKind::MalformedReply, detail)
    }
}

/// Failure reported by an LLM backend before any reply parsing happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Transport(_) => FailureKind::TransportFailure,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_error_display_includes_range() {
        let err = BatchError::malformed(3..7, "missing index 5");
        assert_eq!(
            err.to_string(),
            "batch [3, 7) failed with malformed reply: missing index 5"
        );
    }

    #[test]
    fn test_backend_error_kind() {
        assert_eq!(BackendError::Timeout("x".into()).kind(), FailureKind::Timeout);
        assert_eq!(
            BackendError::Transport("x".into()).kind(),
            FailureKind::TransportFailure
        );
    }
}
