// Error types for the download pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use super::models::{PipelineStage, StreamRole};

/// Errors from the catalog collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    /// The reference does not point at a video the catalog knows
    #[error("invalid video reference: {0}")]
    InvalidReference(String),

    /// The catalog could not be reached
    #[error("catalog unreachable: {0}")]
    Unreachable(String),

    /// Catalog lookup took longer than the configured limit
    #[error("catalog lookup timed out after {0}s")]
    Timeout(u64),

    /// yt-dlp not found in system
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse yt-dlp JSON output
    #[error("parse error: {0}")]
    Parse(String),
}

// Classify raw yt-dlp stderr
impl From<String> for CatalogError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::Unreachable(s);
        }

        if lower.contains("not found")
            || lower.contains("no such file")
            || lower.contains("command not found")
        {
            return Self::ToolNotFound(s);
        }

        if lower.contains("unsupported url")
            || lower.contains("invalid url")
            || lower.contains("is not a valid url")
            || lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("incomplete youtube id")
        {
            return Self::InvalidReference(s);
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::Parse(s);
        }

        Self::Unreachable(s)
    }
}

/// Selector found nothing usable even after fallback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no {0} streams in catalog")]
    NotFound(StreamRole),
}

/// Errors while fetching a single stream
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server answered HTTP {status} for format {format_id}")]
    Status { status: u16, format_id: String },

    #[error("fetch timed out after {0}s")]
    Timeout(u64),

    #[error("destination already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single media tool invocation that did not succeed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolFailure {
    #[error("{tool} exited with {code:?}: {stderr}")]
    ExitStatus {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start {tool}: {message}")]
    Spawn { tool: String, message: String },

    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },
}

/// Muxing failed after both strategies
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("stream copy failed ({copy}); re-encode failed ({reencode})")]
    Failed { copy: ToolFailure, reencode: ToolFailure },

    #[error("could not store muxed output: {0}")]
    Storage(#[from] StorageError),
}

/// Scratch or durable storage failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to move {from} into {to}: {source}")]
    Persist {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("no free file name for {0}")]
    NameExhausted(String),
}

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsupported source reference
    InvalidInput,
    /// Nothing usable in the catalog, even after fallback
    NoMatchingStream,
    /// Transport error or timeout during fetch
    DownloadFailed,
    /// Both mux strategies failed and nothing usable remained
    MuxFailed,
    /// Anything unexpected
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::NoMatchingStream => write!(f, "no matching stream"),
            Self::DownloadFailed => write!(f, "download failed"),
            Self::MuxFailed => write!(f, "mux failed"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Structured failure of one pipeline run
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{kind} while {stage}: {detail}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub stage: PipelineStage,
    pub detail: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, PipelineStage::Selecting, detail)
    }

    pub fn internal(stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, stage, detail)
    }
}

impl From<SelectionError> for PipelineError {
    fn from(e: SelectionError) -> Self {
        Self::new(ErrorKind::NoMatchingStream, PipelineStage::Selecting, e.to_string())
    }
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        Self::new(ErrorKind::NoMatchingStream, PipelineStage::Selecting, e.to_string())
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        Self::new(ErrorKind::DownloadFailed, PipelineStage::Fetching, e.to_string())
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        Self::new(ErrorKind::Internal, PipelineStage::Finalizing, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_catalog_stderr() {
        assert!(matches!(
            CatalogError::from("ERROR: [youtube] abc: Video unavailable".to_string()),
            CatalogError::InvalidReference(_)
        ));
        assert!(matches!(
            CatalogError::from("ERROR: Unsupported URL: https://example.com".to_string()),
            CatalogError::InvalidReference(_)
        ));
        assert!(matches!(
            CatalogError::from("Read timed out".to_string()),
            CatalogError::Unreachable(_)
        ));
        assert!(matches!(
            CatalogError::from("HTTP Error 503".to_string()),
            CatalogError::Unreachable(_)
        ));
    }

    #[test]
    fn pipeline_error_names_the_step() {
        let err: PipelineError = TransportError::Timeout(30).into();
        assert_eq!(err.kind, ErrorKind::DownloadFailed);
        assert_eq!(err.to_string(), "download failed while fetching: fetch timed out after 30s");
    }

    #[test]
    fn selection_error_maps_to_no_matching_stream() {
        let err: PipelineError = SelectionError::NotFound(StreamRole::AudioOnly).into();
        assert_eq!(err.kind, ErrorKind::NoMatchingStream);
        assert!(err.detail.contains("audio-only"));
    }
}
