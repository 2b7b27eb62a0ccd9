// Collaborator traits for the pipeline
//
// The orchestrator only talks to the outside world through these, so tests
// can swap in fakes for the catalog, the network and the media tool.

use async_trait::async_trait;
use std::path::Path;

use super::errors::{CatalogError, ToolFailure, TransportError};
use super::models::{CatalogSnapshot, DownloadProgress, DownloadedArtifact, StreamDescriptor};
use super::tools::ToolInfo;

/// Source of stream metadata for a video
#[async_trait]
pub trait StreamCatalog: Send + Sync {
    /// Name of the catalog (for logging)
    fn name(&self) -> &'static str;

    /// Title and available streams for a canonical watch URL
    async fn fetch(&self, video_url: &str) -> Result<CatalogSnapshot, CatalogError>;
}

/// Downloads one stream into a directory
#[async_trait]
pub trait StreamFetcher: Send + Sync {
    /// Write the stream under `destination_dir` as `<stem>.<ext>`
    ///
    /// On error no file is left behind.
    async fn fetch(
        &self,
        descriptor: &StreamDescriptor,
        destination_dir: &Path,
        stem: &str,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadedArtifact, TransportError>;
}

/// External media-container tool
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Path and version if the tool can be run, None otherwise
    async fn probe(&self) -> Option<ToolInfo>;

    /// Combine without re-encoding; the container follows `output`'s extension
    async fn run_copy_mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), ToolFailure>;

    /// Re-encode to H.264/AAC in an mp4 container with fast start
    async fn run_reencode_mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), ToolFailure>;
}

/// Receives progress updates
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: DownloadProgress);
}

/// Progress sink that writes to the tracing log
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, progress: DownloadProgress) {
        tracing::debug!(
            stage = %progress.stage,
            percent = progress.percent,
            "{}",
            progress.status
        );
    }
}

/// Progress sink that drops everything
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _progress: DownloadProgress) {}
}
