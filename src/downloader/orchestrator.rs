// Pipeline orchestrator: Selecting -> Fetching -> (Muxing | Finalizing) -> Done
//
// Every run gets its own scratch directory, released on every exit path.
// A failed or unavailable muxer does not fail the run: the video-only
// artifact is delivered instead and the output is flagged as degraded.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::errors::{ErrorKind, PipelineError};
use super::extractors::YtDlpCatalog;
use super::fetcher::HttpFetcher;
use super::format_selector::StreamSelector;
use super::models::{
    CatalogSnapshot, DeliveryMode, DownloadProgress, DownloadRequest, DownloadedArtifact,
    PipelineOutput, PipelineStage, QualityRequest, QualitySelector, Selection, SelectionResult,
    StreamRole,
};
use super::muxer::{FfmpegTool, Muxer};
use super::storage::{sanitize_filename, tagged_filename, OutputStore, ScratchSpace};
use super::tools::ToolManager;
use super::traits::{MediaTool, ProgressSink, StreamCatalog, StreamFetcher, TracingProgress};
use super::utils::{parse_video_id, watch_url};

pub struct Pipeline {
    catalog: Arc<dyn StreamCatalog>,
    fetcher: Arc<dyn StreamFetcher>,
    muxer: Muxer,
    store: OutputStore,
    scratch_root: PathBuf,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        catalog: Arc<dyn StreamCatalog>,
        fetcher: Arc<dyn StreamFetcher>,
        tool: Arc<dyn MediaTool>,
    ) -> Self {
        let store = OutputStore::new(config.output_dir.clone());
        Self {
            catalog,
            fetcher,
            muxer: Muxer::new(tool, store.clone()),
            store,
            scratch_root: config.scratch_root.clone(),
            progress: Arc::new(TracingProgress),
        }
    }

    /// yt-dlp catalog, HTTP fetcher and ffmpeg, all configured from `config`
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let fetcher = HttpFetcher::new(config).map_err(|e| {
            PipelineError::internal(PipelineStage::Fetching, format!("HTTP client: {}", e))
        })?;
        let tools = ToolManager::new(config.ffmpeg_path.clone(), config.ytdlp_path.clone());

        Ok(Self::new(
            config,
            Arc::new(YtDlpCatalog::new(config)),
            Arc::new(fetcher),
            Arc::new(FfmpegTool::new(tools, config.mux_timeout)),
        ))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn output_store(&self) -> &OutputStore {
        &self.store
    }

    /// Look up the catalog for a caller request, then run the pipeline
    pub async fn download(&self, request: &DownloadRequest) -> Result<PipelineOutput, PipelineError> {
        let video_id = parse_video_id(&request.source).map_err(PipelineError::invalid_input)?;
        let snapshot = self.snapshot(&video_id).await?;
        self.run(&snapshot, &request.quality).await
    }

    /// Catalog snapshot for a bare id or URL
    pub async fn snapshot(&self, source: &str) -> Result<CatalogSnapshot, PipelineError> {
        let video_id = parse_video_id(source).map_err(PipelineError::invalid_input)?;
        self.catalog.fetch(&watch_url(&video_id)).await.map_err(|e| {
            tracing::warn!(catalog = self.catalog.name(), "catalog lookup failed: {}", e);
            PipelineError::from(e)
        })
    }

    /// Run selection, fetch, mux and finalize against a snapshot
    pub async fn run(
        &self,
        snapshot: &CatalogSnapshot,
        request: &QualityRequest,
    ) -> Result<PipelineOutput, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", run = %run_id, video = %snapshot.video_id);

        let outcome = AssertUnwindSafe(self.run_inner(run_id, snapshot, request).instrument(span))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => {
                self.enter(PipelineStage::Done, format!("saved {}", output.file.path.display()));
                Ok(output)
            }
            Ok(Err(e)) => {
                self.enter(PipelineStage::Failed, e.to_string());
                Err(e)
            }
            Err(panic) => {
                let e = PipelineError::internal(PipelineStage::Failed, panic_message(panic));
                tracing::error!(run = %run_id, "pipeline panicked: {}", e.detail);
                self.enter(PipelineStage::Failed, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        snapshot: &CatalogSnapshot,
        request: &QualityRequest,
    ) -> Result<PipelineOutput, PipelineError> {
        self.enter(PipelineStage::Selecting, format!("selecting {} for {:?}", request, snapshot.title));
        let selection = StreamSelector::select(snapshot, request)?;

        if let (QualitySelector::Resolution(wanted), Some(effective)) =
            (request.selector, selection.effective_resolution)
        {
            if wanted != effective {
                tracing::info!("{} not available, using {}", wanted, effective);
            }
        }

        let scratch = ScratchSpace::create(&self.scratch_root, run_id)?;
        let result = self.deliver(&scratch, snapshot, &selection).await;
        scratch.release();
        result
    }

    async fn deliver(
        &self,
        scratch: &ScratchSpace,
        snapshot: &CatalogSnapshot,
        selection: &Selection,
    ) -> Result<PipelineOutput, PipelineError> {
        match &selection.result {
            SelectionResult::Single(stream) => {
                self.enter(PipelineStage::Fetching, format!("fetching {} {}", stream.role, stream.format_id));
                let artifact = self
                    .fetcher
                    .fetch(stream, scratch.path(), "stream", self.progress.as_ref())
                    .await?;

                self.enter(PipelineStage::Finalizing, "storing output".to_string());
                let base_name = sanitize_filename(&snapshot.title);
                let file = self
                    .store
                    .persist(&artifact.path, &base_name, &artifact.extension())
                    .await?;

                let (mode, note) = if stream.role == StreamRole::AudioOnly {
                    (DeliveryMode::AudioOnly, "Audio only, kept in its original container.".to_string())
                } else {
                    (
                        DeliveryMode::Progressive,
                        "Easy mode (progressive): video and audio in one file.".to_string(),
                    )
                };

                Ok(PipelineOutput {
                    file,
                    mode,
                    effective_resolution: selection.effective_resolution,
                    degraded: false,
                    note,
                })
            }
            SelectionResult::Pair { video, audio } => {
                self.enter(
                    PipelineStage::Fetching,
                    format!("fetching video {} and audio {}", video.format_id, audio.format_id),
                );
                let video_artifact = self
                    .fetcher
                    .fetch(video, scratch.path(), "video", self.progress.as_ref())
                    .await?;
                let audio_artifact = self
                    .fetcher
                    .fetch(audio, scratch.path(), "audio", self.progress.as_ref())
                    .await?;

                let res_label = selection
                    .effective_resolution
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "max".to_string());
                let base_name = tagged_filename(&snapshot.title, &res_label);

                self.enter(PipelineStage::Muxing, "merging video and audio".to_string());
                if !self.muxer.tool_available().await {
                    tracing::warn!("media tool not available, keeping video only");
                    return self
                        .video_only(selection, &video_artifact, &base_name, &res_label, "media tool not available")
                        .await;
                }

                match self
                    .muxer
                    .mux(&video_artifact, &audio_artifact, &base_name, scratch.path())
                    .await
                {
                    Ok(file) => Ok(PipelineOutput {
                        file,
                        mode: DeliveryMode::Merged,
                        effective_resolution: selection.effective_resolution,
                        degraded: false,
                        note: format!("Max mode: {} merged with audio.", res_label),
                    }),
                    Err(e) => {
                        tracing::warn!("mux failed, keeping video only: {}", e);
                        self.video_only(selection, &video_artifact, &base_name, &res_label, &e.to_string())
                            .await
                    }
                }
            }
        }
    }

    async fn video_only(
        &self,
        selection: &Selection,
        video: &DownloadedArtifact,
        base_name: &str,
        res_label: &str,
        reason: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        self.enter(PipelineStage::Finalizing, "storing video-only output".to_string());
        let file = self
            .store
            .persist(&video.path, base_name, &video.extension())
            .await
            .map_err(|e| {
                PipelineError::new(
                    ErrorKind::MuxFailed,
                    PipelineStage::Finalizing,
                    format!("audio not merged ({}) and video-only output not stored: {}", reason, e),
                )
            })?;

        Ok(PipelineOutput {
            file,
            mode: DeliveryMode::VideoOnly,
            effective_resolution: selection.effective_resolution,
            degraded: true,
            note: format!(
                "Max mode: {} video only, audio was not merged ({}). Install ffmpeg to merge audio.",
                res_label, reason
            ),
        })
    }

    fn enter(&self, stage: PipelineStage, status: String) {
        tracing::info!(stage = %stage, "{}", status);
        let percent = match stage {
            PipelineStage::Selecting | PipelineStage::Failed => 0.0,
            PipelineStage::Fetching => 5.0,
            PipelineStage::Muxing => 90.0,
            PipelineStage::Finalizing => 95.0,
            PipelineStage::Done => 100.0,
        };
        self.progress.emit(DownloadProgress {
            stage,
            percent,
            status,
        });
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
