// Audio/video muxing
//
// Stage 1 copies both streams into a container picked by compatibility
// (mp4 when both inputs are mp4-family, mkv otherwise). If that fails the
// streams are re-encoded to H.264/AAC mp4 once. There is no third attempt.
//
// Work files live in the run's scratch directory; only a finished output is
// moved into durable storage.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::errors::{MuxError, ToolFailure};
use super::models::{DownloadedArtifact, OutputFile};
use super::storage::OutputStore;
use super::tools::{ToolInfo, ToolManager, ToolType};
use super::traits::MediaTool;
use super::utils::{run_output_with_timeout, stderr_tail};

/// Audio bitrate used by the re-encode fallback
pub const REENCODE_AUDIO_BITRATE: &str = "192k";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Widely playable, needs mp4-family codecs
    Mp4,
    /// Holds any codec mix
    Mkv,
}

impl Container {
    /// Mp4 only when both inputs declare an mp4-family mime type
    pub fn for_inputs(video_mime: Option<&str>, audio_mime: Option<&str>) -> Self {
        let is_mp4 = |mime: Option<&str>| mime.map_or(false, |m| m.to_ascii_lowercase().contains("mp4"));
        if is_mp4(video_mime) && is_mp4(audio_mime) {
            Self::Mp4
        } else {
            Self::Mkv
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("mkv") {
            Self::Mkv
        } else {
            Self::Mp4
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
        }
    }

    /// ffmpeg `-f` muxer name
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "matroska",
        }
    }
}

pub struct Muxer {
    tool: Arc<dyn MediaTool>,
    store: OutputStore,
}

impl Muxer {
    pub fn new(tool: Arc<dyn MediaTool>, store: OutputStore) -> Self {
        Self { tool, store }
    }

    /// Whether the media tool can be run at all
    pub async fn tool_available(&self) -> bool {
        self.tool.probe().await.is_some()
    }

    /// Combine a video and an audio artifact into one durable output file
    pub async fn mux(
        &self,
        video: &DownloadedArtifact,
        audio: &DownloadedArtifact,
        base_name: &str,
        work_dir: &Path,
    ) -> Result<OutputFile, MuxError> {
        let container = Container::for_inputs(video.mime_type.as_deref(), audio.mime_type.as_deref());
        let copy_out = work_dir.join(format!("muxed-copy.{}", container.extension()));

        tracing::info!(container = container.extension(), "muxing with stream copy");
        let copy_result = self.tool.run_copy_mux(&video.path, &audio.path, &copy_out).await;
        let copy_err = match verify_output(copy_result, &copy_out).await {
            Ok(()) => {
                return Ok(self
                    .store
                    .persist(&copy_out, base_name, container.extension())
                    .await?);
            }
            Err(e) => e,
        };

        let _ = tokio::fs::remove_file(&copy_out).await;
        tracing::warn!("stream copy failed, re-encoding: {}", copy_err);

        let reencode_out = work_dir.join(format!("muxed-reencode.{}", Container::Mp4.extension()));
        let reencode_result = self
            .tool
            .run_reencode_mux(&video.path, &audio.path, &reencode_out)
            .await;

        match verify_output(reencode_result, &reencode_out).await {
            Ok(()) => Ok(self
                .store
                .persist(&reencode_out, base_name, Container::Mp4.extension())
                .await?),
            Err(reencode_err) => {
                let _ = tokio::fs::remove_file(&reencode_out).await;
                tracing::warn!("re-encode failed: {}", reencode_err);
                Err(MuxError::Failed {
                    copy: copy_err,
                    reencode: reencode_err,
                })
            }
        }
    }
}

// A zero exit that produced nothing counts as a failure.
async fn verify_output(result: Result<(), ToolFailure>, output: &Path) -> Result<(), ToolFailure> {
    result?;
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(ToolFailure::ExitStatus {
            tool: "muxer".to_string(),
            code: Some(0),
            stderr: format!("no output written to {}", output.display()),
        }),
    }
}

/// ffmpeg as the media tool
pub struct FfmpegTool {
    tools: ToolManager,
    timeout: Duration,
}

impl FfmpegTool {
    pub fn new(tools: ToolManager, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    pub fn copy_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let container = Container::from_extension(
            output.extension().and_then(|e| e.to_str()).unwrap_or(""),
        );
        let mut args = Self::input_args(video, audio);
        args.extend(
            ["-c", "copy", "-f", container.ffmpeg_format()]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().to_string());
        args
    }

    pub fn reencode_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::input_args(video, audio);
        args.extend(
            [
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "-b:a",
                REENCODE_AUDIO_BITRATE,
                "-movflags",
                "+faststart",
                "-f",
                Container::Mp4.ffmpeg_format(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().to_string());
        args
    }

    fn input_args(video: &Path, audio: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<(), ToolFailure> {
        let binary = self.tools.binary(ToolType::Ffmpeg);
        tracing::debug!("{} {}", binary, args.join(" "));

        let output = run_output_with_timeout(&binary, args, self.timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ToolFailure::ExitStatus {
                tool: "ffmpeg".to_string(),
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr, 5),
            })
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self) -> Option<ToolInfo> {
        let info = self.tools.get_tool_info(ToolType::Ffmpeg).await;
        if info.is_available {
            Some(info)
        } else {
            None
        }
    }

    async fn run_copy_mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ToolFailure> {
        self.run(Self::copy_args(video, audio, output)).await
    }

    async fn run_reencode_mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), ToolFailure> {
        self.run(Self::reencode_args(video, audio, output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::StreamRole;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted media tool: each stage either writes bytes or fails
    struct ScriptedTool {
        copy_ok: bool,
        reencode_ok: bool,
        /// Write junk to the output path even on failure
        leave_partial: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedTool {
        fn new(copy_ok: bool, reencode_ok: bool) -> Self {
            Self {
                copy_ok,
                reencode_ok,
                leave_partial: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        async fn stage(&self, name: &'static str, ok: bool, output: &Path) -> Result<(), ToolFailure> {
            self.calls.lock().unwrap().push(name);
            if ok || self.leave_partial {
                tokio::fs::write(output, b"muxed").await.unwrap();
            }
            if ok {
                Ok(())
            } else {
                Err(ToolFailure::ExitStatus {
                    tool: "fake".to_string(),
                    code: Some(1),
                    stderr: format!("{} failed", name),
                })
            }
        }
    }

    #[async_trait]
    impl MediaTool for ScriptedTool {
        async fn probe(&self) -> Option<ToolInfo> {
            None
        }

        async fn run_copy_mux(&self, _v: &Path, _a: &Path, output: &Path) -> Result<(), ToolFailure> {
            self.stage("copy", self.copy_ok, output).await
        }

        async fn run_reencode_mux(&self, _v: &Path, _a: &Path, output: &Path) -> Result<(), ToolFailure> {
            self.stage("reencode", self.reencode_ok, output).await
        }
    }

    fn artifact(dir: &Path, name: &str, mime: &str, role: StreamRole) -> DownloadedArtifact {
        let path = dir.join(name);
        std::fs::write(&path, b"stream").unwrap();
        DownloadedArtifact {
            path,
            size: 6,
            mime_type: Some(mime.to_string()),
            role,
        }
    }

    fn dirs() -> (tempfile::TempDir, tempfile::TempDir) {
        (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
    }

    #[test]
    fn container_follows_input_family() {
        assert_eq!(Container::for_inputs(Some("video/mp4"), Some("audio/mp4")), Container::Mp4);
        assert_eq!(
            Container::for_inputs(Some("video/MP4; codecs=\"avc1\""), Some("audio/mp4; codecs=\"mp4a.40.2\"")),
            Container::Mp4
        );
        assert_eq!(Container::for_inputs(Some("video/webm"), Some("audio/mp4")), Container::Mkv);
        assert_eq!(Container::for_inputs(Some("video/mp4"), Some("audio/webm")), Container::Mkv);
        assert_eq!(Container::for_inputs(None, Some("audio/mp4")), Container::Mkv);
    }

    #[tokio::test]
    async fn compatible_inputs_give_mp4() {
        let (scratch, out) = dirs();
        let tool = Arc::new(ScriptedTool::new(true, true));
        let muxer = Muxer::new(tool.clone(), OutputStore::new(out.path()));

        let v = artifact(scratch.path(), "v.mp4", "video/mp4", StreamRole::VideoOnly);
        let a = artifact(scratch.path(), "a.mp4", "audio/mp4", StreamRole::AudioOnly);
        let file = muxer.mux(&v, &a, "Clip [1080p]", scratch.path()).await.unwrap();

        assert_eq!(file.extension, "mp4");
        assert_eq!(file.path, out.path().join("Clip [1080p].mp4"));
        assert_eq!(*tool.calls.lock().unwrap(), vec!["copy"]);
    }

    #[tokio::test]
    async fn mismatched_inputs_give_mkv() {
        let (scratch, out) = dirs();
        let muxer = Muxer::new(Arc::new(ScriptedTool::new(true, true)), OutputStore::new(out.path()));

        let v = artifact(scratch.path(), "v.webm", "video/webm", StreamRole::VideoOnly);
        let a = artifact(scratch.path(), "a.mp4", "audio/mp4", StreamRole::AudioOnly);
        let file = muxer.mux(&v, &a, "Clip", scratch.path()).await.unwrap();

        assert_eq!(file.extension, "mkv");
        assert!(file.path.exists());
    }

    #[tokio::test]
    async fn copy_failure_falls_back_to_reencoded_mp4() {
        let (scratch, out) = dirs();
        let tool = Arc::new(ScriptedTool {
            leave_partial: true,
            ..ScriptedTool::new(false, true)
        });
        let muxer = Muxer::new(tool.clone(), OutputStore::new(out.path()));

        let v = artifact(scratch.path(), "v.webm", "video/webm", StreamRole::VideoOnly);
        let a = artifact(scratch.path(), "a.webm", "audio/webm", StreamRole::AudioOnly);
        let file = muxer.mux(&v, &a, "Clip", scratch.path()).await.unwrap();

        assert_eq!(file.extension, "mp4");
        assert_eq!(*tool.calls.lock().unwrap(), vec!["copy", "reencode"]);
        assert!(!scratch.path().join("muxed-copy.mkv").exists());
    }

    #[tokio::test]
    async fn both_failures_leave_nothing_durable() {
        let (scratch, out) = dirs();
        let tool = Arc::new(ScriptedTool {
            leave_partial: true,
            ..ScriptedTool::new(false, false)
        });
        let muxer = Muxer::new(tool, OutputStore::new(out.path()));

        let v = artifact(scratch.path(), "v.mp4", "video/mp4", StreamRole::VideoOnly);
        let a = artifact(scratch.path(), "a.mp4", "audio/mp4", StreamRole::AudioOnly);
        let err = muxer.mux(&v, &a, "Clip", scratch.path()).await.unwrap_err();

        assert!(matches!(err, MuxError::Failed { .. }));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        assert!(!scratch.path().join("muxed-copy.mp4").exists());
        assert!(!scratch.path().join("muxed-reencode.mp4").exists());
    }

    #[test]
    fn ffmpeg_command_shapes() {
        let v = PathBuf::from("/s/v.webm");
        let a = PathBuf::from("/s/a.webm");

        let copy = FfmpegTool::copy_args(&v, &a, Path::new("/s/out.mkv")).join(" ");
        assert!(copy.contains("-i /s/v.webm -i /s/a.webm"));
        assert!(copy.contains("-c copy -f matroska /s/out.mkv"));

        let reencode = FfmpegTool::reencode_args(&v, &a, Path::new("/s/out.mp4")).join(" ");
        assert!(reencode.contains("-c:v libx264 -c:a aac -b:a 192k -movflags +faststart -f mp4 /s/out.mp4"));
    }
}
