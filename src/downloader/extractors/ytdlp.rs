// yt-dlp catalog - turns `yt-dlp --dump-json` into a CatalogSnapshot
//
// Only directly fetchable (http/https) formats are kept; manifests and
// storyboards are dropped. The role comes from vcodec/acodec being "none".

use async_trait::async_trait;
use std::time::Duration;

use crate::downloader::config::PipelineConfig;
use crate::downloader::errors::{CatalogError, ToolFailure};
use crate::downloader::models::{CatalogSnapshot, Resolution, StreamDescriptor, StreamRole};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::traits::StreamCatalog;
use crate::downloader::utils::{run_output_with_timeout, stderr_tail};

pub struct YtDlpCatalog {
    tools: ToolManager,
    timeout: Duration,
    proxy: Option<String>,
}

impl YtDlpCatalog {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tools: ToolManager::new(config.ffmpeg_path.clone(), config.ytdlp_path.clone()),
            timeout: config.catalog_timeout,
            proxy: config.proxy.clone(),
        }
    }

    /// Build command arguments
    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.timeout.as_secs().max(1).to_string(),
        ];

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }

    /// Parse yt-dlp JSON output
    pub fn parse_json(stdout: &[u8]) -> Result<CatalogSnapshot, CatalogError> {
        let json: serde_json::Value = serde_json::from_slice(stdout)
            .map_err(|e| CatalogError::Parse(format!("Invalid JSON: {}", e)))?;

        let formats = json["formats"]
            .as_array()
            .ok_or_else(|| CatalogError::Parse("No formats array in JSON".to_string()))?;

        let streams = formats.iter().filter_map(Self::parse_format).collect();

        Ok(CatalogSnapshot {
            video_id: json["id"].as_str().unwrap_or("unknown").to_string(),
            title: json["title"].as_str().unwrap_or("Unknown").to_string(),
            streams,
        })
    }

    fn parse_format(f: &serde_json::Value) -> Option<StreamDescriptor> {
        let protocol = f["protocol"].as_str().unwrap_or("https");
        if !matches!(protocol, "http" | "https") {
            return None;
        }
        let url = f["url"].as_str()?.to_string();

        let vcodec = f["vcodec"].as_str().filter(|v| *v != "none" && !v.is_empty());
        let acodec = f["acodec"].as_str().filter(|a| *a != "none" && !a.is_empty());
        let role = match (vcodec, acodec) {
            (Some(_), Some(_)) => StreamRole::Progressive,
            (Some(_), None) => StreamRole::VideoOnly,
            (None, Some(_)) => StreamRole::AudioOnly,
            (None, None) => return None,
        };

        let ext = f["ext"].as_str().unwrap_or("");
        let mime_type = mime_for(role, ext, vcodec, acodec);

        Some(StreamDescriptor {
            format_id: f["format_id"].as_str().unwrap_or("").to_string(),
            resolution: match role {
                StreamRole::AudioOnly => None,
                _ => f["height"].as_u64().filter(|h| *h > 0).map(|h| Resolution(h as u32)),
            },
            mime_type,
            role,
            abr_kbps: f["abr"].as_f64().map(|a| a as f32),
            filesize: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
            url,
        })
    }
}

/// `video/mp4; codecs="avc1.4d401f, mp4a.40.2"` style mime type from yt-dlp fields
fn mime_for(role: StreamRole, ext: &str, vcodec: Option<&str>, acodec: Option<&str>) -> Option<String> {
    if ext.is_empty() {
        return None;
    }
    let (major, subtype) = match (role, ext) {
        (StreamRole::AudioOnly, "m4a") => ("audio", "mp4"),
        (StreamRole::AudioOnly, other) => ("audio", other),
        (_, other) => ("video", other),
    };

    let codecs: Vec<&str> = [vcodec, acodec].into_iter().flatten().collect();
    if codecs.is_empty() {
        Some(format!("{}/{}", major, subtype))
    } else {
        Some(format!("{}/{}; codecs=\"{}\"", major, subtype, codecs.join(", ")))
    }
}

#[async_trait]
impl StreamCatalog for YtDlpCatalog {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, video_url: &str) -> Result<CatalogSnapshot, CatalogError> {
        let binary = self.tools.binary(ToolType::YtDlp);
        let args = self.build_args(video_url);
        tracing::info!("[{}] {} {}", self.name(), binary, args.join(" "));

        let output = run_output_with_timeout(&binary, args, self.timeout)
            .await
            .map_err(|e| match e {
                ToolFailure::TimedOut { secs, .. } => CatalogError::Timeout(secs),
                ToolFailure::Spawn { message, .. } => {
                    CatalogError::ToolNotFound(format!("{}: {}", binary, message))
                }
                other => CatalogError::Unreachable(other.to_string()),
            })?;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr, 5);
            tracing::warn!("[{}] lookup failed: {}", self.name(), stderr);
            return Err(CatalogError::from(stderr));
        }

        let snapshot = Self::parse_json(&output.stdout)?;
        tracing::info!(
            video_id = %snapshot.video_id,
            streams = snapshot.streams.len(),
            "catalog snapshot ready"
        );
        Ok(snapshot)
    }
}
