// Common data models for the download pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Vertical resolution of a video stream (e.g. 1080p)
///
/// Ordered numerically on the leading integer of the label, so `2160p`
/// sorts above `1440p` and any non-standard `<n>p` label still has a place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Resolution(pub u32);

impl Resolution {
    pub fn height(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.0)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        match digits.parse::<u32>() {
            Ok(height) if height > 0 => Ok(Self(height)),
            _ => Err(format!("not a resolution label: {:?}", s)),
        }
    }
}

/// What a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    /// Video and audio in one stream
    Progressive,
    /// Adaptive video without audio
    VideoOnly,
    /// Audio without video
    AudioOnly,
}

impl StreamRole {
    /// Extension used when the mime type gives nothing usable
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Progressive | Self::VideoOnly => "mp4",
            Self::AudioOnly => "m4a",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressive => write!(f, "progressive"),
            Self::VideoOnly => write!(f, "video-only"),
            Self::AudioOnly => write!(f, "audio-only"),
        }
    }
}

/// One stream offered by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Catalog format id (e.g. "137", "140")
    pub format_id: String,
    /// Vertical resolution, absent for audio
    pub resolution: Option<Resolution>,
    /// Container/codec mime type (e.g. `video/mp4; codecs="avc1.640028"`)
    pub mime_type: Option<String>,
    pub role: StreamRole,
    /// Average audio bitrate in kbps
    pub abr_kbps: Option<f32>,
    /// Size in bytes when the catalog knows it
    pub filesize: Option<u64>,
    /// Identity token used to re-fetch the stream
    pub url: String,
}

impl StreamDescriptor {
    /// Mime subtype without parameters, lowercased (`video/mp4; codecs=..` -> `mp4`)
    pub fn mime_subtype(&self) -> Option<String> {
        let mime = self.mime_type.as_deref()?;
        let essence = mime.split(';').next()?.trim();
        let (_, subtype) = essence.split_once('/')?;
        let subtype = subtype.trim().to_ascii_lowercase();
        if subtype.is_empty() {
            None
        } else {
            Some(subtype)
        }
    }

    /// File extension for a download of this stream
    pub fn file_extension(&self) -> String {
        match self.mime_subtype() {
            Some(sub)
                if sub
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
            {
                sub
            }
            _ => self.role.default_extension().to_string(),
        }
    }
}

/// Snapshot of what the catalog offers for one video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub video_id: String,
    pub title: String,
    /// Streams in catalog order
    pub streams: Vec<StreamDescriptor>,
}

/// Quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Single progressive stream, no muxing
    Easy,
    /// Best adaptive video plus best audio, muxed
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySelector {
    Resolution(Resolution),
    AudioOnly,
}

/// Requested quality, parsed from a descriptor like `p:720p`, `v:1080p` or `a:audio`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRequest {
    pub tier: Tier,
    pub selector: QualitySelector,
}

impl QualityRequest {
    pub fn easy(resolution: Resolution) -> Self {
        Self {
            tier: Tier::Easy,
            selector: QualitySelector::Resolution(resolution),
        }
    }

    pub fn max(resolution: Resolution) -> Self {
        Self {
            tier: Tier::Max,
            selector: QualitySelector::Resolution(resolution),
        }
    }

    pub fn audio() -> Self {
        Self {
            tier: Tier::Easy,
            selector: QualitySelector::AudioOnly,
        }
    }
}

impl Default for QualityRequest {
    fn default() -> Self {
        Self::easy(Resolution(720))
    }
}

impl FromStr for QualityRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "audio" || s == "a:audio" {
            return Ok(Self::audio());
        }

        let (prefix, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("unknown quality descriptor: {:?}", s))?;

        let tier = match prefix {
            "p" | "easy" => Tier::Easy,
            "v" | "max" => Tier::Max,
            _ => return Err(format!("unknown quality tier: {:?}", prefix)),
        };

        let selector = if rest == "audio" {
            QualitySelector::AudioOnly
        } else {
            QualitySelector::Resolution(rest.parse()?)
        };

        Ok(Self { tier, selector })
    }
}

impl fmt::Display for QualityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tier, self.selector) {
            (Tier::Easy, QualitySelector::AudioOnly) => write!(f, "a:audio"),
            (Tier::Max, QualitySelector::AudioOnly) => write!(f, "max:audio"),
            (Tier::Easy, QualitySelector::Resolution(r)) => write!(f, "p:{}", r),
            (Tier::Max, QualitySelector::Resolution(r)) => write!(f, "v:{}", r),
        }
    }
}

/// Stream(s) chosen by the selector
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionResult {
    /// Progressive or audio-only
    Single(StreamDescriptor),
    /// Video-only plus audio-only, to be muxed
    Pair {
        video: StreamDescriptor,
        audio: StreamDescriptor,
    },
}

/// Selector output, with the resolution that was actually used
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub requested: QualityRequest,
    pub result: SelectionResult,
    /// Resolution of the chosen video side; differs from the request after fallback
    pub effective_resolution: Option<Resolution>,
}

impl Selection {
    pub fn descriptors(&self) -> Vec<&StreamDescriptor> {
        match &self.result {
            SelectionResult::Single(stream) => vec![stream],
            SelectionResult::Pair { video, audio } => vec![video, audio],
        }
    }
}

/// A stream downloaded into scratch storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: Option<String>,
    pub role: StreamRole,
}

impl DownloadedArtifact {
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.role.default_extension().to_string())
    }
}

/// Final file in durable storage, owned by the caller once returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub extension: String,
    /// Human-readable name without extension
    pub base_name: String,
}

/// How the output was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Progressive,
    AudioOnly,
    Merged,
    /// Max tier whose audio could not be merged
    VideoOnly,
}

/// Successful pipeline result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub file: OutputFile,
    pub mode: DeliveryMode,
    pub effective_resolution: Option<Resolution>,
    /// True when audio should have been merged but was not
    pub degraded: bool,
    pub note: String,
}

/// Pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Selecting,
    Fetching,
    Muxing,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Selecting => "selecting",
            Self::Fetching => "fetching",
            Self::Muxing => "muxing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Download progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub stage: PipelineStage,
    pub percent: f32,
    pub status: String,
}

/// Caller-facing request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Video id or watch URL
    pub source: String,
    pub quality: QualityRequest,
}
