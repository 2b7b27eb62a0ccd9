// External tool detection (ffmpeg, yt-dlp)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::utils::run_output_with_timeout;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    Ffmpeg,
    YtDlp,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::YtDlp => "yt-dlp",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::Ffmpeg => "-version", // ffmpeg uses a single dash
            ToolType::YtDlp => "--version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Locates external tools, honoring explicit path overrides
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    ffmpeg_override: Option<String>,
    ytdlp_override: Option<String>,
}

impl ToolManager {
    pub fn new(ffmpeg_override: Option<String>, ytdlp_override: Option<String>) -> Self {
        Self {
            ffmpeg_override,
            ytdlp_override,
        }
    }

    pub async fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.locate(tool_type);
        let version = match &path {
            Some(p) => Self::get_version(p, tool_type).await,
            None => None,
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            // available only if the version probe ran
            is_available: version.is_some(),
            version,
            path,
        }
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::Ffmpeg).await,
            self.get_tool_info(ToolType::YtDlp).await,
        ]
    }

    /// Binary to invoke: the override if set, else the located path, else the bare name
    pub fn binary(&self, tool_type: ToolType) -> String {
        self.locate(tool_type)
            .unwrap_or_else(|| tool_type.as_str().to_string())
    }

    fn locate(&self, tool_type: ToolType) -> Option<String> {
        let override_path = match tool_type {
            ToolType::Ffmpeg => self.ffmpeg_override.as_ref(),
            ToolType::YtDlp => self.ytdlp_override.as_ref(),
        };
        if let Some(path) = override_path {
            return which::which(path)
                .ok()
                .map(|p| p.to_string_lossy().to_string())
                .or_else(|| Some(path.clone()));
        }

        let binary_name = tool_type.as_str();

        // 1. Try common paths first
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];
        for path in common_paths {
            if Path::new(&path).exists() {
                return Some(path);
            }
        }

        // 2. Try PATH
        which::which(binary_name)
            .ok()
            .map(|p| p.to_string_lossy().to_string())
    }

    async fn get_version(path: &str, tool_type: ToolType) -> Option<String> {
        let output = run_output_with_timeout(
            path,
            vec![tool_type.version_arg().to_string()],
            VERSION_PROBE_TIMEOUT,
        )
        .await
        .ok()?;

        if !output.status.success() {
            return None;
        }

        // ffmpeg prints a banner; the first line carries the version
        let out = String::from_utf8_lossy(&output.stdout);
        let first = out.lines().next().unwrap_or("").trim();
        Some(first.to_string())
    }
}
