// Pipeline configuration
//
// Durable output location, scratch root, timeouts and tool paths are all
// injected here instead of being resolved globally. `from_env` applies
// YTMUX_* overrides on top of the defaults; the CLI applies flags on top of
// that.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Durable storage directory (flat, append-only)
    pub output_dir: PathBuf,
    /// Parent of the per-run scratch directories
    pub scratch_root: PathBuf,
    /// Upper bound for one stream fetch
    pub fetch_timeout: Duration,
    /// Upper bound for one media tool invocation
    pub mux_timeout: Duration,
    /// Upper bound for one catalog lookup
    pub catalog_timeout: Duration,
    /// ffmpeg binary (name or path)
    pub ffmpeg_path: Option<String>,
    /// yt-dlp binary (name or path)
    pub ytdlp_path: Option<String>,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            scratch_root: std::env::temp_dir(),
            fetch_timeout: Duration::from_secs(30 * 60),
            mux_timeout: Duration::from_secs(20 * 60),
            catalog_timeout: Duration::from_secs(60),
            ffmpeg_path: None,
            ytdlp_path: None,
            proxy: None,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
        }
    }
}

/// `~/Downloads/YTDownloads`, or `./YTDownloads` when there is no download dir
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("YTDownloads")
}

impl PipelineConfig {
    /// Defaults with YTMUX_* environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_var("YTMUX_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("YTMUX_SCRATCH_DIR") {
            config.scratch_root = PathBuf::from(dir);
        }
        if let Some(secs) = env_secs("YTMUX_FETCH_TIMEOUT") {
            config.fetch_timeout = secs;
        }
        if let Some(secs) = env_secs("YTMUX_MUX_TIMEOUT") {
            config.mux_timeout = secs;
        }
        config.ffmpeg_path = env_var("YTMUX_FFMPEG").or(config.ffmpeg_path);
        config.ytdlp_path = env_var("YTMUX_YTDLP").or(config.ytdlp_path);
        config.proxy = env_var("YTMUX_PROXY").or(config.proxy);

        config
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = dir.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_mux_timeout(mut self, timeout: Duration) -> Self {
        self.mux_timeout = timeout;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: Option<String>) -> Self {
        if path.is_some() {
            self.ffmpeg_path = path;
        }
        self
    }

    pub fn with_ytdlp_path(mut self, path: Option<String>) -> Self {
        if path.is_some() {
            self.ytdlp_path = path;
        }
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        if proxy.is_some() {
            self.proxy = proxy;
        }
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    let raw = env_var(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!("ignoring {}={:?}: expected a positive number of seconds", key, raw);
            None
        }
    }
}
