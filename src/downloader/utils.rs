// Helper functions shared by the catalog, fetcher and muxer

use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use url::Url;

use super::errors::ToolFailure;

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
}

/// Run command with timeout, capturing stdout and stderr
///
/// The child is killed when the timeout expires.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    limit: Duration,
) -> Result<std::process::Output, ToolFailure> {
    let spawn_failure = |message: String| ToolFailure::Spawn {
        tool: program.to_string(),
        message,
    };

    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_failure(e.to_string()))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| spawn_failure("stdout not captured".to_string()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| spawn_failure("stderr not captured".to_string()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| spawn_failure(format!("wait failed: {}", e)))?;
            let stdout = stdout_task
                .await
                .map_err(|e| spawn_failure(format!("stdout task failed: {}", e)))?
                .map_err(|e| spawn_failure(format!("failed to read stdout: {}", e)))?;
            let stderr = stderr_task
                .await
                .map_err(|e| spawn_failure(format!("stderr task failed: {}", e)))?
                .map_err(|e| spawn_failure(format!("failed to read stderr: {}", e)))?;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(ToolFailure::TimedOut {
                tool: program.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

/// Last lines of a tool's stderr, enough to explain a failure
pub fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let collected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

/// Extract the video id from a bare id or a YouTube URL
///
/// Accepts `youtube.com/watch?v=<id>`, `youtu.be/<id>` and
/// `youtube.com/shorts/<id>`, with or without scheme and `www.`/`m.`.
/// Extra query parameters (playlists, timestamps, tracking) are dropped.
pub fn parse_video_id(source: &str) -> Result<String, String> {
    let source = source.trim();
    if source.is_empty() {
        return Err("empty video reference".to_string());
    }
    if VIDEO_ID_RE.is_match(source) {
        return Ok(source.to_string());
    }

    let with_scheme = if source.contains("://") {
        source.to_string()
    } else {
        format!("https://{}", source)
    };
    let url = Url::parse(&with_scheme).map_err(|e| format!("invalid URL {:?}: {}", source, e))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported URL scheme: {}", url.scheme()));
    }

    let host = url
        .host_str()
        .unwrap_or("")
        .trim_start_matches("www.")
        .trim_start_matches("m.");

    let candidate = match host {
        "youtu.be" => url.path_segments().and_then(|mut s| s.next()).map(str::to_string),
        "youtube.com" => {
            let mut segments = url.path_segments().into_iter().flatten();
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => return Err(format!("unsupported host: {:?}", host)),
    };

    match candidate {
        Some(id) if VIDEO_ID_RE.is_match(&id) => Ok(id),
        Some(id) => Err(format!("malformed video id: {:?}", id)),
        None => Err(format!("no video id in {:?}", source)),
    }
}

/// Canonical watch URL for a video id
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_urls() {
        let id = "dQw4w9WgXcQ";
        for source in [
            "dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&t=42",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=tracking",
            "http://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(parse_video_id(source).as_deref(), Ok(id), "{}", source);
        }
    }

    #[test]
    fn rejects_bad_references() {
        for source in [
            "",
            "   ",
            "not a url",
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/channel/UC123",
            "ftp://youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert!(parse_video_id(source).is_err(), "{}", source);
        }
    }

    #[test]
    fn watch_url_is_canonical() {
        assert_eq!(watch_url("dQw4w9WgXcQ"), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let tail = stderr_tail(b"one\n\ntwo\nthree\n", 2);
        assert_eq!(tail, "two\nthree");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let result = run_output_with_timeout(
            "ytmux-definitely-not-installed",
            vec!["--version".to_string()],
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ToolFailure::Spawn { .. })));
    }
}
