// HTTP stream fetcher
//
// Streams a descriptor's bytes into `<stem>.<ext>.part` inside the run's
// scratch directory, then renames to `<stem>.<ext>`. Any failure, including
// the overall timeout, removes the partial file before returning.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::config::PipelineConfig;
use super::errors::TransportError;
use super::models::{DownloadProgress, DownloadedArtifact, PipelineStage, StreamDescriptor};
use super::traits::{ProgressSink, StreamFetcher};

/// Report progress at most every this many percent
const PROGRESS_STEP: f32 = 5.0;

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(30));

        if let Some(proxy_url) = config.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout: config.fetch_timeout,
        })
    }

    async fn download_to(
        &self,
        descriptor: &StreamDescriptor,
        part: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransportError> {
        let response = self.client.get(&descriptor.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                format_id: descriptor.format_id.clone(),
            });
        }

        let total_size = response.content_length().or(descriptor.filesize).unwrap_or(0);
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_reported: f32 = -PROGRESS_STEP;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if total_size > 0 {
                let percent = (downloaded as f32 * 100.0 / total_size as f32).min(100.0);
                if percent - last_reported >= PROGRESS_STEP {
                    last_reported = percent;
                    progress.emit(DownloadProgress {
                        stage: PipelineStage::Fetching,
                        percent,
                        status: format!(
                            "{} {}: {}MB / {}MB",
                            descriptor.role,
                            descriptor.format_id,
                            downloaded / (1024 * 1024),
                            total_size / (1024 * 1024)
                        ),
                    });
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }
}

#[async_trait]
impl StreamFetcher for HttpFetcher {
    async fn fetch(
        &self,
        descriptor: &StreamDescriptor,
        destination_dir: &Path,
        stem: &str,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadedArtifact, TransportError> {
        let (target, part) = artifact_paths(descriptor, destination_dir, stem);

        if tokio::fs::try_exists(&target).await? {
            return Err(TransportError::AlreadyExists(target));
        }

        tracing::info!(
            format_id = %descriptor.format_id,
            role = %descriptor.role,
            path = %target.display(),
            "fetching stream"
        );

        let result = match tokio::time::timeout(
            self.timeout,
            self.download_to(descriptor, &part, progress),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_secs())),
        };

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                tracing::warn!(format_id = %descriptor.format_id, "fetch failed: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &target).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }

        tracing::info!(format_id = %descriptor.format_id, bytes = size, "stream fetched");
        Ok(DownloadedArtifact {
            path: target,
            size,
            mime_type: descriptor.mime_type.clone(),
            role: descriptor.role,
        })
    }
}

/// Final and partial paths for a descriptor's download
pub fn artifact_paths(
    descriptor: &StreamDescriptor,
    destination_dir: &Path,
    stem: &str,
) -> (PathBuf, PathBuf) {
    let file_name = format!("{}.{}", stem, descriptor.file_extension());
    let target = destination_dir.join(&file_name);
    let part = destination_dir.join(format!("{}.part", file_name));
    (target, part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{Resolution, StreamRole};
    use crate::downloader::traits::NoProgress;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingProgress {
        percents: Mutex<Vec<f32>>,
    }

    impl ProgressSink for RecordingProgress {
        fn emit(&self, progress: DownloadProgress) {
            self.percents.lock().unwrap().push(progress.percent);
        }
    }

    /// Serve one raw HTTP response; with `stall` the connection stays open after writing it
    async fn serve_once(response: Vec<u8>, stall: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(&response).await.unwrap();
            socket.flush().await.unwrap();
            if stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });

        format!("http://{}/videoplayback", addr)
    }

    fn http_response(status: &str, content_length: usize, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status, content_length
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn descriptor(url: &str) -> StreamDescriptor {
        StreamDescriptor {
            format_id: "137".to_string(),
            resolution: Some(Resolution(1080)),
            mime_type: Some("video/webm; codecs=\"vp9\"".to_string()),
            role: StreamRole::VideoOnly,
            abr_kbps: None,
            filesize: None,
            url: url.to_string(),
        }
    }

    #[test]
    fn paths_use_mime_extension() {
        let (target, part) = artifact_paths(&descriptor("http://x"), Path::new("/scratch"), "v");
        assert_eq!(target, PathBuf::from("/scratch/v.webm"));
        assert_eq!(part, PathBuf::from("/scratch/v.webm.part"));
    }

    #[tokio::test]
    async fn refuses_to_overwrite_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v.webm"), b"complete").unwrap();

        let fetcher = HttpFetcher::new(&PipelineConfig::default()).unwrap();
        let err = fetcher
            .fetch(&descriptor("http://127.0.0.1:9/none"), dir.path(), "v", &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::AlreadyExists(_)));
        assert_eq!(std::fs::read(dir.path().join("v.webm")).unwrap(), b"complete");
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_fetch_timeout(Duration::from_secs(5));
        let fetcher = HttpFetcher::new(&config).unwrap();

        // Port 9 (discard) is not listening on test machines.
        let result = fetcher
            .fetch(&descriptor("http://127.0.0.1:9/stream"), dir.path(), "v", &NoProgress)
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn streams_body_into_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(http_response("200 OK", 10, b"0123456789"), false).await;
        let mut stream = descriptor(&url);
        stream.mime_type = Some("video/mp4; codecs=\"avc1.640028\"".to_string());

        let progress = RecordingProgress::default();
        let fetcher = HttpFetcher::new(&PipelineConfig::default()).unwrap();
        let artifact = fetcher.fetch(&stream, dir.path(), "v", &progress).await.unwrap();

        assert_eq!(artifact.path, dir.path().join("v.mp4"));
        assert_eq!(artifact.size, 10);
        assert_eq!(artifact.extension(), "mp4");
        assert_eq!(artifact.role, StreamRole::VideoOnly);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"0123456789");
        assert!(!dir.path().join("v.mp4.part").exists());

        let percents = progress.percents.lock().unwrap();
        assert_eq!(percents.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn error_status_is_reported_and_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(http_response("403 Forbidden", 0, b""), false).await;

        let fetcher = HttpFetcher::new(&PipelineConfig::default()).unwrap();
        let err = fetcher
            .fetch(&descriptor(&url), dir.path(), "v", &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Status { status: 403, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stalled_body_times_out_and_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // headers promise 100 bytes, only 10 ever arrive
        let url = serve_once(http_response("200 OK", 100, b"0123456789"), true).await;

        let config = PipelineConfig::default().with_fetch_timeout(Duration::from_secs(1));
        let fetcher = HttpFetcher::new(&config).unwrap();
        let err = fetcher
            .fetch(&descriptor(&url), dir.path(), "v", &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout(1)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
