// ytmux - pick YouTube streams by quality, fetch them and mux audio into video

pub mod downloader;

pub use downloader::{
    DownloadRequest, ErrorKind, Pipeline, PipelineConfig, PipelineError, PipelineOutput,
    QualityRequest,
};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `default_level` when set. Logs go to stderr so
/// stdout stays clean for `--json` output.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ytmux={}", default_level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
