// ytmux command line
//
// Environment (YTMUX_*) is read first; flags given here override it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use ytmux::downloader::tools::ToolManager;
use ytmux::downloader::QualityMenu;
use ytmux::{DownloadRequest, Pipeline, PipelineConfig, QualityRequest};

#[derive(Parser)]
#[command(name = "ytmux")]
#[command(about = "Download YouTube streams by quality and merge audio into video")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for finished files
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Parent directory for per-run scratch directories
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Upper bound for one stream download, in seconds
    #[arg(long, global = true)]
    fetch_timeout: Option<u64>,

    /// Upper bound for one ffmpeg run, in seconds
    #[arg(long, global = true)]
    mux_timeout: Option<u64>,

    /// Path to ffmpeg
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    /// Path to yt-dlp
    #[arg(long, global = true)]
    ytdlp: Option<String>,

    /// Proxy URL (http, https, socks5)
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "YTMUX_LOG")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a video at the requested quality
    Download {
        /// Video id or YouTube URL
        source: String,
        /// p:<res> (progressive), v:<res> (max, merged) or a:audio
        #[arg(short, long, default_value = "p:720p")]
        quality: QualityRequest,
    },
    /// List the resolutions available for a video
    Formats {
        /// Video id or YouTube URL
        source: String,
    },
    /// Show ffmpeg and yt-dlp status
    Tools,
}

impl Cli {
    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_env()
            .with_ffmpeg_path(self.ffmpeg.clone())
            .with_ytdlp_path(self.ytdlp.clone())
            .with_proxy(self.proxy.clone());

        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(dir) = &self.scratch_dir {
            config = config.with_scratch_root(dir);
        }
        if let Some(secs) = self.fetch_timeout {
            config = config.with_fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.mux_timeout {
            config = config.with_mux_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[derive(Serialize)]
struct FormatsReport {
    video_id: String,
    title: String,
    #[serde(flatten)]
    menu: QualityMenu,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    ytmux::init_tracing(&cli.log_level);

    let config = cli.config();
    match &cli.command {
        Commands::Download { source, quality } => {
            let pipeline = Pipeline::from_config(&config)?;
            let request = DownloadRequest {
                source: source.clone(),
                quality: *quality,
            };

            match pipeline.download(&request).await {
                Ok(output) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&output)?);
                    } else {
                        println!("{}", output.file.path.display());
                        eprintln!("{}", output.note);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&e)?);
                    } else {
                        eprintln!("error: {}", e);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Formats { source } => {
            let pipeline = Pipeline::from_config(&config)?;
            let snapshot = pipeline
                .snapshot(source)
                .await
                .with_context(|| format!("looking up {}", source))?;
            let report = FormatsReport {
                menu: QualityMenu::from_snapshot(&snapshot),
                video_id: snapshot.video_id,
                title: snapshot.title,
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} ({})", report.title, report.video_id);
                for res in &report.menu.progressive {
                    println!("  p:{}", res);
                }
                for res in &report.menu.adaptive {
                    println!("  v:{}", res);
                }
                if report.menu.audio_available {
                    println!("  a:audio");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tools => {
            let tools = ToolManager::new(config.ffmpeg_path.clone(), config.ytdlp_path.clone())
                .get_all_tools()
                .await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                for tool in &tools {
                    match (&tool.path, &tool.version) {
                        (Some(path), Some(version)) if tool.is_available => {
                            println!("{:<8} {} ({})", tool.name, version, path)
                        }
                        _ => println!("{:<8} not found", tool.name),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
