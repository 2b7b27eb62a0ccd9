// Downloader module - stream selection, fetch, mux and storage

pub mod config;
pub mod errors;
pub mod extractors;
pub mod fetcher;
pub mod format_selector;
pub mod models;
pub mod muxer;
pub mod orchestrator;
pub mod storage;
pub mod tools;
pub mod traits;
pub mod utils;

pub use config::PipelineConfig;
pub use errors::{ErrorKind, PipelineError};
pub use format_selector::{QualityMenu, StreamSelector};
pub use models::{
    CatalogSnapshot, DeliveryMode, DownloadProgress, DownloadRequest, PipelineOutput,
    PipelineStage, QualityRequest, Resolution, StreamDescriptor, StreamRole,
};
pub use orchestrator::Pipeline;
pub use traits::{MediaTool, ProgressSink, StreamCatalog, StreamFetcher};
