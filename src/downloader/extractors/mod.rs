// Catalog adapters
//
// The pipeline only needs a snapshot of title and streams; how that is
// obtained stays behind the StreamCatalog trait.

mod ytdlp;

pub use ytdlp::YtDlpCatalog;
