//! Domain error types, one closed `thiserror` enum per failure domain.
//! Orchestration-layer code composes these behind `anyhow::Result` rather
//! than propagating them directly.

use std::path::PathBuf;
use thiserror::Error;

/// Input cannot be mapped to a manifest URL for the requested library.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("empty input provided for {library}")]
    EmptyInput { library: &'static str },

    #[error("'{input}' does not look like a {library} shelfmark or URL")]
    UnrecognizedInput { library: &'static str, input: String },

    #[error("'{input}' looks like a {actual_library} identifier, not a {requested_library} one")]
    WrongLibrary {
        input: String,
        requested_library: &'static str,
        actual_library: &'static str,
    },

    #[error("'{input}' is not a valid {library} identifier")]
    InvalidIdentifier { library: &'static str, input: String },
}

/// Transient or terminal failures from the download engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("rate limited fetching {url}")]
    RateLimited { url: String },

    #[error("exhausted all {attempts} attempts fetching {url}")]
    Exhausted { url: String, attempts: u32 },

    #[error("no IIIF image service could be resolved for canvas {index}")]
    NoImageService { index: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
}

/// A single tile failing after its retries aborts the whole stitch.
#[derive(Debug, Error)]
pub enum TileStitchError {
    #[error("info.json missing at {url}")]
    InfoMissing { url: String },

    #[error("info.json at {url} has invalid dimensions")]
    InvalidDimensions { url: String },

    #[error("tile ({x},{y}) failed after {attempts} attempts")]
    TileFailed { x: u32, y: u32, attempts: u32 },

    #[error("failed to create mmap-backed canvas at {path:?}: {source}")]
    MmapCanvas {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// SQLite catalog failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("refusing to delete '{path}': not inside the configured downloads directory")]
    OutsideDownloadsDir { path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
