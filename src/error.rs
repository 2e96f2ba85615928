//! Error types for the load harness

use std::path::PathBuf;

use thiserror::Error;

/// Result type for harness setup operations
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Setup-time failures. Any of these aborts the run before the first iteration.
///
/// Per-request failures during the run are not errors at this level; they are
/// recorded as failed [`RequestRecord`](crate::RequestRecord)s instead.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Dataset URL could not be fetched
    #[error("failed to fetch dataset from {url}: {source}")]
    DatasetFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Dataset URL answered with a non-success status
    #[error("dataset request to {url} returned HTTP {status}")]
    DatasetStatus { url: String, status: u16 },

    /// Local dataset file could not be read
    #[error("failed to read dataset file {path}: {source}")]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dataset content is not valid JSON
    #[error("dataset is not valid JSON: {0}")]
    DatasetParse(#[from] serde_json::Error),

    /// Dataset is JSON, but neither a string array nor an object
    #[error("dataset has unsupported shape: {0}")]
    DatasetShape(String),

    /// Dataset parsed to zero words
    #[error("dataset contains no words")]
    EmptyDataset,

    /// Scenario or executor configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Target base URL cannot be parsed or cannot carry a path
    #[error("invalid base URL {0:?}")]
    InvalidBaseUrl(String),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}
