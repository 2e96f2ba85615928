//! Word list loading
//!
//! The word list is fetched once during setup and then shared read-only
//! (`Arc<WordList>`) by every execution unit for the rest of the run.

use std::fmt;
use std::ops::Index;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::ExecutorConfig;
use crate::error::{LoadError, LoadResult};

/// Where the word list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Url(String),
    Path(PathBuf),
}

impl DatasetSource {
    /// `http://` and `https://` strings are URLs, anything else is a file path
    pub fn parse(source: &str) -> Self {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(source.to_string())
        } else {
            Self::Path(PathBuf::from(source))
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Immutable, non-empty ordered sequence of words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordList {
    words: Box<[String]>,
}

impl WordList {
    pub fn new(words: Vec<String>) -> LoadResult<Self> {
        if words.is_empty() {
            return Err(LoadError::EmptyDataset);
        }
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    /// Parse a JSON document: a string array (order kept) or an object whose
    /// keys are the words (values ignored, keys in sorted order)
    pub fn from_json(bytes: &[u8]) -> LoadResult<Self> {
        let words = match serde_json::from_slice::<Value>(bytes)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(word) => Ok(word),
                    other => Err(LoadError::DatasetShape(format!(
                        "array element {i} is not a string: {other}"
                    ))),
                })
                .collect::<LoadResult<Vec<_>>>()?,
            Value::Object(map) => map.into_iter().map(|(key, _)| key).collect(),
            other => {
                return Err(LoadError::DatasetShape(format!(
                    "expected an array or object at top level, got {}",
                    json_kind(&other)
                )))
            }
        };
        Self::new(words)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}

impl Index<usize> for WordList {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.words[index]
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Client for the one-off word list download. Shares TLS and connect
/// settings with the search client but not its per-request timeout.
pub fn build_client(config: &ExecutorConfig) -> LoadResult<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .connect_timeout(config.connect_timeout)
        .timeout(Duration::from_secs(crate::DATASET_TIMEOUT_SECS))
        .build()
        .map_err(LoadError::Client)
}

/// Load the word list once. Every failure is fatal to the run.
pub async fn load(source: &DatasetSource, client: &reqwest::Client) -> LoadResult<WordList> {
    let start = Instant::now();
    tracing::info!(%source, "Loading word list");

    let bytes = match source {
        DatasetSource::Url(url) => {
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|source| LoadError::DatasetFetch {
                    url: url.clone(),
                    source,
                })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(LoadError::DatasetStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            resp.bytes()
                .await
                .map_err(|source| LoadError::DatasetFetch {
                    url: url.clone(),
                    source,
                })?
                .to_vec()
        }
        DatasetSource::Path(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|source| LoadError::DatasetRead {
                    path: path.clone(),
                    source,
                })?
        }
    };

    let words = WordList::from_json(&bytes)?;
    tracing::info!(
        words = words.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Word list loaded"
    );
    Ok(words)
}
