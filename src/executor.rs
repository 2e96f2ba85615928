//! The per-iteration unit of work
//!
//! One iteration picks a word, optionally hits the liveness endpoint and
//! pauses, then issues the search request. Each request becomes one
//! [`RequestRecord`] in the shared [`RunRecorder`].

use std::sync::Arc;
use std::time::Instant;

use reqwest::{Client, Url};

use crate::config::ExecutorConfig;
use crate::dataset::WordList;
use crate::error::{LoadError, LoadResult};
use crate::picker::WordPicker;
use crate::recorder::{RequestKind, RequestRecord, RunRecorder};
use crate::scheduler::{IterationOutcome, Workload};

/// Parse and check the target base URL
pub fn parse_base_url(base_url: &str) -> LoadResult<Url> {
    let url = Url::parse(base_url).map_err(|_| LoadError::InvalidBaseUrl(base_url.to_string()))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::InvalidBaseUrl(base_url.to_string()));
    }
    Ok(url)
}

/// `{base}/search?q={word}` plus one `book=` pair per filter, form-encoded
pub fn search_url(base: &Url, word: &str, books: &[String]) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("search");
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("q", word);
        for book in books {
            query.append_pair("book", book);
        }
    }
    url
}

/// Build the HTTP client for a run. With `pooled == false` the client keeps
/// no idle connections, so every request opens a fresh one.
pub fn build_client(config: &ExecutorConfig, pooled: bool) -> LoadResult<Client> {
    let mut builder = Client::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(std::time::Duration::from_secs(crate::POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(std::time::Duration::from_secs(crate::TCP_KEEPALIVE_SECS));
    if !pooled {
        builder = builder.pool_max_idle_per_host(0);
    }
    builder.build().map_err(LoadError::Client)
}

/// Liveness + search workload over a shared word list
pub struct SearchWorkload {
    words: Arc<WordList>,
    recorder: Arc<RunRecorder>,
    config: ExecutorConfig,
    client: Client,
    base_url: Url,
}

impl SearchWorkload {
    pub fn new(
        words: Arc<WordList>,
        recorder: Arc<RunRecorder>,
        config: ExecutorConfig,
        client: Client,
    ) -> LoadResult<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        Ok(Self {
            words,
            recorder,
            config,
            client,
            base_url,
        })
    }

    pub fn words(&self) -> &WordList {
        &self.words
    }

    async fn get(&self, client: &Client, kind: RequestKind, url: Url) -> RequestRecord {
        let start = Instant::now();
        let record = match client.get(url).send().await {
            Ok(mut resp) => {
                let status = resp.status();
                let body = if self.config.discard_response_bodies {
                    drain_body(&mut resp).await.map(|()| None)
                } else {
                    resp.bytes().await.map(|b| Some(b.len() as u64))
                };
                match body {
                    Ok(body_len) => RequestRecord {
                        kind,
                        status: Some(status.as_u16()),
                        success: status.is_success(),
                        latency: start.elapsed(),
                        body_len,
                        error: None,
                    },
                    Err(e) => RequestRecord {
                        kind,
                        status: Some(status.as_u16()),
                        success: false,
                        latency: start.elapsed(),
                        body_len: None,
                        error: Some(format!("body read failed: {e}")),
                    },
                }
            }
            Err(e) => RequestRecord {
                kind,
                status: e.status().map(|s| s.as_u16()),
                success: false,
                latency: start.elapsed(),
                body_len: None,
                error: Some(e.to_string()),
            },
        };
        self.recorder.record(&record);
        record
    }
}

/// Read the body chunk by chunk, dropping each chunk as it arrives
async fn drain_body(resp: &mut reqwest::Response) -> Result<(), reqwest::Error> {
    while resp.chunk().await?.is_some() {}
    Ok(())
}

impl Workload for SearchWorkload {
    async fn run_iteration(&self, picker: &mut WordPicker) -> IterationOutcome {
        let (word_index, word) = picker.pick(&self.words);

        let fresh;
        let client = if self.config.reuse_connections {
            &self.client
        } else {
            match build_client(&self.config, false) {
                Ok(c) => {
                    fresh = c;
                    &fresh
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fresh client build failed, using shared client");
                    &self.client
                }
            }
        };

        let mut failed_requests = 0;

        if self.config.liveness {
            let record = self
                .get(client, RequestKind::Liveness, self.base_url.clone())
                .await;
            if !record.success {
                failed_requests += 1;
            }
        }

        if let Some(delay) = self.config.inter_request_delay {
            tokio::time::sleep(delay).await;
        }

        let url = search_url(&self.base_url, word, &self.config.books);
        let record = self.get(client, RequestKind::Search, url).await;
        if !record.success {
            failed_requests += 1;
        }

        IterationOutcome {
            word_index,
            failed_requests,
        }
    }
}
