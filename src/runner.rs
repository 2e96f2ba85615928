//! Run orchestration: setup, scheduling, summary

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::RunConfig;
use crate::dataset::{self, WordList};
use crate::error::LoadResult;
use crate::executor::{build_client, SearchWorkload};
use crate::recorder::{RunRecorder, RunSummary};
use crate::scheduler::Scheduler;

/// Everything produced by setup; lives for the whole run
pub struct Setup {
    pub words: Arc<WordList>,
    pub client: reqwest::Client,
}

/// Validate config, build the shared client and load the word list once.
/// Nothing is sent to the target before this succeeds.
pub async fn setup(config: &RunConfig) -> LoadResult<Setup> {
    config.validate()?;
    let client = build_client(&config.executor, config.executor.reuse_connections)?;
    let words = dataset::load(&config.dataset, &dataset::build_client(&config.executor)?).await?;
    Ok(Setup {
        words: Arc::new(words),
        client,
    })
}

/// Full run. Setup errors abort before the first iteration.
pub async fn run(config: &RunConfig, shutdown: watch::Receiver<bool>) -> LoadResult<RunSummary> {
    let Setup { words, client } = setup(config).await?;

    if config.warmup_requests > 0 {
        tracing::info!(requests = config.warmup_requests, "Warming up connections");
        warmup_connections(&client, &config.executor.base_url, config.warmup_requests).await;
    }

    let recorder = Arc::new(RunRecorder::new());
    let workload = Arc::new(SearchWorkload::new(
        words,
        Arc::clone(&recorder),
        config.executor.clone(),
        client,
    )?);

    signal_ready();
    let scheduler = Scheduler::new(config.scenario.clone(), config.grace_period, config.seed);
    let report = scheduler.run(workload, shutdown).await;

    let summary = recorder.summary(&config.scenario, &report);
    tracing::info!("{}", summary.headline());
    Ok(summary)
}

/// Pre-warm connections with parallel liveness requests before the timer starts,
/// so TLS handshakes don't land in the measured latencies. Not recorded.
pub async fn warmup_connections(client: &reqwest::Client, url: &str, count: usize) {
    let start = Instant::now();
    let mut failed = 0usize;
    let mut tasks = JoinSet::new();
    for _ in 0..count {
        let client = client.clone();
        let url = url.to_string();
        tasks.spawn(async move { client.get(&url).send().await.is_ok() });
        if tasks.len() >= crate::WARMUP_CONCURRENCY {
            if let Some(result) = tasks.join_next().await {
                if !matches!(result, Ok(true)) {
                    failed += 1;
                }
            }
        }
    }
    while let Some(result) = tasks.join_next().await {
        if !matches!(result, Ok(true)) {
            failed += 1;
        }
    }
    if failed > 0 {
        tracing::warn!(failed, count, "Some warmup requests failed");
    }
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Warmup complete"
    );
}

/// Signal to an outer runner that setup is done and measurement is starting.
/// Creates a marker file at the path given by SEARCH_LOAD_READY_FILE.
pub fn signal_ready() {
    if let Ok(path) = std::env::var("SEARCH_LOAD_READY_FILE") {
        match std::fs::write(&path, "ready") {
            Ok(()) => tracing::info!(%path, "Measurement starting"),
            Err(e) => tracing::warn!(%path, error = %e, "Failed to write ready file"),
        }
    }
}
