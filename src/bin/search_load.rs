//! Search Load Test
//!
//! Loads the word list once, then drives `/search` traffic with the built-in
//! scheduler (closed loop or constant arrival rate).
//!
//! Usage:
//!   cargo run --release --bin search-load                           # browse preset
//!   cargo run --release --bin search-load -- --preset arrival-rate  # open model
//!   SEARCH_LOAD_DURATION=60 cargo run --release --bin search-load -- --workers 20
//!
//! Output: JSON run summary on stdout (and SEARCH_LOAD_RESULT_FILE if set)

use anyhow::Context;
use clap::Parser;
use search_load::{logging, runner, CliArgs};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    logging::init(args.log_format);

    let config = args.into_run_config().context("invalid configuration")?;
    tracing::info!(
        scenario = config.scenario.name(),
        target = %config.executor.base_url,
        dataset = %config.dataset,
        "=== Search Load Test ==="
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, winding down");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = runner::run(&config, shutdown_rx)
        .await
        .context("load test setup failed")?;
    summary.emit();

    Ok(())
}
