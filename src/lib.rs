//! Common infrastructure for the search load tests
//!
//! Loads a word list once, then drives `/search` traffic against the target
//! service under a closed (fixed workers + think time) or open (constant
//! arrival rate) model.
//!
//! ## Layout
//! - [`dataset`]: one-shot word list loading (URL or local JSON file)
//! - [`picker`]: per-unit uniform word selection
//! - [`scheduler`]: closed and open arrival models
//! - [`executor`]: the liveness + search iteration
//! - [`recorder`]: request outcomes, latency percentiles, JSON run summary
//! - [`runner`]: setup, warmup, ready marker, run

pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod logging;
pub mod picker;
pub mod recorder;
pub mod runner;
pub mod scheduler;

pub use config::{CliArgs, ExecutorConfig, OverrunPolicy, Preset, RunConfig, ScenarioConfig};
pub use dataset::{DatasetSource, WordList};
pub use error::{LoadError, LoadResult};
pub use executor::SearchWorkload;
pub use picker::WordPicker;
pub use recorder::{RequestKind, RequestRecord, RunRecorder, RunSummary};
pub use scheduler::{IterationOutcome, ScheduleReport, Scheduler, Workload};

// ============================================================================
// Shared Test Configuration
// ============================================================================
// Defaults for every knob; presets and CLI flags start from these.

/// Search service under test
pub const BASE_URL: &str = "https://csearch-test.fly.dev";

/// English word list; top-level object keys are the words
pub const WORDS_URL: &str =
    "https://raw.githubusercontent.com/dwyl/english-words/master/words_dictionary.json";

/// Default test duration in seconds
pub const DEFAULT_TEST_DURATION_SECS: u64 = 30;

/// Closed-model workers when switching a preset to the closed model
pub const DEFAULT_WORKERS: usize = 10;

/// Open-model iteration starts per second
pub const DEFAULT_ARRIVAL_RATE: f64 = 100.0;

/// Open-model concurrent iteration slots
pub const DEFAULT_PRE_ALLOCATED_WORKERS: usize = 50;

/// Longest wait for a slot under the queue overrun policy
pub const DEFAULT_QUEUE_WAIT_MS: u64 = 100;

/// Time in-flight iterations get after the test ends
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Per-request timeout
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Whole-download timeout for the word list; the dictionary is several MB
pub const DATASET_TIMEOUT_SECS: u64 = 120;

/// TCP connect timeout
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Connection pool idle timeout in seconds
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;

/// TCP keepalive timeout in seconds
pub const TCP_KEEPALIVE_SECS: u64 = 60;

/// Concurrent warmup requests
pub const WARMUP_CONCURRENCY: usize = 50;
