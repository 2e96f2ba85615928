//! Run configuration: arrival model, executor options and CLI surface
//!
//! A [`RunConfig`] is assembled once before the run (preset, then CLI flags,
//! then `SEARCH_LOAD_*` env vars through clap) and never changes afterwards.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::dataset::DatasetSource;
use crate::error::{LoadError, LoadResult};
use crate::{
    BASE_URL, DEFAULT_ARRIVAL_RATE, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_PRE_ALLOCATED_WORKERS,
    DEFAULT_QUEUE_WAIT_MS, DEFAULT_TEST_DURATION_SECS, DEFAULT_WORKERS, WORDS_URL,
};

// ============================================================================
// Scenario (arrival model)
// ============================================================================

/// What happens to an open-model arrival that finds every slot busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Count the arrival as dropped and move on
    Drop,
    /// Wait up to `max_wait` for a slot; late starts count as delayed
    Queue {
        #[serde(with = "duration_ms")]
        max_wait: Duration,
    },
}

/// Arrival model for a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ScenarioConfig {
    /// Fixed number of workers, each looping with a think time
    Closed {
        workers: usize,
        #[serde(with = "duration_ms")]
        loop_delay: Duration,
        /// `None` runs until shutdown
        #[serde(with = "opt_duration_ms")]
        duration: Option<Duration>,
    },
    /// Constant arrival rate over a bounded slot pool
    Open {
        rate_per_second: f64,
        #[serde(with = "duration_ms")]
        duration: Duration,
        pre_allocated_workers: usize,
        overrun: OverrunPolicy,
    },
}

impl ScenarioConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "closed",
            Self::Open { .. } => "open",
        }
    }

    pub fn validate(&self) -> LoadResult<()> {
        match self {
            Self::Closed {
                workers, duration, ..
            } => {
                if *workers == 0 {
                    return Err(LoadError::InvalidConfig(
                        "closed model needs at least one worker".into(),
                    ));
                }
                if duration.is_some_and(|d| d.is_zero()) {
                    return Err(LoadError::InvalidConfig(
                        "closed model duration must be positive".into(),
                    ));
                }
            }
            Self::Open {
                rate_per_second,
                duration,
                pre_allocated_workers,
                ..
            } => {
                if !rate_per_second.is_finite() || *rate_per_second <= 0.0 {
                    return Err(LoadError::InvalidConfig(format!(
                        "rate per second must be positive, got {rate_per_second}"
                    )));
                }
                if duration.is_zero() {
                    return Err(LoadError::InvalidConfig(
                        "open model duration must be positive".into(),
                    ));
                }
                if *pre_allocated_workers == 0 {
                    return Err(LoadError::InvalidConfig(
                        "open model needs at least one pre-allocated worker".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Executor options
// ============================================================================

/// Per-iteration request behavior
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorConfig {
    pub base_url: String,
    /// Issue `GET {base_url}` before the search request
    pub liveness: bool,
    #[serde(with = "opt_duration_ms")]
    pub inter_request_delay: Option<Duration>,
    pub discard_response_bodies: bool,
    pub reuse_connections: bool,
    /// Skip TLS certificate checks (self-signed staging targets)
    pub accept_invalid_certs: bool,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Optional `book=` filters appended to every search
    pub books: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            liveness: false,
            inter_request_delay: None,
            discard_response_bodies: false,
            reuse_connections: true,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(crate::REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(crate::CONNECT_TIMEOUT_SECS),
            books: Vec::new(),
        }
    }
}

// ============================================================================
// Whole run
// ============================================================================

/// Everything a run needs, fixed before the first iteration
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dataset: DatasetSource,
    pub scenario: ScenarioConfig,
    pub executor: ExecutorConfig,
    /// How long in-flight iterations may keep running after arrivals stop
    pub grace_period: Duration,
    /// Liveness requests sent before measurement starts (not recorded)
    pub warmup_requests: usize,
    /// Base seed for per-unit word pickers; random when `None`
    pub seed: Option<u64>,
}

impl RunConfig {
    /// Build a run from one of the two stock workloads
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            // liveness, sleep 1s, search; one user looping back to back
            Preset::Browse => Self {
                dataset: DatasetSource::parse(WORDS_URL),
                scenario: ScenarioConfig::Closed {
                    workers: 1,
                    loop_delay: Duration::ZERO,
                    duration: Some(Duration::from_secs(DEFAULT_TEST_DURATION_SECS)),
                },
                executor: ExecutorConfig {
                    liveness: true,
                    inter_request_delay: Some(Duration::from_secs(1)),
                    ..ExecutorConfig::default()
                },
                grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
                warmup_requests: 0,
                seed: None,
            },
            // search only, constant arrival rate, fresh connections, bodies dropped
            Preset::ArrivalRate => Self {
                dataset: DatasetSource::parse(WORDS_URL),
                scenario: ScenarioConfig::Open {
                    rate_per_second: DEFAULT_ARRIVAL_RATE,
                    duration: Duration::from_secs(DEFAULT_TEST_DURATION_SECS),
                    pre_allocated_workers: DEFAULT_PRE_ALLOCATED_WORKERS,
                    overrun: OverrunPolicy::Drop,
                },
                executor: ExecutorConfig {
                    discard_response_bodies: true,
                    reuse_connections: false,
                    ..ExecutorConfig::default()
                },
                grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
                warmup_requests: 0,
                seed: None,
            },
        }
    }

    pub fn validate(&self) -> LoadResult<()> {
        self.scenario.validate()?;
        if self.executor.request_timeout.is_zero() {
            return Err(LoadError::InvalidConfig(
                "request timeout must be positive".into(),
            ));
        }
        crate::executor::parse_base_url(&self.executor.base_url)?;
        Ok(())
    }
}

// ============================================================================
// CLI Argument Parsing
// ============================================================================

/// Stock workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Closed loop: liveness GET, 1s pause, search GET
    Browse,
    /// Open model: search GETs at a constant arrival rate
    ArrivalRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverrunKind {
    Drop,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command line for the load binaries. Unset flags keep the preset's value.
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Word-list driven load generator for the /search endpoint")]
pub struct CliArgs {
    /// Stock workload to start from
    #[arg(long, value_enum, default_value = "browse", env = "SEARCH_LOAD_PRESET")]
    pub preset: Preset,

    /// Override the preset's arrival model
    #[arg(long, value_enum, env = "SEARCH_LOAD_SCENARIO")]
    pub scenario: Option<ScenarioKind>,

    /// Open model: iteration starts per second
    #[arg(long, env = "SEARCH_LOAD_RATE")]
    pub rate_per_second: Option<f64>,

    /// Test duration in seconds
    #[arg(long, env = "SEARCH_LOAD_DURATION")]
    pub duration: Option<u64>,

    /// Open model: concurrent iteration slots
    #[arg(long, env = "SEARCH_LOAD_PRE_ALLOCATED")]
    pub pre_allocated_workers: Option<usize>,

    /// Closed model: concurrent workers
    #[arg(long, env = "SEARCH_LOAD_VUS")]
    pub workers: Option<usize>,

    /// Closed model: think time between iterations, in seconds
    #[arg(long, env = "SEARCH_LOAD_LOOP_DELAY")]
    pub loop_delay: Option<f64>,

    /// Open model: what to do when every slot is busy
    #[arg(long, value_enum, env = "SEARCH_LOAD_OVERRUN")]
    pub overrun: Option<OverrunKind>,

    /// Open model with `--overrun queue`: longest wait for a slot
    #[arg(long, default_value_t = DEFAULT_QUEUE_WAIT_MS, env = "SEARCH_LOAD_QUEUE_WAIT_MS")]
    pub queue_wait_ms: u64,

    #[arg(long, env = "SEARCH_LOAD_DISCARD_BODIES")]
    pub discard_response_bodies: Option<bool>,

    #[arg(long, env = "SEARCH_LOAD_REUSE_CONNECTIONS")]
    pub reuse_connections: Option<bool>,

    /// Send a liveness GET before each search
    #[arg(long, env = "SEARCH_LOAD_LIVENESS")]
    pub liveness: Option<bool>,

    /// Pause between liveness and search requests, in seconds (0 disables)
    #[arg(long, env = "SEARCH_LOAD_INTER_REQUEST_DELAY")]
    pub inter_request_delay: Option<f64>,

    /// Accept invalid TLS certificates
    #[arg(long, env = "SEARCH_LOAD_INSECURE")]
    pub insecure: bool,

    /// Book filter passed as `book=` on each search (repeatable)
    #[arg(long = "book")]
    pub books: Vec<String>,

    /// Word list: http(s) URL or local JSON file
    #[arg(long, env = "SEARCH_LOAD_DATASET")]
    pub dataset: Option<String>,

    /// Target service base URL
    #[arg(long, env = "SEARCH_LOAD_BASE_URL")]
    pub base_url: Option<String>,

    /// Seconds in-flight iterations may run after the test ends
    #[arg(long, env = "SEARCH_LOAD_GRACE_PERIOD")]
    pub grace_period: Option<u64>,

    /// Liveness requests sent before measurement starts
    #[arg(long, default_value_t = 0, env = "SEARCH_LOAD_WARMUP")]
    pub warmup_requests: usize,

    /// Base seed for word selection
    #[arg(long, env = "SEARCH_LOAD_SEED")]
    pub seed: Option<u64>,

    #[arg(long, value_enum, default_value = "text", env = "SEARCH_LOAD_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl CliArgs {
    /// Apply flags on top of the selected preset
    pub fn into_run_config(self) -> LoadResult<RunConfig> {
        let mut config = RunConfig::from_preset(self.preset);
        let duration = self.duration.map(Duration::from_secs);

        let scenario_kind = self.scenario.unwrap_or(match config.scenario {
            ScenarioConfig::Closed { .. } => ScenarioKind::Closed,
            ScenarioConfig::Open { .. } => ScenarioKind::Open,
        });

        config.scenario = match (scenario_kind, config.scenario) {
            (
                ScenarioKind::Closed,
                ScenarioConfig::Closed {
                    workers,
                    loop_delay,
                    duration: preset_duration,
                },
            ) => ScenarioConfig::Closed {
                workers: self.workers.unwrap_or(workers),
                loop_delay: seconds(self.loop_delay)?.unwrap_or(loop_delay),
                duration: duration.or(preset_duration),
            },
            (ScenarioKind::Closed, ScenarioConfig::Open { duration: d, .. }) => {
                ScenarioConfig::Closed {
                    workers: self.workers.unwrap_or(DEFAULT_WORKERS),
                    loop_delay: seconds(self.loop_delay)?.unwrap_or(Duration::ZERO),
                    duration: Some(duration.unwrap_or(d)),
                }
            }
            (
                ScenarioKind::Open,
                ScenarioConfig::Open {
                    rate_per_second,
                    duration: d,
                    pre_allocated_workers,
                    overrun,
                },
            ) => ScenarioConfig::Open {
                rate_per_second: self.rate_per_second.unwrap_or(rate_per_second),
                duration: duration.unwrap_or(d),
                pre_allocated_workers: self
                    .pre_allocated_workers
                    .unwrap_or(pre_allocated_workers),
                overrun: overrun_policy(self.overrun, self.queue_wait_ms).unwrap_or(overrun),
            },
            (ScenarioKind::Open, ScenarioConfig::Closed { duration: d, .. }) => {
                ScenarioConfig::Open {
                    rate_per_second: self.rate_per_second.unwrap_or(DEFAULT_ARRIVAL_RATE),
                    duration: duration
                        .or(d)
                        .unwrap_or(Duration::from_secs(DEFAULT_TEST_DURATION_SECS)),
                    pre_allocated_workers: self
                        .pre_allocated_workers
                        .unwrap_or(DEFAULT_PRE_ALLOCATED_WORKERS),
                    overrun: overrun_policy(self.overrun, self.queue_wait_ms)
                        .unwrap_or(OverrunPolicy::Drop),
                }
            }
        };

        let executor = &mut config.executor;
        if let Some(base_url) = self.base_url {
            executor.base_url = base_url;
        }
        if let Some(liveness) = self.liveness {
            executor.liveness = liveness;
        }
        if let Some(delay) = seconds(self.inter_request_delay)? {
            executor.inter_request_delay = (!delay.is_zero()).then_some(delay);
        }
        if let Some(discard) = self.discard_response_bodies {
            executor.discard_response_bodies = discard;
        }
        if let Some(reuse) = self.reuse_connections {
            executor.reuse_connections = reuse;
        }
        if self.insecure {
            executor.accept_invalid_certs = true;
        }
        if !self.books.is_empty() {
            executor.books = self.books;
        }

        if let Some(dataset) = self.dataset {
            config.dataset = DatasetSource::parse(&dataset);
        }
        if let Some(grace) = self.grace_period {
            config.grace_period = Duration::from_secs(grace);
        }
        config.warmup_requests = self.warmup_requests;
        config.seed = self.seed;

        config.validate()?;
        Ok(config)
    }
}

fn overrun_policy(kind: Option<OverrunKind>, queue_wait_ms: u64) -> Option<OverrunPolicy> {
    kind.map(|k| match k {
        OverrunKind::Drop => OverrunPolicy::Drop,
        OverrunKind::Queue => OverrunPolicy::Queue {
            max_wait: Duration::from_millis(queue_wait_ms),
        },
    })
}

fn seconds(value: Option<f64>) -> LoadResult<Option<Duration>> {
    value
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .map_err(|e| LoadError::InvalidConfig(format!("bad duration {s}: {e}")))
        })
        .transpose()
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}
