//! Iteration scheduling: closed loop and constant arrival rate
//!
//! Both models run iterations as tokio tasks in a `JoinSet`. When the test
//! duration elapses (or shutdown is signalled) no new iteration starts;
//! in-flight ones get the grace period, then are aborted and counted.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, timeout, Instant};

use crate::config::{OverrunPolicy, ScenarioConfig};
use crate::picker::WordPicker;

/// One unit of load. Implementations must not hold state between calls
/// beyond what `&self` shares read-only.
pub trait Workload: Send + Sync + 'static {
    fn run_iteration(
        &self,
        picker: &mut WordPicker,
    ) -> impl Future<Output = IterationOutcome> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub word_index: usize,
    pub failed_requests: usize,
}

/// What the scheduler did during a run
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub started_at: DateTime<Utc>,
    pub started: usize,
    pub completed: usize,
    /// Completed iterations with at least one failed request
    pub failed: usize,
    pub dropped: usize,
    pub delayed: usize,
    pub cancelled: usize,
    pub panicked: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
    delayed: AtomicUsize,
}

impl Counters {
    fn finish(&self, outcome: &IterationOutcome) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if outcome.failed_requests > 0 {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Default)]
struct JoinTally {
    cancelled: usize,
    panicked: usize,
}

impl JoinTally {
    fn observe(&mut self, result: Result<(), JoinError>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => self.cancelled += 1,
            Err(e) => {
                self.panicked += 1;
                tracing::error!(error = %e, "Iteration task panicked");
            }
        }
    }
}

pub struct Scheduler {
    scenario: ScenarioConfig,
    grace_period: Duration,
    seed: u64,
}

impl Scheduler {
    pub fn new(scenario: ScenarioConfig, grace_period: Duration, seed: Option<u64>) -> Self {
        Self {
            scenario,
            grace_period,
            seed: seed.unwrap_or_else(rand::random),
        }
    }

    /// Drive `workload` until the scenario ends or `shutdown` turns true
    pub async fn run<W: Workload>(
        &self,
        workload: Arc<W>,
        shutdown: watch::Receiver<bool>,
    ) -> ScheduleReport {
        match self.scenario {
            ScenarioConfig::Closed {
                workers,
                loop_delay,
                duration,
            } => {
                self.run_closed(workload, workers, loop_delay, duration, shutdown)
                    .await
            }
            ScenarioConfig::Open {
                rate_per_second,
                duration,
                pre_allocated_workers,
                overrun,
            } => {
                self.run_open(
                    workload,
                    rate_per_second,
                    duration,
                    pre_allocated_workers,
                    overrun,
                    shutdown,
                )
                .await
            }
        }
    }

    async fn run_closed<W: Workload>(
        &self,
        workload: Arc<W>,
        workers: usize,
        loop_delay: Duration,
        duration: Option<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ScheduleReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = duration.and_then(|d| run_end(start, d));
        let counters = Arc::new(Counters::default());
        let mut tasks = JoinSet::new();

        tracing::info!(
            workers,
            loop_delay_ms = loop_delay.as_millis() as u64,
            duration_secs = duration.map(|d| d.as_secs_f64()),
            "Starting closed model"
        );

        for unit in 0..workers {
            let workload = Arc::clone(&workload);
            let counters = Arc::clone(&counters);
            let mut shutdown = shutdown.clone();
            let mut picker = WordPicker::for_unit(self.seed, unit as u64);

            tasks.spawn(async move {
                while !stop_requested(deadline, &shutdown) {
                    counters.started.fetch_add(1, Ordering::Relaxed);
                    let outcome = workload.run_iteration(&mut picker).await;
                    counters.finish(&outcome);
                    if !think(loop_delay, deadline, &mut shutdown).await {
                        break;
                    }
                }
            });
        }

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        tracing::info!("Shutdown requested, stopping workers");
                    }
                }
            }
            None => wait_for_shutdown(&mut shutdown).await,
        }

        let tally = drain(&mut tasks, self.grace_period).await;
        finish_report(started_at, start, &counters, tally)
    }

    async fn run_open<W: Workload>(
        &self,
        workload: Arc<W>,
        rate_per_second: f64,
        duration: Duration,
        slots: usize,
        overrun: OverrunPolicy,
        mut shutdown: watch::Receiver<bool>,
    ) -> ScheduleReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let end = run_end(start, duration);
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(slots));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut tally = JoinTally::default();
        let mut overrun_warned = false;

        tracing::info!(
            rate_per_second,
            duration_secs = duration.as_secs_f64(),
            slots,
            ?overrun,
            "Starting open model"
        );

        let mut arrival: u64 = 0;
        loop {
            // absolute due instants keep the rate from drifting
            let Some(due) = arrival_due(start, arrival, rate_per_second) else {
                break;
            };
            if end.is_some_and(|end| due >= end) {
                break;
            }
            tokio::select! {
                _ = sleep_until(due) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!(arrivals = arrival, "Shutdown requested, stopping arrivals");
                    break;
                }
            }

            while let Some(result) = tasks.try_join_next() {
                tally.observe(result);
            }

            let picker = WordPicker::for_unit(self.seed, arrival);
            arrival += 1;

            match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => {
                    counters.started.fetch_add(1, Ordering::Relaxed);
                    let workload = Arc::clone(&workload);
                    let counters = Arc::clone(&counters);
                    tasks.spawn(async move {
                        let mut picker = picker;
                        let outcome = workload.run_iteration(&mut picker).await;
                        counters.finish(&outcome);
                        drop(permit);
                    });
                }
                Err(_) => {
                    if !overrun_warned {
                        tracing::warn!(
                            slots,
                            arrival,
                            "All slots busy; arrivals are overrunning"
                        );
                        overrun_warned = true;
                    }
                    match overrun {
                        OverrunPolicy::Drop => {
                            counters.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        OverrunPolicy::Queue { max_wait } => {
                            let semaphore = Arc::clone(&semaphore);
                            let workload = Arc::clone(&workload);
                            let counters = Arc::clone(&counters);
                            tasks.spawn(async move {
                                match timeout(max_wait, semaphore.acquire_owned()).await {
                                    Ok(Ok(permit)) => {
                                        counters.started.fetch_add(1, Ordering::Relaxed);
                                        counters.delayed.fetch_add(1, Ordering::Relaxed);
                                        let mut picker = picker;
                                        let outcome = workload.run_iteration(&mut picker).await;
                                        counters.finish(&outcome);
                                        drop(permit);
                                    }
                                    _ => {
                                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            });
                        }
                    }
                }
            }
        }

        let drained = drain(&mut tasks, self.grace_period).await;
        tally.cancelled += drained.cancelled;
        tally.panicked += drained.panicked;
        finish_report(started_at, start, &counters, tally)
    }
}

/// End of the run, or `None` when `duration` runs past the clock's range
fn run_end(start: Instant, duration: Duration) -> Option<Instant> {
    let end = start.checked_add(duration);
    if end.is_none() {
        tracing::warn!(
            duration_secs = duration.as_secs(),
            "Duration exceeds the clock range; running until shutdown"
        );
    }
    end
}

/// Due instant of arrival `n` at `start + n / rate`; `None` once it is unrepresentable
fn arrival_due(start: Instant, n: u64, rate_per_second: f64) -> Option<Instant> {
    let offset = Duration::try_from_secs_f64(n as f64 / rate_per_second).ok()?;
    start.checked_add(offset)
}

fn stop_requested(deadline: Option<Instant>, shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || deadline.is_some_and(|d| Instant::now() >= d)
}

/// Closed-model think time. Returns false once the run is over.
async fn think(
    delay: Duration,
    deadline: Option<Instant>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !stop_requested(deadline, shutdown);
    }
    let wake = match Instant::now().checked_add(delay) {
        Some(wake) => Some(deadline.map_or(wake, |d| wake.min(d))),
        None => deadline,
    };
    match wake {
        Some(wake) => tokio::select! {
            _ = sleep_until(wake) => !stop_requested(deadline, shutdown),
            _ = wait_for_shutdown(shutdown) => false,
        },
        None => {
            wait_for_shutdown(shutdown).await;
            false
        }
    }
}

/// Resolves once shutdown is true; never resolves if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Let in-flight tasks finish within `grace`, then abort the rest
async fn drain(tasks: &mut JoinSet<()>, grace: Duration) -> JoinTally {
    let mut tally = JoinTally::default();
    if !tasks.is_empty() {
        tracing::info!(
            in_flight = tasks.len(),
            grace_ms = grace.as_millis() as u64,
            "Waiting for in-flight iterations"
        );
    }
    let finished = timeout(grace, async {
        while let Some(result) = tasks.join_next().await {
            tally.observe(result);
        }
    })
    .await;

    if finished.is_err() {
        tracing::warn!(
            remaining = tasks.len(),
            "Grace period expired, cancelling iterations"
        );
        tasks.abort_all();
        while let Some(result) = tasks.join_next().await {
            tally.observe(result);
        }
    }
    tally
}

fn finish_report(
    started_at: DateTime<Utc>,
    start: Instant,
    counters: &Counters,
    tally: JoinTally,
) -> ScheduleReport {
    let report = ScheduleReport {
        started_at,
        started: counters.started.load(Ordering::Relaxed),
        completed: counters.completed.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
        delayed: counters.delayed.load(Ordering::Relaxed),
        cancelled: tally.cancelled,
        panicked: tally.panicked,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        started = report.started,
        completed = report.completed,
        failed = report.failed,
        dropped = report.dropped,
        delayed = report.delayed,
        cancelled = report.cancelled,
        elapsed_secs = report.elapsed.as_secs_f64(),
        "Scheduler finished"
    );
    if report.dropped > 0 {
        tracing::warn!(dropped = report.dropped, "Arrivals were dropped for lack of slots");
    }
    report
}
