//! Request outcome recording and the end-of-run summary
//!
//! Every request an iteration issues becomes one [`RequestRecord`]. The
//! [`RunRecorder`] keeps counts, a status histogram and millisecond latencies
//! per request kind; nothing else is retained (in particular no bodies).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::config::ScenarioConfig;
use crate::scheduler::ScheduleReport;

/// Which of the two endpoints a request hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// `GET {base_url}`
    Liveness,
    /// `GET {base_url}/search?q=...`
    Search,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Liveness => "liveness",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub kind: RequestKind,
    /// `None` when no response arrived (connect error, timeout)
    pub status: Option<u16>,
    pub success: bool,
    pub latency: Duration,
    /// Bytes read from the body; `None` when bodies are discarded or unread
    pub body_len: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct KindStats {
    success: usize,
    failed: usize,
    transport_errors: usize,
    statuses: BTreeMap<u16, usize>,
    body_bytes: u64,
    /// Milliseconds, successful and failed responses alike
    latencies: Vec<f64>,
}

/// Thread-safe sink for request records
#[derive(Debug, Default)]
pub struct RunRecorder {
    stats: Mutex<HashMap<RequestKind, KindStats>>,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: &RequestRecord) {
        tracing::debug!(
            kind = %record.kind,
            status = record.status,
            success = record.success,
            latency_ms = record.latency.as_secs_f64() * 1000.0,
            error = record.error.as_deref(),
            "request finished"
        );
        if let Ok(mut map) = self.stats.lock() {
            let stats = map.entry(record.kind).or_default();
            if record.success {
                stats.success += 1;
            } else {
                stats.failed += 1;
            }
            match record.status {
                Some(code) => *stats.statuses.entry(code).or_default() += 1,
                None => stats.transport_errors += 1,
            }
            stats.body_bytes += record.body_len.unwrap_or(0);
            stats.latencies.push(record.latency.as_secs_f64() * 1000.0);
        }
    }

    /// Total requests recorded for a kind
    pub fn count(&self, kind: RequestKind) -> usize {
        self.with_stats(kind, |s| s.success + s.failed)
    }

    /// Failed requests recorded for a kind
    pub fn failures(&self, kind: RequestKind) -> usize {
        self.with_stats(kind, |s| s.failed)
    }

    /// Response body bytes read for a kind; stays 0 when bodies are discarded
    pub fn body_bytes(&self, kind: RequestKind) -> u64 {
        if let Ok(map) = self.stats.lock() {
            map.get(&kind).map(|s| s.body_bytes).unwrap_or(0)
        } else {
            0
        }
    }

    /// Requests across all kinds
    pub fn total(&self) -> usize {
        self.stats
            .lock()
            .map(|map| map.values().map(|s| s.success + s.failed).sum())
            .unwrap_or(0)
    }

    /// p50, p95, p99 latency in milliseconds
    pub fn percentiles(&self, kind: RequestKind) -> (f64, f64, f64) {
        if let Ok(map) = self.stats.lock() {
            if let Some(stats) = map.get(&kind) {
                let mut sorted = stats.latencies.clone();
                return compute_percentiles(&mut sorted);
            }
        }
        (0.0, 0.0, 0.0)
    }

    fn with_stats(&self, kind: RequestKind, f: impl Fn(&KindStats) -> usize) -> usize {
        if let Ok(map) = self.stats.lock() {
            map.get(&kind).map(f).unwrap_or(0)
        } else {
            0
        }
    }

    /// Fold recorded requests and the scheduler report into a summary
    pub fn summary(&self, scenario: &ScenarioConfig, report: &ScheduleReport) -> RunSummary {
        let mut requests = BTreeMap::new();
        if let Ok(map) = self.stats.lock() {
            for (kind, stats) in map.iter() {
                let mut sorted = stats.latencies.clone();
                let (p50, p95, p99) = compute_percentiles(&mut sorted);
                requests.insert(
                    *kind,
                    RequestSummary {
                        total: stats.success + stats.failed,
                        success: stats.success,
                        failed: stats.failed,
                        transport_errors: stats.transport_errors,
                        statuses: stats.statuses.clone(),
                        body_bytes: stats.body_bytes,
                        p50,
                        p95,
                        p99,
                    },
                );
            }
        }

        let duration_secs = report.elapsed.as_secs_f64();
        let searches = requests
            .get(&RequestKind::Search)
            .map(|s| s.total)
            .unwrap_or(0);
        let throughput = if duration_secs > 0.0 {
            searches as f64 / duration_secs
        } else {
            0.0
        };

        RunSummary {
            test: "search-load".to_string(),
            scenario: scenario.clone(),
            started_at: report.started_at.to_rfc3339(),
            duration_secs,
            throughput,
            iterations: IterationSummary {
                started: report.started,
                completed: report.completed,
                failed: report.failed,
                dropped: report.dropped,
                delayed: report.delayed,
                cancelled: report.cancelled,
                panicked: report.panicked,
            },
            requests,
        }
    }
}

/// Sort latencies and compute p50, p95, p99
pub fn compute_percentiles(latencies: &mut [f64]) -> (f64, f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let len = latencies.len();
    let p50 = latencies[((len as f64 * 0.50) as usize).min(len - 1)];
    let p95 = latencies[((len as f64 * 0.95) as usize).min(len - 1)];
    let p99 = latencies[((len as f64 * 0.99) as usize).min(len - 1)];
    (p50, p95, p99)
}

// ============================================================================
// Run Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct IterationSummary {
    pub started: usize,
    pub completed: usize,
    /// Completed iterations with at least one failed request
    pub failed: usize,
    /// Open-model arrivals that never got a slot
    pub dropped: usize,
    /// Open-model arrivals that started late after queueing
    pub delayed: usize,
    /// In-flight iterations aborted when the grace period ran out
    pub cancelled: usize,
    pub panicked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    #[serde(rename = "transportErrors")]
    pub transport_errors: usize,
    pub statuses: BTreeMap<u16, usize>,
    #[serde(rename = "bodyBytes")]
    pub body_bytes: u64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// JSON result emitted at the end of every run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub test: String,
    pub scenario: ScenarioConfig,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "durationSecs")]
    pub duration_secs: f64,
    /// Search requests per second
    pub throughput: f64,
    pub iterations: IterationSummary,
    pub requests: BTreeMap<RequestKind, RequestSummary>,
}

impl RunSummary {
    /// One-line human summary for the log
    pub fn headline(&self) -> String {
        let search = self.requests.get(&RequestKind::Search);
        let (p50, p99) = search.map(|s| (s.p50, s.p99)).unwrap_or((0.0, 0.0));
        let failed: usize = self.requests.values().map(|s| s.failed).sum();
        format!(
            "{:.0} req/s, p50={:.2}ms p99={:.2}ms, {} iterations, {} failed requests, {} dropped",
            self.throughput, p50, p99, self.iterations.completed, failed, self.iterations.dropped
        )
    }

    /// Write JSON result to SEARCH_LOAD_RESULT_FILE (if set) and stdout
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => {
                if let Ok(path) = std::env::var("SEARCH_LOAD_RESULT_FILE") {
                    if let Err(e) = std::fs::write(&path, &json) {
                        tracing::warn!(%path, error = %e, "Failed to write result file");
                    }
                }
                println!("{json}");
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize run summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RequestKind, status: Option<u16>, ms: u64) -> RequestRecord {
        RequestRecord {
            kind,
            status,
            success: status.is_some_and(|s| (200..300).contains(&s)),
            latency: Duration::from_millis(ms),
            body_len: None,
            error: status.is_none().then(|| "connect refused".to_string()),
        }
    }

    #[test]
    fn counts_split_by_kind_and_outcome() {
        let recorder = RunRecorder::new();
        recorder.record(&record(RequestKind::Search, Some(200), 5));
        recorder.record(&record(RequestKind::Search, Some(503), 7));
        recorder.record(&record(RequestKind::Search, None, 9));
        recorder.record(&record(RequestKind::Liveness, Some(200), 1));

        assert_eq!(recorder.count(RequestKind::Search), 3);
        assert_eq!(recorder.failures(RequestKind::Search), 2);
        assert_eq!(recorder.count(RequestKind::Liveness), 1);
        assert_eq!(recorder.failures(RequestKind::Liveness), 0);
        assert_eq!(recorder.total(), 4);
    }

    #[test]
    fn percentiles_of_known_series() {
        let mut latencies: Vec<f64> = (1..=100).map(f64::from).collect();
        latencies.reverse();
        let (p50, p95, p99) = compute_percentiles(&mut latencies);
        assert_eq!(p50, 51.0);
        assert_eq!(p95, 96.0);
        assert_eq!(p99, 100.0);
        assert_eq!(compute_percentiles(&mut []), (0.0, 0.0, 0.0));
    }

    #[test]
    fn summary_carries_status_histogram_and_overruns() {
        let recorder = RunRecorder::new();
        recorder.record(&record(RequestKind::Search, Some(200), 4));
        recorder.record(&record(RequestKind::Search, Some(200), 6));
        recorder.record(&record(RequestKind::Search, Some(500), 8));
        recorder.record(&record(RequestKind::Search, None, 10));

        let report = ScheduleReport {
            started: 4,
            completed: 4,
            dropped: 3,
            elapsed: Duration::from_secs(2),
            ..ScheduleReport::default()
        };
        let scenario = ScenarioConfig::Open {
            rate_per_second: 2.0,
            duration: Duration::from_secs(2),
            pre_allocated_workers: 1,
            overrun: crate::OverrunPolicy::Drop,
        };
        let summary = recorder.summary(&scenario, &report);

        let search = &summary.requests[&RequestKind::Search];
        assert_eq!(search.total, 4);
        assert_eq!(search.failed, 2);
        assert_eq!(search.transport_errors, 1);
        assert_eq!(search.statuses.get(&200), Some(&2));
        assert_eq!(search.statuses.get(&500), Some(&1));
        assert_eq!(summary.iterations.dropped, 3);
        assert_eq!(summary.throughput, 2.0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["iterations"]["dropped"], 3);
        assert_eq!(json["scenario"]["model"], "open");
        assert_eq!(json["requests"]["search"]["statuses"]["500"], 1);
    }
}
