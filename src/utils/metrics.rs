use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline metrics collector.
///
/// Tracks outbound calls, retries, per-phase outcomes and gate decisions.
/// Cheap to clone and safe to share across concurrent item operations.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct PhaseCounters {
    runs: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    deferred: AtomicUsize,
    durations_ms: RwLock<Vec<u64>>,
}

struct MetricsInner {
    // Remote calls
    remote_calls_total: AtomicUsize,
    remote_calls_success: AtomicUsize,
    remote_calls_failed: AtomicUsize,
    remote_retries: AtomicUsize,
    remote_latency_ms: RwLock<Vec<u64>>,
    circuit_breaker_trips: AtomicUsize,

    // Per-phase outcomes keyed by phase name
    phases: DashMap<String, PhaseCounters>,

    // Chains and gate
    chains_run: AtomicUsize,
    chains_halted: AtomicUsize,
    selections_chosen: AtomicUsize,
    selections_skipped: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                remote_calls_total: AtomicUsize::new(0),
                remote_calls_success: AtomicUsize::new(0),
                remote_calls_failed: AtomicUsize::new(0),
                remote_retries: AtomicUsize::new(0),
                remote_latency_ms: RwLock::new(Vec::new()),
                circuit_breaker_trips: AtomicUsize::new(0),
                phases: DashMap::new(),
                chains_run: AtomicUsize::new(0),
                chains_halted: AtomicUsize::new(0),
                selections_chosen: AtomicUsize::new(0),
                selections_skipped: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_remote_call(&self, success: bool, duration: Duration) {
        self.inner.remote_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.remote_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.remote_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .remote_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_retry(&self) {
        self.inner.remote_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_phase(&self, phase: &str, succeeded: usize, failed: usize, deferred: usize, duration: Duration) {
        let counters = self.inner.phases.entry(phase.to_string()).or_default();
        counters.runs.fetch_add(1, Ordering::Relaxed);
        counters.succeeded.fetch_add(succeeded, Ordering::Relaxed);
        counters.failed.fetch_add(failed, Ordering::Relaxed);
        counters.deferred.fetch_add(deferred, Ordering::Relaxed);
        counters.durations_ms.write().push(duration.as_millis() as u64);
    }

    pub fn record_chain(&self, halted: bool) {
        self.inner.chains_run.fetch_add(1, Ordering::Relaxed);
        if halted {
            self.inner.chains_halted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_selection(&self, skipped: bool) {
        if skipped {
            self.inner.selections_skipped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.selections_chosen.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.remote_latency_ms.read();
        let remote_latency_avg_ms = avg(&latency);
        let remote_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let phases = self
            .inner
            .phases
            .iter()
            .map(|entry| {
                let c = entry.value();
                let durations = c.durations_ms.read();
                (
                    entry.key().clone(),
                    PhaseSnapshot {
                        runs: c.runs.load(Ordering::Relaxed),
                        succeeded: c.succeeded.load(Ordering::Relaxed),
                        failed: c.failed.load(Ordering::Relaxed),
                        deferred: c.deferred.load(Ordering::Relaxed),
                        avg_duration_ms: avg(&durations),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            remote_calls_total: self.inner.remote_calls_total.load(Ordering::Relaxed),
            remote_calls_success: self.inner.remote_calls_success.load(Ordering::Relaxed),
            remote_calls_failed: self.inner.remote_calls_failed.load(Ordering::Relaxed),
            remote_retries: self.inner.remote_retries.load(Ordering::Relaxed),
            remote_latency_avg_ms,
            remote_latency_p95_ms,
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            phases,
            chains_run: self.inner.chains_run.load(Ordering::Relaxed),
            chains_halted: self.inner.chains_halted.load(Ordering::Relaxed),
            selections_chosen: self.inner.selections_chosen.load(Ordering::Relaxed),
            selections_skipped: self.inner.selections_skipped.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            r#"# HELP remote_calls_total Outbound calls made to external services
# TYPE remote_calls_total counter
remote_calls_total {}

# HELP remote_calls_failed Outbound calls that failed
# TYPE remote_calls_failed counter
remote_calls_failed {}

# HELP remote_retries_total Retry attempts after a retryable failure
# TYPE remote_retries_total counter
remote_retries_total {}

# HELP remote_latency_avg_ms Average outbound call latency
# TYPE remote_latency_avg_ms gauge
remote_latency_avg_ms {}

# HELP circuit_breaker_trips_total Times a breaker opened
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {}

# HELP chains_run_total Full chain runs
# TYPE chains_run_total counter
chains_run_total {}

# HELP chains_halted_total Chain runs halted by a failed phase
# TYPE chains_halted_total counter
chains_halted_total {}

# HELP selections_total Operator selections by outcome
# TYPE selections_total counter
selections_total{{outcome="chosen"}} {}
selections_total{{outcome="skipped"}} {}

# HELP phase_items_total Items settled per phase and outcome
# TYPE phase_items_total counter
"#,
            s.remote_calls_total,
            s.remote_calls_failed,
            s.remote_retries,
            s.remote_latency_avg_ms,
            s.circuit_breaker_trips,
            s.chains_run,
            s.chains_halted,
            s.selections_chosen,
            s.selections_skipped,
        );
        for (phase, p) in &s.phases {
            let _ = writeln!(out, "phase_items_total{{phase=\"{}\",outcome=\"succeeded\"}} {}", phase, p.succeeded);
            let _ = writeln!(out, "phase_items_total{{phase=\"{}\",outcome=\"failed\"}} {}", phase, p.failed);
            let _ = writeln!(out, "phase_items_total{{phase=\"{}\",outcome=\"deferred\"}} {}", phase, p.deferred);
        }
        let _ = write!(
            out,
            "\n# HELP uptime_seconds Application uptime in seconds\n# TYPE uptime_seconds counter\nuptime_seconds {}\n",
            s.uptime_seconds
        );
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deferred: usize,
    pub avg_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub remote_calls_total: usize,
    pub remote_calls_success: usize,
    pub remote_calls_failed: usize,
    pub remote_retries: usize,
    pub remote_latency_avg_ms: u64,
    pub remote_latency_p95_ms: u64,
    pub circuit_breaker_trips: usize,
    pub phases: BTreeMap<String, PhaseSnapshot>,
    pub chains_run: usize,
    pub chains_halted: usize,
    pub selections_chosen: usize,
    pub selections_skipped: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
