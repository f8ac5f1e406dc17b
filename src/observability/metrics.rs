//! Thread-safe metrics collection
//!
//! Atomic counters for high-frequency pipeline events and mutex-protected maps
//! for per-gate and per-tool timing statistics.

use crate::pipeline::gate::GateStatus;
use crate::pipeline::result::PipelineStatus;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    runs_started: AtomicU64,
    runs_in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_degraded: AtomicU64,
    runs_stopped: AtomicU64,
    runs_awaiting_ack: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,

    regenerations: AtomicU64,
    regenerations_exhausted: AtomicU64,
    contract_violations: AtomicU64,
    gate_panics: AtomicU64,

    run_times: Mutex<Vec<u64>>,
    gate_stats: Mutex<HashMap<String, TimedStats>>,
    tool_stats: Mutex<HashMap<String, TimedStats>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_degraded: AtomicU64::new(0),
            runs_stopped: AtomicU64::new(0),
            runs_awaiting_ack: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            regenerations: AtomicU64::new(0),
            regenerations_exhausted: AtomicU64::new(0),
            contract_violations: AtomicU64::new(0),
            gate_panics: AtomicU64::new(0),
            run_times: Mutex::new(Vec::new()),
            gate_stats: Mutex::new(HashMap::new()),
            tool_stats: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Pipeline runs
    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.runs_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn run_finished(&self, status: PipelineStatus, duration: Duration) {
        let counter = match status {
            PipelineStatus::Success => &self.runs_succeeded,
            PipelineStatus::Degraded => &self.runs_degraded,
            PipelineStatus::Stopped => &self.runs_stopped,
            PipelineStatus::AwaitAck => &self.runs_awaiting_ack,
            PipelineStatus::Error => &self.runs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Saturate so a stray finish without a start cannot wrap
        let _ = self
            .runs_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        if let Ok(mut times) = self.run_times.lock() {
            push_sample(&mut times, duration);
        }
    }

    pub fn run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A run whose future was dropped before it produced a result
    pub fn run_abandoned(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .runs_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    // Regeneration
    pub fn regeneration_requested(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn regeneration_exhausted(&self) {
        self.regenerations_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    // Gates
    pub fn gate_evaluated(&self, gate_id: &str, status: GateStatus, duration: Duration) {
        if let Ok(mut stats) = self.gate_stats.lock() {
            let entry = entry_for(&mut stats, gate_id);
            entry.record(duration, status != GateStatus::HardFail);
            if status == GateStatus::SoftFail {
                entry.soft_failures += 1;
            }
        }
    }

    pub fn gate_timed_out(&self, gate_id: &str) {
        if let Ok(mut stats) = self.gate_stats.lock() {
            entry_for(&mut stats, gate_id).timeouts += 1;
        }
    }

    pub fn gate_panicked(&self) {
        self.gate_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    // Tools
    pub fn tool_executed(&self, tool_name: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.tool_stats.lock() {
            entry_for(&mut stats, tool_name).record(duration, success);
        }
    }

    pub fn tool_timeout(&self, tool_name: &str) {
        if let Ok(mut stats) = self.tool_stats.lock() {
            entry_for(&mut stats, tool_name).timeouts += 1;
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_in_flight,
            &self.max_in_flight,
            &self.runs_succeeded,
            &self.runs_degraded,
            &self.runs_stopped,
            &self.runs_awaiting_ack,
            &self.runs_failed,
            &self.runs_cancelled,
            &self.regenerations,
            &self.regenerations_exhausted,
            &self.contract_violations,
            &self.gate_panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut times) = self.run_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.gate_stats.lock() {
            stats.clear();
        }
        if let Ok(mut stats) = self.tool_stats.lock() {
            stats.clear();
        }
    }

    fn run_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.run_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_run_time_ms, p50, p95, p99) = self.run_time_statistics();

        MetricsSnapshot {
            pipeline: PipelineMetrics {
                runs_started: self.runs_started.load(Ordering::Relaxed),
                runs_in_flight: self.runs_in_flight.load(Ordering::Relaxed),
                max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
                succeeded: self.runs_succeeded.load(Ordering::Relaxed),
                degraded: self.runs_degraded.load(Ordering::Relaxed),
                stopped: self.runs_stopped.load(Ordering::Relaxed),
                awaiting_ack: self.runs_awaiting_ack.load(Ordering::Relaxed),
                failed: self.runs_failed.load(Ordering::Relaxed),
                cancelled: self.runs_cancelled.load(Ordering::Relaxed),
                regenerations: self.regenerations.load(Ordering::Relaxed),
                regenerations_exhausted: self.regenerations_exhausted.load(Ordering::Relaxed),
                contract_violations: self.contract_violations.load(Ordering::Relaxed),
                gate_panics: self.gate_panics.load(Ordering::Relaxed),
                avg_run_time_ms,
                run_time_p50_ms: p50,
                run_time_p95_ms: p95,
                run_time_p99_ms: p99,
            },
            gates: summarize(&self.gate_stats),
            tools: summarize(&self.tool_stats),
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal per-gate / per-tool statistics with raw timing samples
#[derive(Debug)]
struct TimedStats {
    name: String,
    invocations: u64,
    failures: u64,
    soft_failures: u64,
    timeouts: u64,
    durations: Vec<u64>,
    last_invocation: u64,
}

impl TimedStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            invocations: 0,
            failures: 0,
            soft_failures: 0,
            timeouts: 0,
            durations: Vec::new(),
            last_invocation: 0,
        }
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        self.last_invocation = current_timestamp();
        push_sample(&mut self.durations, duration);
        if !success {
            self.failures += 1;
        }
    }

    fn snapshot(&self) -> TimedStatsSnapshot {
        let avg_time_ms = if self.durations.is_empty() {
            0.0
        } else {
            self.durations.iter().sum::<u64>() as f64 / self.durations.len() as f64
        };
        let success_rate = if self.invocations == 0 {
            0.0
        } else {
            (self.invocations - self.failures) as f64 / self.invocations as f64
        };

        TimedStatsSnapshot {
            name: self.name.clone(),
            invocations: self.invocations,
            failures: self.failures,
            soft_failures: self.soft_failures,
            timeouts: self.timeouts,
            avg_time_ms,
            last_invocation: self.last_invocation,
            success_rate,
        }
    }
}

fn entry_for<'a>(stats: &'a mut HashMap<String, TimedStats>, name: &str) -> &'a mut TimedStats {
    stats
        .entry(name.to_string())
        .or_insert_with(|| TimedStats::new(name))
}

fn summarize(stats: &Mutex<HashMap<String, TimedStats>>) -> StatsSummary {
    let Ok(stats) = stats.lock() else {
        return StatsSummary::default();
    };

    let mut summary = StatsSummary::default();
    let mut total_time = 0u64;
    let mut samples = 0u64;
    for (name, entry) in stats.iter() {
        summary.by_name.insert(name.clone(), entry.snapshot());
        summary.total_invocations += entry.invocations;
        summary.total_failures += entry.failures;
        summary.total_timeouts += entry.timeouts;
        total_time += entry.durations.iter().sum::<u64>();
        samples += entry.durations.len() as u64;
    }
    if samples > 0 {
        summary.avg_time_ms = total_time as f64 / samples as f64;
    }
    summary
}

fn push_sample(samples: &mut Vec<u64>, duration: Duration) {
    samples.push(duration.as_millis() as u64);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub pipeline: PipelineMetrics,
    pub gates: StatsSummary,
    pub tools: StatsSummary,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetrics {
    pub runs_started: u64,
    pub runs_in_flight: u64,
    pub max_in_flight: u64,
    pub succeeded: u64,
    pub degraded: u64,
    pub stopped: u64,
    pub awaiting_ack: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub regenerations: u64,
    pub regenerations_exhausted: u64,
    pub contract_violations: u64,
    pub gate_panics: u64,
    pub avg_run_time_ms: f64,
    pub run_time_p50_ms: f64,
    pub run_time_p95_ms: f64,
    pub run_time_p99_ms: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct StatsSummary {
    pub by_name: HashMap<String, TimedStatsSnapshot>,
    pub total_invocations: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub avg_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct TimedStatsSnapshot {
    pub name: String,
    pub invocations: u64,
    pub failures: u64,
    pub soft_failures: u64,
    pub timeouts: u64,
    pub avg_time_ms: f64,
    pub last_invocation: u64,
    pub success_rate: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
