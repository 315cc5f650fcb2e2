use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Level, event};

/// Samples kept per operation for percentile estimates.
const DEFAULT_SAMPLE_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct OperationRecord {
    calls: u64,
    errors: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    samples: VecDeque<Duration>,
    last_error: Option<String>,
}

/// Per-operation figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub name: String,
    pub calls: u64,
    pub errors: u64,
    pub total_duration: Duration,
    pub avg_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub p50_duration: Duration,
    pub p95_duration: Duration,
    pub last_error: Option<String>,
}

/// Aggregate over every tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub operations: usize,
    pub total_calls: u64,
    pub total_errors: u64,
    pub avg_duration: Duration,
    pub slowest_operation: Option<String>,
}

/// Wraps async operations and records call count, errors and durations
/// under a name.
pub struct PerformanceTracker {
    enabled: AtomicBool,
    sample_limit: usize,
    operations: Mutex<HashMap<String, OperationRecord>>,
}

impl PerformanceTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            operations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Awaits `operation`, recording its duration and whether it failed.
    pub async fn track<T, E, Fut>(&self, name: &str, operation: Fut) -> Result<T, E>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return operation.await;
        }

        let started = Instant::now();
        let result = operation.await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.record(name, elapsed, None),
            Err(err) => self.record(name, elapsed, Some(err.to_string())),
        }
        result
    }

    pub fn record(&self, name: &str, duration: Duration, error: Option<String>) {
        if !self.is_enabled() {
            return;
        }

        let mut operations = self.lock();
        let record = operations.entry(name.to_string()).or_default();
        record.calls += 1;
        record.total += duration;
        record.min = Some(record.min.map_or(duration, |m| m.min(duration)));
        record.max = record.max.max(duration);
        if record.samples.len() == self.sample_limit {
            record.samples.pop_front();
        }
        record.samples.push_back(duration);
        if let Some(error) = error {
            record.errors += 1;
            record.last_error = Some(error);
        }
    }

    pub fn operation_stats(&self, name: &str) -> Option<OperationStats> {
        self.lock().get(name).map(|record| to_stats(name, record))
    }

    /// Stats of every operation, sorted by name.
    pub fn all_stats(&self) -> Vec<OperationStats> {
        let operations = self.lock();
        let mut stats: Vec<OperationStats> = operations
            .iter()
            .map(|(name, record)| to_stats(name, record))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn summary(&self) -> PerformanceSummary {
        let stats = self.all_stats();
        let total_calls: u64 = stats.iter().map(|s| s.calls).sum();
        let total_errors: u64 = stats.iter().map(|s| s.errors).sum();
        let total_duration: Duration = stats.iter().map(|s| s.total_duration).sum();
        let slowest_operation = stats
            .iter()
            .max_by_key(|s| s.avg_duration)
            .map(|s| s.name.clone());

        PerformanceSummary {
            operations: stats.len(),
            total_calls,
            total_errors,
            avg_duration: if total_calls == 0 {
                Duration::ZERO
            } else {
                total_duration / total_calls as u32
            },
            slowest_operation,
        }
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn log_report(&self) {
        for stats in self.all_stats() {
            event!(
                Level::INFO,
                operation = %stats.name,
                calls = stats.calls,
                errors = stats.errors,
                avg_ms = stats.avg_duration.as_secs_f64() * 1000.0,
                p95_ms = stats.p95_duration.as_secs_f64() * 1000.0,
                max_ms = stats.max_duration.as_secs_f64() * 1000.0,
                "operation performance"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationRecord>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(true)
    }
}

fn to_stats(name: &str, record: &OperationRecord) -> OperationStats {
    let mut samples: Vec<Duration> = record.samples.iter().copied().collect();
    samples.sort();

    OperationStats {
        name: name.to_string(),
        calls: record.calls,
        errors: record.errors,
        total_duration: record.total,
        avg_duration: if record.calls == 0 {
            Duration::ZERO
        } else {
            record.total / record.calls as u32
        },
        min_duration: record.min.unwrap_or_default(),
        max_duration: record.max,
        p50_duration: percentile(&samples, 50.0),
        p95_duration: percentile(&samples, 95.0),
        last_error: record.last_error.clone(),
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}
