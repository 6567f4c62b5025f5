//! Thread-safe metrics collection
//!
//! Atomic counters for polling, task processing, backend construction and
//! registration, plus a bounded window of processing times.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Processing time samples kept for percentile calculation
const MAX_TIME_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex-guarded sample window
pub struct MetricsCollector {
    // Polling
    polls: AtomicU64,
    poll_errors: AtomicU64,
    last_poll: AtomicU64,

    // Task processing
    tasks_received: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_unavailable: AtomicU64,
    report_failures: AtomicU64,
    summary_rounds: AtomicU64,
    processing_times: Mutex<Vec<u64>>, // in milliseconds

    // Backends
    backends_constructed: AtomicU64,
    construction_failures: AtomicU64,

    // Registration
    registrations: AtomicU64,
    registration_failures: AtomicU64,
    unregistrations: AtomicU64,
    enabled: AtomicBool,

    uptime_start: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            poll_errors: AtomicU64::new(0),
            last_poll: AtomicU64::new(0),
            tasks_received: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_unavailable: AtomicU64::new(0),
            report_failures: AtomicU64::new(0),
            summary_rounds: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            backends_constructed: AtomicU64::new(0),
            construction_failures: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            registration_failures: AtomicU64::new(0),
            unregistrations: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Polling
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.last_poll.store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Task processing
    pub fn task_received(&self) {
        self.tasks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn task_failed(&self, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn task_unavailable(&self) {
        self.tasks_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_failure(&self) {
        self.report_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_summary_rounds(&self, rounds: usize) {
        self.summary_rounds
            .fetch_add(rounds as u64, Ordering::Relaxed);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_TIME_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Backends
    pub fn record_backend_constructed(&self) {
        self.backends_constructed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_construction_failure(&self) {
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Registration
    pub fn record_registration(&self, success: bool) {
        if success {
            self.registrations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.registration_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unregistration(&self) {
        self.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Average and p50/p95/p99 of the sampled processing times
    fn processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
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
        let (avg_processing_time_ms, p50, p95, p99) = self.processing_time_statistics();

        MetricsSnapshot {
            polling: PollingMetrics {
                polls: self.polls.load(Ordering::Relaxed),
                poll_errors: self.poll_errors.load(Ordering::Relaxed),
                last_poll: self.last_poll.load(Ordering::Relaxed),
            },
            tasks: TaskMetrics {
                tasks_received: self.tasks_received.load(Ordering::Relaxed),
                tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
                tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
                tasks_unavailable: self.tasks_unavailable.load(Ordering::Relaxed),
                report_failures: self.report_failures.load(Ordering::Relaxed),
                summary_rounds: self.summary_rounds.load(Ordering::Relaxed),
                avg_processing_time_ms,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            backends: BackendMetrics {
                constructed: self.backends_constructed.load(Ordering::Relaxed),
                construction_failures: self.construction_failures.load(Ordering::Relaxed),
            },
            registration: RegistrationMetrics {
                enabled: self.enabled.load(Ordering::Relaxed),
                registrations: self.registrations.load(Ordering::Relaxed),
                registration_failures: self.registration_failures.load(Ordering::Relaxed),
                unregistrations: self.unregistrations.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.polls,
            &self.poll_errors,
            &self.last_poll,
            &self.tasks_received,
            &self.tasks_completed,
            &self.tasks_failed,
            &self.tasks_unavailable,
            &self.report_failures,
            &self.summary_rounds,
            &self.backends_constructed,
            &self.construction_failures,
            &self.registrations,
            &self.registration_failures,
            &self.unregistrations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.enabled.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.processing_times.lock() {
            times.clear();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub polling: PollingMetrics,
    pub tasks: TaskMetrics,
    pub backends: BackendMetrics,
    pub registration: RegistrationMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PollingMetrics {
    pub polls: u64,
    pub poll_errors: u64,
    pub last_poll: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskMetrics {
    pub tasks_received: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_unavailable: u64,
    pub report_failures: u64,
    pub summary_rounds: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct BackendMetrics {
    pub constructed: u64,
    pub construction_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct RegistrationMetrics {
    pub enabled: bool,
    pub registrations: u64,
    pub registration_failures: u64,
    pub unregistrations: u64,
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

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower] as f64
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] as f64 * (1.0 - weight) + sorted_data[upper] as f64 * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_counters() {
        let collector = MetricsCollector::new();
        collector.task_received();
        collector.task_received();
        collector.task_completed(Duration::from_millis(120));
        collector.task_failed(Duration::from_millis(80));
        collector.task_unavailable();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.tasks.tasks_received, 2);
        assert_eq!(snapshot.tasks.tasks_completed, 1);
        assert_eq!(snapshot.tasks.tasks_failed, 1);
        assert_eq!(snapshot.tasks.tasks_unavailable, 1);
        assert_eq!(snapshot.tasks.avg_processing_time_ms, 100.0);
    }

    #[test]
    fn test_registration_counters() {
        let collector = MetricsCollector::new();
        collector.record_registration(true);
        collector.record_registration(false);
        collector.record_unregistration();
        collector.set_enabled(true);

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.registration.registrations, 1);
        assert_eq!(snapshot.registration.registration_failures, 1);
        assert_eq!(snapshot.registration.unregistrations, 1);
        assert!(snapshot.registration.enabled);
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = MetricsCollector::new();
        collector.record_poll();
        collector.record_poll_error();
        collector.record_summary_rounds(3);
        collector.task_completed(Duration::from_millis(5));
        collector.reset();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.polling.polls, 0);
        assert_eq!(snapshot.polling.poll_errors, 0);
        assert_eq!(snapshot.tasks.summary_rounds, 0);
        assert_eq!(snapshot.tasks.avg_processing_time_ms, 0.0);
    }

    #[test]
    fn test_processing_time_window_is_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..(MAX_TIME_SAMPLES + 10) {
            collector.task_completed(Duration::from_millis(i as u64));
        }
        assert_eq!(
            collector.processing_times.lock().unwrap().len(),
            MAX_TIME_SAMPLES
        );
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.01);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().get_metrics()).unwrap();
        assert!(json["tasks"]["tasks_received"].is_u64());
        assert!(json["registration"]["enabled"].is_boolean());
    }
}
