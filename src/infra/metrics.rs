//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention. All
//! counter updates are lock-free; reporting swaps the interval counters.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for the companion event pipeline.
#[derive(Debug)]
pub struct Metrics {
    /// Ranging cycles processed (interval)
    ranging_cycles: AtomicU64,
    /// Cycles with no mappable beacon (interval)
    empty_cycles: AtomicU64,
    /// Events ingested by the aggregator (interval)
    events_ingested: AtomicU64,
    /// Events dropped because the channel was full (total)
    events_dropped: AtomicU64,
    /// View notifications dropped because the channel was full (total)
    view_dropped: AtomicU64,
    /// Engine commands published (total)
    engine_commands: AtomicU64,
    /// Engine connection losses observed (total)
    engine_disconnects: AtomicU64,
    /// Report interval start
    interval_start: std::sync::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ranging_cycles: AtomicU64::new(0),
            empty_cycles: AtomicU64::new(0),
            events_ingested: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            view_dropped: AtomicU64::new(0),
            engine_commands: AtomicU64::new(0),
            engine_disconnects: AtomicU64::new(0),
            interval_start: std::sync::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_ranging_cycle(&self) {
        self.ranging_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_empty_cycle(&self) {
        self.empty_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_view_dropped(&self) {
        self.view_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_engine_command(&self) {
        self.engine_commands.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_engine_disconnect(&self) {
        self.engine_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset the interval counters.
    pub fn report(&self) -> MetricsSummary {
        let elapsed = {
            let mut start = self.interval_start.lock().unwrap_or_else(|e| e.into_inner());
            let elapsed = start.elapsed();
            *start = Instant::now();
            elapsed
        };
        let cycles = self.ranging_cycles.swap(0, Ordering::Relaxed);

        MetricsSummary {
            ranging_cycles: cycles,
            cycles_per_sec: if elapsed.as_secs_f64() > 0.0 {
                cycles as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
            empty_cycles: self.empty_cycles.swap(0, Ordering::Relaxed),
            events_ingested: self.events_ingested.swap(0, Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            view_dropped: self.view_dropped.load(Ordering::Relaxed),
            engine_commands: self.engine_commands.load(Ordering::Relaxed),
            engine_disconnects: self.engine_disconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot for logging.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSummary {
    pub ranging_cycles: u64,
    pub cycles_per_sec: f64,
    pub empty_cycles: u64,
    pub events_ingested: u64,
    pub events_dropped: u64,
    pub view_dropped: u64,
    pub engine_commands: u64,
    pub engine_disconnects: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ranging_cycles = %self.ranging_cycles,
            cycles_per_sec = %format!("{:.1}", self.cycles_per_sec),
            empty_cycles = %self.empty_cycles,
            events = %self.events_ingested,
            events_dropped = %self.events_dropped,
            view_dropped = %self.view_dropped,
            engine_cmds = %self.engine_commands,
            engine_disconnects = %self.engine_disconnects,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_counters_reset_on_report() {
        let metrics = Metrics::new();
        metrics.record_ranging_cycle();
        metrics.record_ranging_cycle();
        metrics.record_empty_cycle();
        metrics.record_event_ingested();

        let summary = metrics.report();
        assert_eq!(summary.ranging_cycles, 2);
        assert_eq!(summary.empty_cycles, 1);
        assert_eq!(summary.events_ingested, 1);

        let summary = metrics.report();
        assert_eq!(summary.ranging_cycles, 0);
        assert_eq!(summary.empty_cycles, 0);
    }

    #[test]
    fn test_totals_survive_report() {
        let metrics = Metrics::new();
        metrics.record_event_dropped();
        metrics.record_engine_command();
        metrics.record_engine_disconnect();

        let _ = metrics.report();
        let summary = metrics.report();
        assert_eq!(summary.events_dropped, 1);
        assert_eq!(summary.engine_commands, 1);
        assert_eq!(summary.engine_disconnects, 1);
    }
}
