//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! session initialization, dispatch, broadcasting and handoff statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_DURATION_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Session lifecycle
    sessions_initialized: AtomicU64,
    initialization_failures: AtomicU64,

    // Dispatch
    messages_dispatched: AtomicU64,
    messages_ignored: AtomicU64,
    mode_fallbacks: AtomicU64,
    busy_rejections: AtomicU64,

    // Broadcasting
    broadcasts_started: AtomicU64,
    broadcasts_completed: AtomicU64,
    broadcasts_failed: AtomicU64,
    broadcasts_abandoned: AtomicU64,
    chunks_emitted: AtomicU64,
    broadcast_times: Mutex<Vec<u64>>, // in milliseconds

    // Handoff
    handoffs_completed: AtomicU64,
    handoffs_failed: AtomicU64,
    transfers_executed: AtomicU64,

    // Connections
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            sessions_initialized: AtomicU64::new(0),
            initialization_failures: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            mode_fallbacks: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            broadcasts_started: AtomicU64::new(0),
            broadcasts_completed: AtomicU64::new(0),
            broadcasts_failed: AtomicU64::new(0),
            broadcasts_abandoned: AtomicU64::new(0),
            chunks_emitted: AtomicU64::new(0),
            broadcast_times: Mutex::new(Vec::new()),
            handoffs_completed: AtomicU64::new(0),
            handoffs_failed: AtomicU64::new(0),
            transfers_executed: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Session lifecycle metrics
    pub fn session_initialized(&self) {
        self.sessions_initialized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_initialization_failed(&self) {
        self.initialization_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Dispatch metrics
    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mode_fallback(&self) {
        self.mode_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn busy_rejected(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    // Broadcast metrics
    pub fn broadcast_started(&self) {
        self.broadcasts_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_emitted(&self) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_completed(&self, duration: Duration) {
        self.broadcasts_completed.fetch_add(1, Ordering::Relaxed);
        self.record_broadcast_time(duration);
    }

    pub fn broadcast_failed(&self, duration: Duration) {
        self.broadcasts_failed.fetch_add(1, Ordering::Relaxed);
        self.record_broadcast_time(duration);
    }

    pub fn broadcast_abandoned(&self) {
        self.broadcasts_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    fn record_broadcast_time(&self, duration: Duration) {
        if let Ok(mut times) = self.broadcast_times.lock() {
            times.push(duration.as_millis() as u64);

            if times.len() > MAX_DURATION_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Handoff metrics
    pub fn handoff_completed(&self) {
        self.handoffs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handoff_failed(&self) {
        self.handoffs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_executed(&self) {
        self.transfers_executed.fetch_add(1, Ordering::Relaxed);
    }

    // Connection metrics
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate broadcast time statistics (pure function)
    fn calculate_broadcast_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.broadcast_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
        )
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.sessions_initialized,
            &self.initialization_failures,
            &self.messages_dispatched,
            &self.messages_ignored,
            &self.mode_fallbacks,
            &self.busy_rejections,
            &self.broadcasts_started,
            &self.broadcasts_completed,
            &self.broadcasts_failed,
            &self.broadcasts_abandoned,
            &self.chunks_emitted,
            &self.handoffs_completed,
            &self.handoffs_failed,
            &self.transfers_executed,
            &self.connections_opened,
            &self.connections_closed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.broadcast_times.lock() {
            times.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_broadcast_time_ms, p50, p95) = self.calculate_broadcast_time_statistics();
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);

        MetricsSnapshot {
            sessions: SessionMetrics {
                sessions_initialized: self.sessions_initialized.load(Ordering::Relaxed),
                initialization_failures: self.initialization_failures.load(Ordering::Relaxed),
            },
            dispatch: DispatchMetrics {
                messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
                messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
                mode_fallbacks: self.mode_fallbacks.load(Ordering::Relaxed),
                busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            },
            broadcasts: BroadcastMetrics {
                started: self.broadcasts_started.load(Ordering::Relaxed),
                completed: self.broadcasts_completed.load(Ordering::Relaxed),
                failed: self.broadcasts_failed.load(Ordering::Relaxed),
                abandoned: self.broadcasts_abandoned.load(Ordering::Relaxed),
                chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
                avg_broadcast_time_ms,
                broadcast_time_p50_ms: p50,
                broadcast_time_p95_ms: p95,
            },
            handoffs: HandoffMetrics {
                completed: self.handoffs_completed.load(Ordering::Relaxed),
                failed: self.handoffs_failed.load(Ordering::Relaxed),
                transfers_executed: self.transfers_executed.load(Ordering::Relaxed),
            },
            connections: ConnectionMetrics {
                opened,
                closed,
                active: opened.saturating_sub(closed),
            },
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

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub sessions: SessionMetrics,
    pub dispatch: DispatchMetrics,
    pub broadcasts: BroadcastMetrics,
    pub handoffs: HandoffMetrics,
    pub connections: ConnectionMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub sessions_initialized: u64,
    pub initialization_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct DispatchMetrics {
    pub messages_dispatched: u64,
    pub messages_ignored: u64,
    pub mode_fallbacks: u64,
    pub busy_rejections: u64,
}

#[derive(Debug, Serialize)]
pub struct BroadcastMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub chunks_emitted: u64,
    pub avg_broadcast_time_ms: f64,
    pub broadcast_time_p50_ms: f64,
    pub broadcast_time_p95_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct HandoffMetrics {
    pub completed: u64,
    pub failed: u64,
    pub transfers_executed: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub opened: u64,
    pub closed: u64,
    pub active: u64,
}

// Helper functions
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

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
