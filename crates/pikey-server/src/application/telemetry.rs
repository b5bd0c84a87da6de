//! Request counters, latency averages and a bounded latency history.
//!
//! # Latency phases
//!
//! ```text
//! submitted ──queue──▶ started ──process──▶ driver done ──────▶ completed
//!    │                                                              │
//!    └──────────────────────────── total ───────────────────────────┘
//! ```
//!
//! `network` is whatever part of `total` is neither queue nor process time
//! (bookkeeping, task scheduling, response hand-off).  It is computed as
//! `total - queue - process` and floors at zero.
//!
//! Averages cover the records in the history window only, so they always
//! equal the mean of `latency_history` as returned in the same snapshot.
//!
//! # Concurrency
//!
//! Counters, averages and history live behind one `RwLock` so that a
//! snapshot is always internally consistent (totals add up, averages match
//! the counts).  The "currently processing" gauge is a separate atomic that
//! in-flight actions adjust through [`ProcessingGuard`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Number of latency records kept.
pub const HISTORY_CAPACITY: usize = 50;

/// Latency of one completed action, split by phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseLatency {
    pub queue: Duration,
    pub process: Duration,
    pub network: Duration,
    pub total: Duration,
}

impl PhaseLatency {
    /// Derives phases from the four instants of an action.
    ///
    /// Out-of-order instants saturate to zero instead of panicking.
    pub fn from_instants(
        submitted: Instant,
        started: Instant,
        driver_done: Instant,
        completed: Instant,
    ) -> Self {
        let queue = started.saturating_duration_since(submitted);
        let process = driver_done.saturating_duration_since(started);
        let total = completed.saturating_duration_since(submitted);
        Self {
            queue,
            process,
            network: total.saturating_sub(queue + process),
            total,
        }
    }
}

/// One entry of the latency history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyRecord {
    pub timestamp: DateTime<Utc>,
    pub phases: PhaseLatency,
    pub success: bool,
}

/// Point-in-time copy of all statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub average_latency_ms: f64,
    pub average_queue_ms: f64,
    pub average_process_ms: f64,
    pub average_network_ms: f64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub currently_processing: i64,
    /// Oldest first.
    pub history: Vec<LatencyRecord>,
}

impl StatsSnapshot {
    /// Percentage of requests that succeeded; `0.0` before any request.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

/// Per-phase latency sums over the records currently in the history.
///
/// Kept as whole `Duration`s so that adding a record and later subtracting
/// it leaves no rounding residue.
#[derive(Debug, Default, Clone, Copy)]
struct WindowSums {
    total: Duration,
    queue: Duration,
    process: Duration,
    network: Duration,
}

impl WindowSums {
    fn add(&mut self, p: &PhaseLatency) {
        self.total += p.total;
        self.queue += p.queue;
        self.process += p.process;
        self.network += p.network;
    }

    fn remove(&mut self, p: &PhaseLatency) {
        self.total = self.total.saturating_sub(p.total);
        self.queue = self.queue.saturating_sub(p.queue);
        self.process = self.process.saturating_sub(p.process);
        self.network = self.network.saturating_sub(p.network);
    }
}

fn mean_ms(sum: Duration, samples: usize) -> f64 {
    if samples == 0 {
        0.0
    } else {
        sum.as_secs_f64() * 1000.0 / samples as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    success: u64,
    failed: u64,
    rejected: u64,
    window: WindowSums,
    last_request_time: Option<DateTime<Utc>>,
    history: VecDeque<LatencyRecord>,
}

/// Shared statistics store.  Wrap in an `Arc` and hand clones to every
/// component that records outcomes.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: RwLock<Counters>,
    processing: AtomicI64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed action, successful or not.
    pub fn record_outcome(&self, success: bool, phases: PhaseLatency) {
        let now = Utc::now();
        let mut c = self.write();
        c.total += 1;
        if success {
            c.success += 1;
        } else {
            c.failed += 1;
        }
        c.last_request_time = Some(now);
        if c.history.len() == HISTORY_CAPACITY {
            if let Some(evicted) = c.history.pop_front() {
                c.window.remove(&evicted.phases);
            }
        }
        c.window.add(&phases);
        c.history.push_back(LatencyRecord {
            timestamp: now,
            phases,
            success,
        });
    }

    /// Records a request refused by admission control.  No latency is added.
    pub fn record_rejected(&self) {
        let mut c = self.write();
        c.total += 1;
        c.rejected += 1;
        c.last_request_time = Some(Utc::now());
    }

    /// Records a request that failed validation before admission.  No
    /// latency is added.
    pub fn record_invalid(&self) {
        let mut c = self.write();
        c.total += 1;
        c.failed += 1;
        c.last_request_time = Some(Utc::now());
    }

    /// Marks one action as in flight until the guard drops.
    pub fn begin_processing(&self) -> ProcessingGuard<'_> {
        self.processing.fetch_add(1, Ordering::SeqCst);
        ProcessingGuard { telemetry: self }
    }

    pub fn currently_processing(&self) -> i64 {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.read();
        StatsSnapshot {
            total_requests: c.total,
            success_requests: c.success,
            failed_requests: c.failed,
            rejected_requests: c.rejected,
            average_latency_ms: mean_ms(c.window.total, c.history.len()),
            average_queue_ms: mean_ms(c.window.queue, c.history.len()),
            average_process_ms: mean_ms(c.window.process, c.history.len()),
            average_network_ms: mean_ms(c.window.network, c.history.len()),
            last_request_time: c.last_request_time,
            currently_processing: self.currently_processing(),
            history: c.history.iter().copied().collect(),
        }
    }

    // A panic while holding the lock leaves counters that are still valid
    // numbers, so poisoning is ignored.
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Counters> {
        self.counters.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Counters> {
        self.counters.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decrements the processing gauge on drop.
#[must_use = "the action counts as processing only while the guard is alive"]
pub struct ProcessingGuard<'a> {
    telemetry: &'a Telemetry,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.telemetry.processing.fetch_sub(1, Ordering::SeqCst);
    }
}
