//! Cross-worker statistics
//!
//! One `(sent, errors)` slot per worker. Each worker gets an owned
//! [`CounterSlot`] for its own index, so a slot only ever has one writer and
//! plain atomic loads/stores are enough; the supervisor sums all slots with
//! [`SharedCounters::sample`].

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Totals across all workers at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    pub sent: u64,
    pub errors: u64,
}

/// Per-worker sent/error counters
#[derive(Debug)]
pub struct SharedCounters {
    sent: Box<[AtomicU64]>,
    errors: Box<[AtomicU64]>,
}

impl SharedCounters {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            sent: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            errors: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    pub fn workers(&self) -> usize {
        self.sent.len()
    }

    /// Write handle for `worker_id`'s slot
    ///
    /// # Panics
    /// If `worker_id` is out of range.
    pub fn slot(self: &Arc<Self>, worker_id: usize) -> CounterSlot {
        assert!(worker_id < self.workers(), "worker id {} out of range", worker_id);
        CounterSlot {
            counters: Arc::clone(self),
            index: worker_id,
        }
    }

    /// Overwrite a worker's running totals
    pub fn set(&self, worker_id: usize, sent: u64, errors: u64) {
        self.sent[worker_id].store(sent, Ordering::Relaxed);
        self.errors[worker_id].store(errors, Ordering::Relaxed);
    }

    /// Last totals reported by one worker
    pub fn get(&self, worker_id: usize) -> CounterSample {
        CounterSample {
            sent: self.sent[worker_id].load(Ordering::Relaxed),
            errors: self.errors[worker_id].load(Ordering::Relaxed),
        }
    }

    /// Sum of every worker's last report
    pub fn sample(&self) -> CounterSample {
        CounterSample {
            sent: self.sent.iter().map(|c| c.load(Ordering::Relaxed)).sum(),
            errors: self.errors.iter().map(|c| c.load(Ordering::Relaxed)).sum(),
        }
    }
}

/// A worker's exclusive write handle into [`SharedCounters`]
#[derive(Debug)]
pub struct CounterSlot {
    counters: Arc<SharedCounters>,
    index: usize,
}

impl CounterSlot {
    pub fn worker_id(&self) -> usize {
        self.index
    }

    /// Publish running totals (not deltas)
    pub fn set(&self, sent: u64, errors: u64) {
        self.counters.set(self.index, sent, errors);
    }
}

/// One progress line's worth of throughput numbers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub elapsed: Duration,
    /// Packets per second since the previous sample
    pub instant_pps: f64,
    /// Packets per second since start
    pub average_pps: f64,
    pub total: CounterSample,
}

/// Turns successive aggregator samples into rates
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    last_sent: u64,
    last_elapsed: Duration,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample taken `elapsed` after start
    pub fn record(&mut self, sample: CounterSample, elapsed: Duration) -> Throughput {
        let interval = elapsed.saturating_sub(self.last_elapsed).as_secs_f64();
        let delta = sample.sent.saturating_sub(self.last_sent) as f64;

        let instant_pps = if interval > 0.0 { delta / interval } else { 0.0 };
        let average_pps = if elapsed.as_secs_f64() > 0.0 {
            sample.sent as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        self.last_sent = sample.sent;
        self.last_elapsed = elapsed;

        Throughput {
            elapsed,
            instant_pps,
            average_pps,
            total: sample,
        }
    }
}
