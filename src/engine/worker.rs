use anyhow::Result;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::pacing::pacing_delay;
use crate::error::{ResourceError, TransmitError};
use crate::probe::{DEFAULT_POOL_SIZE, PayloadPool, SocketPool, Transmit, socket_pool_size};
use crate::range::AddressRange;
use crate::state::{AddressRateLimiter, CounterSlot, SharedCounters};

/// Most addresses visited in one sweep
pub const SWEEP_LIMIT: u64 = 10_000;

/// Log a transmit failure once every this many errors
const ERROR_LOG_EVERY: u64 = 5000;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Result of one pass over (part of) the block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Addresses looked at
    pub visited: u64,
    /// Packets successfully handed to the kernel
    pub sent: u64,
    /// Send attempts that failed
    pub errors: u64,
    /// The running flag was cleared mid-sweep
    pub cancelled: bool,
}

/// What a worker did over its lifetime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub name: String,
    pub sent: u64,
    pub errors: u64,
    pub addresses_used: usize,
    pub address_count: u64,
    pub average_per_address: f64,
}

/// Generates traffic for one address range
pub struct Worker<T: Transmit> {
    range: AddressRange,
    slot: CounterSlot,
    cancel: CancellationToken,
    payloads: PayloadPool,
    limiter: AddressRateLimiter,
    transmitter: T,
    min_interval: Duration,
    /// Offset of the next address to visit; carries across sweeps
    cursor: u64,
    sent: u64,
    errors: u64,
    state: WorkerState,
}

impl<T: Transmit> Worker<T> {
    /// Build the payload pool and open the transmitter.
    ///
    /// Fails (and the worker stops before sending anything) if `open` cannot
    /// provide a single handle.
    pub fn start<F>(
        range: AddressRange,
        slot: CounterSlot,
        cancel: CancellationToken,
        open: F,
    ) -> Result<Self, ResourceError>
    where
        F: FnOnce(&AddressRange) -> Result<T, ResourceError>,
    {
        let worker_id = slot.worker_id();
        info!(
            "Worker {} ({}) starting: {} addresses {} - {}, {} QPS per address, {} QPS total, spoofing {}",
            worker_id,
            range.name,
            range.address_count(),
            range.start(),
            range.end(),
            range.per_address_rate,
            range.target_rate,
            if range.spoof { "on" } else { "off" },
        );

        let payloads = PayloadPool::build(&range.name, DEFAULT_POOL_SIZE);

        let transmitter = match open(&range) {
            Ok(transmitter) => transmitter,
            Err(e) => {
                error!("Worker {} ({}) cannot send: {}", worker_id, range.name, e);
                debug!("Worker {} ({}) Starting -> Stopped", worker_id, range.name);
                return Err(e);
            }
        };

        info!(
            "Worker {} ({}) sending with {} sockets",
            worker_id,
            range.name,
            transmitter.handles()
        );

        let block = range.address_count().min(SWEEP_LIMIT) as usize;
        let mut worker = Self {
            min_interval: range.min_interval(),
            range,
            slot,
            cancel,
            payloads,
            limiter: AddressRateLimiter::with_capacity(block),
            transmitter,
            cursor: 0,
            sent: 0,
            errors: 0,
            state: WorkerState::Starting,
        };
        worker.transition(WorkerState::Running);
        Ok(worker)
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(
            "Worker {} ({}) {:?} -> {:?}",
            self.slot.worker_id(),
            self.range.name,
            self.state,
            next
        );
        self.state = next;
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Visit up to [`SWEEP_LIMIT`] addresses, sending from each one its rate
    /// limit allows. Stops at the first address after cancellation.
    pub fn sweep(&mut self) -> SweepOutcome {
        let count = self.range.address_count();
        let window = count.min(SWEEP_LIMIT);
        let mut outcome = SweepOutcome::default();

        for _ in 0..window {
            if self.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let offset = self.cursor;
            self.cursor = (self.cursor + 1) % count;
            outcome.visited += 1;

            let address = self.range.address_at(offset);
            if !self.limiter.try_acquire(address, Instant::now(), self.min_interval) {
                continue;
            }

            let payload = self.payloads.get(offset as usize);
            match self.transmitter.send(offset as usize, Ipv4Addr::from(address), payload) {
                Ok(_) => {
                    self.sent += 1;
                    outcome.sent += 1;
                }
                Err(e) => {
                    self.errors += 1;
                    outcome.errors += 1;
                    self.log_transmit_error(&e);
                }
            }
        }

        outcome
    }

    fn log_transmit_error(&self, err: &TransmitError) {
        if self.errors == 1 || self.errors % ERROR_LOG_EVERY == 0 {
            debug!(
                "Worker {} ({}) transmit error #{}: {}",
                self.slot.worker_id(),
                self.range.name,
                self.errors,
                err
            );
        }
    }

    /// Publish running totals to the shared counters
    fn publish(&self) {
        self.slot.set(self.sent, self.errors);
    }

    /// Sweep and pace until cancelled, then drain
    pub fn run(mut self) -> WorkerSummary {
        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            let outcome = self.sweep();
            self.publish();

            if outcome.cancelled {
                break;
            }

            let delay = pacing_delay(outcome.sent, self.range.target_rate, started.elapsed());
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        self.drain()
    }

    /// Publish final totals, log the summary and release the handles
    fn drain(mut self) -> WorkerSummary {
        self.transition(WorkerState::Draining);
        self.slot.set(self.sent, self.errors);

        let summary = WorkerSummary {
            worker_id: self.slot.worker_id(),
            name: self.range.name.clone(),
            sent: self.sent,
            errors: self.errors,
            addresses_used: self.limiter.addresses_used(),
            address_count: self.range.address_count(),
            average_per_address: self.limiter.average_per_address(),
        };

        info!(
            "Worker {} ({}) stopped: sent {}, errors {}, addresses used {}/{}, {:.1} packets per address",
            summary.worker_id,
            summary.name,
            summary.sent,
            summary.errors,
            summary.addresses_used,
            summary.address_count,
            summary.average_per_address,
        );

        self.transition(WorkerState::Stopped);
        // Handles close when self drops here; close errors are ignored
        summary
    }
}

/// Worker entry point: open a socket pool sized for the range and generate
/// traffic toward `target` until `cancel` fires.
///
/// Results flow through `counters`; the summary (or the startup failure) is
/// returned for logging.
pub fn run(
    worker_id: usize,
    range: AddressRange,
    target: Ipv4Addr,
    counters: &Arc<SharedCounters>,
    cancel: CancellationToken,
) -> Result<WorkerSummary, ResourceError> {
    let slot = counters.slot(worker_id);
    let handles = socket_pool_size(range.target_rate);
    let worker = Worker::start(range, slot, cancel, |range| {
        SocketPool::open(range.transmit_mode(), handles, target)
    })?;
    Ok(worker.run())
}

/// Run a worker on its own OS thread
pub fn spawn_worker(
    worker_id: usize,
    range: AddressRange,
    target: Ipv4Addr,
    counters: Arc<SharedCounters>,
    cancel: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<Result<WorkerSummary>>> {
    std::thread::Builder::new()
        .name(format!("worker-{}", worker_id))
        .spawn(move || {
            // Catch panics and convert to error with details
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run(worker_id, range, target, &counters, cancel)
            }));
            match result {
                Ok(outcome) => outcome.map_err(anyhow::Error::from),
                Err(panic_payload) => {
                    let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    Err(anyhow::anyhow!("Worker {} panicked: {}", worker_id, msg))
                }
            }
        })
}
