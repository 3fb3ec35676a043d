//! Per-address send throttle
//!
//! Every source address in a worker's block gets its own minimum interval
//! between sends. The limiter is a plain map of last-send timestamps checked
//! as the worker sweeps the block, so thousands of addresses are shaped
//! without a timer per address.
//!
//! Denied attempts are skipped, not queued: an address that was passed over
//! never earns a burst later.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last accepted send per address
#[derive(Debug, Default)]
pub struct AddressRateLimiter {
    last_sent: HashMap<u32, Instant>,
    granted: u64,
}

impl AddressRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the map for a block of `addresses`
    pub fn with_capacity(addresses: usize) -> Self {
        Self {
            last_sent: HashMap::with_capacity(addresses),
            granted: 0,
        }
    }

    /// Grant a send for `address` at `now` if at least `min_interval` has passed
    /// since its last granted send (or it never sent). Denials leave state untouched.
    pub fn try_acquire(&mut self, address: u32, now: Instant, min_interval: Duration) -> bool {
        if let Some(last) = self.last_sent.get(&address)
            && now.saturating_duration_since(*last) < min_interval
        {
            return false;
        }

        self.last_sent.insert(address, now);
        self.granted += 1;
        true
    }

    /// Distinct addresses that have been granted at least once
    pub fn addresses_used(&self) -> usize {
        self.last_sent.len()
    }

    /// Total grants across all addresses
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Average grants per address that was used
    pub fn average_per_address(&self) -> f64 {
        if self.last_sent.is_empty() {
            0.0
        } else {
            self.granted as f64 / self.last_sent.len() as f64
        }
    }

    /// Time of the last granted send for `address`
    pub fn last_sent(&self, address: u32) -> Option<Instant> {
        self.last_sent.get(&address).copied()
    }
}
