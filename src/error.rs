//! Error taxonomy for the load generator.
//!
//! Configuration errors are fatal before any worker starts, resource errors
//! are fatal to a single worker, and transmit errors never leave the send call
//! site (they only bump the worker's error counter). Shutdown is not an error.

use std::io;

use thiserror::Error;

use crate::probe::TransmitMode;

/// Malformed range configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("range '{range}': invalid IPv4 address '{addr}' (expected four 0-255 octets)")]
    InvalidAddress { range: String, addr: String },

    #[error("range '{range}': share percentage must be a non-negative number ({share})")]
    InvalidShare { range: String, share: f64 },

    #[error("range '{range}': start address {start} is after end address {end}")]
    InvertedRange {
        range: String,
        start: String,
        end: String,
    },

    #[error("range '{range}': per-address rate is not a usable positive number ({rate})")]
    InvalidPerAddressRate { range: String, rate: f64 },
}

/// No transmission handle could be opened for a worker
#[derive(Debug, Error)]
#[error("could not open any {mode} socket: {source}")]
pub struct ResourceError {
    pub mode: TransmitMode,
    #[source]
    pub source: io::Error,
}

/// A single send failed
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("send failed: {0}")]
    Io(#[from] io::Error),

    #[error("payload of {len} bytes does not fit in an IPv4 datagram")]
    Oversized { len: usize },
}
