//! Socket pools that put queries on the wire
//!
//! A worker owns one [`SocketPool`] and rotates through its sockets. Sends are
//! best effort: every failure comes back as a [`TransmitError`] for the caller
//! to count, never as a panic or an early exit.

use socket2::{SockAddr, Socket};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{ResourceError, TransmitError};
use crate::probe::packet::PacketBuilder;
use crate::probe::socket::{create_raw_udp_socket, create_udp_dgram_socket};

/// DNS server port
pub const DNS_PORT: u16 = 53;

/// How a range's queries are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitMode {
    /// Kernel-built headers from the host's own address
    Direct,
    /// Caller-built IPv4 header with a forged source address
    Spoofed,
}

impl fmt::Display for TransmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "UDP"),
            Self::Spoofed => write!(f, "raw"),
        }
    }
}

/// Anything that can send one query on behalf of a source address
pub trait Transmit {
    /// Send `payload` as if from `source`, using handle `slot` (wrapped to the
    /// pool size). Returns the number of bytes handed to the kernel.
    fn send(
        &mut self,
        slot: usize,
        source: Ipv4Addr,
        payload: &[u8],
    ) -> Result<usize, TransmitError>;

    /// Number of handles available
    fn handles(&self) -> usize;
}

/// Pool of sockets aimed at one target
pub struct SocketPool {
    mode: TransmitMode,
    sockets: Vec<Socket>,
    target: Ipv4Addr,
    /// `target:53` for direct sends
    dns_addr: SockAddr,
    /// `target:0` for raw sends (the port lives in our UDP header)
    raw_addr: SockAddr,
    builder: PacketBuilder,
}

impl SocketPool {
    /// Open up to `count` sockets. Individual failures are tolerated (only
    /// the first is logged); the pool fails only if none could be opened.
    pub fn open(mode: TransmitMode, count: usize, target: Ipv4Addr) -> Result<Self, ResourceError> {
        let mut sockets = Vec::with_capacity(count);
        let mut first_error: Option<std::io::Error> = None;

        for _ in 0..count {
            let created = match mode {
                TransmitMode::Direct => create_udp_dgram_socket(),
                TransmitMode::Spoofed => create_raw_udp_socket(),
            };
            match created {
                Ok(socket) => sockets.push(socket),
                Err(e) => {
                    if first_error.is_none() {
                        tracing::warn!("Failed to open {} socket: {}", mode, e);
                        first_error = Some(into_io_error(e));
                    }
                }
            }
        }

        if sockets.is_empty() {
            return Err(ResourceError {
                mode,
                source: first_error
                    .unwrap_or_else(|| std::io::Error::other("socket pool size is zero")),
            });
        }

        Ok(Self {
            mode,
            sockets,
            target,
            dns_addr: SockAddr::from(SocketAddr::V4(SocketAddrV4::new(target, DNS_PORT))),
            raw_addr: SockAddr::from(SocketAddr::V4(SocketAddrV4::new(target, 0))),
            builder: PacketBuilder::new(),
        })
    }
}

impl Transmit for SocketPool {
    fn send(
        &mut self,
        slot: usize,
        source: Ipv4Addr,
        payload: &[u8],
    ) -> Result<usize, TransmitError> {
        let socket = &self.sockets[slot % self.sockets.len()];
        match self.mode {
            TransmitMode::Direct => Ok(socket.send_to(payload, &self.dns_addr)?),
            TransmitMode::Spoofed => {
                let packet = self.builder.build(source, self.target, DNS_PORT, payload)?;
                Ok(socket.send_to(packet, &self.raw_addr)?)
            }
        }
    }

    fn handles(&self) -> usize {
        self.sockets.len()
    }
}

fn into_io_error(err: anyhow::Error) -> std::io::Error {
    match err.downcast::<std::io::Error>() {
        Ok(io) => io,
        Err(other) => std::io::Error::other(other.to_string()),
    }
}
