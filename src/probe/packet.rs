//! IPv4 + UDP header construction for spoofed sends
//!
//! Raw sockets with IP_HDRINCL expect the complete datagram, so the source
//! address of every query can be set to the simulated client.

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::udp::MutableUdpPacket;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::Ipv4Addr;

use crate::error::TransmitError;

/// IPv4 header size without options
pub const IPV4_HEADER_SIZE: usize = 20;
/// UDP header size
pub const UDP_HEADER_SIZE: usize = 8;
/// TTL on every spoofed datagram
pub const DEFAULT_TTL: u8 = 64;
/// Lowest source port picked for spoofed queries
pub const MIN_SOURCE_PORT: u16 = 1024;
/// Largest payload that fits in a single IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = u16::MAX as usize - IPV4_HEADER_SIZE - UDP_HEADER_SIZE;

/// Builds IPv4/UDP datagrams into a reused buffer
pub struct PacketBuilder {
    buffer: Vec<u8>,
    rng: StdRng,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(IPV4_HEADER_SIZE + UDP_HEADER_SIZE + 512),
            rng: StdRng::from_entropy(),
        }
    }

    /// Build a datagram from `source` to `destination:dst_port` carrying `payload`.
    ///
    /// Identification and source port are random per call. Both checksums are
    /// left at zero: the kernel fills the IPv4 one on raw sockets and zero means
    /// "no checksum" for UDP over IPv4.
    pub fn build(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<&[u8], TransmitError> {
        if payload.len() > MAX_UDP_PAYLOAD {
            return Err(TransmitError::Oversized { len: payload.len() });
        }

        let udp_len = UDP_HEADER_SIZE + payload.len();
        let total_len = IPV4_HEADER_SIZE + udp_len;
        self.buffer.clear();
        self.buffer.resize(total_len, 0);

        let identification = self.rng.gen_range(1..=u16::MAX);
        let src_port = self.rng.gen_range(MIN_SOURCE_PORT..=u16::MAX);

        {
            let mut ip = MutableIpv4Packet::new(&mut self.buffer[..IPV4_HEADER_SIZE])
                .ok_or(TransmitError::Oversized { len: payload.len() })?;
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_dscp(0);
            ip.set_ecn(0);
            ip.set_total_length(total_len as u16);
            ip.set_identification(identification);
            ip.set_flags(0);
            ip.set_fragment_offset(0);
            ip.set_ttl(DEFAULT_TTL);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ip.set_checksum(0);
            ip.set_source(source);
            ip.set_destination(destination);
        }

        {
            let mut udp = MutableUdpPacket::new(&mut self.buffer[IPV4_HEADER_SIZE..])
                .ok_or(TransmitError::Oversized { len: payload.len() })?;
            udp.set_source(src_port);
            udp.set_destination(dst_port);
            udp.set_length(udp_len as u16);
            udp.set_checksum(0);
        }

        self.buffer[IPV4_HEADER_SIZE + UDP_HEADER_SIZE..].copy_from_slice(payload);
        Ok(&self.buffer)
    }
}
