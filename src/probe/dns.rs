//! DNS query payloads
//!
//! Each worker pre-encodes a pool of standalone A/IN queries once at startup
//! and cycles through it for every send, so the hot loop never encodes.

use rand::Rng;

/// DNS header size (fixed)
pub const DNS_HEADER_SIZE: usize = 12;
/// Standard query with Recursion Desired set
pub const FLAGS_RECURSIVE_QUERY: u16 = 0x0100;
/// QTYPE A
pub const QTYPE_A: u16 = 1;
/// QCLASS IN
pub const QCLASS_IN: u16 = 1;
/// Longest label allowed on the wire
pub const MAX_LABEL_LEN: usize = 63;
/// Queries built per worker
pub const DEFAULT_POOL_SIZE: usize = 500;
/// Zone the synthetic names live under
pub const QUERY_SUFFIX: &str = "testdomain.com";

/// Append `name` to `buf` as length-prefixed labels ending in the root label.
/// Empty labels are skipped and labels longer than 63 bytes are truncated.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(MAX_LABEL_LEN)];
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
}

/// Build a complete query for `name` with the given transaction id
pub fn build_query(transaction_id: u16, name: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(DNS_HEADER_SIZE + name.len() + 6);

    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&FLAGS_RECURSIVE_QUERY.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    encode_name(name, &mut packet);
    packet.extend_from_slice(&QTYPE_A.to_be_bytes());
    packet.extend_from_slice(&QCLASS_IN.to_be_bytes());

    packet
}

/// Synthetic query name for entry `index` of a range's pool,
/// e.g. `normal_range10042.testdomain.com`
pub fn query_name(range_name: &str, index: usize) -> String {
    let digits = format!("{:04}", index);
    let prefix: String = range_name
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN.saturating_sub(digits.len()))
        .collect();
    format!("{}{}.{}", prefix, digits, QUERY_SUFFIX)
}

/// Pre-encoded queries shared read-only by every send of one worker
#[derive(Debug, Clone)]
pub struct PayloadPool {
    payloads: Vec<Vec<u8>>,
}

impl PayloadPool {
    /// Encode `count` queries for `range_name`. Only the transaction ids are random.
    pub fn build(range_name: &str, count: usize) -> Self {
        let mut rng = rand::thread_rng();
        let payloads = (0..count.max(1))
            .map(|i| build_query(rng.gen_range(1..=u16::MAX), &query_name(range_name, i)))
            .collect();
        Self { payloads }
    }

    /// Payload for any index, wrapping around the pool
    pub fn get(&self, index: usize) -> &[u8] {
        &self.payloads[index % self.payloads.len()]
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
