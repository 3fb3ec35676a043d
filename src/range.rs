//! Address ranges and the global rate partition.
//!
//! Turns the configured dotted-quad bounds into numeric blocks and gives each
//! block its slice of the global query budget.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::RangeConfig;
use crate::error::ConfigError;
use crate::probe::TransmitMode;

/// Convert a dotted quad to its 32-bit value (`a<<24 | b<<16 | c<<8 | d`)
///
/// Returns `None` unless the text is exactly four decimal octets in 0-255.
pub fn addr_to_int(addr: &str) -> Option<u32> {
    let mut value: u32 = 0;
    let mut octets = 0;
    for part in addr.trim().split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let octet: u8 = part.parse().ok()?;
        value = (value << 8) | octet as u32;
        octets += 1;
    }
    if octets != 4 {
        return None;
    }
    Some(value)
}

/// Inverse of [`addr_to_int`]
pub fn int_to_addr(value: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (value >> 24) & 0xFF,
        (value >> 16) & 0xFF,
        (value >> 8) & 0xFF,
        value & 0xFF
    )
}

/// A named block of source addresses with its rate policy
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRange {
    pub name: String,
    pub start_addr: u32,
    /// Inclusive
    pub end_addr: u32,
    /// Aggregate queries per second for the whole block
    pub target_rate: u64,
    pub share_percent: f64,
    pub spoof: bool,
    /// Maximum queries per second of any one address
    pub per_address_rate: f64,
}

impl AddressRange {
    /// Number of addresses in the block (at least 1)
    pub fn address_count(&self) -> u64 {
        (self.end_addr - self.start_addr) as u64 + 1
    }

    /// Address at `offset` from the start of the block
    pub fn address_at(&self, offset: u64) -> u32 {
        self.start_addr.wrapping_add(offset as u32)
    }

    /// Minimum spacing between two sends from the same address.
    ///
    /// Saturates at `Duration::MAX` for rates too small to represent, so such
    /// an address sends once and then never again.
    pub fn min_interval(&self) -> Duration {
        interval_for_rate(self.per_address_rate).unwrap_or(Duration::MAX)
    }

    pub fn transmit_mode(&self) -> TransmitMode {
        if self.spoof {
            TransmitMode::Spoofed
        } else {
            TransmitMode::Direct
        }
    }

    pub fn start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start_addr)
    }

    pub fn end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end_addr)
    }
}

/// Spacing for `rate` events per second, `None` if it does not fit a `Duration`
fn interval_for_rate(rate: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / rate).ok()
}

/// Split `total_rate` across the configured ranges.
///
/// Each range gets `floor(total_rate * percentage / 100)`. Shares are not
/// required to sum to 100; see [`total_share`].
pub fn partition(
    total_rate: u64,
    ranges: &[RangeConfig],
) -> Result<Vec<AddressRange>, ConfigError> {
    ranges
        .iter()
        .map(|cfg| build_range(total_rate, cfg))
        .collect()
}

fn build_range(total_rate: u64, cfg: &RangeConfig) -> Result<AddressRange, ConfigError> {
    let parse = |addr: &str| {
        addr_to_int(addr).ok_or_else(|| ConfigError::InvalidAddress {
            range: cfg.name.clone(),
            addr: addr.to_string(),
        })
    };
    let start_addr = parse(&cfg.start_ip)?;
    let end_addr = parse(&cfg.end_ip)?;

    if !cfg.percentage.is_finite() || cfg.percentage < 0.0 {
        return Err(ConfigError::InvalidShare {
            range: cfg.name.clone(),
            share: cfg.percentage,
        });
    }

    if start_addr > end_addr {
        return Err(ConfigError::InvertedRange {
            range: cfg.name.clone(),
            start: cfg.start_ip.clone(),
            end: cfg.end_ip.clone(),
        });
    }

    if !cfg.per_ip_qps.is_finite()
        || cfg.per_ip_qps <= 0.0
        || interval_for_rate(cfg.per_ip_qps).is_none()
    {
        return Err(ConfigError::InvalidPerAddressRate {
            range: cfg.name.clone(),
            rate: cfg.per_ip_qps,
        });
    }

    let target_rate = (total_rate as f64 * cfg.percentage / 100.0).floor() as u64;

    Ok(AddressRange {
        name: cfg.name.clone(),
        start_addr,
        end_addr,
        target_rate,
        share_percent: cfg.percentage,
        spoof: cfg.use_ip_spoofing,
        per_address_rate: cfg.per_ip_qps,
    })
}

/// Sum of the shares of all ranges
pub fn total_share(ranges: &[AddressRange]) -> f64 {
    ranges.iter().map(|r| r.share_percent).sum()
}

/// True when the shares are far enough from 100 to warn about
pub fn shares_unbalanced(ranges: &[AddressRange]) -> bool {
    (total_share(ranges) - 100.0).abs() > 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range_cfg(name: &str, start: &str, end: &str, percentage: f64) -> RangeConfig {
        RangeConfig {
            name: name.to_string(),
            start_ip: start.to_string(),
            end_ip: end.to_string(),
            percentage,
            use_ip_spoofing: false,
            per_ip_qps: 2.0,
            comment: None,
        }
    }

    #[test]
    fn test_addr_to_int_known_values() {
        assert_eq!(addr_to_int("0.0.0.0"), Some(0));
        assert_eq!(addr_to_int("10.201.0.1"), Some(0x0AC9_0001));
        assert_eq!(addr_to_int("255.255.255.255"), Some(u32::MAX));
        assert_eq!(int_to_addr(0x0AC9_2706), "10.201.39.6");
    }

    #[test]
    fn test_addr_to_int_rejects_garbage() {
        assert_eq!(addr_to_int("10.0.0"), None);
        assert_eq!(addr_to_int("10.0.0.1.2"), None);
        assert_eq!(addr_to_int("10.0.0.256"), None);
        assert_eq!(addr_to_int("10.0..1"), None);
        assert_eq!(addr_to_int("10.0.0.-1"), None);
        assert_eq!(addr_to_int("a.b.c.d"), None);
        assert_eq!(addr_to_int(""), None);
    }

    #[test]
    fn test_partition_floors_rates() {
        let ranges = partition(
            1001,
            &[
                range_cfg("a", "10.0.0.1", "10.0.0.10", 25.0),
                range_cfg("b", "10.0.1.1", "10.0.1.10", 75.0),
            ],
        )
        .unwrap();
        assert_eq!(ranges[0].target_rate, 250);
        assert_eq!(ranges[1].target_rate, 750);
        assert_eq!(ranges[0].address_count(), 10);
    }

    #[test]
    fn test_partition_default_layout() {
        let config = crate::config::Config::default();
        let ranges = partition(config.total_qps, &config.ip_ranges).unwrap();
        assert_eq!(ranges.len(), 11);
        assert_eq!(ranges[0].address_count(), 9990);
        assert_eq!(ranges[0].target_rate, 18_000);
        assert_eq!(ranges[10].address_count(), 100);
        assert_eq!(ranges[10].target_rate, 20_000);
        assert!(!shares_unbalanced(&ranges));
    }

    #[test]
    fn test_partition_rejects_bad_address() {
        let err =
            partition(100, &[range_cfg("bad", "10.0.0.300", "10.0.1.1", 100.0)]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidAddress { ref addr, .. } if addr == "10.0.0.300"
        ));
    }

    #[test]
    fn test_partition_rejects_negative_share() {
        let err = partition(100, &[range_cfg("neg", "10.0.0.1", "10.0.0.2", -5.0)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShare { .. }));
    }

    #[test]
    fn test_partition_rejects_non_finite_share() {
        for share in [f64::NAN, f64::INFINITY] {
            let err =
                partition(100, &[range_cfg("bad", "10.0.0.1", "10.0.0.2", share)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidShare { .. }));
            assert!(err.to_string().contains("non-negative number"));
        }
    }

    #[test]
    fn test_partition_rejects_inverted_range() {
        let err = partition(100, &[range_cfg("inv", "10.0.0.9", "10.0.0.1", 100.0)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { .. }));
    }

    #[test]
    fn test_partition_rejects_zero_per_address_rate() {
        let mut cfg = range_cfg("zero", "10.0.0.1", "10.0.0.2", 100.0);
        cfg.per_ip_qps = 0.0;
        let err = partition(100, &[cfg]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPerAddressRate { .. }));
    }

    #[test]
    fn test_partition_rejects_unrepresentable_per_address_rate() {
        let mut cfg = range_cfg("tiny", "10.0.0.1", "10.0.0.2", 100.0);
        cfg.per_ip_qps = 1e-20;
        let err = partition(100, &[cfg]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPerAddressRate { .. }));
    }

    #[test]
    fn test_min_interval_saturates_for_tiny_rate() {
        let mut range = partition(10, &[range_cfg("r", "10.0.0.1", "10.0.0.2", 100.0)])
            .unwrap()
            .remove(0);
        range.per_address_rate = 1e-20;
        assert_eq!(range.min_interval(), Duration::MAX);
    }

    #[test]
    fn test_unbalanced_shares_still_partition() {
        let ranges = partition(1000, &[range_cfg("half", "10.0.0.1", "10.0.0.2", 50.0)]).unwrap();
        assert_eq!(ranges[0].target_rate, 500);
        assert!(shares_unbalanced(&ranges));
    }

    #[test]
    fn test_single_address_block() {
        let ranges = partition(10, &[range_cfg("one", "10.0.0.5", "10.0.0.5", 100.0)]).unwrap();
        assert_eq!(ranges[0].address_count(), 1);
        assert_eq!(ranges[0].address_at(0), addr_to_int("10.0.0.5").unwrap());
    }

    #[test]
    fn test_min_interval() {
        let ranges = partition(10, &[range_cfg("r", "10.0.0.1", "10.0.0.2", 100.0)]).unwrap();
        assert_eq!(ranges[0].min_interval(), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn proptest_addr_roundtrip(
            a in 0u8..=255,
            b in 0u8..=255,
            c in 0u8..=255,
            d in 0u8..=255,
        ) {
            let text = format!("{}.{}.{}.{}", a, b, c, d);
            let value = addr_to_int(&text).unwrap();
            prop_assert_eq!(value, u32::from(Ipv4Addr::new(a, b, c, d)));
            prop_assert_eq!(int_to_addr(value), text);
        }

        #[test]
        fn proptest_int_roundtrip(value in any::<u32>()) {
            prop_assert_eq!(addr_to_int(&int_to_addr(value)), Some(value));
        }

        /// Shares summing to 100 lose at most one unit of rate per range
        #[test]
        fn proptest_partition_sums_to_total(
            total in 0u64..10_000_000,
            weights in prop::collection::vec(1u32..1000, 1..12),
        ) {
            let weight_sum: u32 = weights.iter().sum();
            let configs: Vec<RangeConfig> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let share = *w as f64 * 100.0 / weight_sum as f64;
                    range_cfg(&format!("r{}", i), "10.0.0.1", "10.0.0.2", share)
                })
                .collect();
            let ranges = partition(total, &configs).unwrap();
            let assigned: u64 = ranges.iter().map(|r| r.target_rate).sum();
            let n = ranges.len() as u64;
            prop_assert!(assigned <= total + n);
            prop_assert!(assigned + n >= total);
        }
    }
}
