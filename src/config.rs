use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "dns_test_config.json";

/// Per-address rate used when a range does not set one
pub const DEFAULT_PER_IP_QPS: f64 = 2.0;

/// One named source address block as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub name: String,
    /// First address of the block (dotted quad)
    pub start_ip: String,
    /// Last address of the block, inclusive
    pub end_ip: String,
    /// Share of `total_qps` assigned to this block
    pub percentage: f64,
    /// Forge the source address (needs raw sockets)
    #[serde(default)]
    pub use_ip_spoofing: bool,
    /// Maximum sustained rate of any single address in the block
    #[serde(default = "default_per_ip_qps")]
    pub per_ip_qps: f64,
    /// Free-form note, ignored by the generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_per_ip_qps() -> f64 {
    DEFAULT_PER_IP_QPS
}

/// Resolved load test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Global query rate budget split across ranges
    pub total_qps: u64,
    pub ip_ranges: Vec<RangeConfig>,
}

impl Default for Config {
    /// Lab layout: ten blocks of ~10k well-behaved clients and one block of
    /// 100 heavy hitters.
    fn default() -> Self {
        let mut ip_ranges: Vec<RangeConfig> = (1..=10)
            .map(|n| RangeConfig {
                name: format!("Normal_Range{}", n),
                start_ip: format!("10.{}.0.1", 200 + n),
                end_ip: format!("10.{}.39.6", 200 + n),
                percentage: 9.0,
                use_ip_spoofing: true,
                per_ip_qps: 1.801,
                comment: Some("9990 clients at 1.801 QPS each = 18k QPS".to_string()),
            })
            .collect();

        ip_ranges.push(RangeConfig {
            name: "Malicious_Range1".to_string(),
            start_ip: "10.101.0.1".to_string(),
            end_ip: "10.101.0.100".to_string(),
            percentage: 10.0,
            use_ip_spoofing: true,
            per_ip_qps: 200.0,
            comment: Some("100 clients at 200 QPS each = 20k QPS".to_string()),
        });

        Self {
            total_qps: 200_000,
            ip_ranges,
        }
    }
}

impl Config {
    /// Parse a config from text. TOML when `toml` is set, JSON otherwise.
    pub fn parse(text: &str, toml: bool) -> Result<Self> {
        if toml {
            Ok(toml::from_str(text)?)
        } else {
            Ok(serde_json::from_str(text)?)
        }
    }

    /// Load a config file, falling back to the built-in layout if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config: {}", path.display()));
            }
        };

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        Self::parse(&text, is_toml)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Write the built-in layout as a sample file
    pub fn write_sample(path: &Path) -> Result<()> {
        let sample = Self::default();
        let text = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(&sample)?
        } else {
            serde_json::to_string_pretty(&sample)?
        };
        fs::write(path, text)
            .with_context(|| format!("Failed to write sample config: {}", path.display()))?;
        Ok(())
    }
}
