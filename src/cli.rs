use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DEFAULT_CONFIG_PATH;

/// Multi-range DNS query load generator with per-source-address rate limits
#[derive(Parser, Debug, Clone)]
#[command(name = "dnsload")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// DNS server under test (IPv4 address or hostname)
    #[arg(required_unless_present = "create_config")]
    pub target: Option<String>,

    /// Range configuration file (JSON, or TOML with a .toml extension)
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Write a sample configuration to --config and exit
    #[arg(long = "create-config")]
    pub create_config: bool,

    /// Override the configured total queries per second
    #[arg(long = "qps")]
    pub qps: Option<u64>,

    /// Progress report interval in seconds
    #[arg(short = 'i', long = "interval", default_value = "3.0")]
    pub interval: f64,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short = 'd', long = "duration")]
    pub duration: Option<f64>,

    /// Print the final report as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

/// Shortest interval or duration accepted on the command line
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Seconds as a Duration, `None` unless it is finite and at least [`MIN_PERIOD`]
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| *d >= MIN_PERIOD)
}

impl Args {
    /// Get report interval as Duration (never zero)
    pub fn interval_duration(&self) -> Duration {
        seconds(self.interval).unwrap_or(MIN_PERIOD)
    }

    /// Get run limit as Duration
    pub fn duration_limit(&self) -> Option<Duration> {
        self.duration.and_then(seconds)
    }

    /// Default tracing filter for the verbosity flag
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if seconds(self.interval).is_none() {
            return Err(format!(
                "Interval must be a finite number of seconds, at least {}",
                MIN_PERIOD.as_secs_f64()
            ));
        }

        if let Some(duration) = self.duration
            && seconds(duration).is_none()
        {
            return Err(format!(
                "Duration must be a finite number of seconds, at least {}",
                MIN_PERIOD.as_secs_f64()
            ));
        }

        if let Some(target) = &self.target
            && target.trim().is_empty()
        {
            return Err("Target cannot be empty".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("dnsload").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["192.0.2.53"]);
        assert_eq!(args.target.as_deref(), Some("192.0.2.53"));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.interval_duration(), Duration::from_secs(3));
        assert_eq!(args.duration_limit(), None);
        assert_eq!(args.log_level(), "info");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "dns.test", "-c", "lab.toml", "--qps", "5000", "-d", "1.5", "--json", "-vv",
        ]);
        assert_eq!(args.config, PathBuf::from("lab.toml"));
        assert_eq!(args.qps, Some(5000));
        assert_eq!(args.duration_limit(), Some(Duration::from_millis(1500)));
        assert!(args.json);
        assert_eq!(args.log_level(), "trace");
    }

    #[test]
    fn test_target_required() {
        assert!(Args::try_parse_from(["dnsload"]).is_err());
        let args = parse(&["--create-config"]);
        assert!(args.create_config);
        assert!(args.target.is_none());
    }

    #[test]
    fn test_validate_rejects() {
        let mut args = parse(&["192.0.2.53"]);
        args.interval = 0.0;
        assert!(args.validate().is_err());

        let mut args = parse(&["192.0.2.53"]);
        args.duration = Some(-1.0);
        assert!(args.validate().is_err());

        let args = parse(&[" "]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_periods() {
        // Rounds to a zero period, or overflows Duration
        for interval in ["1e-12", "1e30", "inf"] {
            let args = parse(&["192.0.2.53", "-i", interval]);
            assert!(args.validate().is_err(), "interval {} accepted", interval);
            assert!(!args.interval_duration().is_zero());
        }
        for duration in ["1e-12", "1e30", "NaN"] {
            let args = parse(&["192.0.2.53", "-d", duration]);
            assert!(args.validate().is_err(), "duration {} accepted", duration);
        }

        let args = parse(&["192.0.2.53", "-i", "0.001", "-d", "0.001"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.interval_duration(), MIN_PERIOD);
        assert_eq!(args.duration_limit(), Some(MIN_PERIOD));
    }
}
