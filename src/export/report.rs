use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use crate::engine::WorkerSummary;
use crate::range::{AddressRange, total_share};
use crate::state::{CounterSample, SharedCounters, Throughput};

/// Final numbers for one range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    pub name: String,
    pub address_count: u64,
    pub target_rate: u64,
    pub per_address_rate: f64,
    pub sent: u64,
    pub errors: u64,
    /// Distinct addresses that sent at least once (None if the worker never
    /// reported a summary)
    pub addresses_used: Option<usize>,
}

impl RangeReport {
    /// Packets per second over the run
    pub fn pps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 { self.sent as f64 / secs } else { 0.0 }
    }

    /// Realized per-address rate, averaged over the whole block
    pub fn per_address_qps(&self, elapsed: Duration) -> f64 {
        self.pps(elapsed) / self.address_count.max(1) as f64
    }
}

/// End-of-run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub target: String,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    pub total: CounterSample,
    pub ranges: Vec<RangeReport>,
}

impl RunReport {
    /// Assemble from the counters; `summaries[i]` is worker i's summary if it ran
    pub fn new(
        target: impl Into<String>,
        elapsed: Duration,
        ranges: &[AddressRange],
        counters: &SharedCounters,
        summaries: &[Option<WorkerSummary>],
    ) -> Self {
        let ranges = ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let sample = counters.get(i);
                RangeReport {
                    name: range.name.clone(),
                    address_count: range.address_count(),
                    target_rate: range.target_rate,
                    per_address_rate: range.per_address_rate,
                    sent: sample.sent,
                    errors: sample.errors,
                    addresses_used: summaries
                        .get(i)
                        .and_then(|s| s.as_ref())
                        .map(|s| s.addresses_used),
                }
            })
            .collect();

        Self {
            target: target.into(),
            elapsed,
            total: counters.sample(),
            ranges,
        }
    }

    pub fn average_qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.total.sent as f64 / secs } else { 0.0 }
    }

    /// Percentage of send attempts that reached the kernel
    pub fn success_rate(&self) -> f64 {
        let attempts = self.total.sent + self.total.errors;
        if attempts == 0 {
            0.0
        } else {
            self.total.sent as f64 / attempts as f64 * 100.0
        }
    }
}

/// Print the configured ranges before the run starts
pub fn write_range_table<W: Write>(ranges: &[AddressRange], mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "Address ranges:")?;
    let mut total_addresses = 0u64;
    for (i, range) in ranges.iter().enumerate() {
        writeln!(
            writer,
            "  {:2}. {:<18} {:<15} - {:<15}",
            i + 1,
            range.name,
            range.start().to_string(),
            range.end().to_string()
        )?;
        writeln!(
            writer,
            "      addresses: {:>6} | per address: {:>6.1} QPS | total: {:>7} QPS | spoofing: {}",
            range.address_count(),
            range.per_address_rate,
            range.target_rate,
            if range.spoof { "yes" } else { "no" }
        )?;
        total_addresses += range.address_count();
    }
    writeln!(writer)?;
    writeln!(writer, "Total share: {}%", total_share(ranges))?;
    writeln!(writer, "Total addresses: {}", total_addresses)?;
    writeln!(
        writer,
        "Expected total QPS: {}",
        ranges.iter().map(|r| r.target_rate).sum::<u64>()
    )?;
    Ok(())
}

/// One periodic progress line
pub fn format_progress(t: &Throughput) -> String {
    format!(
        "[{:6.1}s] instant: {:>9.0} PPS | average: {:>9.0} PPS | total: {:>11} | errors: {}",
        t.elapsed.as_secs_f64(),
        t.instant_pps,
        t.average_pps,
        t.total.sent,
        t.total.errors
    )
}

/// Generate the final text report
pub fn generate_report<W: Write>(report: &RunReport, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "{}", "=".repeat(80))?;
    writeln!(writer, "Load test against {} complete", report.target)?;
    writeln!(writer, "Total sent:   {}", report.total.sent)?;
    writeln!(writer, "Total errors: {}", report.total.errors)?;
    writeln!(writer, "Duration:     {:.1}s", report.elapsed.as_secs_f64())?;
    if !report.elapsed.is_zero() {
        writeln!(writer, "Average QPS:  {:.0}", report.average_qps())?;
        writeln!(writer, "Success rate: {:.1}%", report.success_rate())?;
    }

    writeln!(writer)?;
    writeln!(writer, "Per range:")?;
    for range in &report.ranges {
        writeln!(
            writer,
            "  {:<18} {:>10} packets ({:>8.0} PPS) | errors: {}",
            range.name,
            range.sent,
            range.pps(report.elapsed),
            range.errors
        )?;
        let used = match range.addresses_used {
            Some(used) => format!("{}/{}", used, range.address_count),
            None => "not started".to_string(),
        };
        writeln!(
            writer,
            "  {:<18} per address: {:.2} QPS (target {:.1}) | addresses used: {}",
            "",
            range.per_address_qps(report.elapsed),
            range.per_address_rate,
            used
        )?;
    }
    writeln!(writer, "{}", "=".repeat(80))?;

    Ok(())
}

/// Generate the final report as pretty JSON
pub fn export_json<W: Write>(report: &RunReport, writer: W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::addr_to_int;

    fn ranges() -> Vec<AddressRange> {
        vec![
            AddressRange {
                name: "Normal".to_string(),
                start_addr: addr_to_int("10.0.0.1").unwrap(),
                end_addr: addr_to_int("10.0.0.100").unwrap(),
                target_rate: 200,
                share_percent: 50.0,
                spoof: true,
                per_address_rate: 2.0,
            },
            AddressRange {
                name: "Heavy".to_string(),
                start_addr: addr_to_int("10.1.0.1").unwrap(),
                end_addr: addr_to_int("10.1.0.2").unwrap(),
                target_rate: 200,
                share_percent: 50.0,
                spoof: false,
                per_address_rate: 100.0,
            },
        ]
    }

    fn summary(worker_id: usize, used: usize) -> WorkerSummary {
        WorkerSummary {
            worker_id,
            name: String::new(),
            sent: 0,
            errors: 0,
            addresses_used: used,
            address_count: 0,
            average_per_address: 0.0,
        }
    }

    #[test]
    fn test_report_from_counters() {
        let counters = SharedCounters::new(2);
        counters.set(0, 2000, 0);
        counters.set(1, 1800, 200);

        let report = RunReport::new(
            "192.0.2.53",
            Duration::from_secs(10),
            &ranges(),
            &counters,
            &[Some(summary(0, 100)), None],
        );

        assert_eq!(report.total, CounterSample { sent: 3800, errors: 200 });
        assert_eq!(report.average_qps(), 380.0);
        assert_eq!(report.success_rate(), 95.0);
        assert_eq!(report.ranges[0].pps(report.elapsed), 200.0);
        assert_eq!(report.ranges[0].per_address_qps(report.elapsed), 2.0);
        assert_eq!(report.ranges[1].addresses_used, None);
    }

    #[test]
    fn test_text_report() {
        let counters = SharedCounters::new(2);
        counters.set(0, 100, 0);
        let report =
            RunReport::new("192.0.2.53", Duration::from_secs(1), &ranges(), &counters, &[]);

        let mut buf = Vec::new();
        generate_report(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Load test against 192.0.2.53 complete"));
        assert!(text.contains("Total sent:   100"));
        assert!(text.contains("Success rate: 100.0%"));
        assert!(text.contains("not started"));
    }

    #[test]
    fn test_zero_attempts_success_rate() {
        let counters = SharedCounters::new(2);
        let report = RunReport::new("t", Duration::ZERO, &ranges(), &counters, &[]);
        assert_eq!(report.success_rate(), 0.0);
        assert_eq!(report.average_qps(), 0.0);
    }

    #[test]
    fn test_json_report() {
        let counters = SharedCounters::new(2);
        counters.set(1, 5, 1);
        let report = RunReport::new("t", Duration::from_millis(1500), &ranges(), &counters, &[]);

        let mut buf = Vec::new();
        export_json(&report, &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["elapsed"], 1.5);
        assert_eq!(value["total"]["sent"], 5);
        assert_eq!(value["ranges"][1]["errors"], 1);
    }

    #[test]
    fn test_range_table() {
        let mut buf = Vec::new();
        write_range_table(&ranges(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Total addresses: 102"));
        assert!(text.contains("Expected total QPS: 400"));
        assert!(text.contains("Total share: 100%"));
    }

    #[test]
    fn test_progress_line() {
        let line = format_progress(&Throughput {
            elapsed: Duration::from_secs(3),
            instant_pps: 1500.0,
            average_pps: 1400.0,
            total: CounterSample { sent: 4200, errors: 3 },
        });
        assert!(line.starts_with("[   3.0s]"));
        assert!(line.ends_with("errors: 3"));
    }
}
