use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dnsload::cli::Args;
use dnsload::config::Config;
use dnsload::engine::{WorkerSummary, spawn_worker};
use dnsload::export::{RunReport, export_json, format_progress, generate_report, write_range_table};
use dnsload::probe::check_raw_permissions;
use dnsload::range::{AddressRange, partition, shares_unbalanced, total_share};
use dnsload::state::{SharedCounters, ThroughputMeter};

/// Delay between worker starts
const WORKER_STAGGER: Duration = Duration::from_millis(100);

/// How long each worker gets to stop after cancellation
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

const JOIN_POLL: Duration = Duration::from_millis(50);

type WorkerHandle = JoinHandle<Result<WorkerSummary>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(&args);

    if args.create_config {
        Config::write_sample(&args.config)?;
        println!("Sample configuration written to {}", args.config.display());
        return Ok(());
    }

    let mut config = Config::load(&args.config)?;
    if let Some(qps) = args.qps {
        config.total_qps = qps;
    }

    let target_str = args.target.as_deref().context("No target specified")?;
    let target = resolve_target(target_str)
        .with_context(|| format!("Failed to resolve target: {}", target_str))?;

    let ranges = partition(config.total_qps, &config.ip_ranges)?;
    if ranges.is_empty() {
        anyhow::bail!("No address ranges configured in {}", args.config.display());
    }

    // Keep stdout clean for the JSON report
    if args.json {
        eprintln!("DNS load test against {} ({}), {} QPS", target_str, target, config.total_qps);
        write_range_table(&ranges, std::io::stderr())?;
    } else {
        println!("DNS load test against {} ({}), {} QPS", target_str, target, config.total_qps);
        write_range_table(&ranges, std::io::stdout())?;
    }

    if shares_unbalanced(&ranges) {
        warn!("Range shares sum to {}%, not 100%", total_share(&ranges));
    }
    if ranges.iter().any(|r| r.spoof)
        && let Err(e) = check_raw_permissions()
    {
        warn!("{}", e);
    }

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());
    if let Some(limit) = args.duration_limit() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    info!("Run duration of {:?} reached", limit);
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    let counters = SharedCounters::new(ranges.len());
    let started = Instant::now();

    let handles = start_workers(&ranges, target, &counters, &cancel).await;
    monitor(&args, &counters, &handles, &cancel, started).await;

    cancel.cancel();
    let elapsed = started.elapsed();
    info!("Stopping workers");
    let summaries = join_workers(handles, JOIN_TIMEOUT).await;

    let report = RunReport::new(target.to_string(), elapsed, &ranges, &counters, &summaries);
    if args.json {
        export_json(&report, std::io::stdout())?;
        println!();
    } else {
        generate_report(&report, std::io::stdout())?;
    }

    Ok(())
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        info!("Stop requested");
        cancel.cancel();
    });
}

fn resolve_target(target: &str) -> Result<Ipv4Addr> {
    // Try parsing as IP address first
    if let Ok(ip) = target.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => anyhow::bail!("IPv6 targets are not supported"),
        };
    }

    // Resolve hostname, first IPv4 answer wins
    format!("{}:0", target)
        .to_socket_addrs()?
        .find_map(|s| match s.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .context("No IPv4 addresses found for hostname")
}

/// One thread per range, started `WORKER_STAGGER` apart. A slot is `None`
/// when its thread could not be spawned or the run was cancelled first.
async fn start_workers(
    ranges: &[AddressRange],
    target: Ipv4Addr,
    counters: &Arc<SharedCounters>,
    cancel: &CancellationToken,
) -> Vec<Option<WorkerHandle>> {
    let mut handles = Vec::with_capacity(ranges.len());

    for (id, range) in ranges.iter().enumerate() {
        if cancel.is_cancelled() {
            handles.push(None);
            continue;
        }

        match spawn_worker(id, range.clone(), target, Arc::clone(counters), cancel.clone()) {
            Ok(handle) => handles.push(Some(handle)),
            Err(e) => {
                error!("Failed to spawn worker {} ({}): {}", id, range.name, e);
                handles.push(None);
            }
        }

        if id + 1 < ranges.len() {
            tokio::select! {
                _ = tokio::time::sleep(WORKER_STAGGER) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    handles
}

/// Print a progress line every interval until cancelled or every worker exits
async fn monitor(
    args: &Args,
    counters: &SharedCounters,
    handles: &[Option<WorkerHandle>],
    cancel: &CancellationToken,
    started: Instant,
) {
    let mut meter = ThroughputMeter::new();
    let mut ticker = tokio::time::interval(args.interval_duration());
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let line = format_progress(&meter.record(counters.sample(), started.elapsed()));
                if args.json {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }

                if handles.iter().flatten().all(|h| h.is_finished()) {
                    warn!("All workers have exited");
                    break;
                }
            }
        }
    }
}

/// Join each worker, giving up on any that outlive `timeout`
async fn join_workers(
    handles: Vec<Option<WorkerHandle>>,
    timeout: Duration,
) -> Vec<Option<WorkerSummary>> {
    let mut summaries = Vec::with_capacity(handles.len());

    for (id, handle) in handles.into_iter().enumerate() {
        let Some(handle) = handle else {
            summaries.push(None);
            continue;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(JOIN_POLL).await;
        }
        if !handle.is_finished() {
            // Threads cannot be killed; it ends with the process
            warn!("Worker {} did not stop within {:?}, abandoning it", id, timeout);
            summaries.push(None);
            continue;
        }

        match handle.join() {
            Ok(Ok(summary)) => summaries.push(Some(summary)),
            Ok(Err(e)) => {
                error!("Worker {} failed: {:#}", id, e);
                summaries.push(None);
            }
            Err(_) => {
                // Panics are caught inside the worker thread; this covers the rest
                error!("Worker {} thread failed", id);
                summaries.push(None);
            }
        }
    }

    summaries
}
