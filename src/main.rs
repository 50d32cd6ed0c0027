use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use netcreep_capture::analysis::{port_activity, protocol_distribution, top_talkers};
use netcreep_capture::config::{
    parse_interface_list, CaptureConfig, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_MAX_STORED_PACKETS,
};
use netcreep_capture::interfaces::{list_interfaces, resolve_interfaces};
use netcreep_capture::pipeline::{CaptureStatus, PcapBackend};
use netcreep_capture::{CaptureManager, MemoryStore, PacketRecord, PacketStore};

#[derive(Parser, Debug)]
#[command(name = "netcreep-capture")]
#[command(about = "Live packet capture pipeline for the netcreep monitoring dashboard")]
#[command(version)]
struct Args {
    /// Verbose logging (default: false)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture live traffic into a capped in-memory packet store
    Capture {
        /// Interfaces to capture on (comma-separated, default: auto-detect)
        #[arg(short, long, env = "NETCREEP_CAPTURE_INTERFACES")]
        interfaces: Option<String>,

        /// Maximum packets waiting between capture and storage
        #[arg(short, long, env = "NETCREEP_MAX_QUEUE_SIZE", default_value_t = DEFAULT_MAX_QUEUE_DEPTH)]
        queue_size: usize,

        /// Maximum packets kept in the store; oldest are evicted first
        #[arg(short = 's', long, env = "NETCREEP_MAX_PACKET_STORE", default_value_t = DEFAULT_MAX_STORED_PACKETS)]
        max_stored: usize,

        /// BPF capture filter, e.g. "tcp port 80"
        #[arg(short, long, env = "NETCREEP_PACKET_FILTER")]
        filter: Option<String>,

        /// Per-interface capture time limit in seconds
        #[arg(long, env = "NETCREEP_CAPTURE_TIMEOUT")]
        timeout: Option<u64>,

        /// Per-interface packet limit
        #[arg(long, env = "NETCREEP_MAX_PACKETS")]
        max_packets: Option<u64>,

        /// Time to run in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Report interval in seconds
        #[arg(short = 'r', long, default_value = "5")]
        interval: u64,

        /// Do not put interfaces into promiscuous mode
        #[arg(long)]
        no_promisc: bool,
    },
    /// List host interfaces and the ones capture would use
    Interfaces,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .init();

    match args.command {
        Commands::Capture {
            interfaces,
            queue_size,
            max_stored,
            filter,
            timeout,
            max_packets,
            duration,
            interval,
            no_promisc,
        } => {
            let config = CaptureConfig {
                interfaces: interfaces.as_deref().map(parse_interface_list).unwrap_or_default(),
                max_queue_depth: queue_size,
                max_stored_packets: max_stored,
                filter: filter.filter(|f| !f.trim().is_empty()),
                worker_timeout: timeout.map(Duration::from_secs),
                max_packets_per_worker: max_packets,
                promiscuous: !no_promisc,
                ..CaptureConfig::default()
            };
            run_capture(config, duration, interval).await
        }
        Commands::Interfaces => {
            print_interfaces();
            Ok(())
        }
    }
}

async fn run_capture(config: CaptureConfig, duration: u64, interval: u64) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CaptureManager::new(Arc::new(PcapBackend), store.clone()));

    let handle = manager.start_capture(config)?;
    let start_time = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let run_for = async move {
        if duration > 0 {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(run_for);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = &mut run_for => {
                info!("Run duration ({} seconds) completed", duration);
                break;
            }
            _ = ticker.tick() => {
                log_status(&manager.status());
            }
        }
    }

    let stopper = manager.clone();
    let report = tokio::task::spawn_blocking(move || stopper.stop_capture(&handle)).await?;
    if !report.abandoned.is_empty() {
        warn!("Units abandoned at shutdown: {:?}", report.abandoned);
    }

    let status = manager.status();
    let stored: Vec<PacketRecord> = store
        .recent(usize::MAX)?
        .into_iter()
        .map(|row| row.record)
        .collect();
    print_summary(&status, &stored, start_time.elapsed());

    info!("netcreep capture shutdown complete");
    Ok(())
}

fn log_status(status: &CaptureStatus) {
    info!(
        "State: {} - Workers: {} active - Queue: {} - Stored: {} (evicted {}, failed {})",
        status.state,
        status.active_workers,
        status.queued,
        status.consumer.persisted,
        status.consumer.evicted,
        status.consumer.failed
    );
    for iface in &status.interfaces {
        info!(
            "  {}{}: seen {} - queued {} - dropped {} - malformed {} - non-IP {}",
            iface.name,
            if iface.active { "" } else { " (stopped)" },
            iface.stats.frames_seen,
            iface.stats.enqueued,
            iface.stats.dropped_queue_full,
            iface.stats.malformed,
            iface.stats.skipped_non_ip
        );
    }
}

fn print_summary(status: &CaptureStatus, stored: &[PacketRecord], elapsed: Duration) {
    info!("======= CAPTURE SUMMARY =======");
    info!("Total time: {:.2} seconds", elapsed.as_secs_f64());
    log_status(status);
    for (name, reason) in &status.failed_interfaces {
        info!("  {} not captured: {}", name, reason);
    }
    info!("Packets in store: {}", stored.len());

    println!("\n{:<8} {:<10}", "Protocol", "Packets");
    println!("{}", "─".repeat(20));
    for (protocol, count) in protocol_distribution(stored) {
        println!("{:<8} {:<10}", protocol, count);
    }

    println!("\n{:<40} {:<10} {:<12}", "Source", "Packets", "Bytes");
    println!("{}", "─".repeat(64));
    for talker in top_talkers(stored, 10) {
        println!("{:<40} {:<10} {:<12}", talker.address, talker.packets, talker.bytes);
    }

    println!("\n{:<8} {:<10}", "Port", "Packets");
    println!("{}", "─".repeat(20));
    for (port, count) in port_activity(stored, 10) {
        println!("{:<8} {:<10}", port, count);
    }
    info!("===============================");
}

fn print_interfaces() {
    let interfaces = list_interfaces();
    println!("{:<20} {:<6} {:<9} {}", "Interface", "Up", "Loopback", "Addresses");
    println!("{}", "─".repeat(70));
    for iface in &interfaces {
        let addresses: Vec<String> = iface.addresses.iter().map(|a| a.to_string()).collect();
        println!(
            "{:<20} {:<6} {:<9} {}",
            iface.name,
            iface.is_up,
            iface.is_loopback,
            addresses.join(", ")
        );
    }
    println!("\nCapture would use: {}", resolve_interfaces().join(", "));
}
