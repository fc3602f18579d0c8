use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

mod config;
mod error;
mod packet;
mod pacing;
mod pcap_reader;
mod port_map;
mod registry;
mod scheduler;
mod sender;
mod ts;
mod unpack;

use config::{ReplayConfig, DEFAULT_MAX_PACKETS, DEFAULT_MAX_SECONDS};
use pcap_reader::PcapReader;
use port_map::PortMap;
use scheduler::ReplayStats;

#[derive(Parser, Debug)]
#[command(name = "ts-pcap-replay")]
#[command(about = "Replay or unpack MPEG-TS over UDP streams from a Wireshark/tcpdump capture")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay UDP streams with their captured timing, or export them to files
    ///
    /// The destination IP address is replaced by --addr and destination ports
    /// can be mapped to new values.
    Replay {
        /// Input capture file
        #[arg(long)]
        pcap: PathBuf,

        /// Destination IP address for replayed streams
        #[arg(long)]
        addr: Option<Ipv4Addr>,

        /// Destination directory for exported streams
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Port mapping (e.g. 1234:5678,2345:6789)
        #[arg(long, default_value = "")]
        portmap: String,

        /// Loop the capture without rewriting packets
        #[arg(long)]
        naive_loop: bool,

        /// Report gaps between packets longer than this many milliseconds
        #[arg(long)]
        gap_threshold_ms: Option<u64>,

        /// Stop after this many packets
        #[arg(long, default_value_t = DEFAULT_MAX_PACKETS)]
        max_packets: u64,

        /// Stop after this many seconds of capture time
        #[arg(long, default_value_t = DEFAULT_MAX_SECONDS)]
        max_seconds: u64,
    },
    /// Unpack UDP streams to files named <capture>_<address>_<port>.ts
    Unpack {
        /// Destination directory for output files
        #[arg(long)]
        dst: Option<PathBuf>,

        /// Capture files to unpack
        #[arg(required = true)]
        pcaps: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down...");
        running_clone.store(false, Ordering::Relaxed);
    });

    // Pacing sleeps on the driving thread, so keep it off the async workers.
    tokio::task::spawn_blocking(move || run(args.command, &running))
        .await
        .context("replay thread panicked")?
}

fn run(command: Commands, running: &AtomicBool) -> Result<()> {
    match command {
        Commands::Replay {
            pcap,
            addr,
            dir,
            portmap,
            naive_loop,
            gap_threshold_ms,
            max_packets,
            max_seconds,
        } => {
            let port_map: PortMap = portmap.parse()?;
            let config = ReplayConfig {
                target: addr,
                output_dir: dir,
                gap_threshold: gap_threshold_ms.map(Duration::from_millis),
                max_packets,
                max_seconds,
            };
            config.validate()?;

            info!("Starting replay of {}", pcap.display());
            if let Some(target) = config.target {
                info!("Target IP: {}", target);
            }
            if let Some(dir) = &config.output_dir {
                info!("Output directory: {}", dir.display());
            }
            if !port_map.is_empty() {
                info!("Port map with {} entries", port_map.len());
            }
            replay_loop(&pcap, &config, &port_map, naive_loop, running)
        }
        Commands::Unpack { dst, pcaps } => {
            let stats = unpack::unpack_captures(&pcaps, dst.as_deref(), running)?;
            info!("Unpacked {} capture files", stats.len());
            Ok(())
        }
    }
}

fn replay_loop(
    pcap: &Path,
    config: &ReplayConfig,
    port_map: &PortMap,
    naive_loop: bool,
    running: &AtomicBool,
) -> Result<()> {
    let start_time = Instant::now();
    let mut replay_count = 0u64;

    loop {
        replay_count += 1;
        let mut reader = PcapReader::new(pcap)?;
        let stats = scheduler::run_replay(&mut reader, config.clone(), port_map, running)
            .with_context(|| format!("replay #{} of {}", replay_count, pcap.display()))?;
        log_summary(&stats, replay_count);

        if !naive_loop || !running.load(Ordering::Relaxed) {
            break;
        }
        info!("Loop {} done", replay_count);
    }

    info!(
        "Replay finished after {} loop(s) in {:.2} seconds",
        replay_count,
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn log_summary(stats: &ReplayStats, replay_count: u64) {
    info!("======= REPLAY SUMMARY #{} =======", replay_count);
    info!("Packets processed: {} ({} repeated)", stats.packets, stats.repeated_packets);
    info!("Streams: {} ({} not TS)", stats.streams, stats.non_ts_streams);
    if stats.sent_packets > 0 {
        info!(
            "Sent: {} packets, {} bytes ({:.2} MB)",
            stats.sent_packets,
            stats.sent_bytes,
            stats.sent_bytes as f64 / (1024.0 * 1024.0)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_replay_args() {
        let args = Args::parse_from([
            "ts-pcap-replay",
            "replay",
            "--pcap",
            "in.pcap",
            "--addr",
            "127.0.0.1",
            "--portmap",
            "1234:5678",
            "--max-packets",
            "10",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.log_level, tracing::Level::DEBUG);
        match args.command {
            Commands::Replay {
                addr,
                portmap,
                max_packets,
                max_seconds,
                naive_loop,
                ..
            } => {
                assert_eq!(addr, Some(Ipv4Addr::LOCALHOST));
                assert_eq!(portmap, "1234:5678");
                assert_eq!(max_packets, 10);
                assert_eq!(max_seconds, DEFAULT_MAX_SECONDS);
                assert!(!naive_loop);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unpack_requires_capture() {
        assert!(Args::try_parse_from(["ts-pcap-replay", "unpack", "--dst", "out"]).is_err());
        let args = Args::try_parse_from(["ts-pcap-replay", "unpack", "a.pcap", "b.pcap"]).unwrap();
        match args.command {
            Commands::Unpack { dst, pcaps } => {
                assert_eq!(dst, None);
                assert_eq!(pcaps.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_replay_without_sink_is_rejected() {
        let running = AtomicBool::new(true);
        let command = Commands::Replay {
            pcap: PathBuf::from("in.pcap"),
            addr: None,
            dir: None,
            portmap: String::new(),
            naive_loop: false,
            gap_threshold_ms: None,
            max_packets: DEFAULT_MAX_PACKETS,
            max_seconds: DEFAULT_MAX_SECONDS,
        };
        let err = run(command, &running).unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_bad_port_map_is_rejected_before_reading() {
        let running = AtomicBool::new(true);
        let command = Commands::Replay {
            pcap: PathBuf::from("/nonexistent.pcap"),
            addr: Some(Ipv4Addr::LOCALHOST),
            dir: None,
            portmap: "1234".into(),
            naive_loop: false,
            gap_threshold_ms: None,
            max_packets: DEFAULT_MAX_PACKETS,
            max_seconds: DEFAULT_MAX_SECONDS,
        };
        let err = run(command, &running).unwrap_err();
        assert!(err.to_string().contains("port mapping"));
    }
}
