use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::error::{ReplayError, ReplayResult};
use crate::pacing::Pacer;
use crate::packet::{PacketSource, StreamKey};
use crate::port_map::PortMap;
use crate::registry::StreamRegistry;
use crate::sender::UdpSender;
use crate::ts::{self, Framing, TS_PACKET_SIZE};

/// Largest accepted payload after framing is stripped: 7 TS packets, the
/// usual UDP/RTP bundle.
pub const LAST_PAYLOAD_CAPACITY: usize = 7 * TS_PACKET_SIZE;

const PROGRESS_INTERVAL: u64 = 10_000;
const LARGE_GAP: Duration = Duration::from_secs(2);

/// Silence before a packet, measured against the configured gap threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gap {
    None,
    OverThreshold(f64),
    /// Longer than two seconds.
    Large(f64),
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub packets: u64,
    pub repeated_packets: u64,
    pub streams: usize,
    pub non_ts_streams: usize,
    pub sent_packets: u64,
    pub sent_bytes: u64,
}

/// Classifies, filters and paces the UDP packets of one replay run.
///
/// Packets from all destinations share one timeline: waiting for a packet's
/// send time holds back every stream.
pub struct ReplayScheduler {
    config: ReplayConfig,
    registry: StreamRegistry,
    sender: Option<UdpSender>,
    pacer: Option<Pacer>,
    packet_count: u64,
    repeated_count: u64,
    last_payload: Vec<u8>,
    last_packet_time: f64,
}

impl ReplayScheduler {
    pub fn new(config: ReplayConfig) -> ReplayResult<Self> {
        config.validate()?;
        let registry = StreamRegistry::new(config.output_dir.clone());
        let sender = config.target.map(UdpSender::new);
        Ok(Self {
            config,
            registry,
            sender,
            pacer: None,
            packet_count: 0,
            repeated_count: 0,
            last_payload: Vec::with_capacity(LAST_PAYLOAD_CAPACITY),
            last_packet_time: 0.0,
        })
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Handles one packet for stream `dst`. Returns true once a packet or
    /// duration limit has been reached.
    pub fn submit(&mut self, dst: StreamKey, payload: &[u8], timestamp: f64) -> ReplayResult<bool> {
        let pacer = *self.pacer.get_or_insert_with(|| {
            info!("Start time of capture: {:.6}", timestamp);
            Pacer::new(timestamp, Instant::now())
        });

        if self.registry.register(dst)? {
            info!("Found new UDP stream {}", dst);
        }

        let framing = Framing::classify(payload);
        if framing == Framing::Raw && payload == self.last_payload.as_slice() && !ts::is_all_stuffing(payload) {
            self.repeated_count += 1;
            self.packet_count += 1;
            debug!("Repeated packet {} for stream {}", self.packet_count, dst);
            return Ok(false);
        }

        let payload = match framing {
            Framing::Raw => Some(payload),
            Framing::Rtp => Some(ts::strip_rtp(payload)),
            Framing::Unknown => {
                if self.registry.mark_not_transport_stream(&dst) {
                    warn!(
                        "stream {}: udp payload size {} indicates not a TS stream",
                        dst,
                        payload.len()
                    );
                }
                None
            }
        };

        match self.classify_gap(timestamp) {
            Gap::None => {}
            Gap::OverThreshold(gap) => {
                debug!("gap of {:.3}s before packet {}", gap, self.packet_count)
            }
            Gap::Large(gap) => {
                warn!("gap detected: {:.3}s before packet {}", gap, self.packet_count)
            }
        }
        self.packet_count += 1;
        self.last_packet_time = timestamp;

        if let Some(payload) = payload {
            if payload.len() > LAST_PAYLOAD_CAPACITY {
                return Err(ReplayError::Capacity {
                    size: payload.len(),
                    capacity: LAST_PAYLOAD_CAPACITY,
                });
            }
            self.last_payload.clear();
            self.last_payload.extend_from_slice(payload);

            self.registry.write(&dst, payload)?;
            if let Some(sender) = self.sender.as_mut() {
                pacer.wait_for(timestamp);
                sender.send(&dst, payload)?;
            }
        }

        let elapsed = timestamp - pacer.capture_epoch();
        if self.packet_count % PROGRESS_INTERVAL == 0 {
            info!(
                "Read and sent {} packets {:.3}s ({} repeated)",
                self.packet_count, elapsed, self.repeated_count
            );
        }

        Ok(self.limit_reached(elapsed))
    }

    /// Gap since the last counted packet. Always `Gap::None` without a
    /// threshold or before the first packet.
    fn classify_gap(&self, timestamp: f64) -> Gap {
        let Some(threshold) = self.config.gap_threshold else {
            return Gap::None;
        };
        if self.packet_count == 0 {
            return Gap::None;
        }
        let gap = timestamp - self.last_packet_time;
        if gap <= threshold.as_secs_f64() {
            Gap::None
        } else if gap > LARGE_GAP.as_secs_f64() {
            Gap::Large(gap)
        } else {
            Gap::OverThreshold(gap)
        }
    }

    fn limit_reached(&self, elapsed: f64) -> bool {
        self.packet_count >= self.config.max_packets
            || elapsed.max(0.0) as u64 >= self.config.max_seconds
    }

    /// Closes all output files and reports the run totals.
    pub fn finish(&mut self) -> ReplayResult<ReplayStats> {
        self.registry.finish()?;
        let (sent_packets, sent_bytes) = self.sender.as_ref().map(|s| s.stats()).unwrap_or_default();
        Ok(ReplayStats {
            packets: self.packet_count,
            repeated_packets: self.repeated_count,
            streams: self.registry.len(),
            non_ts_streams: self.registry.non_transport_stream_count(),
            sent_packets,
            sent_bytes,
        })
    }
}

/// Feeds `source` through `scheduler` until the capture ends, a limit is
/// reached or `running` is cleared.
pub fn drive<S: PacketSource>(
    source: &mut S,
    scheduler: &mut ReplayScheduler,
    port_map: &PortMap,
    running: &AtomicBool,
) -> ReplayResult<()> {
    while running.load(Ordering::Relaxed) {
        let Some(packet) = source.next_packet()? else {
            return Ok(());
        };

        let dst = StreamKey::new(*packet.dst.ip(), port_map.remap(packet.dst.port()));
        debug!(
            "From {} to {} length={}",
            packet.src,
            dst,
            packet.payload.len()
        );
        if scheduler.submit(dst, &packet.payload, packet.timestamp)? {
            info!("Replay limit reached after {} packets", scheduler.packet_count());
            return Ok(());
        }
    }
    info!("Replay interrupted after {} packets", scheduler.packet_count());
    Ok(())
}

/// One complete replay run over `source`. Output files are closed on every
/// exit path.
pub fn run_replay<S: PacketSource>(
    source: &mut S,
    config: ReplayConfig,
    port_map: &PortMap,
    running: &AtomicBool,
) -> ReplayResult<ReplayStats> {
    let mut scheduler = ReplayScheduler::new(config)?;
    let result = drive(source, &mut scheduler, port_map, running);
    let stats = scheduler.finish();
    result?;
    stats
}
