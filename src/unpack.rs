use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::ReplayResult;
use crate::packet::{PacketSource, StreamKey};
use crate::pcap_reader::PcapReader;
use crate::registry::StreamRegistry;
use crate::ts;

/// Totals for one unpacked capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub packets: u64,
    pub bytes: u64,
    pub streams: usize,
}

/// Demuxes a capture into one file per destination, named after the capture.
/// No pacing, duplicate or gap detection.
pub struct Unpacker {
    registry: StreamRegistry,
    packets: u64,
    bytes: u64,
}

impl Unpacker {
    /// `output_dir` defaults to the current directory.
    pub fn new(capture_path: &Path, output_dir: Option<&Path>) -> Self {
        let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        Self {
            registry: StreamRegistry::with_prefix(dir, capture_stem(capture_path)),
            packets: 0,
            bytes: 0,
        }
    }

    pub fn write(&mut self, dst: StreamKey, payload: &[u8]) -> ReplayResult<()> {
        if self.registry.register(dst)? {
            debug!("Found new UDP stream {}", dst);
        }
        let payload = ts::strip_rtp_if_synced(payload);
        self.registry.write(&dst, payload)?;
        self.packets += 1;
        self.bytes += payload.len() as u64;
        Ok(())
    }

    pub fn finish(&mut self) -> ReplayResult<UnpackStats> {
        self.registry.finish()?;
        Ok(UnpackStats {
            packets: self.packets,
            bytes: self.bytes,
            streams: self.registry.len(),
        })
    }
}

/// File name of `path` with everything from its last `.` removed. A dot-file
/// such as `.pcap` yields an empty stem.
fn capture_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(dot) => name[..dot].to_string(),
        None => name,
    }
}

/// Unpacks every packet of `source`, which was read from `capture_path`.
pub fn unpack_source<S: PacketSource>(
    source: &mut S,
    capture_path: &Path,
    output_dir: Option<&Path>,
    running: &AtomicBool,
) -> ReplayResult<UnpackStats> {
    let mut unpacker = Unpacker::new(capture_path, output_dir);
    let result = drain(source, &mut unpacker, running);
    let stats = unpacker.finish();
    result?;
    stats
}

fn drain<S: PacketSource>(source: &mut S, unpacker: &mut Unpacker, running: &AtomicBool) -> ReplayResult<()> {
    while running.load(Ordering::Relaxed) {
        let Some(packet) = source.next_packet()? else {
            break;
        };
        let dst = StreamKey::new(*packet.dst.ip(), packet.dst.port());
        unpacker.write(dst, &packet.payload)?;
    }
    Ok(())
}

/// Unpacks each capture in turn; each gets its own set of output files.
pub fn unpack_captures(
    captures: &[PathBuf],
    output_dir: Option<&Path>,
    running: &AtomicBool,
) -> ReplayResult<Vec<UnpackStats>> {
    let mut all = Vec::with_capacity(captures.len());
    for capture in captures {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        info!("Unpacking {}", capture.display());
        let mut reader = PcapReader::new(capture)?;
        let stats = unpack_source(&mut reader, capture, output_dir, running)?;
        info!(
            "{}: {} packets, {} bytes in {} streams",
            capture.display(),
            stats.packets,
            stats.bytes,
            stats.streams
        );
        all.push(stats);
    }
    Ok(all)
}
