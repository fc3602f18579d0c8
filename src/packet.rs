use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::ReplayResult;

/// One UDP datagram decoded from a capture record.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub timestamp: f64,        // Capture timestamp (seconds since epoch)
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: Vec<u8>,      // UDP payload
}

impl DecodedPacket {
    pub fn new(timestamp: f64, src: SocketAddrV4, dst: SocketAddrV4, payload: Vec<u8>) -> Self {
        Self {
            timestamp,
            src,
            dst,
            payload,
        }
    }
}

/// Yields decoded UDP packets in capture order; `Ok(None)` at end of capture.
pub trait PacketSource {
    fn next_packet(&mut self) -> ReplayResult<Option<DecodedPacket>>;
}

/// Destination of a logical output stream, after port remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl StreamKey {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// `10.0.0.1:1234` becomes `10_0_0_1_1234`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.addr.to_string().replace('.', "_"), self.port)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
impl PacketSource for std::vec::IntoIter<DecodedPacket> {
    fn next_packet(&mut self) -> ReplayResult<Option<DecodedPacket>> {
        Ok(self.next())
    }
}
