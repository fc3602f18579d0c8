use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, warn};

use crate::error::{ReplayError, ReplayResult};
use crate::packet::StreamKey;

const SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// Sends every stream to one target address, keeping each stream's port.
/// The socket is opened on first use and reused for the whole run.
pub struct UdpSender {
    target_ip: Ipv4Addr,
    socket: Option<Socket>,
    sent_packets: u64,
    sent_bytes: u64,
}

impl UdpSender {
    pub fn new(target_ip: Ipv4Addr) -> Self {
        Self {
            target_ip,
            socket: None,
            sent_packets: 0,
            sent_bytes: 0,
        }
    }

    pub fn destination(&self, dst: &StreamKey) -> SocketAddrV4 {
        SocketAddrV4::new(self.target_ip, dst.port)
    }

    pub fn send(&mut self, dst: &StreamKey, payload: &[u8]) -> ReplayResult<()> {
        let dest_addr = SocketAddr::V4(self.destination(dst));
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => open_socket()?,
        };
        let socket = self.socket.insert(socket);

        let sent = socket
            .send_to(payload, &dest_addr.into())
            .map_err(|e| ReplayError::Send { dst: *dst, source: e })?;
        if sent != payload.len() {
            return Err(ReplayError::ShortWrite {
                dst: *dst,
                sent,
                expected: payload.len(),
            });
        }

        self.sent_packets += 1;
        self.sent_bytes += sent as u64;
        Ok(())
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.sent_packets, self.sent_bytes)
    }
}

fn open_socket() -> ReplayResult<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ReplayError::io("error creating UDP socket", e))?;
    if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
        warn!("Failed to set send buffer size: {}", e);
    }
    let local: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
    socket
        .bind(&local.into())
        .map_err(|e| ReplayError::io("error binding UDP socket", e))?;
    debug!("Opened outbound UDP socket");
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;

    #[test]
    fn test_sends_to_target_on_stream_port() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sender = UdpSender::new(Ipv4Addr::LOCALHOST);
        let dst = StreamKey::new(Ipv4Addr::new(239, 1, 1, 1), port);
        assert_eq!(sender.destination(&dst), SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));

        sender.send(&dst, b"hello").unwrap();
        sender.send(&dst, b"world!").unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world!");
        assert_eq!(sender.stats(), (2, 11));
    }
}
