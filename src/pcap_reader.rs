use pcap::{Capture, Error as PcapError, Linktype, Offline};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::sll::SLLPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ReplayError, ReplayResult};
use crate::packet::{DecodedPacket, PacketSource};

// libpcap reports raw-IP savefiles by the platform DLT value rather than
// LINKTYPE_RAW (101).
const DLT_RAW: Linktype = Linktype(12);
const DLT_RAW_OPENBSD: Linktype = Linktype(14);

/// Reads IPv4 UDP datagrams from a capture file, skipping everything else.
pub struct PcapReader {
    capture: Capture<Offline>,
    linktype: Linktype,
    sequence: u64,
    udp_packets: u64,
    file_path: PathBuf,
}

impl PcapReader {
    pub fn new(file_path: impl AsRef<Path>) -> ReplayResult<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        debug!("Opening capture file with libpcap: {}", file_path.display());

        let capture = Capture::from_file(&file_path).map_err(|e| ReplayError::Capture {
            path: file_path.clone(),
            source: e,
        })?;
        let linktype = capture.get_datalink();
        if !is_supported(linktype) {
            warn!(
                "{}: link type {:?} not supported, no packets will be read",
                file_path.display(),
                linktype
            );
        }

        Ok(Self {
            capture,
            linktype,
            sequence: 0,
            udp_packets: 0,
            file_path,
        })
    }
}

impl PacketSource for PcapReader {
    fn next_packet(&mut self) -> ReplayResult<Option<DecodedPacket>> {
        loop {
            let packet = match self.capture.next_packet() {
                Ok(packet) => packet,
                Err(PcapError::NoMorePackets) => {
                    info!(
                        "End of capture {}: {} records, {} UDP packets",
                        self.file_path.display(),
                        self.sequence,
                        self.udp_packets
                    );
                    return Ok(None);
                }
                Err(e) => {
                    return Err(ReplayError::Capture {
                        path: self.file_path.clone(),
                        source: e,
                    });
                }
            };

            self.sequence += 1;
            let timestamp =
                packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 / 1_000_000.0;

            let Some((src, dst, payload)) = decode_udp(self.linktype, packet.data) else {
                continue;
            };
            self.udp_packets += 1;

            return Ok(Some(DecodedPacket::new(timestamp, src, dst, payload)));
        }
    }
}

fn is_supported(linktype: Linktype) -> bool {
    linktype == Linktype::ETHERNET || linktype == Linktype::LINUX_SLL || is_raw_ip(linktype)
}

fn is_raw_ip(linktype: Linktype) -> bool {
    linktype == Linktype::RAW
        || linktype == Linktype::IPV4
        || linktype == DLT_RAW
        || linktype == DLT_RAW_OPENBSD
}

/// Source, destination and payload of an IPv4 UDP frame; `None` for anything
/// else.
pub fn decode_udp(linktype: Linktype, data: &[u8]) -> Option<(SocketAddrV4, SocketAddrV4, Vec<u8>)> {
    if linktype == Linktype::ETHERNET {
        let ethernet = EthernetPacket::new(data)?;
        let (ethertype, offset) = match ethernet.get_ethertype() {
            EtherTypes::Vlan => {
                let vlan = VlanPacket::new(ethernet.payload())?;
                (vlan.get_ethertype(), EthernetPacket::minimum_packet_size() + VlanPacket::minimum_packet_size())
            }
            other => (other, EthernetPacket::minimum_packet_size()),
        };
        decode_ipv4_by_ethertype(ethertype, &data[offset..])
    } else if linktype == Linktype::LINUX_SLL {
        let sll = SLLPacket::new(data)?;
        decode_ipv4_by_ethertype(sll.get_protocol(), sll.payload())
    } else if is_raw_ip(linktype) {
        decode_ipv4(data)
    } else {
        None
    }
}

fn decode_ipv4_by_ethertype(
    ethertype: EtherType,
    data: &[u8],
) -> Option<(SocketAddrV4, SocketAddrV4, Vec<u8>)> {
    if ethertype != EtherTypes::Ipv4 {
        return None;
    }
    decode_ipv4(data)
}

fn decode_ipv4(data: &[u8]) -> Option<(SocketAddrV4, SocketAddrV4, Vec<u8>)> {
    let ipv4 = Ipv4Packet::new(data)?;
    if ipv4.get_version() != 4 || ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    // later fragments carry no UDP header
    if ipv4.get_fragment_offset() != 0 {
        return None;
    }

    let udp = UdpPacket::new(ipv4.payload())?;
    let src = SocketAddrV4::new(ipv4.get_source(), udp.get_source());
    let dst = SocketAddrV4::new(ipv4.get_destination(), udp.get_destination());
    Some((src, dst, udp.payload().to_vec()))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pcap_file::DataLink;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tempfile::TempDir;

    const DST: (Ipv4Addr, u16) = (Ipv4Addr::new(239, 0, 0, 1), 5000);

    #[test]
    fn test_decode_ethernet_udp() {
        let frame = Frame::udp(0, DST, vec![1, 2, 3, 4]);
        let (src, dst, payload) = decode_udp(Linktype::ETHERNET, &udp_frame(&frame)).unwrap();
        assert_eq!(src, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 12345));
        assert_eq!(dst, SocketAddrV4::new(DST.0, DST.1));
        assert_eq!(payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_vlan_and_raw_ip() {
        let frame = Frame::udp(0, DST, vec![9; 188]);
        let (_, dst, payload) = decode_udp(Linktype::ETHERNET, &vlan_udp_frame(&frame, 42)).unwrap();
        assert_eq!(dst.port(), 5000);
        assert_eq!(payload.len(), 188);

        let raw_ip = &udp_frame(&frame)[14..];
        let (_, dst, _) = decode_udp(Linktype::RAW, raw_ip).unwrap();
        assert_eq!(*dst.ip(), DST.0);
        for dlt in [Linktype(12), Linktype(14)] {
            assert!(is_supported(dlt));
            let (_, dst, _) = decode_udp(dlt, raw_ip).unwrap();
            assert_eq!(dst.port(), DST.1);
        }
    }

    #[test]
    fn test_non_udp_is_skipped() {
        assert!(decode_udp(Linktype::ETHERNET, &tcp_frame(&[0; 40])).is_none());
        assert!(decode_udp(Linktype::ETHERNET, &[0u8; 6]).is_none());
    }

    #[test]
    fn test_ethernet_trailer_not_in_payload() {
        // short frames are padded to the Ethernet minimum
        let frame = Frame::udp(0, DST, vec![7, 7]);
        let mut data = udp_frame(&frame);
        data.extend_from_slice(&[0u8; 16]);
        let (_, _, payload) = decode_udp(Linktype::ETHERNET, &data).unwrap();
        assert_eq!(payload, vec![7, 7]);
    }

    #[test]
    fn test_reader_yields_udp_in_capture_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("capture.pcap");
        let first = Frame::udp(0, DST, vec![1; 188]);
        let second = Frame::udp(250, (Ipv4Addr::new(239, 0, 0, 2), 6000), vec![2; 188]);
        write_capture(
            &path,
            &[
                (first.timestamp, udp_frame(&first)),
                (Duration::from_millis(1_700_000_000_100), tcp_frame(&[0; 20])),
                (second.timestamp, udp_frame(&second)),
            ],
        );

        let mut reader = PcapReader::new(&path).unwrap();
        let a = reader.next_packet().unwrap().unwrap();
        let b = reader.next_packet().unwrap().unwrap();
        assert!(reader.next_packet().unwrap().is_none());

        assert_eq!(a.dst, SocketAddrV4::new(DST.0, DST.1));
        assert_eq!(a.payload, vec![1; 188]);
        assert_eq!(b.dst.port(), 6000);
        assert!((b.timestamp - a.timestamp - 0.25).abs() < 1e-6);
        assert_eq!(reader.sequence, 3);
        assert_eq!(reader.udp_packets, 2);
    }

    #[test]
    fn test_reader_raw_ip_capture() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("raw.pcap");
        let frame = Frame::udp(0, DST, vec![3; 188]);
        write_capture_with_link(
            &path,
            DataLink::RAW,
            &[(frame.timestamp, udp_frame(&frame)[14..].to_vec())],
        );

        let mut reader = PcapReader::new(&path).unwrap();
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.dst, SocketAddrV4::new(DST.0, DST.1));
        assert_eq!(packet.payload, vec![3; 188]);
        assert!(reader.next_packet().unwrap().is_none());
        assert_eq!(reader.udp_packets, 1);
    }

    #[test]
    fn test_missing_file_is_capture_error() {
        let err = PcapReader::new("/nonexistent/capture.pcap").err().unwrap();
        assert!(matches!(err, ReplayError::Capture { .. }));
    }
}
