//! Minimal MPEG-2 transport stream knowledge: packet size, RTP framing and
//! null-packet detection. Nothing beyond the PID is ever inspected.

pub const TS_PACKET_SIZE: usize = 188;
pub const RTP_HEADER_SIZE: usize = 12;
pub const SYNC_BYTE: u8 = 0x47;
pub const NULL_PID: u16 = 0x1FFF;

/// How a UDP payload is framed, judged from its length alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One or more whole TS packets.
    Raw,
    /// TS packets behind a 12-byte RTP header.
    Rtp,
    /// Any other length; not a transport stream.
    Unknown,
}

impl Framing {
    pub fn classify(payload: &[u8]) -> Self {
        match payload.len() % TS_PACKET_SIZE {
            0 => Framing::Raw,
            RTP_HEADER_SIZE => Framing::Rtp,
            _ => Framing::Unknown,
        }
    }
}

/// 13-bit packet identifier of the TS packet starting at `unit[0]`.
#[inline]
pub fn pid(unit: &[u8]) -> u16 {
    (((unit[1] & 0x1f) as u16) << 8) | unit[2] as u16
}

/// True when every 188-byte unit of `payload` is a null packet.
pub fn is_all_stuffing(payload: &[u8]) -> bool {
    payload
        .chunks_exact(TS_PACKET_SIZE)
        .all(|unit| pid(unit) == NULL_PID)
}

/// Payload with the RTP header removed, for replay.
pub fn strip_rtp(payload: &[u8]) -> &[u8] {
    &payload[RTP_HEADER_SIZE..]
}

/// Unpack only strips the header when a sync byte follows it.
pub fn strip_rtp_if_synced(payload: &[u8]) -> &[u8] {
    if Framing::classify(payload) == Framing::Rtp && payload.get(RTP_HEADER_SIZE) == Some(&SYNC_BYTE) {
        &payload[RTP_HEADER_SIZE..]
    } else {
        payload
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_classify_by_length() {
        assert_eq!(Framing::classify(&[0u8; 188]), Framing::Raw);
        assert_eq!(Framing::classify(&[0u8; 7 * 188]), Framing::Raw);
        assert_eq!(Framing::classify(&[0u8; 200]), Framing::Rtp);
        assert_eq!(Framing::classify(&[0u8; 7 * 188 + 12]), Framing::Rtp);
        assert_eq!(Framing::classify(&[0u8; 100]), Framing::Unknown);
        assert_eq!(Framing::classify(&[]), Framing::Raw);
    }

    #[test]
    fn test_pid_extraction() {
        let data = ts_packets(0x0100, 1, 0);
        assert_eq!(pid(&data), 0x0100);
        let data = ts_packets(NULL_PID, 1, 0xff);
        assert_eq!(pid(&data), NULL_PID);
        // upper three bits of byte 1 are flags, not PID
        assert_eq!(pid(&[0x47, 0xff, 0xff]), NULL_PID);
    }

    #[test]
    fn test_all_stuffing() {
        assert!(is_all_stuffing(&ts_packets(NULL_PID, 7, 0xff)));

        let mut mixed = ts_packets(NULL_PID, 6, 0xff);
        mixed.extend_from_slice(&ts_packets(0x0044, 1, 0));
        assert!(!is_all_stuffing(&mixed));
    }

    #[test]
    fn test_strip_rtp() {
        let ts = ts_packets(0x0100, 2, 7);
        let rtp = rtp_wrapped(&ts, 1);
        assert_eq!(strip_rtp(&rtp), &ts[..]);
    }

    #[test]
    fn test_strip_rtp_if_synced() {
        let ts = ts_packets(0x0100, 1, 7);
        let rtp = rtp_wrapped(&ts, 1);
        assert_eq!(strip_rtp_if_synced(&rtp), &ts[..]);

        // no sync byte after the header: left intact
        let mut bogus = rtp.clone();
        bogus[RTP_HEADER_SIZE] = 0x00;
        assert_eq!(strip_rtp_if_synced(&bogus), &bogus[..]);

        // raw and unknown payloads untouched
        assert_eq!(strip_rtp_if_synced(&ts), &ts[..]);
        assert_eq!(strip_rtp_if_synced(&[1, 2, 3]), &[1, 2, 3]);
        // bare header with nothing behind it
        assert_eq!(strip_rtp_if_synced(&[0x80; 12]), &[0x80; 12]);
    }
}
