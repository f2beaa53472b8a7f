//! UMDF packet framing
//!
//! A packet is a 16-byte header followed by SBE messages, each behind a
//! 4-byte framing header:
//!
//! ```text
//! packet header:  channel u8 | reserved u8 | seq version u16 | seq num u32 | sending time u64
//! framing header: message length u16 (including this header) | encoding type u16
//! ```
//!
//! All integers are little-endian.

use crate::capture::RawRecord;

pub const PACKET_HEADER_LEN: usize = 16;
pub const FRAMING_HEADER_LEN: usize = 4;
/// SBE 1.0 little-endian encoding marker
pub const SBE_ENCODING_TYPE: u16 = 0xEB50;
/// First u16 of a heartbeat packet
pub const HEARTBEAT_MSG_TYPE: u16 = 334;

/// Smallest framed message: framing header plus an SBE header
const MIN_MESSAGE_LEN: usize = FRAMING_HEADER_LEN + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub channel_id: u8,
    pub sequence_version: u16,
    pub sequence_number: u32,
    /// Nanoseconds since the Unix epoch, 0 if not set
    pub sending_time: u64,
}

impl PacketHeader {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b = payload.get(..PACKET_HEADER_LEN)?;
        Some(Self {
            channel_id: b[0],
            sequence_version: u16::from_le_bytes([b[2], b[3]]),
            sequence_number: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            sending_time: u64::from_le_bytes([
                b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
            ]),
        })
    }
}

/// Heartbeat packets carry no market data
pub fn is_heartbeat(payload: &[u8]) -> bool {
    payload.len() >= 2 && u16::from_le_bytes([payload[0], payload[1]]) == HEARTBEAT_MSG_TYPE
}

/// Split a packet into one record per framed SBE message
///
/// Message records start at the SBE header and carry the packet's sending
/// time (or the capture time when the header leaves it unset). A payload
/// that does not frame cleanly is returned whole as a single record.
pub fn split_packet(record: &RawRecord) -> Vec<RawRecord> {
    let payload = &record.payload;
    let Some(header) = PacketHeader::parse(payload) else {
        return vec![record.clone()];
    };
    let timestamp_ns = if header.sending_time != 0 {
        header.sending_time
    } else {
        record.timestamp_ns
    };

    let mut messages = Vec::new();
    let mut off = PACKET_HEADER_LEN;
    while off + FRAMING_HEADER_LEN <= payload.len() {
        let msg_len = u16::from_le_bytes([payload[off], payload[off + 1]]) as usize;
        let encoding = u16::from_le_bytes([payload[off + 2], payload[off + 3]]);
        if encoding != SBE_ENCODING_TYPE
            || msg_len < MIN_MESSAGE_LEN
            || off + msg_len > payload.len()
        {
            return vec![record.clone()];
        }

        messages.push(RawRecord {
            timestamp_ns,
            payload: payload.slice(off + FRAMING_HEADER_LEN..off + msg_len),
        });
        off += msg_len;
    }

    if messages.is_empty() && off < payload.len() {
        return vec![record.clone()];
    }
    messages
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn packet_header(sequence_number: u32, sending_time: u64) -> Vec<u8> {
        let mut out = vec![78u8, 0];
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&sequence_number.to_le_bytes());
        out.extend_from_slice(&sending_time.to_le_bytes());
        out
    }

    /// Framing header + `message` (which starts at its SBE header)
    pub(crate) fn framed(message: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((message.len() + FRAMING_HEADER_LEN) as u16).to_le_bytes());
        out.extend_from_slice(&SBE_ENCODING_TYPE.to_le_bytes());
        out.extend_from_slice(message);
        out
    }

    #[test]
    fn test_parse_packet_header() {
        let header = PacketHeader::parse(&packet_header(42, 1_700_000_000_000_000_000)).unwrap();
        assert_eq!(header.channel_id, 78);
        assert_eq!(header.sequence_version, 1);
        assert_eq!(header.sequence_number, 42);
        assert_eq!(header.sending_time, 1_700_000_000_000_000_000);
        assert!(PacketHeader::parse(&[0u8; 8]).is_none());
    }

    #[test]
    fn test_split_two_messages() {
        let mut payload = packet_header(1, 500);
        payload.extend(framed(&[1u8; 12]));
        payload.extend(framed(&[2u8; 20]));

        let parts = split_packet(&RawRecord::new(9, payload));
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].payload.as_ref(), &[1u8; 12]);
        assert_eq!(parts[1].payload.len(), 20);
        assert!(parts.iter().all(|r| r.timestamp_ns == 500));
    }

    #[test]
    fn test_unset_sending_time_uses_capture_time() {
        let mut payload = packet_header(1, 0);
        payload.extend(framed(&[1u8; 12]));
        let parts = split_packet(&RawRecord::new(77, payload));
        assert_eq!(parts[0].timestamp_ns, 77);
    }

    #[test]
    fn test_unframed_payload_is_kept_whole() {
        let mut payload = packet_header(1, 500);
        payload.extend_from_slice(&[0xAAu8; 24]);
        let record = RawRecord::new(9, payload);

        let parts = split_packet(&record);
        assert_eq!(parts, vec![record]);
    }

    #[test]
    fn test_overlong_message_length_is_kept_whole() {
        let mut payload = packet_header(1, 500);
        let mut msg = framed(&[1u8; 12]);
        msg[0] = 200;
        payload.extend(msg);

        assert_eq!(split_packet(&RawRecord::new(9, payload)).len(), 1);
    }

    #[test]
    fn test_header_only_packet_has_no_messages() {
        let parts = split_packet(&RawRecord::new(9, packet_header(1, 500)));
        assert!(parts.is_empty());
    }

    #[test]
    fn test_heartbeat_detection() {
        let mut payload = HEARTBEAT_MSG_TYPE.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0u8; 14]);
        assert!(is_heartbeat(&payload));
        assert!(!is_heartbeat(&packet_header(1, 1)));
    }
}
