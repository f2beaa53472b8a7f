//! Packet capture input
//!
//! Reads classic libpcap files and yields the UDP payload of every captured
//! datagram, stamped with its capture time.

use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ReplayError, Result};

/// Payloads shorter than a UMDF packet header are never decodable
pub const MIN_PAYLOAD_LEN: usize = 16;

const MAGIC_MICROS: u32 = 0xA1B2_C3D4;
const MAGIC_NANOS: u32 = 0xA1B2_3C4D;

const LINKTYPE_ETHERNET: u32 = 1;
const LINKTYPE_RAW: u32 = 101;
const LINKTYPE_LINUX_SLL: u32 = 113;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPPROTO_UDP: u8 = 17;

/// One captured payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    pub payload: Bytes,
}

impl RawRecord {
    pub fn new(timestamp_ns: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp_ns,
            payload: payload.into(),
        }
    }
}

/// Streaming reader over a classic pcap file
pub struct PcapReader<R: Read> {
    reader: R,
    big_endian: bool,
    nanos: bool,
    link_type: u32,
    frames: u64,
}

impl PcapReader<BufReader<File>> {
    /// Open a capture file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ReplayError::Capture(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Self::new(BufReader::with_capacity(1 << 20, file))
    }
}

impl<R: Read> PcapReader<R> {
    /// Read the global header and prepare to stream records
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header = [0u8; 24];
        reader
            .read_exact(&mut header)
            .map_err(|_| ReplayError::Capture("pcap too small".to_string()))?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let (big_endian, nanos) = match magic {
            MAGIC_MICROS => (false, false),
            MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == MAGIC_MICROS => (true, false),
            m if m.swap_bytes() == MAGIC_NANOS => (true, true),
            other => {
                return Err(ReplayError::Capture(format!("Unknown pcap magic 0x{other:08x}")));
            }
        };

        let link_type = read_u32(&header[20..24], big_endian);
        if !matches!(link_type, LINKTYPE_ETHERNET | LINKTYPE_RAW | LINKTYPE_LINUX_SLL) {
            return Err(ReplayError::Capture(format!("Unsupported link type {link_type}")));
        }
        debug!(big_endian, nanos, link_type, "Opened pcap stream");

        Ok(Self {
            reader,
            big_endian,
            nanos,
            link_type,
            frames: 0,
        })
    }

    /// Next raw frame with its capture time, or None at end of file
    fn next_frame(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        let mut header = [0u8; 16];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let ts_sec = read_u32(&header[0..4], self.big_endian) as u64;
        let ts_frac = read_u32(&header[4..8], self.big_endian) as u64;
        let incl_len = read_u32(&header[8..12], self.big_endian) as usize;

        let mut frame = vec![0u8; incl_len];
        match self.reader.read_exact(&mut frame) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(frame = self.frames, incl_len, "Truncated pcap record, stopping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        self.frames += 1;

        let frac_ns = if self.nanos { ts_frac } else { ts_frac * 1_000 };
        Ok(Some((ts_sec * 1_000_000_000 + frac_ns, frame)))
    }

    /// Frames read so far, including skipped ones
    pub fn frames_read(&self) -> u64 {
        self.frames
    }
}

impl<R: Read> Iterator for PcapReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (timestamp_ns, frame) = match self.next_frame() {
                Ok(Some(f)) => f,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            let Some(range) = udp_payload(self.link_type, &frame) else {
                continue;
            };
            if range.len() < MIN_PAYLOAD_LEN {
                continue;
            }
            let payload = Bytes::from(frame).slice(range);
            return Some(Ok(RawRecord { timestamp_ns, payload }));
        }
    }
}

fn read_u32(b: &[u8], big_endian: bool) -> u32 {
    let bytes = [b[0], b[1], b[2], b[3]];
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

fn read_be_u16(b: &[u8], off: usize) -> Option<u16> {
    b.get(off..off + 2).map(|s| u16::from_be_bytes([s[0], s[1]]))
}

/// Locate the UDP payload inside a captured frame
fn udp_payload(link_type: u32, frame: &[u8]) -> Option<Range<usize>> {
    let ip_start = match link_type {
        LINKTYPE_ETHERNET => {
            let mut ethertype = read_be_u16(frame, 12)?;
            let mut off = 14;
            if ethertype == ETHERTYPE_VLAN {
                ethertype = read_be_u16(frame, 16)?;
                off = 18;
            }
            if ethertype != ETHERTYPE_IPV4 {
                return None;
            }
            off
        }
        LINKTYPE_LINUX_SLL => {
            if read_be_u16(frame, 14)? != ETHERTYPE_IPV4 {
                return None;
            }
            16
        }
        _ => 0,
    };

    let ip = frame.get(ip_start..)?;
    let version_ihl = *ip.first()?;
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl = ((version_ihl & 0x0F) as usize) * 4;
    if ihl < 20 || *ip.get(9)? != IPPROTO_UDP {
        return None;
    }
    // Only the first fragment carries the UDP header
    if read_be_u16(ip, 6)? & 0x1FFF != 0 {
        return None;
    }

    let total_len = (read_be_u16(ip, 2)? as usize).min(ip.len());
    let udp_start = ip_start + ihl;
    let udp_len = read_be_u16(frame, udp_start + 4)? as usize;
    let payload_start = udp_start + 8;
    let payload_end = (udp_start + udp_len).min(ip_start + total_len).min(frame.len());
    if payload_end < payload_start {
        return None;
    }
    Some(payload_start..payload_end)
}
