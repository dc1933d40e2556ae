//! The canonical per-packet record produced by intake and consumed by
//! everything downstream of it (resolver, counter engine).

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Layer-4 protocol of an observed packet, as far as the counter engine
/// cares. Anything else collapses into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl L4Protocol {
    pub fn from_ip_number(n: u8) -> Self {
        match n {
            6 => L4Protocol::Tcp,
            17 => L4Protocol::Udp,
            1 | 58 => L4Protocol::Icmp,
            other => L4Protocol::Other(other),
        }
    }
}

/// TCP flag bits relevant to detection (SYN flood in particular).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            fin: b & 0x01 != 0,
            syn: b & 0x02 != 0,
            rst: b & 0x04 != 0,
            psh: b & 0x08 != 0,
            ack: b & 0x10 != 0,
            urg: b & 0x20 != 0,
        }
    }
}

/// The canonical normalised record. Every intake decoder (sFlow, NetFlow
/// v5/v9, IPFIX, mirror capture) produces zero or more of these; nothing
/// downstream knows which wire format it came from.
#[derive(Debug, Clone)]
pub struct SimplePacket {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: L4Protocol,
    pub fragmented: bool,
    pub tcp_flags: TcpFlags,
    pub input_if_index: u32,
    pub output_if_index: u32,
    /// Observed bytes for this record (>= 1; sampled inputs may report more
    /// than one packet's worth via `sample_ratio`).
    pub bytes: u64,
    pub packets: u64,
    /// Divisor by which the exporter downsampled the stream. 1 for
    /// unsampled sources (mirror capture, NetFlow v9/IPFIX with no
    /// sampler option configured).
    pub sample_ratio: u32,
    /// Monotonic capture timestamp in nanoseconds.
    pub captured_at_ns: u64,
    /// Opaque payload bytes, present only when capture is enabled upstream.
    /// Capped at 128 bytes.
    pub payload: Option<Vec<u8>>,
}

pub const MAX_CAPTURED_PAYLOAD: usize = 128;

impl SimplePacket {
    /// True if either tagged address is IPv6.
    pub fn is_ipv6(&self) -> bool {
        matches!(self.src_addr, IpAddr::V6(_))
    }

    pub fn truncate_payload(payload: &[u8]) -> Vec<u8> {
        let len = payload.len().min(MAX_CAPTURED_PAYLOAD);
        payload[..len].to_vec()
    }
}

/// Monotonic nanosecond timestamp, used as `captured_at_ns` for sources that
/// don't carry their own capture clock (mirror capture, sFlow samples).
pub fn monotonic_now_ns() -> u64 {
    // SystemTime is not strictly monotonic, but for a normalised capture
    // timestamp that is only ever compared within one process run it is an
    // adequate proxy and avoids pulling in a dedicated monotonic-clock crate.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_flags_decode_syn() {
        let flags = TcpFlags::from_byte(0x02);
        assert!(flags.syn);
        assert!(!flags.ack);
    }

    #[test]
    fn tcp_flags_decode_syn_ack() {
        let flags = TcpFlags::from_byte(0x12);
        assert!(flags.syn);
        assert!(flags.ack);
    }

    #[test]
    fn l4_protocol_maps_known_numbers() {
        assert_eq!(L4Protocol::from_ip_number(6), L4Protocol::Tcp);
        assert_eq!(L4Protocol::from_ip_number(17), L4Protocol::Udp);
        assert_eq!(L4Protocol::from_ip_number(1), L4Protocol::Icmp);
        assert_eq!(L4Protocol::from_ip_number(47), L4Protocol::Other(47));
    }

    #[test]
    fn payload_truncated_to_max() {
        let big = vec![7u8; 500];
        let truncated = SimplePacket::truncate_payload(&big);
        assert_eq!(truncated.len(), MAX_CAPTURED_PAYLOAD);
    }
}
