//! NetFlow v5 decoder: fixed 24-byte header + N 48-byte records, each
//! yielding exactly one output packet (§4.1).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::packet::{L4Protocol, SimplePacket, TcpFlags};

use super::{Decoder, IntakeStats, MalformedReason};

const HEADER_SIZE: usize = 24;
const RECORD_SIZE: usize = 48;
/// Sanity bound on the declared record count, mirrors the exporter's own
/// MTU-bounded limit; a hostile count larger than this is treated as a
/// malformed frame rather than trusted.
const MAX_RECORDS: u16 = 10_000;

pub struct NetflowV5Decoder<'a> {
    pub stats: &'a IntakeStats,
    /// Configured sampling ratio (§4.1): the header's own sampling field is
    /// exporter-informational only, so the ratio applied to counters comes
    /// from `SourceConfig::sampling_ratio`, not the wire value.
    pub sampling_ratio: u32,
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

impl<'a> Decoder for NetflowV5Decoder<'a> {
    fn parse(&mut self, datagram: &[u8], _source_addr: SocketAddr) -> Vec<SimplePacket> {
        if datagram.len() < HEADER_SIZE {
            self.stats
                .record_malformed("netflow_v5", &MalformedReason::ShortHeader.to_string());
            return Vec::new();
        }
        let version = be_u16(&datagram[0..2]);
        if version != 5 {
            self.stats
                .record_malformed("netflow_v5", &MalformedReason::BadVersion.to_string());
            return Vec::new();
        }
        let count = be_u16(&datagram[2..4]).min(MAX_RECORDS);
        // Parsed but not consulted: the exporter's own sampling_interval is
        // informational (§4.1), the ratio applied below comes from config.
        let _sampling_interval = be_u16(&datagram[22..24]);

        let mut out = Vec::with_capacity(count as usize);
        let mut offset = HEADER_SIZE;
        for _ in 0..count {
            if offset + RECORD_SIZE > datagram.len() {
                self.stats
                    .record_malformed("netflow_v5", &MalformedReason::ShortRecord.to_string());
                break;
            }
            let rec = &datagram[offset..offset + RECORD_SIZE];
            let src = Ipv4Addr::from(be_u32(&rec[0..4]));
            let dst = Ipv4Addr::from(be_u32(&rec[4..8]));
            let input_if = be_u16(&rec[12..14]) as u32;
            let output_if = be_u16(&rec[14..16]) as u32;
            let packets = be_u32(&rec[16..20]) as u64;
            let octets = be_u32(&rec[20..24]) as u64;
            let src_port = be_u16(&rec[32..34]);
            let dst_port = be_u16(&rec[34..36]);
            let tcp_flags_byte = rec[37];
            let protocol_num = rec[38];

            out.push(SimplePacket {
                src_addr: IpAddr::V4(src),
                dst_addr: IpAddr::V4(dst),
                src_port,
                dst_port,
                protocol: L4Protocol::from_ip_number(protocol_num),
                fragmented: false,
                tcp_flags: TcpFlags::from_byte(tcp_flags_byte),
                input_if_index: input_if,
                output_if_index: output_if,
                bytes: octets,
                packets,
                sample_ratio: self.sampling_ratio.max(1),
                captured_at_ns: crate::packet::monotonic_now_ns(),
                payload: None,
            });
            offset += RECORD_SIZE;
        }
        self.stats.record_decoded(out.len() as u64);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(count: u16) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + count as usize * RECORD_SIZE];
        buf[0..2].copy_from_slice(&5u16.to_be_bytes());
        buf[2..4].copy_from_slice(&count.to_be_bytes());
        for i in 0..count as usize {
            let off = HEADER_SIZE + i * RECORD_SIZE;
            buf[off..off + 4].copy_from_slice(&[192, 168, 1, 1]);
            buf[off + 4..off + 8].copy_from_slice(&[10, 0, 0, 1]);
            buf[off + 16..off + 20].copy_from_slice(&10u32.to_be_bytes());
            buf[off + 20..off + 24].copy_from_slice(&1500u32.to_be_bytes());
            buf[off + 32..off + 34].copy_from_slice(&4444u16.to_be_bytes());
            buf[off + 34..off + 36].copy_from_slice(&80u16.to_be_bytes());
            buf[off + 37] = 0x02; // SYN
            buf[off + 38] = 6; // TCP
        }
        buf
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:2055".parse().unwrap()
    }

    #[test]
    fn decodes_each_record_into_one_packet() {
        let stats = IntakeStats::default();
        let mut decoder = NetflowV5Decoder { stats: &stats, sampling_ratio: 1 };
        let packets = decoder.parse(&build_packet(2), addr());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].bytes, 1500);
        assert_eq!(packets[0].packets, 10);
        assert!(packets[0].tcp_flags.syn);
        assert_eq!(packets[0].protocol, L4Protocol::Tcp);
    }

    #[test]
    fn short_header_is_malformed_and_dropped() {
        let stats = IntakeStats::default();
        let mut decoder = NetflowV5Decoder { stats: &stats, sampling_ratio: 1 };
        let packets = decoder.parse(&[0u8; 10], addr());
        assert!(packets.is_empty());
        assert_eq!(stats.malformed_frames.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn wrong_version_is_malformed() {
        let stats = IntakeStats::default();
        let mut decoder = NetflowV5Decoder { stats: &stats, sampling_ratio: 1 };
        let mut buf = build_packet(1);
        buf[0..2].copy_from_slice(&9u16.to_be_bytes());
        let packets = decoder.parse(&buf, addr());
        assert!(packets.is_empty());
    }

    #[test]
    fn truncated_records_stop_cleanly() {
        let stats = IntakeStats::default();
        let mut decoder = NetflowV5Decoder { stats: &stats, sampling_ratio: 1 };
        let mut buf = build_packet(2);
        buf.truncate(HEADER_SIZE + RECORD_SIZE + 10);
        let packets = decoder.parse(&buf, addr());
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn configured_sampling_ratio_scales_counters() {
        let stats = IntakeStats::default();
        let mut decoder = NetflowV5Decoder { stats: &stats, sampling_ratio: 100 };
        let packets = decoder.parse(&build_packet(1), addr());
        assert_eq!(packets[0].sample_ratio, 100);
    }
}
