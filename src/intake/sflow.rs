//! sFlow v5 decoder (§4.1): sampled counter records are discarded; flow
//! samples carrying a raw packet header are decoded into one [`SimplePacket`]
//! each, scaled by the datagram's own sampling rate.

use std::net::SocketAddr;

use crate::packet::SimplePacket;

use super::ethernet::{decode_frame, decoded_to_packet};
use super::{Decoder, IntakeStats, MalformedReason};

const MAX_SAMPLES: u32 = 4096;
const MAX_FLOW_RECORDS: u32 = 64;
/// Header protocol value for Ethernet in the Raw Packet Header flow record
/// (format 0,1); anything else is out of scope here.
const HEADER_PROTOCOL_ETHERNET: u32 = 1;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Some(v)
    }

    fn skip_address(&mut self) -> Option<()> {
        let addr_type = self.read_u32()?;
        let len = match addr_type {
            1 => 4,
            2 => 16,
            _ => return None,
        };
        if self.remaining() < len {
            return None;
        }
        self.pos += len;
        Some(())
    }

    /// XDR opaque<>: exactly `len` data bytes, then padding to a 4-byte
    /// boundary that the caller must skip too.
    fn take_opaque(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        let padding = (4 - (len % 4)) % 4;
        if self.remaining() < padding {
            return None;
        }
        self.pos += padding;
        Some(data)
    }
}

pub struct SFlowDecoder<'a> {
    pub stats: &'a IntakeStats,
}

impl<'a> SFlowDecoder<'a> {
    fn malformed(&self, reason: MalformedReason) {
        self.stats.record_malformed("sflow", &reason.to_string());
    }

    fn parse_raw_packet_header(&self, bytes: &[u8], sample_ratio: u32, input_if: u32, output_if: u32) -> Option<SimplePacket> {
        let mut cur = Cursor::new(bytes);
        let header_protocol = cur.read_u32()?;
        let frame_length = cur.read_u32()?;
        let _stripped = cur.read_u32()?;
        let header_length = cur.read_u32()?;
        let header_bytes = cur.take_opaque(header_length as usize)?;
        if header_protocol != HEADER_PROTOCOL_ETHERNET {
            return None;
        }
        let frame = decode_frame(header_bytes)?;
        Some(decoded_to_packet(
            frame,
            frame_length as u64,
            1,
            sample_ratio.max(1),
            input_if,
            output_if,
        ))
    }

    fn parse_flow_sample(&self, bytes: &[u8], expanded: bool, out: &mut Vec<SimplePacket>) {
        let mut cur = Cursor::new(bytes);
        let Some(_sequence_number) = cur.read_u32() else {
            self.malformed(MalformedReason::ShortRecord);
            return;
        };
        if expanded {
            if cur.read_u32().is_none() || cur.read_u32().is_none() {
                self.malformed(MalformedReason::ShortRecord);
                return;
            }
        } else if cur.read_u32().is_none() {
            self.malformed(MalformedReason::ShortRecord);
            return;
        }
        let Some(sampling_rate) = cur.read_u32() else {
            self.malformed(MalformedReason::ShortRecord);
            return;
        };
        if cur.read_u32().is_none() || cur.read_u32().is_none() {
            self.malformed(MalformedReason::ShortRecord);
            return;
        }
        let (input_if, output_if) = if expanded {
            let (Some(_if), Some(iv), Some(_of), Some(ov)) =
                (cur.read_u32(), cur.read_u32(), cur.read_u32(), cur.read_u32())
            else {
                self.malformed(MalformedReason::ShortRecord);
                return;
            };
            (iv & 0x3FFF_FFFF, ov & 0x3FFF_FFFF)
        } else {
            let (Some(iv), Some(ov)) = (cur.read_u32(), cur.read_u32()) else {
                self.malformed(MalformedReason::ShortRecord);
                return;
            };
            (iv & 0x3FFF_FFFF, ov & 0x3FFF_FFFF)
        };
        let Some(num_records) = cur.read_u32() else {
            self.malformed(MalformedReason::ShortRecord);
            return;
        };

        for _ in 0..num_records.min(MAX_FLOW_RECORDS) {
            let Some(flow_format) = cur.read_u32() else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let Some(flow_length) = cur.read_u32() else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let Some(flow_bytes) = cur.take_opaque(flow_length as usize) else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let enterprise = flow_format >> 12;
            let format = flow_format & 0xFFF;
            if enterprise == 0 && format == 1 {
                if let Some(packet) = self.parse_raw_packet_header(flow_bytes, sampling_rate, input_if, output_if) {
                    out.push(packet);
                }
            }
        }
    }
}

impl<'a> Decoder for SFlowDecoder<'a> {
    fn parse(&mut self, datagram: &[u8], _source_addr: SocketAddr) -> Vec<SimplePacket> {
        let mut cur = Cursor::new(datagram);
        let Some(version) = cur.read_u32() else {
            self.malformed(MalformedReason::ShortHeader);
            return Vec::new();
        };
        if version != 5 {
            self.malformed(MalformedReason::BadVersion);
            return Vec::new();
        }
        if cur.skip_address().is_none() {
            self.malformed(MalformedReason::ShortHeader);
            return Vec::new();
        }
        // sub_agent_id, sequence_number, uptime
        if cur.read_u32().is_none() || cur.read_u32().is_none() || cur.read_u32().is_none() {
            self.malformed(MalformedReason::ShortHeader);
            return Vec::new();
        }
        let Some(num_samples) = cur.read_u32() else {
            self.malformed(MalformedReason::ShortHeader);
            return Vec::new();
        };

        let mut out = Vec::new();
        for _ in 0..num_samples.min(MAX_SAMPLES) {
            let Some(sample_type) = cur.read_u32() else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let Some(sample_length) = cur.read_u32() else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let Some(sample_bytes) = cur.take_opaque(sample_length as usize) else {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            };
            let enterprise = sample_type >> 12;
            let format = sample_type & 0xFFF;
            match (enterprise, format) {
                (0, 1) => self.parse_flow_sample(sample_bytes, false, &mut out),
                (0, 3) => self.parse_flow_sample(sample_bytes, true, &mut out),
                // Counter samples (format 2/4) and vendor-specific samples
                // carry no per-packet information this engine needs.
                _ => {}
            }
        }

        self.stats.record_decoded(out.len() as u64);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:6343".parse().unwrap()
    }

    fn pad4(mut v: Vec<u8>) -> Vec<u8> {
        while v.len() % 4 != 0 {
            v.push(0);
        }
        v
    }

    fn build_raw_header_record(sampling_rate: u32) -> Vec<u8> {
        let eth = {
            let builder = etherparse::PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
                .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
                .tcp(4444, 80, 0, 1024)
                .syn();
            let payload = [];
            let mut buf = Vec::with_capacity(builder.size(payload.len()));
            builder.write(&mut buf, &payload).unwrap();
            buf
        };

        let mut flow_record_body = Vec::new();
        flow_record_body.extend_from_slice(&1u32.to_be_bytes()); // header_protocol = ethernet
        flow_record_body.extend_from_slice(&(eth.len() as u32).to_be_bytes()); // frame_length
        flow_record_body.extend_from_slice(&0u32.to_be_bytes()); // stripped
        flow_record_body.extend_from_slice(&(eth.len() as u32).to_be_bytes()); // header_length
        flow_record_body.extend_from_slice(&eth);
        let flow_record_body = pad4(flow_record_body);

        let mut flow_sample = Vec::new();
        flow_sample.extend_from_slice(&1u32.to_be_bytes()); // sequence_number
        flow_sample.extend_from_slice(&0u32.to_be_bytes()); // source_id
        flow_sample.extend_from_slice(&sampling_rate.to_be_bytes());
        flow_sample.extend_from_slice(&0u32.to_be_bytes()); // sample_pool
        flow_sample.extend_from_slice(&0u32.to_be_bytes()); // drops
        flow_sample.extend_from_slice(&1u32.to_be_bytes()); // input
        flow_sample.extend_from_slice(&0u32.to_be_bytes()); // output
        flow_sample.extend_from_slice(&1u32.to_be_bytes()); // num_flow_records
        flow_sample.extend_from_slice(&1u32.to_be_bytes()); // flow_format (enterprise0, format1)
        flow_sample.extend_from_slice(&(flow_record_body.len() as u32).to_be_bytes());
        flow_sample.extend(flow_record_body);
        flow_sample
    }

    fn build_datagram(flow_sample: Vec<u8>) -> Vec<u8> {
        let mut datagram = Vec::new();
        datagram.extend_from_slice(&5u32.to_be_bytes()); // version
        datagram.extend_from_slice(&1u32.to_be_bytes()); // agent address type = ipv4
        datagram.extend_from_slice(&[10, 0, 0, 9]);
        datagram.extend_from_slice(&0u32.to_be_bytes()); // sub_agent_id
        datagram.extend_from_slice(&1u32.to_be_bytes()); // sequence_number
        datagram.extend_from_slice(&0u32.to_be_bytes()); // uptime
        datagram.extend_from_slice(&1u32.to_be_bytes()); // num_samples
        datagram.extend_from_slice(&1u32.to_be_bytes()); // sample_type (enterprise0, format1)
        datagram.extend_from_slice(&(flow_sample.len() as u32).to_be_bytes());
        datagram.extend(flow_sample);
        datagram
    }

    #[test]
    fn decodes_flow_sample_with_sampling_rate_applied_downstream() {
        let stats = IntakeStats::default();
        let mut decoder = SFlowDecoder { stats: &stats };
        let datagram = build_datagram(build_raw_header_record(100));
        let packets = decoder.parse(&datagram, addr());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sample_ratio, 100);
        assert_eq!(packets[0].dst_port, 80);
        assert!(packets[0].tcp_flags.syn);
    }

    #[test]
    fn zero_sampling_rate_is_treated_as_one() {
        let stats = IntakeStats::default();
        let mut decoder = SFlowDecoder { stats: &stats };
        let datagram = build_datagram(build_raw_header_record(0));
        let packets = decoder.parse(&datagram, addr());
        assert_eq!(packets[0].sample_ratio, 1);
    }

    #[test]
    fn short_header_is_malformed() {
        let stats = IntakeStats::default();
        let mut decoder = SFlowDecoder { stats: &stats };
        let packets = decoder.parse(&[0u8; 4], addr());
        assert!(packets.is_empty());
        assert_eq!(stats.malformed_frames.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn wrong_version_is_malformed() {
        let stats = IntakeStats::default();
        let mut decoder = SFlowDecoder { stats: &stats };
        let mut datagram = build_datagram(build_raw_header_record(1));
        datagram[0..4].copy_from_slice(&4u32.to_be_bytes());
        let packets = decoder.parse(&datagram, addr());
        assert!(packets.is_empty());
    }
}
