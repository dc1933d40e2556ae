//! Minimal pcap-format writer for attack packet captures (§4.5, §6): each
//! cleared attack's capture ring is flushed to `<uuid>.pcap` in libpcap's
//! classic (microsecond-resolution) file format. `DLT_RAW` is used as the
//! link type since captured packets are reconstructed from normalised
//! [`SimplePacket`] fields rather than kept as raw frame bytes.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use crate::packet::{L4Protocol, SimplePacket};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65_535;
const DLT_RAW: u32 = 101;

/// Writes `packets` to `path` as a complete pcap file, creating it (or
/// truncating an existing one) in one shot. An empty slice still produces a
/// valid, readable capture containing only the global header.
pub fn write_pcap(path: &Path, packets: &[SimplePacket]) -> io::Result<()> {
    let mut out = Vec::with_capacity(24 + packets.len() * 64);
    out.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
    out.extend_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    out.extend_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    out.extend_from_slice(&SNAPLEN.to_le_bytes());
    out.extend_from_slice(&DLT_RAW.to_le_bytes());

    for packet in packets {
        let frame = synthesize_frame(packet);
        let ts_secs = (packet.captured_at_ns / 1_000_000_000) as u32;
        let ts_usecs = ((packet.captured_at_ns % 1_000_000_000) / 1_000) as u32;
        out.extend_from_slice(&ts_secs.to_le_bytes());
        out.extend_from_slice(&ts_usecs.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&frame);
    }

    std::fs::write(path, out)
}

/// Raw IP-layer bytes for one captured packet. Uses the stored frame
/// payload when one was captured upstream; otherwise rebuilds a minimal
/// IPv4/IPv6 + TCP/UDP/ICMP header from the normalised fields, which is
/// enough for a packet capture tool to show protocol, addresses and ports.
fn synthesize_frame(packet: &SimplePacket) -> Vec<u8> {
    if let Some(payload) = &packet.payload {
        return payload.clone();
    }
    match (packet.src_addr, packet.dst_addr) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => ipv4_frame(packet, src, dst),
        (IpAddr::V6(src), IpAddr::V6(dst)) => ipv6_frame(packet, src, dst),
        _ => Vec::new(),
    }
}

fn protocol_number(protocol: L4Protocol) -> u8 {
    match protocol {
        L4Protocol::Tcp => 6,
        L4Protocol::Udp => 17,
        L4Protocol::Icmp => 1,
        L4Protocol::Other(n) => n,
    }
}

fn l4_header(packet: &SimplePacket) -> Vec<u8> {
    match packet.protocol {
        L4Protocol::Tcp => {
            let mut h = vec![0u8; 20];
            h[0..2].copy_from_slice(&packet.src_port.to_be_bytes());
            h[2..4].copy_from_slice(&packet.dst_port.to_be_bytes());
            h[12] = 5 << 4; // data offset: 5 32-bit words, no options
            let f = &packet.tcp_flags;
            h[13] = (f.fin as u8)
                | (f.syn as u8) << 1
                | (f.rst as u8) << 2
                | (f.psh as u8) << 3
                | (f.ack as u8) << 4
                | (f.urg as u8) << 5;
            h
        }
        L4Protocol::Udp => {
            let mut h = vec![0u8; 8];
            h[0..2].copy_from_slice(&packet.src_port.to_be_bytes());
            h[2..4].copy_from_slice(&packet.dst_port.to_be_bytes());
            h[4..6].copy_from_slice(&8u16.to_be_bytes());
            h
        }
        L4Protocol::Icmp => vec![0u8; 8],
        L4Protocol::Other(_) => Vec::new(),
    }
}

fn ipv4_frame(packet: &SimplePacket, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let l4 = l4_header(packet);
    let total_len = 20 + l4.len();
    let mut header = vec![0u8; 20];
    header[0] = 0x45;
    header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    header[8] = 64;
    header[9] = protocol_number(packet.protocol);
    header[12..16].copy_from_slice(&src.octets());
    header[16..20].copy_from_slice(&dst.octets());
    header.extend(l4);
    header
}

fn ipv6_frame(packet: &SimplePacket, src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
    let l4 = l4_header(packet);
    let mut header = vec![0u8; 40];
    header[0] = 0x60;
    header[4..6].copy_from_slice(&(l4.len() as u16).to_be_bytes());
    header[6] = protocol_number(packet.protocol);
    header[7] = 64;
    header[8..24].copy_from_slice(&src.octets());
    header[24..40].copy_from_slice(&dst.octets());
    header.extend(l4);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;

    fn packet(syn: bool) -> SimplePacket {
        SimplePacket {
            src_addr: "198.51.100.7".parse().unwrap(),
            dst_addr: "203.0.113.10".parse().unwrap(),
            src_port: 4444,
            dst_port: 80,
            protocol: L4Protocol::Tcp,
            fragmented: false,
            tcp_flags: TcpFlags {
                syn,
                ..Default::default()
            },
            input_if_index: 0,
            output_if_index: 0,
            bytes: 64,
            packets: 1,
            sample_ratio: 1,
            captured_at_ns: 1_700_000_000_000_000_000,
            payload: None,
        }
    }

    #[test]
    fn writes_global_header_and_one_record() {
        let path = std::env::temp_dir().join("netsentry_capture_test_one_record.pcap");
        write_pcap(&path, &[packet(true)]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(&bytes[0..4], &PCAP_MAGIC.to_le_bytes());
        assert!(bytes.len() > 24);
        let incl_len = u32::from_le_bytes(bytes[24 + 8..24 + 12].try_into().unwrap());
        assert_eq!(incl_len as usize, bytes.len() - 24 - 16);
    }

    #[test]
    fn empty_capture_still_writes_a_valid_global_header() {
        let path = std::env::temp_dir().join("netsentry_capture_test_empty.pcap");
        write_pcap(&path, &[]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn synthesized_tcp_frame_carries_syn_flag() {
        let frame = synthesize_frame(&packet(true));
        // IPv4 header is 20 bytes with no options; byte 13 of the TCP header
        // that follows holds the flag bits, SYN is bit 1.
        assert_ne!(frame[20 + 13] & 0x02, 0);
    }
}
