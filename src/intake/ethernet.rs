//! Shared raw-frame decode for the two intake sources that hand over link
//! layer bytes instead of pre-extracted fields: sFlow's Raw Packet Header
//! flow record and full mirror-port capture (§4.1).

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::packet::{L4Protocol, SimplePacket, TcpFlags};

/// Fields pulled out of one Ethernet frame, before the caller fills in
/// source-specific metadata (sampling ratio, interface indices, timestamp).
pub struct DecodedFrame {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: L4Protocol,
    pub fragmented: bool,
    pub tcp_flags: TcpFlags,
}

/// Returns `None` for anything that isn't an IPv4/IPv6 frame this engine
/// cares about (ARP, unsupported link types, truncated captures).
pub fn decode_frame(bytes: &[u8]) -> Option<DecodedFrame> {
    let sliced = SlicedPacket::from_ethernet(bytes).ok()?;
    let net = sliced.net?;

    let (src_addr, dst_addr, protocol_num, fragmented) = match &net {
        NetSlice::Ipv4(ip) => {
            let header = ip.header();
            (
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
                header.protocol().0,
                header.is_fragmenting_payload(),
            )
        }
        NetSlice::Ipv6(ip) => {
            let header = ip.header();
            (
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
                header.next_header().0,
                ip.is_payload_fragmented(),
            )
        }
    };

    let (src_port, dst_port, tcp_flags) = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            tcp.source_port(),
            tcp.destination_port(),
            TcpFlags {
                syn: tcp.syn(),
                ack: tcp.ack(),
                fin: tcp.fin(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                urg: tcp.urg(),
            },
        ),
        Some(TransportSlice::Udp(udp)) => {
            (udp.source_port(), udp.destination_port(), TcpFlags::default())
        }
        _ => (0, 0, TcpFlags::default()),
    };

    Some(DecodedFrame {
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        protocol: L4Protocol::from_ip_number(protocol_num),
        fragmented,
        tcp_flags,
    })
}

pub fn decoded_to_packet(
    frame: DecodedFrame,
    bytes: u64,
    packets: u64,
    sample_ratio: u32,
    input_if_index: u32,
    output_if_index: u32,
) -> SimplePacket {
    SimplePacket {
        src_addr: frame.src_addr,
        dst_addr: frame.dst_addr,
        src_port: frame.src_port,
        dst_port: frame.dst_port,
        protocol: frame.protocol,
        fragmented: frame.fragmented,
        tcp_flags: frame.tcp_flags,
        input_if_index,
        output_if_index,
        bytes,
        packets,
        sample_ratio,
        captured_at_ns: crate::packet::monotonic_now_ns(),
        payload: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tcp_syn_frame() -> Vec<u8> {
        let builder = etherparse::PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(4444, 80, 0, 1024)
            .syn();
        let payload = [];
        let mut buf = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut buf, &payload).unwrap();
        buf
    }

    #[test]
    fn decodes_ipv4_tcp_syn() {
        let frame = decode_frame(&build_tcp_syn_frame()).unwrap();
        assert_eq!(frame.protocol, L4Protocol::Tcp);
        assert!(frame.tcp_flags.syn);
        assert_eq!(frame.dst_port, 80);
    }

    #[test]
    fn malformed_bytes_decode_to_none() {
        assert!(decode_frame(&[0u8; 4]).is_none());
    }
}
