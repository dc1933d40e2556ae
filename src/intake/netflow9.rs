//! NetFlow v9 / IPFIX decoder (§4.1): template-driven, per-source template
//! cache keyed by `(observation domain, template id)`. A template arriving
//! with an existing id replaces the prior template immediately; data
//! records referencing an unknown template are discarded.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use nom::bytes::complete::take;
use nom::multi::count as nom_count;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::packet::{L4Protocol, SimplePacket, TcpFlags};

use super::{Decoder, IntakeStats, MalformedReason};

const TEMPLATE_FLOWSET_ID: u16 = 0;
const IPFIX_TEMPLATE_SET_ID: u16 = 2;
const OPTIONS_TEMPLATE_FLOWSET_ID_V9: u16 = 1;
const OPTIONS_TEMPLATE_SET_ID_IPFIX: u16 = 3;

// Well-known IPFIX/NetFlow v9 information element ids (RFC 7012 / IANA
// registry), the handful this core cares about.
const FIELD_IPV4_SRC_ADDR: u16 = 8;
const FIELD_IPV4_DST_ADDR: u16 = 12;
const FIELD_IPV6_SRC_ADDR: u16 = 27;
const FIELD_IPV6_DST_ADDR: u16 = 28;
const FIELD_PROTOCOL: u16 = 4;
const FIELD_L4_SRC_PORT: u16 = 7;
const FIELD_L4_DST_PORT: u16 = 11;
const FIELD_TCP_FLAGS: u16 = 6;
const FIELD_IN_BYTES: u16 = 1;
const FIELD_IN_PKTS: u16 = 2;
const FIELD_INPUT_SNMP: u16 = 10;
const FIELD_OUTPUT_SNMP: u16 = 14;
const FIELD_FRAGMENT_OFFSET: u16 = 88;
/// IPFIX variable-length encoding sentinel (§4.1 "variable-length
/// encoding is honoured").
const VARIABLE_LENGTH: u16 = 65535;

#[derive(Debug, Clone)]
struct FieldSpec {
    field_type: u16,
    length: u16,
}

type TemplateKey = (u32, u16);

#[derive(Default)]
pub struct Netflow9Decoder<'a> {
    templates: HashMap<TemplateKey, Vec<FieldSpec>>,
    stats: Option<&'a IntakeStats>,
}

impl<'a> Netflow9Decoder<'a> {
    pub fn new(stats: &'a IntakeStats) -> Self {
        Self {
            templates: HashMap::new(),
            stats: Some(stats),
        }
    }

    fn malformed(&self, reason: MalformedReason) {
        if let Some(stats) = self.stats {
            stats.record_malformed("netflow9_ipfix", &reason.to_string());
        }
    }

    fn parse_template_set(&mut self, domain: u32, mut body: &[u8]) {
        while body.len() >= 4 {
            let Ok((rest, (template_id, field_count))) = parse_template_header(body) else {
                break;
            };
            let mut fields = Vec::with_capacity(field_count as usize);
            let mut cursor = rest;
            for _ in 0..field_count {
                let Ok((rest2, (field_type, length))) = parse_field_spec(cursor) else {
                    self.malformed(MalformedReason::TruncatedTlv);
                    return;
                };
                fields.push(FieldSpec { field_type, length });
                cursor = rest2;
            }
            self.templates.insert((domain, template_id), fields);
            body = cursor;
        }
    }

    /// Walks `body` one record at a time rather than chunking by a fixed
    /// stride, since a template containing a variable-length field (§4.1,
    /// RFC 7011 §7.1) makes per-record size data-dependent. Fixed-width
    /// templates fall out of the same loop naturally.
    fn parse_data_set(&self, domain: u32, template_id: u16, body: &[u8]) -> Vec<SimplePacket> {
        let Some(fields) = self.templates.get(&(domain, template_id)) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut cursor = body;
        while !cursor.is_empty() {
            let mut values: HashMap<u16, Vec<u8>> = HashMap::new();
            let start_len = cursor.len();
            let mut complete = true;
            for field in fields {
                let Some(value) = read_field_value(&mut cursor, field) else {
                    complete = false;
                    break;
                };
                values.insert(field.field_type, value.to_vec());
            }
            if !complete {
                // Trailing padding to the set's 4-byte boundary looks the
                // same as a truncated record; only flag the latter.
                if start_len > 3 {
                    self.malformed(MalformedReason::TruncatedTlv);
                }
                break;
            }
            if let Some(packet) = record_to_packet(&values) {
                out.push(packet);
            }
        }
        out
    }
}

/// Reads one field's value off `cursor`, advancing past it. Variable-length
/// fields (declared with the `65535` sentinel) are prefixed on the wire by
/// either a single length byte, or `0xFF` followed by a big-endian `u16`
/// length (RFC 7011 §7.1).
fn read_field_value<'b>(cursor: &mut &'b [u8], field: &FieldSpec) -> Option<&'b [u8]> {
    if field.length == VARIABLE_LENGTH {
        let &first = cursor.first()?;
        let (len, header_len) = if first == 0xFF {
            if cursor.len() < 3 {
                return None;
            }
            (u16::from_be_bytes([cursor[1], cursor[2]]) as usize, 3)
        } else {
            (first as usize, 1)
        };
        if cursor.len() < header_len + len {
            return None;
        }
        let value = &cursor[header_len..header_len + len];
        *cursor = &cursor[header_len + len..];
        Some(value)
    } else {
        let len = field.length as usize;
        if cursor.len() < len {
            return None;
        }
        let value = &cursor[..len];
        *cursor = &cursor[len..];
        Some(value)
    }
}

fn parse_template_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, template_id) = be_u16(input)?;
    let (input, field_count) = be_u16(input)?;
    Ok((input, (template_id, field_count)))
}

fn parse_field_spec(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, field_type) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    Ok((input, (field_type, length)))
}

fn record_to_packet(values: &HashMap<u16, Vec<u8>>) -> Option<SimplePacket> {
    let src_addr = addr_from(values, FIELD_IPV4_SRC_ADDR, FIELD_IPV6_SRC_ADDR)?;
    let dst_addr = addr_from(values, FIELD_IPV4_DST_ADDR, FIELD_IPV6_DST_ADDR)?;
    let protocol_num = values.get(&FIELD_PROTOCOL).and_then(|b| b.first().copied()).unwrap_or(0);
    let src_port = u16_from(values, FIELD_L4_SRC_PORT).unwrap_or(0);
    let dst_port = u16_from(values, FIELD_L4_DST_PORT).unwrap_or(0);
    let tcp_flags_byte = values.get(&FIELD_TCP_FLAGS).and_then(|b| b.first().copied()).unwrap_or(0);
    let bytes = u64_from(values, FIELD_IN_BYTES).unwrap_or(0);
    let packets = u64_from(values, FIELD_IN_PKTS).unwrap_or(1);
    let input_if = u32_from(values, FIELD_INPUT_SNMP).unwrap_or(0);
    let output_if = u32_from(values, FIELD_OUTPUT_SNMP).unwrap_or(0);
    let fragmented = values
        .get(&FIELD_FRAGMENT_OFFSET)
        .map(|b| b.iter().any(|&x| x != 0))
        .unwrap_or(false);

    Some(SimplePacket {
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        protocol: L4Protocol::from_ip_number(protocol_num),
        fragmented,
        tcp_flags: TcpFlags::from_byte(tcp_flags_byte),
        input_if_index: input_if,
        output_if_index: output_if,
        bytes,
        packets,
        sample_ratio: 1,
        captured_at_ns: crate::packet::monotonic_now_ns(),
        payload: None,
    })
}

fn addr_from(values: &HashMap<u16, Vec<u8>>, v4_field: u16, v6_field: u16) -> Option<IpAddr> {
    if let Some(b) = values.get(&v4_field) {
        if b.len() == 4 {
            return Some(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3])));
        }
    }
    if let Some(b) = values.get(&v6_field) {
        if b.len() == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            return Some(IpAddr::V6(Ipv6Addr::from(octets)));
        }
    }
    None
}

fn u16_from(values: &HashMap<u16, Vec<u8>>, field: u16) -> Option<u16> {
    let b = values.get(&field)?;
    match b.len() {
        2 => Some(u16::from_be_bytes([b[0], b[1]])),
        1 => Some(b[0] as u16),
        _ => None,
    }
}

fn u32_from(values: &HashMap<u16, Vec<u8>>, field: u16) -> Option<u32> {
    let b = values.get(&field)?;
    let mut padded = [0u8; 4];
    let start = 4usize.saturating_sub(b.len());
    if b.len() > 4 {
        return None;
    }
    padded[start..].copy_from_slice(b);
    Some(u32::from_be_bytes(padded))
}

fn u64_from(values: &HashMap<u16, Vec<u8>>, field: u16) -> Option<u64> {
    let b = values.get(&field)?;
    if b.len() > 8 {
        return None;
    }
    let mut padded = [0u8; 8];
    let start = 8usize.saturating_sub(b.len());
    padded[start..].copy_from_slice(b);
    Some(u64::from_be_bytes(padded))
}

fn parse_set_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, set_id) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    Ok((input, (set_id, length)))
}

impl<'a> Decoder for Netflow9Decoder<'a> {
    fn parse(&mut self, datagram: &[u8], _source_addr: SocketAddr) -> Vec<SimplePacket> {
        if datagram.len() < 8 {
            self.malformed(MalformedReason::ShortHeader);
            return Vec::new();
        }
        let version = u16::from_be_bytes([datagram[0], datagram[1]]);
        if version != 9 && version != 10 {
            self.malformed(MalformedReason::BadVersion);
            return Vec::new();
        }

        // v9: count(2) sys_uptime(4) unix_secs(4) sequence(4) source_id(4) = 20 bytes.
        // IPFIX: length(2) export_time(4) sequence(4) domain_id(4) = 16 bytes.
        let (mut body, domain) = if version == 9 {
            if datagram.len() < 20 {
                self.malformed(MalformedReason::ShortHeader);
                return Vec::new();
            }
            let domain = u32::from_be_bytes([datagram[16], datagram[17], datagram[18], datagram[19]]);
            (&datagram[20..], domain)
        } else {
            if datagram.len() < 16 {
                self.malformed(MalformedReason::ShortHeader);
                return Vec::new();
            }
            let domain = u32::from_be_bytes([datagram[12], datagram[13], datagram[14], datagram[15]]);
            (&datagram[16..], domain)
        };

        let mut out = Vec::new();
        while body.len() >= 4 {
            let Ok((rest, (set_id, length))) = parse_set_header(body) else {
                break;
            };
            if length < 4 || (length as usize) > body.len() + 4 {
                self.malformed(MalformedReason::TruncatedTlv);
                break;
            }
            let set_body_len = length as usize - 4;
            if rest.len() < set_body_len {
                self.malformed(MalformedReason::ShortRecord);
                break;
            }
            let set_body = &rest[..set_body_len];

            if set_id == TEMPLATE_FLOWSET_ID || set_id == IPFIX_TEMPLATE_SET_ID {
                self.parse_template_set(domain, set_body);
            } else if set_id == OPTIONS_TEMPLATE_FLOWSET_ID_V9 || set_id == OPTIONS_TEMPLATE_SET_ID_IPFIX {
                // Options templates describe scope/metadata records, not
                // per-flow records; not needed for the counter engine.
            } else if set_id >= 256 {
                if !self.templates.contains_key(&(domain, set_id)) {
                    self.malformed(MalformedReason::UnknownTemplate);
                } else {
                    out.extend(self.parse_data_set(domain, set_id, set_body));
                }
            }

            body = &rest[set_body_len..];
        }

        if let Some(stats) = self.stats {
            stats.record_decoded(out.len() as u64);
        }
        out
    }
}

#[allow(dead_code)]
fn take_bytes(input: &[u8], n: usize) -> IResult<&[u8], &[u8]> {
    take(n)(input)
}

#[allow(dead_code)]
fn repeat_u8(input: &[u8], n: usize) -> IResult<&[u8], Vec<u8>> {
    nom_count(be_u8, n)(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:2055".parse().unwrap()
    }

    fn build_v9_header(domain: u32) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0..2].copy_from_slice(&9u16.to_be_bytes());
        h[16..20].copy_from_slice(&domain.to_be_bytes());
        h
    }

    fn build_template_set(template_id: u16, fields: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&template_id.to_be_bytes());
        body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (t, l) in fields {
            body.extend_from_slice(&t.to_be_bytes());
            body.extend_from_slice(&l.to_be_bytes());
        }
        let mut set = Vec::new();
        set.extend_from_slice(&TEMPLATE_FLOWSET_ID.to_be_bytes());
        set.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
        set.extend(body);
        set
    }

    fn build_data_set(template_id: u16, record: &[u8]) -> Vec<u8> {
        let mut set = Vec::new();
        set.extend_from_slice(&template_id.to_be_bytes());
        set.extend_from_slice(&((record.len() + 4) as u16).to_be_bytes());
        set.extend_from_slice(record);
        set
    }

    #[test]
    fn data_before_template_is_discarded() {
        let stats = IntakeStats::default();
        let mut decoder = Netflow9Decoder::new(&stats);
        let mut datagram = build_v9_header(1);
        datagram.extend(build_data_set(260, &[1, 2, 3, 4]));
        let packets = decoder.parse(&datagram, addr());
        assert!(packets.is_empty());
        assert_eq!(stats.malformed_frames.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn template_then_data_decodes_one_packet() {
        let stats = IntakeStats::default();
        let mut decoder = Netflow9Decoder::new(&stats);
        let mut datagram = build_v9_header(1);
        datagram.extend(build_template_set(
            260,
            &[
                (FIELD_IPV4_SRC_ADDR, 4),
                (FIELD_IPV4_DST_ADDR, 4),
                (FIELD_L4_SRC_PORT, 2),
                (FIELD_L4_DST_PORT, 2),
                (FIELD_PROTOCOL, 1),
                (FIELD_IN_BYTES, 4),
                (FIELD_IN_PKTS, 4),
            ],
        ));
        let mut record = Vec::new();
        record.extend_from_slice(&[10, 0, 0, 1]);
        record.extend_from_slice(&[10, 0, 0, 2]);
        record.extend_from_slice(&4444u16.to_be_bytes());
        record.extend_from_slice(&80u16.to_be_bytes());
        record.push(6);
        record.extend_from_slice(&1500u32.to_be_bytes());
        record.extend_from_slice(&1u32.to_be_bytes());
        datagram.extend(build_data_set(260, &record));

        let packets = decoder.parse(&datagram, addr());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].bytes, 1500);
        assert_eq!(packets[0].protocol, L4Protocol::Tcp);
    }

    #[test]
    fn variable_length_field_is_walked_by_its_own_prefix() {
        const FIELD_APPLICATION_NAME: u16 = 96;
        let stats = IntakeStats::default();
        let mut decoder = Netflow9Decoder::new(&stats);
        let mut datagram = build_v9_header(1);
        datagram.extend(build_template_set(
            260,
            &[
                (FIELD_IPV4_SRC_ADDR, 4),
                (FIELD_IPV4_DST_ADDR, 4),
                (FIELD_APPLICATION_NAME, VARIABLE_LENGTH),
                (FIELD_IN_BYTES, 4),
                (FIELD_IN_PKTS, 4),
            ],
        ));

        let mut record = Vec::new();
        record.extend_from_slice(&[10, 0, 0, 1]);
        record.extend_from_slice(&[10, 0, 0, 2]);
        record.push(3); // short-form variable-length prefix
        record.extend_from_slice(b"ssh");
        record.extend_from_slice(&1500u32.to_be_bytes());
        record.extend_from_slice(&1u32.to_be_bytes());
        // A second record back to back, to prove the cursor advanced by the
        // actual encoded length rather than the 65535 sentinel.
        record.extend_from_slice(&[10, 0, 0, 3]);
        record.extend_from_slice(&[10, 0, 0, 4]);
        record.push(5);
        record.extend_from_slice(b"https");
        record.extend_from_slice(&900u32.to_be_bytes());
        record.extend_from_slice(&1u32.to_be_bytes());
        datagram.extend(build_data_set(260, &record));

        let packets = decoder.parse(&datagram, addr());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].bytes, 1500);
        assert_eq!(packets[1].bytes, 900);
        assert_eq!(stats.malformed_frames.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn replacing_template_id_takes_effect_immediately() {
        let stats = IntakeStats::default();
        let mut decoder = Netflow9Decoder::new(&stats);
        let mut datagram = build_v9_header(1);
        datagram.extend(build_template_set(260, &[(FIELD_IPV4_SRC_ADDR, 4)]));
        decoder.parse(&datagram, addr());

        let mut datagram2 = build_v9_header(1);
        datagram2.extend(build_template_set(
            260,
            &[(FIELD_IPV4_SRC_ADDR, 4), (FIELD_IPV4_DST_ADDR, 4)],
        ));
        decoder.parse(&datagram2, addr());

        assert_eq!(decoder.templates[&(1, 260)].len(), 2);
    }
}
