//! Raw mirror-port capture decoder (§4.1): full Ethernet frames with no
//! sampling applied.

use std::net::SocketAddr;

use crate::packet::SimplePacket;

use super::ethernet::{decode_frame, decoded_to_packet};
use super::{Decoder, IntakeStats, MalformedReason};

pub struct MirrorDecoder<'a> {
    pub stats: &'a IntakeStats,
}

impl<'a> Decoder for MirrorDecoder<'a> {
    fn parse(&mut self, datagram: &[u8], _source_addr: SocketAddr) -> Vec<SimplePacket> {
        let Some(frame) = decode_frame(datagram) else {
            self.stats
                .record_malformed("mirror", &MalformedReason::ShortHeader.to_string());
            return Vec::new();
        };
        let packet = decoded_to_packet(frame, datagram.len() as u64, 1, 1, 0, 0);
        self.stats.record_decoded(1);
        vec![packet]
    }
}
