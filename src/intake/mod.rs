//! Telemetry intake (§4.1): one decoder per wire format, all producing the
//! same normalised [`SimplePacket`] record. Nothing downstream knows which
//! protocol a packet came from.

pub mod ethernet;
pub mod mirror;
pub mod netflow_v5;
pub mod netflow9;
pub mod sflow;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::packet::SimplePacket;

/// `PacketSink` re-expresses the spec's `process_packet_pointer` function
/// pointer (§9) as a capability object: intake holds one sink per enabled
/// downstream and calls `consume` for every decoded record.
pub trait PacketSink: Send + Sync {
    fn consume(&self, packet: SimplePacket);
}

impl<F: Fn(SimplePacket) + Send + Sync> PacketSink for F {
    fn consume(&self, packet: SimplePacket) {
        self(packet)
    }
}

/// One malformed-frame tally per `(source, reason)` pair, process-wide, in
/// the style of the teacher's `netflow::FLOWS_RECEIVED` counters rather
/// than a metrics-crate dependency.
#[derive(Debug, Default)]
pub struct IntakeStats {
    pub malformed_frames: AtomicU64,
    pub decoded_packets: AtomicU64,
}

impl IntakeStats {
    pub fn record_malformed(&self, source: &str, reason: &str) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(source, reason, "dropping malformed telemetry frame");
    }

    pub fn record_decoded(&self, count: u64) {
        self.decoded_packets.fetch_add(count, Ordering::Relaxed);
    }
}

/// Implemented by every wire decoder. `parse` never blocks and never
/// allocates beyond the output records themselves (§4.1 invariants).
pub trait Decoder {
    fn parse(&mut self, datagram: &[u8], source_addr: SocketAddr) -> Vec<SimplePacket>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    ShortHeader,
    BadVersion,
    ShortRecord,
    UnknownTemplate,
    TruncatedTlv,
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MalformedReason::ShortHeader => "short_header",
            MalformedReason::BadVersion => "bad_version",
            MalformedReason::ShortRecord => "short_record",
            MalformedReason::UnknownTemplate => "unknown_template",
            MalformedReason::TruncatedTlv => "truncated_tlv",
        };
        write!(f, "{s}")
    }
}
