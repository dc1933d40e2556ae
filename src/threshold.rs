//! Threshold evaluator (§4.4): walks a host's live counters against its
//! host group's `BanSettings` and reports the single metric that tripped,
//! using a fixed, deterministic tie-break order.

use crate::counters::SubnetCounter;
use crate::hostgroup::BanSettings;

/// The metric that crossed its threshold first, in tie-break order. Ordered
/// top-to-bottom exactly as the variants are checked: TCP-SYN pps, TCP pps,
/// UDP pps, ICMP pps, TCP bps, UDP bps, ICMP bps, overall pps, overall bps,
/// flows/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrippedMetric {
    TcpSynPps,
    TcpPps,
    UdpPps,
    IcmpPps,
    TcpBps,
    UdpBps,
    IcmpBps,
    OverallPps,
    OverallBps,
    FlowsPerSecond,
}

impl std::fmt::Display for TrippedMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TrippedMetric::TcpSynPps => "tcp_syn_pps",
            TrippedMetric::TcpPps => "tcp_pps",
            TrippedMetric::UdpPps => "udp_pps",
            TrippedMetric::IcmpPps => "icmp_pps",
            TrippedMetric::TcpBps => "tcp_bps",
            TrippedMetric::UdpBps => "udp_bps",
            TrippedMetric::IcmpBps => "icmp_bps",
            TrippedMetric::OverallPps => "overall_pps",
            TrippedMetric::OverallBps => "overall_bps",
            TrippedMetric::FlowsPerSecond => "flows_per_second",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Verdict {
    pub metric: TrippedMetric,
    pub observed: f64,
    pub threshold: f64,
}

/// Sums inbound and outbound EMA for one metric kind. The spec's thresholds
/// are directionless: a host can be bombarded inbound or, if compromised,
/// flood outbound; either counts.
fn combined_pps(dir: &crate::counters::Directional) -> f64 {
    dir.inbound.packets.ema() + dir.outbound.packets.ema()
}

fn combined_bps(dir: &crate::counters::Directional) -> f64 {
    (dir.inbound.bytes.ema() + dir.outbound.bytes.ema()) * 8.0
}

fn combined_flows(dir: &crate::counters::Directional) -> f64 {
    dir.inbound.flows.ema() + dir.outbound.flows.ema()
}

/// Evaluate one host's counters against its group's ban settings. Returns
/// the first tripped metric in tie-break order, or `None` if nothing
/// crosses its threshold. A disabled rule is never evaluated regardless of
/// its stored threshold value.
pub fn evaluate(counters: &SubnetCounter, settings: &BanSettings) -> Option<Verdict> {
    if !settings.enable_ban {
        return None;
    }

    let checks: &[(bool, f64, u64, TrippedMetric)] = &[
        (
            settings.enable_ban_for_tcp_syn_pps,
            combined_pps(&counters.tcp_syn),
            settings.threshold_tcp_syn_pps,
            TrippedMetric::TcpSynPps,
        ),
        (
            settings.enable_ban_for_tcp_pps,
            combined_pps(&counters.tcp),
            settings.threshold_tcp_pps,
            TrippedMetric::TcpPps,
        ),
        (
            settings.enable_ban_for_udp_pps,
            combined_pps(&counters.udp),
            settings.threshold_udp_pps,
            TrippedMetric::UdpPps,
        ),
        (
            settings.enable_ban_for_icmp_pps,
            combined_pps(&counters.icmp),
            settings.threshold_icmp_pps,
            TrippedMetric::IcmpPps,
        ),
        (
            settings.enable_ban_for_tcp_bandwidth,
            combined_bps(&counters.tcp),
            settings.threshold_tcp_mbps * 1_000_000,
            TrippedMetric::TcpBps,
        ),
        (
            settings.enable_ban_for_udp_bandwidth,
            combined_bps(&counters.udp),
            settings.threshold_udp_mbps * 1_000_000,
            TrippedMetric::UdpBps,
        ),
        (
            settings.enable_ban_for_icmp_bandwidth,
            combined_bps(&counters.icmp),
            settings.threshold_icmp_mbps * 1_000_000,
            TrippedMetric::IcmpBps,
        ),
        (
            settings.enable_ban_for_pps,
            combined_pps(&counters.total),
            settings.threshold_pps,
            TrippedMetric::OverallPps,
        ),
        (
            settings.enable_ban_for_bandwidth,
            combined_bps(&counters.total),
            settings.threshold_mbps * 1_000_000,
            TrippedMetric::OverallBps,
        ),
        (
            settings.enable_ban_for_flows_per_second,
            combined_flows(&counters.total),
            settings.threshold_flows,
            TrippedMetric::FlowsPerSecond,
        ),
    ];

    for &(enabled, observed, threshold, metric) in checks {
        if enabled && observed > threshold as f64 {
            return Some(Verdict {
                metric,
                observed,
                threshold: threshold as f64,
            });
        }
    }
    None
}

/// Reads the current combined rate for one specific metric, independent of
/// tie-break order or whether it is presently above threshold. Used to track
/// an attack's peak against the metric frozen at onset (§4.5), since
/// `evaluate()`'s tie-break pick can differ tick to tick from that frozen
/// metric.
pub fn observe(counters: &SubnetCounter, metric: TrippedMetric) -> f64 {
    match metric {
        TrippedMetric::TcpSynPps => combined_pps(&counters.tcp_syn),
        TrippedMetric::TcpPps => combined_pps(&counters.tcp),
        TrippedMetric::UdpPps => combined_pps(&counters.udp),
        TrippedMetric::IcmpPps => combined_pps(&counters.icmp),
        TrippedMetric::TcpBps => combined_bps(&counters.tcp),
        TrippedMetric::UdpBps => combined_bps(&counters.udp),
        TrippedMetric::IcmpBps => combined_bps(&counters.icmp),
        TrippedMetric::OverallPps => combined_pps(&counters.total),
        TrippedMetric::OverallBps => combined_bps(&counters.total),
        TrippedMetric::FlowsPerSecond => combined_flows(&counters.total),
    }
}
