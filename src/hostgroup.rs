//! `HostGroup` and `BanSettings` — §3 and §6 of the detection policy.

use serde::{Deserialize, Serialize};

use crate::subnet::SubnetCidrMask;

/// Flat record of per-metric enable flags and thresholds. Defaults: all
/// disabled, all thresholds zero. A disabled rule never fires regardless of
/// its numeric threshold, even if a future reload leaves a stale nonzero
/// value in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanSettings {
    pub enable_ban: bool,
    pub enable_ban_ipv6: bool,

    pub enable_ban_for_pps: bool,
    pub threshold_pps: u64,

    pub enable_ban_for_bandwidth: bool,
    pub threshold_mbps: u64,

    pub enable_ban_for_flows_per_second: bool,
    pub threshold_flows: u64,

    pub enable_ban_for_tcp_pps: bool,
    pub threshold_tcp_pps: u64,
    pub enable_ban_for_tcp_bandwidth: bool,
    pub threshold_tcp_mbps: u64,

    pub enable_ban_for_udp_pps: bool,
    pub threshold_udp_pps: u64,
    pub enable_ban_for_udp_bandwidth: bool,
    pub threshold_udp_mbps: u64,

    pub enable_ban_for_icmp_pps: bool,
    pub threshold_icmp_pps: u64,
    pub enable_ban_for_icmp_bandwidth: bool,
    pub threshold_icmp_mbps: u64,

    /// Not a wire threshold, but honoured by the tie-break: a TCP packet
    /// with the SYN flag set is additionally checked against this pps cap.
    pub enable_ban_for_tcp_syn_pps: bool,
    pub threshold_tcp_syn_pps: u64,

    pub ban_time_seconds: u64,
    pub enable_unban: bool,
}

impl Default for BanSettings {
    fn default() -> Self {
        Self {
            enable_ban: false,
            enable_ban_ipv6: false,
            enable_ban_for_pps: false,
            threshold_pps: 0,
            enable_ban_for_bandwidth: false,
            threshold_mbps: 0,
            enable_ban_for_flows_per_second: false,
            threshold_flows: 0,
            enable_ban_for_tcp_pps: false,
            threshold_tcp_pps: 0,
            enable_ban_for_tcp_bandwidth: false,
            threshold_tcp_mbps: 0,
            enable_ban_for_udp_pps: false,
            threshold_udp_pps: 0,
            enable_ban_for_udp_bandwidth: false,
            threshold_udp_mbps: 0,
            enable_ban_for_icmp_pps: false,
            threshold_icmp_pps: 0,
            enable_ban_for_icmp_bandwidth: false,
            threshold_icmp_mbps: 0,
            enable_ban_for_tcp_syn_pps: false,
            threshold_tcp_syn_pps: 0,
            ban_time_seconds: 1800,
            enable_unban: true,
        }
    }
}

/// A synthetic group every unresolved address is attributed to. Its
/// thresholds are always disabled regardless of what a config might set.
pub const UNKNOWN_GROUP: &str = "__unknown";

/// Named set of subnets with an optional parent and its own ban policy.
/// Groups form a forest: resolution walks at most one parent link.
#[derive(Debug, Clone)]
pub struct HostGroup {
    pub name: String,
    pub parent: Option<String>,
    pub subnets: Vec<SubnetCidrMask>,
    pub ban_settings: BanSettings,
}

impl HostGroup {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_GROUP.to_string(),
            parent: None,
            subnets: Vec::new(),
            ban_settings: BanSettings::default(),
        }
    }
}
