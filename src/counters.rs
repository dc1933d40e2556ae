//! The rolling counter engine (§4.3): per-host `SubnetCounter` buckets,
//! `record()` on the hot ingestion path, `tick()` from the single driver
//! thread, and `inspect()` for lock-free read access from any thread.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;

use crate::conntrack::{ConntrackSketch, FlowKey};
use crate::packet::{L4Protocol, SimplePacket};

/// One bytes/packets/flows metric: a monotonic raw counter, the last-second
/// delta, and an exponential moving average. Only the tick driver ever
/// writes `last_raw`/`delta`/`ema`; `raw` is written by any ingest worker.
#[derive(Debug, Default)]
pub struct MetricCounter {
    raw: AtomicU64,
    last_raw: AtomicU64,
    delta: AtomicU64,
    ema_bits: AtomicU64,
}

impl MetricCounter {
    pub fn add(&self, amount: u64) {
        self.raw.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn raw(&self) -> u64 {
        self.raw.load(Ordering::Relaxed)
    }

    pub fn delta(&self) -> u64 {
        self.delta.load(Ordering::Relaxed)
    }

    pub fn ema(&self) -> f64 {
        f64::from_bits(self.ema_bits.load(Ordering::Relaxed))
    }

    /// Advance by one tick: compute this second's delta against the raw
    /// value observed at the previous tick, then fold it into the EMA.
    /// `EMA_t = EMA_{t-1} + alpha * (delta_t - EMA_{t-1})`.
    fn tick(&self, alpha: f64) {
        let raw = self.raw.load(Ordering::Relaxed);
        let last = self.last_raw.swap(raw, Ordering::Relaxed);
        let delta = raw.saturating_sub(last);
        self.delta.store(delta, Ordering::Relaxed);

        let prev_ema = f64::from_bits(self.ema_bits.load(Ordering::Relaxed));
        let new_ema = prev_ema + alpha * (delta as f64 - prev_ema);
        self.ema_bits.store(new_ema.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct DirectionCounters {
    pub bytes: MetricCounter,
    pub packets: MetricCounter,
    pub flows: MetricCounter,
}

#[derive(Debug, Default)]
pub struct Directional {
    pub inbound: DirectionCounters,
    pub outbound: DirectionCounters,
}

/// The accounting bucket held per host (and, for overflow, per subnet).
/// Five-ish sub-sections per §3: total, TCP, TCP-SYN, UDP, ICMP, and
/// IP-fragmented, each with independent in/out byte/packet/flow counters.
#[derive(Debug, Default)]
pub struct SubnetCounter {
    pub total: Directional,
    pub tcp: Directional,
    pub tcp_syn: Directional,
    pub udp: Directional,
    pub icmp: Directional,
    pub ip_fragmented: Directional,
}

impl SubnetCounter {
    fn tick(&self, alpha: f64) {
        for section in [
            &self.total,
            &self.tcp,
            &self.tcp_syn,
            &self.udp,
            &self.icmp,
            &self.ip_fragmented,
        ] {
            for dir in [&section.inbound, &section.outbound] {
                dir.bytes.tick(alpha);
                dir.packets.tick(alpha);
                dir.flows.tick(alpha);
            }
        }
    }
}

enum Direction {
    Inbound,
    Outbound,
}

fn record_into(counter: &SubnetCounter, packet: &SimplePacket, dir: Direction, is_new_flow: bool) {
    let sections: &[&Directional] = match packet.protocol {
        L4Protocol::Tcp if packet.tcp_flags.syn => &[&counter.total, &counter.tcp, &counter.tcp_syn],
        L4Protocol::Tcp => &[&counter.total, &counter.tcp],
        L4Protocol::Udp => &[&counter.total, &counter.udp],
        L4Protocol::Icmp => &[&counter.total, &counter.icmp],
        L4Protocol::Other(_) => &[&counter.total],
    };
    let bytes = packet.bytes * packet.sample_ratio as u64;
    let packets = packet.packets * packet.sample_ratio as u64;
    for section in sections {
        let d = match dir {
            Direction::Inbound => &section.inbound,
            Direction::Outbound => &section.outbound,
        };
        d.bytes.add(bytes);
        d.packets.add(packets);
        if is_new_flow {
            d.flows.add(1);
        }
    }
    if packet.fragmented {
        let d = match dir {
            Direction::Inbound => &counter.ip_fragmented.inbound,
            Direction::Outbound => &counter.ip_fragmented.outbound,
        };
        d.bytes.add(bytes);
        d.packets.add(packets);
        if is_new_flow {
            d.flows.add(1);
        }
    }
}

struct HostEntry {
    counter: SubnetCounter,
    conntrack: Mutex<ConntrackSketch>,
    host_group: String,
}

/// Aggregates normalised packets into per-host counters, subject to a
/// per-host-group ceiling on distinct hosts. Excess hosts are folded into a
/// per-host-group "overflow" bucket rather than rejected outright.
pub struct CounterEngine {
    hosts: DashMap<IpAddr, HostEntry>,
    overflow: DashMap<String, SubnetCounter>,
    group_host_counts: DashMap<String, AtomicUsize>,
    max_hosts_per_group: usize,
    conntrack_capacity: usize,
    ema_alpha: f64,
    hosts_overflowed_total: AtomicU64,
}

impl CounterEngine {
    pub fn new(max_hosts_per_group: usize, conntrack_capacity: usize, average_calculation_time: Duration) -> Self {
        let tau = average_calculation_time.as_secs_f64().max(0.001);
        Self {
            hosts: DashMap::new(),
            overflow: DashMap::new(),
            group_host_counts: DashMap::new(),
            max_hosts_per_group,
            conntrack_capacity,
            ema_alpha: 1.0 - (-1.0 / tau).exp(),
            hosts_overflowed_total: AtomicU64::new(0),
        }
    }

    pub fn hosts_overflowed_total(&self) -> u64 {
        self.hosts_overflowed_total.load(Ordering::Relaxed)
    }

    /// O(1) amortised. Updates the source host's outbound counters and the
    /// destination host's inbound counters.
    pub fn record(&self, packet: &SimplePacket, src_group: &str, dst_group: &str) {
        self.record_direction(packet.src_addr, src_group, packet, Direction::Outbound, true);
        self.record_direction(packet.dst_addr, dst_group, packet, Direction::Inbound, false);
    }

    fn record_direction(
        &self,
        addr: IpAddr,
        group: &str,
        packet: &SimplePacket,
        dir: Direction,
        flow_key_uses_src_as_local: bool,
    ) {
        if !self.hosts.contains_key(&addr) && !self.admit_new_host(group) {
            self.hosts_overflowed_total.fetch_add(1, Ordering::Relaxed);
            let entry = self.overflow.entry(group.to_string()).or_default();
            record_into(&entry, packet, dir, true);
            return;
        }

        let entry = self.hosts.entry(addr).or_insert_with(|| HostEntry {
            counter: SubnetCounter::default(),
            conntrack: Mutex::new(ConntrackSketch::with_capacity(self.conntrack_capacity)),
            host_group: group.to_string(),
        });

        let key = FlowKey {
            src: packet.src_addr,
            dst: packet.dst_addr,
            src_port: if flow_key_uses_src_as_local { packet.src_port } else { packet.dst_port },
            dst_port: if flow_key_uses_src_as_local { packet.dst_port } else { packet.src_port },
            protocol: match packet.protocol {
                L4Protocol::Tcp => 6,
                L4Protocol::Udp => 17,
                L4Protocol::Icmp => 1,
                L4Protocol::Other(n) => n,
            },
        };
        let is_new_flow = entry.conntrack.lock().unwrap().observe(key);
        record_into(&entry.counter, packet, dir, is_new_flow);
    }

    fn admit_new_host(&self, group: &str) -> bool {
        let counter = self
            .group_host_counts
            .entry(group.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let prev = counter.fetch_add(1, Ordering::Relaxed);
        if prev < self.max_hosts_per_group {
            true
        } else {
            counter.fetch_sub(1, Ordering::Relaxed);
            false
        }
    }

    /// Called exactly once per second by the single tick driver. Rotates
    /// every live host's raw counters into delta + EMA.
    pub fn tick(&self) {
        for entry in self.hosts.iter() {
            entry.counter.tick(self.ema_alpha);
        }
        for entry in self.overflow.iter() {
            entry.tick(self.ema_alpha);
        }
    }

    /// Lock-free read snapshot for one host, safe from any thread at any
    /// time. Does not mutate host membership.
    pub fn inspect(&self, addr: &IpAddr) -> Option<HostSnapshot> {
        self.hosts.get(addr).map(|entry| HostSnapshot {
            addr: *addr,
            host_group: entry.host_group.clone(),
            total_in_pps: entry.counter.total.inbound.packets.ema(),
            total_out_pps: entry.counter.total.outbound.packets.ema(),
            total_in_bps: entry.counter.total.inbound.bytes.ema() * 8.0,
            total_out_bps: entry.counter.total.outbound.bytes.ema() * 8.0,
        })
    }

    /// Snapshot every live host's address, for the threshold evaluator walk.
    pub fn live_hosts(&self) -> Vec<IpAddr> {
        self.hosts.iter().map(|e| *e.key()).collect()
    }

    pub fn with_counter<R>(&self, addr: &IpAddr, f: impl FnOnce(&SubnetCounter) -> R) -> Option<R> {
        self.hosts.get(addr).map(|e| f(&e.counter))
    }

    /// Idle-host garbage collection: drop any host whose total raw counters
    /// have not advanced since the last `tick()` and whose EMA has decayed
    /// below a negligible floor. Returns the number of hosts reaped.
    pub fn reap_idle(&self, ema_floor: f64) -> usize {
        let mut to_remove = Vec::new();
        for entry in self.hosts.iter() {
            let c = &entry.counter.total;
            let idle = c.inbound.bytes.delta() == 0
                && c.outbound.bytes.delta() == 0
                && c.inbound.bytes.ema() < ema_floor
                && c.outbound.bytes.ema() < ema_floor;
            if idle {
                to_remove.push(*entry.key());
            }
        }
        for addr in &to_remove {
            if let Some((_, entry)) = self.hosts.remove(addr) {
                if let Some(counter) = self.group_host_counts.get(&entry.host_group) {
                    counter.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        to_remove.len()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HostSnapshot {
    pub addr: IpAddr,
    pub host_group: String,
    pub total_in_pps: f64,
    pub total_out_pps: f64,
    pub total_in_bps: f64,
    pub total_out_bps: f64,
}

/// For tests and the config loader: the minimal set of per-group knobs the
/// counter engine needs.
#[derive(Debug, Clone)]
pub struct GroupCeiling {
    pub host_group: String,
    pub max_hosts: usize,
}

pub fn default_group_ceilings(groups: &[&str], max_hosts: usize) -> HashMap<String, GroupCeiling> {
    groups
        .iter()
        .map(|g| {
            (
                g.to_string(),
                GroupCeiling {
                    host_group: g.to_string(),
                    max_hosts,
                },
            )
        })
        .collect()
}
