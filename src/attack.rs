//! Attack lifecycle state machine (§4.5): `calm -> attack_active ->
//! ban_expired_awaiting_clear -> calm`, peak tracking, and hook dispatch.
//!
//! `attack_details` is a value that *contains* a counter snapshot rather
//! than extending `subnet_counter` (§9 design note); the only polymorphism
//! needed is the [`Hook`] interface.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::capture;
use crate::counters::CounterEngine;
use crate::hostgroup::BanSettings;
use crate::packet::SimplePacket;
use crate::threshold::{self, TrippedMetric};

/// All-zero sentinel used when entropy fails during UUID generation (§7
/// "Entropy/UUID failure"). The attack is still recorded; a warning is
/// logged by the caller.
pub const SENTINEL_UUID: Uuid = Uuid::nil();

pub fn generate_uuid() -> Uuid {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes).into_uuid(),
        Err(e) => {
            tracing::warn!(error = %e, "entropy source failed, using sentinel attack UUID");
            SENTINEL_UUID
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackDirection {
    Incoming,
    Outgoing,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackState {
    AttackActive,
    BanExpiredAwaitingClear,
}

/// Derived from whichever counter sub-section the triggering metric belongs
/// to; not an independently configured property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackProtocol {
    TcpSyn,
    Tcp,
    Udp,
    Icmp,
    Mixed,
}

impl From<TrippedMetric> for AttackProtocol {
    fn from(metric: TrippedMetric) -> Self {
        match metric {
            TrippedMetric::TcpSynPps => AttackProtocol::TcpSyn,
            TrippedMetric::TcpPps | TrippedMetric::TcpBps => AttackProtocol::Tcp,
            TrippedMetric::UdpPps | TrippedMetric::UdpBps => AttackProtocol::Udp,
            TrippedMetric::IcmpPps | TrippedMetric::IcmpBps => AttackProtocol::Icmp,
            TrippedMetric::OverallPps | TrippedMetric::OverallBps | TrippedMetric::FlowsPerSecond => {
                AttackProtocol::Mixed
            }
        }
    }
}

impl std::fmt::Display for AttackProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AttackProtocol::TcpSyn => "tcp_syn",
            AttackProtocol::Tcp => "tcp",
            AttackProtocol::Udp => "udp",
            AttackProtocol::Icmp => "icmp",
            AttackProtocol::Mixed => "mixed",
        };
        write!(f, "{label}")
    }
}

/// How far the current rate sits above the threshold that was crossed at
/// onset. Recomputed whenever peak tracking observes a new high (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttackSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AttackSeverity {
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 10.0 {
            AttackSeverity::Critical
        } else if ratio >= 5.0 {
            AttackSeverity::High
        } else if ratio >= 2.0 {
            AttackSeverity::Medium
        } else {
            AttackSeverity::Low
        }
    }
}

impl std::fmt::Display for AttackSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AttackSeverity::Low => "low",
            AttackSeverity::Medium => "medium",
            AttackSeverity::High => "high",
            AttackSeverity::Critical => "critical",
        };
        write!(f, "{label}")
    }
}

/// Snapshot attached to a host when detection fires. Owns its own UUID,
/// generated fresh on every `calm -> attack_active` transition (re-entry
/// for the same host never reuses a UUID; the prior record is archived).
#[derive(Debug, Clone)]
pub struct AttackDetails {
    pub uuid: Uuid,
    pub host: IpAddr,
    pub host_group: String,
    pub parent_host_group: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    pub ban_timestamp: DateTime<Utc>,
    pub ban_duration: Duration,
    pub enable_unban: bool,
    pub triggering_metric: TrippedMetric,
    pub triggering_threshold: f64,
    pub protocol: AttackProtocol,
    pub severity: AttackSeverity,
    pub direction: AttackDirection,
    pub first_rate: f64,
    pub peak_rate: f64,
    pub state: AttackState,
    pub mitigation_failed: bool,
    pub mitigation_retry_count: u32,
    pub next_mitigation_retry_at: Option<DateTime<Utc>>,
    pub captured_packets: Vec<SimplePacket>,
    capture_capacity: usize,
}

impl AttackDetails {
    pub(crate) fn new(
        host: IpAddr,
        host_group: String,
        parent_host_group: Option<String>,
        verdict: threshold::Verdict,
        direction: AttackDirection,
        now: DateTime<Utc>,
        settings: &BanSettings,
        capture_capacity: usize,
    ) -> Self {
        let ratio = verdict.observed / verdict.threshold.max(f64::EPSILON);
        Self {
            uuid: generate_uuid(),
            host,
            host_group,
            parent_host_group,
            first_detected_at: now,
            ban_timestamp: now,
            ban_duration: Duration::from_secs(settings.ban_time_seconds),
            enable_unban: settings.enable_unban,
            triggering_metric: verdict.metric,
            triggering_threshold: verdict.threshold,
            protocol: AttackProtocol::from(verdict.metric),
            severity: AttackSeverity::from_ratio(ratio),
            direction,
            first_rate: verdict.observed,
            peak_rate: verdict.observed,
            state: AttackState::AttackActive,
            mitigation_failed: false,
            mitigation_retry_count: 0,
            next_mitigation_retry_at: None,
            captured_packets: Vec::new(),
            capture_capacity,
        }
    }

    /// Non-blocking: the ingest side drops captured packets once the ring
    /// is full rather than waiting on a lock (§4.5 "ingest side drops,
    /// never blocks").
    pub fn push_capture(&mut self, packet: SimplePacket) {
        if self.captured_packets.len() < self.capture_capacity {
            self.captured_packets.push(packet);
        }
    }
}

/// Labelled multi-line block, one `label: value` pair per line, in the
/// field order given in §3. Pinned by a test so the ordering cannot drift
/// silently (§9 open question (a)).
impl std::fmt::Display for AttackDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "uuid: {}", self.uuid)?;
        writeln!(f, "host: {}", self.host)?;
        writeln!(f, "host_group: {}", self.host_group)?;
        writeln!(
            f,
            "parent_host_group: {}",
            self.parent_host_group.as_deref().unwrap_or("")
        )?;
        writeln!(f, "first_detected_at: {}", self.first_detected_at.to_rfc3339())?;
        writeln!(f, "ban_timestamp: {}", self.ban_timestamp.to_rfc3339())?;
        writeln!(f, "ban_duration_seconds: {}", self.ban_duration.as_secs())?;
        writeln!(f, "attack_direction: {:?}", self.direction)?;
        writeln!(f, "protocol: {}", self.protocol)?;
        writeln!(f, "severity: {}", self.severity)?;
        writeln!(f, "attack_detection_threshold: {}", self.triggering_metric)?;
        writeln!(f, "attack_power: {:.2}", self.first_rate)?;
        write!(f, "max_attack_power: {:.2}", self.peak_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    Timeout { hook: String },
    Rejected { hook: String, reason: String },
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookError::Timeout { hook } => write!(f, "hook '{hook}' timed out"),
            HookError::Rejected { hook, reason } => write!(f, "hook '{hook}' rejected: {reason}"),
        }
    }
}

impl std::error::Error for HookError {}

/// A notification or mitigation collaborator. Both are the same interface
/// (§9): the attack manager calls notification hooks first, in
/// configuration order, and the mitigation hook last, so an operator
/// observer sees the event before routes shift.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn on_attack_onset(&self, attack: &AttackDetails) -> Result<(), HookError>;
    fn on_attack_peak(&self, attack: &AttackDetails) -> Result<(), HookError>;
    fn on_attack_clear(&self, attack: &AttackDetails) -> Result<(), HookError>;
}

#[derive(Debug, Clone)]
pub struct AttackEvent {
    pub uuid: Uuid,
    pub host: IpAddr,
    pub kind: AttackEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackEventKind {
    Onset,
    Peak,
    Clear,
}

/// Owns the active-attacks map (§5: "single RW lock; writes are rare" —
/// realised here as a sharded `DashMap` for the same low-contention
/// read-mostly discipline used by the counter engine) plus a bounded
/// archive of retired attacks for the operator API.
pub struct AttackManager {
    active: DashMap<IpAddr, AttackDetails>,
    archive: Mutex<Vec<AttackDetails>>,
    archive_capacity: usize,
    capture_capacity: usize,
    capture_dir: PathBuf,
    notification_hooks: Vec<Box<dyn Hook>>,
    mitigation_hook: Box<dyn Hook>,
}

impl AttackManager {
    pub fn new(
        notification_hooks: Vec<Box<dyn Hook>>,
        mitigation_hook: Box<dyn Hook>,
        archive_capacity: usize,
        capture_capacity: usize,
        capture_dir: PathBuf,
    ) -> Self {
        Self {
            active: DashMap::new(),
            archive: Mutex::new(Vec::new()),
            archive_capacity,
            capture_capacity,
            capture_dir,
            notification_hooks,
            mitigation_hook,
        }
    }

    pub fn active_attack(&self, host: &IpAddr) -> Option<AttackDetails> {
        self.active.get(host).map(|e| e.clone())
    }

    /// Append a packet to the destination host's capture ring if it is
    /// currently under active attack; a no-op otherwise. Never blocks on
    /// the tick driver (§4.5 "ingest side drops, never blocks").
    pub fn push_capture(&self, host: &IpAddr, packet: SimplePacket) {
        if let Some(mut entry) = self.active.get_mut(host) {
            entry.push_capture(packet);
        }
    }

    pub fn active_attacks(&self) -> Vec<AttackDetails> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn archived_attacks(&self) -> Vec<AttackDetails> {
        self.archive.lock().unwrap().clone()
    }

    fn archive_attack(&self, attack: AttackDetails) {
        let mut archive = self.archive.lock().unwrap();
        archive.push(attack);
        if archive.len() > self.archive_capacity {
            let excess = archive.len() - self.archive_capacity;
            archive.drain(0..excess);
        }
    }

    fn direction_for(verdict_in: f64, verdict_out: f64) -> AttackDirection {
        if verdict_in > verdict_out {
            AttackDirection::Incoming
        } else if verdict_out > verdict_in {
            AttackDirection::Outgoing
        } else {
            AttackDirection::Other
        }
    }

    /// Walk every live host, evaluate thresholds, and drive the state
    /// machine. Called once per tick, immediately after
    /// [`CounterEngine::tick`]. Returns the events raised this tick, for
    /// logging and tests.
    pub fn evaluate_tick(
        &self,
        engine: &CounterEngine,
        host_groups: &HashMap<IpAddr, (String, Option<String>)>,
        group_settings: &HashMap<String, BanSettings>,
        now: DateTime<Utc>,
    ) -> Vec<AttackEvent> {
        let mut events = Vec::new();
        for host in engine.live_hosts() {
            let Some((group, parent)) = host_groups.get(&host) else {
                continue;
            };
            let Some(settings) = group_settings.get(group) else {
                continue;
            };
            if let Some(existing_state) = self.active.get(&host).map(|e| e.state) {
                if existing_state == AttackState::AttackActive {
                    self.tick_active(&host, group, engine, now, &mut events);
                } else {
                    self.tick_awaiting_clear(&host, now, &mut events);
                }
                continue;
            }

            let verdict = engine.with_counter(&host, |c| threshold::evaluate(c, settings)).flatten();
            if let Some(verdict) = verdict {
                let directional = engine
                    .with_counter(&host, |c| {
                        let metric_dir = match verdict.metric {
                            TrippedMetric::TcpSynPps | TrippedMetric::TcpPps => (
                                c.tcp.inbound.packets.ema(),
                                c.tcp.outbound.packets.ema(),
                            ),
                            TrippedMetric::UdpPps => (
                                c.udp.inbound.packets.ema(),
                                c.udp.outbound.packets.ema(),
                            ),
                            TrippedMetric::IcmpPps => (
                                c.icmp.inbound.packets.ema(),
                                c.icmp.outbound.packets.ema(),
                            ),
                            _ => (
                                c.total.inbound.packets.ema(),
                                c.total.outbound.packets.ema(),
                            ),
                        };
                        metric_dir
                    })
                    .unwrap_or((0.0, 0.0));
                let direction = Self::direction_for(directional.0, directional.1);
                self.begin_attack(host, group.clone(), parent.clone(), verdict, direction, now, settings, &mut events);
            }
        }
        events
    }

    fn begin_attack(
        &self,
        host: IpAddr,
        group: String,
        parent: Option<String>,
        verdict: threshold::Verdict,
        direction: AttackDirection,
        now: DateTime<Utc>,
        settings: &BanSettings,
        events: &mut Vec<AttackEvent>,
    ) {
        let attack = AttackDetails::new(
            host,
            group,
            parent,
            verdict,
            direction,
            now,
            settings,
            self.capture_capacity,
        );
        let uuid = attack.uuid;

        for hook in &self.notification_hooks {
            if let Err(e) = hook.on_attack_onset(&attack) {
                tracing::warn!(hook = hook.name(), error = %e, "notification hook failed on onset");
            }
        }
        // Mitigation runs after notification finishes (§4.5) so an operator
        // observer sees the event before routes shift.
        let mitigation_ok = self.mitigation_hook.on_attack_onset(&attack).is_ok();

        let mut attack = attack;
        attack.mitigation_failed = !mitigation_ok;
        if !mitigation_ok {
            attack.mitigation_retry_count = 1;
            attack.next_mitigation_retry_at = Some(now + chrono::Duration::seconds(1));
        }

        events.push(AttackEvent {
            uuid,
            host,
            kind: AttackEventKind::Onset,
        });
        self.active.insert(host, attack);
    }

    fn tick_active(
        &self,
        host: &IpAddr,
        group: &str,
        engine: &CounterEngine,
        now: DateTime<Utc>,
        events: &mut Vec<AttackEvent>,
    ) {
        let mut should_expire = false;
        if let Some(mut entry) = self.active.get_mut(host) {
            let metric = entry.triggering_metric;
            let rate = engine.with_counter(host, |c| threshold::observe(c, metric));
            if let Some(rate) = rate {
                if rate > entry.peak_rate {
                    entry.peak_rate = rate;
                    entry.severity =
                        AttackSeverity::from_ratio(rate / entry.triggering_threshold.max(f64::EPSILON));
                    let snapshot = entry.clone();
                    drop(entry);
                    for hook in &self.notification_hooks {
                        let _ = hook.on_attack_peak(&snapshot);
                    }
                    events.push(AttackEvent {
                        uuid: snapshot.uuid,
                        host: *host,
                        kind: AttackEventKind::Peak,
                    });
                    entry = self.active.get_mut(host).unwrap();
                }
            }

            if entry.mitigation_failed {
                let ready = entry
                    .next_mitigation_retry_at
                    .map(|t| now >= t)
                    .unwrap_or(true);
                if ready {
                    let snapshot = entry.clone();
                    let ok = self.mitigation_hook.on_attack_onset(&snapshot).is_ok();
                    if ok {
                        entry.mitigation_failed = false;
                        entry.next_mitigation_retry_at = None;
                    } else {
                        entry.mitigation_retry_count += 1;
                        let backoff = 1u64 << entry.mitigation_retry_count.min(6);
                        entry.next_mitigation_retry_at =
                            Some(now + chrono::Duration::seconds(backoff.min(60) as i64));
                    }
                }
            }

            let elapsed = now.signed_duration_since(entry.ban_timestamp);
            let ban_secs = entry.ban_duration.as_secs();
            if entry.enable_unban && ban_secs > 0 && elapsed.num_seconds() as u64 >= ban_secs {
                entry.state = AttackState::BanExpiredAwaitingClear;
                should_expire = true;
            }
        }

        if should_expire {
            self.clear_if_ready(host, group, now, events);
        }
    }

    fn tick_awaiting_clear(&self, host: &IpAddr, now: DateTime<Utc>, events: &mut Vec<AttackEvent>) {
        self.clear_if_ready(host, "", now, events);
    }

    fn clear_if_ready(&self, host: &IpAddr, _group: &str, _now: DateTime<Utc>, events: &mut Vec<AttackEvent>) {
        if let Some((_, attack)) = self.active.remove(host) {
            let _ = self.mitigation_hook.on_attack_clear(&attack);
            for hook in &self.notification_hooks {
                let _ = hook.on_attack_clear(&attack);
            }
            events.push(AttackEvent {
                uuid: attack.uuid,
                host: *host,
                kind: AttackEventKind::Clear,
            });
            self.flush_capture(&attack);
            self.archive_attack(attack);
        }
    }

    /// Writes the attack's capture ring to `<capture_dir>/<uuid>.pcap`
    /// (§4.5, §6). Failures are logged and otherwise ignored: a missing
    /// capture file must never block archiving or the next tick.
    fn flush_capture(&self, attack: &AttackDetails) {
        if let Err(e) = std::fs::create_dir_all(&self.capture_dir) {
            tracing::warn!(error = %e, dir = %self.capture_dir.display(), "failed to create capture directory");
            return;
        }
        let path = self.capture_dir.join(format!("{}.pcap", attack.uuid));
        if let Err(e) = capture::write_pcap(&path, &attack.captured_packets) {
            tracing::warn!(error = %e, path = %path.display(), "failed to flush attack capture");
        }
    }

    /// Manual unban. Idempotent: a second call on a host with no active
    /// attack is a no-op (§8 "Idempotence of unban").
    pub fn unban(&self, host: &IpAddr, now: DateTime<Utc>) -> bool {
        let mut events = Vec::new();
        let existed = self.active.contains_key(host);
        self.clear_if_ready(host, "", now, &mut events);
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::Verdict;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook {
        name: String,
        onset: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        clear: Arc<AtomicUsize>,
    }

    impl Hook for CountingHook {
        fn name(&self) -> &str {
            &self.name
        }
        fn on_attack_onset(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            self.onset.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_attack_peak(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            self.peak.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_attack_clear(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            self.clear.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(ban_time: u64) -> BanSettings {
        BanSettings {
            enable_ban: true,
            enable_ban_for_pps: true,
            threshold_pps: 100,
            ban_time_seconds: ban_time,
            enable_unban: true,
            ..Default::default()
        }
    }

    #[test]
    fn display_format_is_stable_and_labelled() {
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let attack = AttackDetails::new(
            "10.0.0.1".parse().unwrap(),
            "g".to_string(),
            None,
            Verdict {
                metric: TrippedMetric::TcpSynPps,
                observed: 500.0,
                threshold: 100.0,
            },
            AttackDirection::Incoming,
            now,
            &settings(1800),
            16,
        );
        let text = attack.to_string();
        assert!(text.starts_with("uuid: "));
        assert!(text.contains("host: 10.0.0.1"));
        assert!(text.contains("protocol: tcp_syn"));
        assert!(text.contains("severity: high"));
        assert!(text.contains("attack_detection_threshold: tcp_syn_pps"));
        assert!(text.contains("max_attack_power: 500.00"));
    }

    #[test]
    fn unban_is_idempotent() {
        let onset = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let clear = Arc::new(AtomicUsize::new(0));
        let hook = Box::new(CountingHook {
            name: "notify".into(),
            onset: onset.clone(),
            peak: peak.clone(),
            clear: clear.clone(),
        });
        let mitigation = Box::new(CountingHook {
            name: "mitigate".into(),
            onset: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            clear: Arc::new(AtomicUsize::new(0)),
        });
        let manager = AttackManager::new(vec![hook], mitigation, 16, 16, std::env::temp_dir());

        let host: IpAddr = "10.0.0.5".parse().unwrap();
        manager.active.insert(
            host,
            AttackDetails::new(
                host,
                "g".into(),
                None,
                Verdict {
                    metric: TrippedMetric::OverallPps,
                    observed: 200.0,
                    threshold: 100.0,
                },
                AttackDirection::Incoming,
                Utc::now(),
                &settings(1800),
                16,
            ),
        );

        let now = Utc::now();
        assert!(manager.unban(&host, now));
        assert_eq!(clear.load(Ordering::SeqCst), 1);
        assert!(!manager.unban(&host, now));
        assert_eq!(clear.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capture_ring_drops_past_capacity() {
        let mut attack = AttackDetails::new(
            "10.0.0.1".parse().unwrap(),
            "g".into(),
            None,
            Verdict {
                metric: TrippedMetric::OverallPps,
                observed: 1.0,
                threshold: 1.0,
            },
            AttackDirection::Other,
            Utc::now(),
            &settings(1800),
            2,
        );
        let pkt = |n: u16| SimplePacket {
            src_addr: "1.1.1.1".parse().unwrap(),
            dst_addr: "2.2.2.2".parse().unwrap(),
            src_port: n,
            dst_port: 0,
            protocol: crate::packet::L4Protocol::Other(0),
            fragmented: false,
            tcp_flags: Default::default(),
            input_if_index: 0,
            output_if_index: 0,
            bytes: 1,
            packets: 1,
            sample_ratio: 1,
            captured_at_ns: 0,
            payload: None,
        };
        attack.push_capture(pkt(1));
        attack.push_capture(pkt(2));
        attack.push_capture(pkt(3));
        assert_eq!(attack.captured_packets.len(), 2);
    }

    fn drive(engine: &CounterEngine, addr: &str, n: u64, syn: bool, udp: bool, bytes: u64) {
        let src: IpAddr = addr.parse().unwrap();
        let dst: IpAddr = "203.0.113.9".parse().unwrap();
        for i in 0..n {
            let pkt = SimplePacket {
                src_addr: src,
                dst_addr: dst,
                src_port: 1000 + i as u16,
                dst_port: 80,
                protocol: if udp {
                    crate::packet::L4Protocol::Udp
                } else {
                    crate::packet::L4Protocol::Tcp
                },
                fragmented: false,
                tcp_flags: crate::packet::TcpFlags {
                    syn,
                    ..Default::default()
                },
                input_if_index: 0,
                output_if_index: 0,
                bytes,
                packets: 1,
                sample_ratio: 1,
                captured_at_ns: 0,
                payload: None,
            };
            engine.record(&pkt, "g", "other");
        }
        engine.tick();
    }

    #[test]
    fn peak_tracking_follows_the_frozen_metric_not_a_later_tie_break() {
        let engine = CounterEngine::new(1000, 256, Duration::from_secs(1));
        let host: IpAddr = "198.51.100.9".parse().unwrap();
        let mut host_groups = HashMap::new();
        host_groups.insert(host, ("g".to_string(), None));
        let mut group_settings = HashMap::new();
        group_settings.insert(
            "g".to_string(),
            BanSettings {
                enable_ban: true,
                enable_ban_for_tcp_syn_pps: true,
                threshold_tcp_syn_pps: 1,
                enable_ban_for_udp_pps: true,
                threshold_udp_pps: 1,
                ban_time_seconds: 0,
                ..Default::default()
            },
        );

        let manager = AttackManager::new(Vec::new(), Box::new(NoopHook), 16, 16, std::env::temp_dir());

        drive(&engine, "198.51.100.9", 50, true, false, 10);
        manager.evaluate_tick(&engine, &host_groups, &group_settings, Utc::now());
        let onset = manager.active_attack(&host).unwrap();
        assert_eq!(onset.triggering_metric, TrippedMetric::TcpSynPps);

        drive(&engine, "198.51.100.9", 5000, false, true, 10);
        manager.evaluate_tick(&engine, &host_groups, &group_settings, Utc::now());
        let after = manager.active_attack(&host).unwrap();

        assert_eq!(after.triggering_metric, TrippedMetric::TcpSynPps);
        assert_eq!(after.protocol, AttackProtocol::TcpSyn);
        let udp_rate = engine
            .with_counter(&host, |c| threshold::observe(c, TrippedMetric::UdpPps))
            .unwrap();
        assert!(after.peak_rate < udp_rate);
    }

    struct NoopHook;
    impl Hook for NoopHook {
        fn name(&self) -> &str {
            "noop"
        }
        fn on_attack_onset(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            Ok(())
        }
        fn on_attack_peak(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            Ok(())
        }
        fn on_attack_clear(&self, _attack: &AttackDetails) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn clear_flushes_a_pcap_file_named_by_uuid() {
        let dir = std::env::temp_dir().join("netsentry_attack_capture_test");
        let _ = std::fs::remove_dir_all(&dir);
        let manager = AttackManager::new(Vec::new(), Box::new(NoopHook), 16, 16, dir.clone());

        let host: IpAddr = "10.0.0.9".parse().unwrap();
        let mut attack = AttackDetails::new(
            host,
            "g".into(),
            None,
            Verdict {
                metric: TrippedMetric::OverallPps,
                observed: 10.0,
                threshold: 1.0,
            },
            AttackDirection::Incoming,
            Utc::now(),
            &settings(0),
            16,
        );
        let uuid = attack.uuid;
        attack.push_capture(SimplePacket {
            src_addr: "1.1.1.1".parse().unwrap(),
            dst_addr: host,
            src_port: 1,
            dst_port: 2,
            protocol: crate::packet::L4Protocol::Udp,
            fragmented: false,
            tcp_flags: Default::default(),
            input_if_index: 0,
            output_if_index: 0,
            bytes: 64,
            packets: 1,
            sample_ratio: 1,
            captured_at_ns: 0,
            payload: None,
        });
        manager.active.insert(host, attack);

        let mut events = Vec::new();
        manager.clear_if_ready(&host, "g", Utc::now(), &mut events);

        let path = dir.join(format!("{uuid}.pcap"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());
        std::fs::remove_dir_all(&dir).ok();
    }
}
