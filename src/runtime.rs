//! Wires intake, resolver, counter engine, and attack manager into one
//! running process (§5): N ingest workers feed one shared [`CounterEngine`];
//! a single 1Hz tick driver calls `CounterEngine::tick()` then
//! `AttackManager::evaluate_tick()`; any number of read-only inspector
//! tasks (the operator API) query snapshots concurrently. Template caches
//! stay local to the ingest worker that owns them (§5 concurrency table).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::attack::AttackManager;
use crate::config::AppConfig;
use crate::counters::CounterEngine;
use crate::hooks::exec::ExecHook;
use crate::hooks::webhook::WebhookHook;
use crate::hostgroup::{BanSettings, HostGroup, UNKNOWN_GROUP};
use crate::intake::mirror::MirrorDecoder;
use crate::intake::netflow9::Netflow9Decoder;
use crate::intake::netflow_v5::NetflowV5Decoder;
use crate::intake::sflow::SFlowDecoder;
use crate::intake::{Decoder, IntakeStats};
use crate::resolver::Resolver;

const MAX_DATAGRAM: usize = 65_535;

pub struct Runtime {
    pub config: AppConfig,
    pub resolver: Arc<Resolver>,
    pub engine: Arc<CounterEngine>,
    pub attacks: Arc<AttackManager>,
    pub intake_stats: Arc<IntakeStats>,
    pub hostgroups: Arc<std::sync::RwLock<HashMap<String, HostGroup>>>,
    monitored_networks: Vec<crate::subnet::SubnetCidrMask>,
}

impl Runtime {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let hostgroups = config.build_hostgroups()?;
        let resolver = Resolver::new();
        resolver.reload(&hostgroups)?;
        let monitored_networks = config.monitored_networks()?;

        let engine = CounterEngine::new(
            config.max_hosts_per_group,
            config.conntrack_capacity,
            Duration::from_secs(config.average_calculation_time),
        );

        let mitigation_hook: Box<dyn crate::attack::Hook> =
            Box::new(ExecHook::new(config.mitigation.exec_script.clone()));
        let mut notification_hooks: Vec<Box<dyn crate::attack::Hook>> = Vec::new();
        if !config.webhook.url.is_empty() {
            notification_hooks.push(Box::new(WebhookHook::new(
                config.webhook.url.clone(),
                Duration::from_secs(config.webhook.timeout_secs),
            )));
        }

        let attacks = AttackManager::new(
            notification_hooks,
            mitigation_hook,
            config.attack_archive_capacity,
            config.capture_ring_capacity,
            config.capture_dir.clone().into(),
        );

        Ok(Self {
            config,
            resolver: Arc::new(resolver),
            engine: Arc::new(engine),
            attacks: Arc::new(attacks),
            intake_stats: Arc::new(IntakeStats::default()),
            hostgroups: Arc::new(std::sync::RwLock::new(hostgroups)),
            monitored_networks,
        })
    }

    /// `networks_list` containment check (§6): an empty list monitors
    /// everything, otherwise an address outside every configured network is
    /// dropped before it ever reaches the resolver.
    fn in_scope(&self, addr: IpAddr) -> bool {
        self.monitored_networks.is_empty() || self.monitored_networks.iter().any(|n| n.contains(&addr))
    }

    /// Re-resolve the configured host groups into the Patricia forest
    /// (§6 "SIGHUP reload"). Rejected atomically; the previous generation
    /// keeps serving until a valid reload succeeds.
    pub fn reload_hostgroups(&self, config: &AppConfig) -> anyhow::Result<()> {
        let hostgroups = config.build_hostgroups()?;
        self.resolver.reload(&hostgroups)?;
        *self.hostgroups.write().unwrap() = hostgroups;
        info!("host group configuration reloaded");
        Ok(())
    }

    fn group_settings(&self) -> HashMap<String, BanSettings> {
        let groups = self.hostgroups.read().unwrap();
        let mut settings: HashMap<String, BanSettings> =
            groups.iter().map(|(name, g)| (name.clone(), g.ban_settings.clone())).collect();
        settings.insert(UNKNOWN_GROUP.to_string(), HostGroup::unknown().ban_settings);
        settings
    }

    fn host_groups_snapshot(&self) -> HashMap<IpAddr, (String, Option<String>)> {
        self.engine
            .live_hosts()
            .into_iter()
            .map(|host| match self.resolver.resolve(host) {
                Some(resolved) => (host, (resolved.host_group, resolved.parent_host_group)),
                None => (host, (UNKNOWN_GROUP.to_string(), None)),
            })
            .collect()
    }

    /// One full detection cycle: rotate counters, then walk every live host
    /// through the threshold evaluator and attack state machine (§5 "single
    /// tick driver").
    pub fn tick(&self) {
        self.engine.tick();
        let host_groups = self.host_groups_snapshot();
        let group_settings = self.group_settings();
        let events = self.attacks.evaluate_tick(&self.engine, &host_groups, &group_settings, Utc::now());
        for event in &events {
            info!(host = %event.host, uuid = %event.uuid, kind = ?event.kind, "attack event");
        }
        let reaped = self.engine.reap_idle(self.config.idle_host_ema_floor);
        if reaped > 0 {
            tracing::debug!(reaped, "idle hosts garbage-collected");
        }
    }

    /// Resolve a decoded packet's host groups and record it into the
    /// counter engine; called by every ingest worker (§4.2 -> §4.3 data
    /// flow).
    pub fn ingest(&self, packet: crate::packet::SimplePacket) {
        if !self.in_scope(packet.src_addr) && !self.in_scope(packet.dst_addr) {
            return;
        }
        let src_group = self
            .resolver
            .resolve(packet.src_addr)
            .map(|r| r.host_group)
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string());
        let dst_group = self
            .resolver
            .resolve(packet.dst_addr)
            .map(|r| r.host_group)
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string());
        let dst_addr = packet.dst_addr;
        self.engine.record(&packet, &src_group, &dst_group);
        self.attacks.push_capture(&dst_addr, packet);
    }

    /// Spawn the 1Hz tick driver as a background task. Returns its
    /// `JoinHandle` so `main` can await it at shutdown.
    pub fn spawn_tick_driver(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                runtime.tick();
            }
        })
    }

    /// Spawn one UDP listener per enabled telemetry source, each running
    /// its own decoder instance so template caches (NetFlow v9/IPFIX) never
    /// cross ingest workers (§5 "same worker only").
    pub async fn spawn_intake(self: &Arc<Self>) -> anyhow::Result<Vec<tokio::task::JoinHandle<()>>> {
        let mut handles = Vec::new();

        if self.config.sflow.enabled {
            handles.push(self.spawn_udp_listener(&self.config.sflow.bind, IntakeKind::SFlow).await?);
        }
        if self.config.netflow.enabled {
            handles.push(self.spawn_udp_listener(&self.config.netflow.bind, IntakeKind::Netflow).await?);
        }
        if self.config.mirror.enabled {
            handles.push(self.spawn_udp_listener(&self.config.mirror.bind, IntakeKind::Mirror).await?);
        }

        Ok(handles)
    }

    async fn spawn_udp_listener(
        self: &Arc<Self>,
        bind: &str,
        kind: IntakeKind,
    ) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let socket = UdpSocket::bind(bind).await?;
        info!(bind, kind = ?kind, "telemetry intake listening");
        let runtime = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let stats = Arc::clone(&runtime.intake_stats);
            let mut netflow9 = Netflow9Decoder::new(&stats);
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, kind = ?kind, "intake socket read failed");
                        continue;
                    }
                };
                let datagram = &buf[..len];
                let packets = match kind {
                    IntakeKind::SFlow => SFlowDecoder { stats: &stats }.parse(datagram, from),
                    IntakeKind::Mirror => MirrorDecoder { stats: &stats }.parse(datagram, from),
                    IntakeKind::Netflow => {
                        if len >= 2 && u16::from_be_bytes([datagram[0], datagram[1]]) == 5 {
                            NetflowV5Decoder {
                                stats: &stats,
                                sampling_ratio: runtime.config.netflow.sampling_ratio,
                            }
                            .parse(datagram, from)
                        } else {
                            netflow9.parse(datagram, from)
                        }
                    }
                };
                for packet in packets {
                    runtime.ingest(packet);
                }
            }
        }))
    }

    pub fn malformed_frames_total(&self) -> u64 {
        self.intake_stats.malformed_frames.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
enum IntakeKind {
    SFlow,
    Netflow,
    Mirror,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_groups_snapshot_defaults_unresolved_hosts_to_unknown() {
        let config = AppConfig::default();
        let runtime = Runtime::new(config).unwrap();
        let groups = runtime.host_groups_snapshot();
        assert!(groups.is_empty());
    }

    fn udp_packet(src: &str, dst: &str) -> crate::packet::SimplePacket {
        crate::packet::SimplePacket {
            src_addr: src.parse().unwrap(),
            dst_addr: dst.parse().unwrap(),
            src_port: 1,
            dst_port: 2,
            protocol: crate::packet::L4Protocol::Udp,
            fragmented: false,
            tcp_flags: Default::default(),
            input_if_index: 0,
            output_if_index: 0,
            bytes: 100,
            packets: 1,
            sample_ratio: 1,
            captured_at_ns: 0,
            payload: None,
        }
    }

    #[test]
    fn packets_entirely_outside_networks_list_are_dropped() {
        let mut config = AppConfig::default();
        config.networks_list = vec!["203.0.113.0/24".to_string()];
        let runtime = Runtime::new(config).unwrap();

        runtime.ingest(udp_packet("198.51.100.1", "198.51.100.2"));
        assert!(runtime.engine.live_hosts().is_empty());

        runtime.ingest(udp_packet("198.51.100.1", "203.0.113.10"));
        assert!(!runtime.engine.live_hosts().is_empty());
    }
}
