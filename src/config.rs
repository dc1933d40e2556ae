//! Application configuration loaded from a TOML file or defaults (§6).

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::hostgroup::{BanSettings, HostGroup};
use crate::subnet::SubnetCidrMask;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub bind: String,
    /// Sampling ratio to apply to decoded counters for sources whose wire
    /// format doesn't carry its own per-sample rate (NetFlow v5's header
    /// sampling field is exporter-informational only, per §4.1). Unused by
    /// sFlow, which derives its ratio from the datagram itself.
    pub sampling_ratio: u32,
}

impl SourceConfig {
    fn sflow() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:6343".to_string(),
            sampling_ratio: 1,
        }
    }
    fn netflow() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:2055".to_string(),
            sampling_ratio: 1,
        }
    }
    fn mirror() -> Self {
        Self {
            enabled: false,
            bind: String::new(),
            sampling_ratio: 1,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: String::new(),
            sampling_ratio: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostGroupConfig {
    pub networks: Vec<String>,
    pub parent_host_group: Option<String>,
    #[serde(flatten)]
    pub ban_settings: BanSettings,
}

impl Default for HostGroupConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            parent_host_group: None,
            ban_settings: BanSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MitigationConfig {
    /// Path to an executable invoked with the attack UUID and the
    /// serialised Flow Spec rule on argv; empty disables it.
    pub exec_script: String,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            exec_script: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperatorApiConfig {
    pub listen: String,
}

impl Default for OperatorApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// EMA time constant tau, in seconds.
    pub average_calculation_time: u64,
    pub enable_ban_ipv6: bool,
    /// Monitored address space; anything outside is dropped before
    /// resolution (§6 "networks_list").
    pub networks_list: Vec<String>,
    pub hostgroups: HashMap<String, HostGroupConfig>,
    /// Accepted and stored but not acted on — exporters are out of scope.
    pub kafka_traffic_export_format: Option<String>,

    pub sflow: SourceConfig,
    pub netflow: SourceConfig,
    pub mirror: SourceConfig,

    pub operator_api: OperatorApiConfig,

    pub max_hosts_per_group: usize,
    pub conntrack_capacity: usize,
    pub capture_ring_capacity: usize,
    /// Directory `<attack_uuid>.pcap` files are written to on attack clear
    /// (§4.5, §6). Created on first flush if it doesn't exist.
    pub capture_dir: String,
    pub attack_archive_capacity: usize,
    pub idle_host_ema_floor: f64,

    pub mitigation: MitigationConfig,
    pub webhook: WebhookConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            average_calculation_time: 15,
            enable_ban_ipv6: false,
            networks_list: Vec::new(),
            hostgroups: HashMap::new(),
            kafka_traffic_export_format: None,
            sflow: SourceConfig::sflow(),
            netflow: SourceConfig::netflow(),
            mirror: SourceConfig::mirror(),
            operator_api: OperatorApiConfig::default(),
            max_hosts_per_group: 100_000,
            conntrack_capacity: 4096,
            capture_ring_capacity: 64,
            capture_dir: "captures".to_string(),
            attack_archive_capacity: 500,
            idle_host_ema_floor: 1.0,
            mitigation: MitigationConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"))?;
        let config: AppConfig =
            toml::de::from_str(&contents).with_context(|| format!("parsing config file {path}"))?;
        Ok(config)
    }

    /// Build the `HostGroup` forest this config describes, for the
    /// resolver. CIDRs that parse fail the whole reload (§7 "configuration
    /// error at reload").
    pub fn build_hostgroups(&self) -> Result<HashMap<String, HostGroup>> {
        let mut groups = HashMap::new();
        for (name, cfg) in &self.hostgroups {
            let mut subnets = Vec::with_capacity(cfg.networks.len());
            for cidr in &cfg.networks {
                let subnet = SubnetCidrMask::parse(cidr)
                    .map_err(|e| anyhow::anyhow!("host group '{name}': {e}"))?;
                subnets.push(subnet);
            }
            groups.insert(
                name.clone(),
                HostGroup {
                    name: name.clone(),
                    parent: cfg.parent_host_group.clone(),
                    subnets,
                    ban_settings: cfg.ban_settings.clone(),
                },
            );
        }
        Ok(groups)
    }

    /// The monitored address space from `networks_list`. An empty list means
    /// "no restriction" — every address is in scope — since that is the
    /// default and must not silently drop all traffic.
    pub fn monitored_networks(&self) -> Result<Vec<SubnetCidrMask>> {
        self.networks_list
            .iter()
            .map(|s| SubnetCidrMask::parse(s).map_err(|e| anyhow::anyhow!("networks_list: {e}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ports() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sflow.bind, "0.0.0.0:6343");
        assert_eq!(cfg.netflow.bind, "0.0.0.0:2055");
        assert_eq!(cfg.average_calculation_time, 15);
    }

    #[test]
    fn parses_hostgroups_with_flattened_ban_settings() {
        let toml_src = r#"
            [hostgroups.customer_a]
            networks = ["10.0.0.0/24"]
            enable_ban = true
            enable_ban_for_pps = true
            threshold_pps = 50000
        "#;
        let cfg: AppConfig = toml::de::from_str(toml_src).unwrap();
        let groups = cfg.build_hostgroups().unwrap();
        let group = &groups["customer_a"];
        assert!(group.ban_settings.enable_ban);
        assert_eq!(group.ban_settings.threshold_pps, 50000);
        assert_eq!(group.subnets.len(), 1);
    }

    #[test]
    fn unknown_kafka_export_format_field_does_not_reject_reload() {
        let toml_src = r#"
            kafka_traffic_export_format = "protobuf"
        "#;
        let cfg: AppConfig = toml::de::from_str(toml_src).unwrap();
        assert_eq!(cfg.kafka_traffic_export_format.as_deref(), Some("protobuf"));
    }

    #[test]
    fn invalid_cidr_is_rejected_atomically() {
        let toml_src = r#"
            [hostgroups.broken]
            networks = ["not-a-cidr"]
        "#;
        let cfg: AppConfig = toml::de::from_str(toml_src).unwrap();
        assert!(cfg.build_hostgroups().is_err());
    }
}
