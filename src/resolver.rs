//! Host-group resolver (§4.2): `resolve(ip) -> (subnet, host_group,
//! parent_host_group) | none`, backed by one Patricia trie per address
//! family.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::hostgroup::HostGroup;
use crate::patricia::{self, PatriciaTrie, Tree};
use crate::subnet::{Family, SubnetCidrMask};

#[derive(Debug, Clone)]
pub struct ResolvedHost {
    pub subnet: SubnetCidrMask,
    pub host_group: String,
    pub parent_host_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapError {
    pub a: String,
    pub b: String,
}

impl std::fmt::Display for OverlapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "overlapping CIDRs between host groups '{}' and '{}'",
            self.a, self.b
        )
    }
}

impl std::error::Error for OverlapError {}

/// Read-mostly longest-prefix resolver. `resolve` is safe to call from any
/// thread at any time; `reload` swaps both trees' generations and is only
/// ever called by the configuration reloader.
pub struct Resolver {
    v4: PatriciaTrie<ResolvedHost>,
    v6: PatriciaTrie<ResolvedHost>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            v4: PatriciaTrie::new(32),
            v6: PatriciaTrie::new(128),
        }
    }

    pub fn resolve(&self, ip: IpAddr) -> Option<ResolvedHost> {
        match ip {
            IpAddr::V4(v4) => {
                let tree = self.v4.snapshot();
                tree.search_best(u32::from(v4) as u128, true)
                    .map(|(host, _)| host.clone())
            }
            IpAddr::V6(v6) => {
                let tree = self.v6.snapshot();
                tree.search_best(u128::from(v6), true)
                    .map(|(host, _)| host.clone())
            }
        }
    }

    /// Validate and publish a new generation built from `hostgroups`.
    /// Rejects the reload atomically on overlap or an unknown parent,
    /// leaving the previously published trees untouched (§7: "Reject the
    /// reload atomically; keep running old config").
    pub fn reload(
        &self,
        hostgroups: &HashMap<String, HostGroup>,
    ) -> Result<(), ReloadError> {
        for group in hostgroups.values() {
            if let Some(parent) = &group.parent {
                if !hostgroups.contains_key(parent) {
                    return Err(ReloadError::UnknownParent {
                        group: group.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        check_no_overlaps(hostgroups)?;

        let (v4_tree, v6_tree) = build_generation(hostgroups);
        self.v4.publish(v4_tree);
        self.v6.publish(v6_tree);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadError {
    UnknownParent { group: String, parent: String },
    Overlap(OverlapError),
}

impl std::fmt::Display for ReloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadError::UnknownParent { group, parent } => write!(
                f,
                "host group '{group}' references unknown parent '{parent}'"
            ),
            ReloadError::Overlap(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReloadError {}

impl From<OverlapError> for ReloadError {
    fn from(e: OverlapError) -> Self {
        ReloadError::Overlap(e)
    }
}

fn check_no_overlaps(hostgroups: &HashMap<String, HostGroup>) -> Result<(), OverlapError> {
    let mut entries: Vec<(&str, &SubnetCidrMask)> = Vec::new();
    for group in hostgroups.values() {
        for subnet in &group.subnets {
            entries.push((group.name.as_str(), subnet));
        }
    }
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let (name_a, a) = entries[i];
            let (name_b, b) = entries[j];
            if name_a == name_b {
                continue;
            }
            if a.family() != b.family() {
                continue;
            }
            let overlapping = a == b
                || (a.prefix_len() <= b.prefix_len() && a.contains(&b.network()))
                || (b.prefix_len() <= a.prefix_len() && b.contains(&a.network()));
            if overlapping {
                return Err(OverlapError {
                    a: name_a.to_string(),
                    b: name_b.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn build_generation(
    hostgroups: &HashMap<String, HostGroup>,
) -> (Tree<ResolvedHost>, Tree<ResolvedHost>) {
    let mut v4_tree = patricia::build(32);
    let mut v6_tree = patricia::build(128);

    for group in hostgroups.values() {
        for subnet in &group.subnets {
            let resolved = ResolvedHost {
                subnet: *subnet,
                host_group: group.name.clone(),
                parent_host_group: group.parent.clone(),
            };
            match subnet.family() {
                Family::V4 => {
                    if let IpAddr::V4(net) = subnet.network() {
                        v4_tree.insert(u32::from(net) as u128, subnet.prefix_len() as u32, resolved);
                    }
                }
                Family::V6 => {
                    if let IpAddr::V6(net) = subnet.network() {
                        v6_tree.insert(u128::from(net), subnet.prefix_len() as u32, resolved);
                    }
                }
            }
        }
    }

    (v4_tree, v6_tree)
}
