//! Compiled deployment plans.
//!
//! A [`DeploymentPlan`] is everything the fleet needs to bring a network up:
//! one [`NodeSpec`] per tank and one [`ConnectionDirective`] per edge. Plans
//! are plain data and serialize deterministically, so two compilations of the
//! same topology can be compared byte for byte.

use crate::container::{NodeImage, ResourceLimits, ResourceProfile};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use warnet_core::{Subnet, TankId};
use warnet_rpc::Chain;

/// Label carrying the owning network name.
pub const LABEL_NETWORK: &str = "warnet.network";
/// Label carrying the tank index.
pub const LABEL_TANK: &str = "warnet.tank";
/// Label set when a metrics exporter should be attached.
pub const LABEL_EXPORTER: &str = "warnet.exporter";
/// Label set when logs should be collected.
pub const LABEL_COLLECT_LOGS: &str = "warnet.collect_logs";

/// Everything needed to run one tank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Tank identity.
    pub tank: TankId,
    /// Backend unit name, `<network>-tank-XXXX`.
    pub unit_name: String,
    /// Node image.
    pub image: NodeImage,
    /// Effective version string.
    pub version: String,
    /// Requested profile.
    pub profile: ResourceProfile,
    /// Concrete limits for `profile`.
    pub limits: ResourceLimits,
    /// Rendered node config file.
    pub config: String,
    /// Static address inside the network subnet.
    pub address: Ipv4Addr,
    /// RPC port.
    pub rpc_port: u16,
    /// P2P port.
    pub p2p_port: u16,
    /// Traffic-control command to apply once running.
    pub tc_netem: Option<String>,
    /// Run behind Tor.
    pub tor: bool,
    /// Attach a Lightning companion.
    pub ln: bool,
    /// Lightning companion image override.
    pub ln_image: Option<String>,
    /// Backend labels.
    pub labels: BTreeMap<String, String>,
}

impl NodeSpec {
    /// Returns true if a metrics exporter was requested.
    pub fn exporter(&self) -> bool {
        self.labels.get(LABEL_EXPORTER).map(String::as_str) == Some("true")
    }

    /// Returns true if log collection was requested.
    pub fn collect_logs(&self) -> bool {
        self.labels.get(LABEL_COLLECT_LOGS).map(String::as_str) == Some("true")
    }

    /// Parsed `(major, minor)` of the node version, if it is a release tag.
    pub fn release(&self) -> Option<(u32, u32)> {
        let mut parts = self.version.trim_start_matches('v').split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some((major, minor))
    }

    /// The RPC call that makes this node connect to `peer`.
    ///
    /// Releases before 0.21 only know a one-shot `addnode`. Everything else,
    /// source builds and unparsable versions included, is treated as recent
    /// and gets `addpeeraddress`.
    pub fn peer_command(&self, peer: Ipv4Addr, peer_p2p_port: u16) -> (&'static str, Value) {
        match self.release() {
            Some(release) if release < (0, 21) => {
                ("addnode", json!([format!("{peer}:{peer_p2p_port}"), "onetry"]))
            }
            _ => ("addpeeraddress", json!([peer.to_string(), peer_p2p_port])),
        }
    }
}

/// Intent that `from` opens an outbound connection to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionDirective {
    /// Connecting tank.
    pub from: TankId,
    /// Tank connected to.
    pub to: TankId,
}

/// Ready-to-execute form of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Network name; unit names and labels derive from it.
    pub network: String,
    /// Subnet every address was drawn from.
    pub subnet: Subnet,
    /// Chain every node runs.
    pub chain: Chain,
    /// Node specs in tank order.
    pub nodes: Vec<NodeSpec>,
    /// Connection directives in edge declaration order.
    pub connections: Vec<ConnectionDirective>,
}

impl DeploymentPlan {
    /// Looks up a node spec.
    pub fn node(&self, tank: TankId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.tank == tank)
    }

    /// All tank identities in order.
    pub fn tanks(&self) -> Vec<TankId> {
        self.nodes.iter().map(|n| n.tank).collect()
    }

    /// Directives whose source is `tank`.
    pub fn outbound(&self, tank: TankId) -> impl Iterator<Item = &ConnectionDirective> {
        self.connections.iter().filter(move |c| c.from == tank)
    }

    /// Serializes the plan as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// A compact overview for `network info`.
    pub fn summary(&self) -> PlanSummary {
        let mut versions: BTreeMap<String, usize> = BTreeMap::new();
        for node in &self.nodes {
            *versions.entry(node.version.clone()).or_default() += 1;
        }
        PlanSummary {
            network: self.network.clone(),
            chain: self.chain,
            subnet: self.subnet,
            tanks: self.nodes.len(),
            connections: self.connections.len(),
            versions,
        }
    }
}

/// Overview of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Network name.
    pub network: String,
    /// Chain.
    pub chain: Chain,
    /// Subnet.
    pub subnet: Subnet,
    /// Number of tanks.
    pub tanks: usize,
    /// Number of connection directives.
    pub connections: usize,
    /// Tank count per version.
    pub versions: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(version: &str) -> NodeSpec {
        NodeSpec {
            tank: TankId(0),
            unit_name: "warnet-tank-0000".into(),
            image: NodeImage::published(format!("bitcoindevproject/bitcoin:{version}")),
            version: version.into(),
            profile: ResourceProfile::Default,
            limits: ResourceProfile::Default.limits(),
            config: String::new(),
            address: Ipv4Addr::new(100, 1, 2, 3),
            rpc_port: 18443,
            p2p_port: 18444,
            tc_netem: None,
            tor: false,
            ln: false,
            ln_image: None,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_peer_command_by_version() {
        let peer = Ipv4Addr::new(100, 9, 9, 9);

        let (method, params) = spec("27.0").peer_command(peer, 18444);
        assert_eq!(method, "addpeeraddress");
        assert_eq!(params, json!(["100.9.9.9", 18444]));

        let (method, params) = spec("0.20.1").peer_command(peer, 18444);
        assert_eq!(method, "addnode");
        assert_eq!(params, json!(["100.9.9.9:18444", "onetry"]));

        let (method, _) = spec("0.21.0").peer_command(peer, 18444);
        assert_eq!(method, "addpeeraddress");

    }

    #[test]
    fn test_source_builds_are_treated_as_recent() {
        let peer = Ipv4Addr::new(100, 9, 9, 9);

        let (method, params) = spec("bitcoin/bitcoin#master").peer_command(peer, 18444);
        assert_eq!(method, "addpeeraddress");
        assert_eq!(params, json!(["100.9.9.9", 18444]));

        let (method, _) = spec("my-fork").peer_command(peer, 18444);
        assert_eq!(method, "addpeeraddress");
    }

    #[test]
    fn test_flag_labels() {
        let mut node = spec("26.0");
        assert!(!node.exporter());
        node.labels.insert(LABEL_EXPORTER.into(), "true".into());
        assert!(node.exporter());
        assert!(!node.collect_logs());
    }
}
