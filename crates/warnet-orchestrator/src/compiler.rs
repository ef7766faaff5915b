//! Topology to deployment plan compilation.

use crate::container::{NodeImage, ResourceProfile};
use crate::error::CompileError;
use crate::plan::{
    ConnectionDirective, DeploymentPlan, NodeSpec, LABEL_COLLECT_LOGS, LABEL_EXPORTER,
    LABEL_NETWORK, LABEL_TANK,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use tracing::{debug, info};
use warnet_core::generator::is_source_build;
use warnet_core::{generate_address, NodeConf, Subnet, Topology, Vertex, DEFAULT_TAG};
use warnet_rpc::{Chain, RpcCredentials};

/// Default image repository for published node images.
pub const DEFAULT_IMAGE_REPO: &str = "bitcoindevproject/bitcoin";

/// Network-wide inputs to compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDefaults {
    /// Network name.
    pub network: String,
    /// Subnet addresses are drawn from.
    pub subnet: Subnet,
    /// Chain every node runs.
    pub chain: Chain,
    /// Repository for published images.
    pub image_repo: String,
    /// RPC credentials written into every node config.
    pub credentials: RpcCredentials,
    /// Seed for address assignment.
    pub seed: u64,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            network: "warnet".to_string(),
            subnet: Subnet::default(),
            chain: Chain::default(),
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            credentials: RpcCredentials::default(),
            seed: 0,
        }
    }
}

/// Turns validated topologies into deployment plans.
///
/// Compilation is a pure function of its inputs: addresses come from a
/// generator seeded with [`PlanDefaults::seed`] and every collection is
/// ordered, so the same inputs always give the same plan.
#[derive(Debug, Clone, Default)]
pub struct DeploymentCompiler;

impl DeploymentCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Compiles `topology` into a plan.
    pub fn compile(
        &self,
        topology: &Topology,
        defaults: &PlanDefaults,
    ) -> Result<DeploymentPlan, CompileError> {
        let mut rng = ChaCha8Rng::seed_from_u64(defaults.seed);
        let mut taken: HashSet<Ipv4Addr> = reserved_hosts(&defaults.subnet);

        let subnet = &defaults.subnet;
        let held = taken.iter().filter(|addr| subnet.contains(**addr)).count() as u64;
        let free = subnet.size().saturating_sub(held);
        if let Some(vertex) = topology.vertices().get(free as usize) {
            return Err(CompileError::AddressAssignment {
                tank: vertex.id,
                reason: format!(
                    "subnet exhausted: {subnet} has {free} free addresses for {} tanks",
                    topology.vertices().len()
                ),
            });
        }

        let mut nodes = Vec::with_capacity(topology.vertices().len());
        for vertex in topology.vertices() {
            let mut draws = 0u32;
            let address = loop {
                let candidate = generate_address(subnet, &mut rng).map_err(|err| {
                    CompileError::AddressAssignment {
                        tank: vertex.id,
                        reason: err.to_string(),
                    }
                })?;
                if taken.insert(candidate) {
                    break candidate;
                }
                draws += 1;
                if draws >= MAX_ADDRESS_DRAWS {
                    return Err(CompileError::AddressAssignment {
                        tank: vertex.id,
                        reason: format!("subnet exhausted: no free public address left in {subnet}"),
                    });
                }
            };
            nodes.push(self.node_spec(topology, vertex, address, defaults)?);
        }

        let mut connections = Vec::with_capacity(topology.edges().len());
        for edge in topology.edges() {
            if !topology.contains(edge.source) || !topology.contains(edge.target) {
                return Err(CompileError::UnresolvableReference {
                    source_id: edge.source,
                    target: edge.target,
                });
            }
            connections.push(ConnectionDirective {
                from: edge.source,
                to: edge.target,
            });
        }

        info!(
            network = %defaults.network,
            tanks = nodes.len(),
            connections = connections.len(),
            "compiled deployment plan"
        );

        Ok(DeploymentPlan {
            network: defaults.network.clone(),
            subnet: defaults.subnet,
            chain: defaults.chain,
            nodes,
            connections,
        })
    }

    fn node_spec(
        &self,
        topology: &Topology,
        vertex: &Vertex,
        address: Ipv4Addr,
        defaults: &PlanDefaults,
    ) -> Result<NodeSpec, CompileError> {
        let tank = vertex.id;
        let (image, version) = resolve_image(topology, vertex, &defaults.image_repo);
        let profile = ResourceProfile::resolve(tank, vertex.resources())?;
        let config = render_config(vertex, defaults);

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_NETWORK.to_string(), defaults.network.clone());
        labels.insert(LABEL_TANK.to_string(), tank.index().to_string());
        labels.insert(LABEL_EXPORTER.to_string(), vertex.exporter().to_string());
        labels.insert(LABEL_COLLECT_LOGS.to_string(), vertex.collect_logs().to_string());

        debug!(%tank, %image, %address, profile = profile.name(), "compiled node spec");

        Ok(NodeSpec {
            tank,
            unit_name: tank.unit_name(&defaults.network),
            image,
            version,
            profile,
            limits: profile.limits(),
            config,
            address,
            rpc_port: defaults.chain.rpc_port(),
            p2p_port: defaults.chain.p2p_port(),
            tc_netem: vertex.tc_netem().map(str::to_string),
            tor: vertex.tor(),
            ln: vertex.ln(),
            ln_image: vertex.ln_image().map(str::to_string),
            labels,
        })
    }
}

/// Vertex image, else vertex version, else graph version, else [`DEFAULT_TAG`].
fn resolve_image(topology: &Topology, vertex: &Vertex, repo: &str) -> (NodeImage, String) {
    let declared = vertex.version().or_else(|| topology.default_version());

    if let Some(reference) = vertex.image() {
        let image = NodeImage::published(reference);
        let version = declared
            .or_else(|| image.tag())
            .unwrap_or(DEFAULT_TAG)
            .to_string();
        return (image, version);
    }

    let version = declared.unwrap_or(DEFAULT_TAG);
    if is_source_build(version) {
        if let Some(image) = NodeImage::source_build(version, vertex.build_args()) {
            return (image, version.to_string());
        }
    }
    (
        NodeImage::published(format!("{repo}:{version}")),
        version.to_string(),
    )
}

/// Base config for `chain`, the vertex overlay on top, then RPC access.
fn render_config(vertex: &Vertex, defaults: &PlanDefaults) -> String {
    let chain = defaults.chain.as_str();
    let section = Some(chain);

    let mut base = NodeConf::new();
    base.push(None, chain, "1");
    for (key, value) in [
        ("server", "1"),
        ("listen", "1"),
        ("rpcallowip", "0.0.0.0/0"),
        ("rpcbind", "0.0.0.0"),
        ("fallbackfee", "0.00001"),
        ("dnsseed", "0"),
        ("debug", "rpc"),
    ] {
        base.push(section, key, value);
    }

    let mut conf = match vertex.config_overlay() {
        Some(overlay) => base.merge(&NodeConf::parse_overlay(overlay, section)),
        None => base,
    };
    conf.set(section, "rpcuser", &defaults.credentials.user);
    conf.set(section, "rpcpassword", &defaults.credentials.password);
    conf.set(section, "rpcport", &defaults.chain.rpc_port().to_string());
    conf.to_string()
}

/// Addresses a container network keeps for itself.
/// Colliding draws tolerated per tank before the subnet counts as exhausted.
const MAX_ADDRESS_DRAWS: u32 = 100_000;

fn reserved_hosts(subnet: &Subnet) -> HashSet<Ipv4Addr> {
    let network = u32::from(subnet.network());
    [
        subnet.network(),
        Ipv4Addr::from(network.saturating_add(1)),
        subnet.broadcast(),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warnet_core::{AttrValue, Attributes, GenerateOptions, TankId, TopologyGenerator};

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttrValue::from(*v)))
            .collect()
    }

    fn two_tanks(first: Attributes, second: Attributes) -> Topology {
        let mut topology = Topology::new();
        let a = topology.add_vertex(first);
        let b = topology.add_vertex(second);
        topology.add_edge(a, b).unwrap();
        topology
    }

    #[test]
    fn test_compile_is_deterministic() {
        let options = GenerateOptions {
            random_version: true,
            seed: Some(7),
            ..Default::default()
        };
        let topology = TopologyGenerator::default()
            .generate_cycle(12, true, &options)
            .unwrap();
        let defaults = PlanDefaults {
            seed: 42,
            ..Default::default()
        };

        let compiler = DeploymentCompiler::new();
        let first = compiler.compile(&topology, &defaults).unwrap();
        let second = compiler.compile(&topology, &defaults).unwrap();
        assert_eq!(first.to_yaml().unwrap(), second.to_yaml().unwrap());
        assert_eq!(first.nodes.len(), 12);
        assert_eq!(first.connections.len(), topology.edges().len());
    }

    #[test]
    fn test_image_resolution_order() {
        let mut topology = two_tanks(attrs(&[("version", "25.1")]), Attributes::new());
        topology
            .graph_attributes
            .insert("version".into(), AttrValue::from("24.2"));
        let plan = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap();
        assert_eq!(plan.nodes[0].image.reference(), Some("bitcoindevproject/bitcoin:25.1"));
        assert_eq!(plan.nodes[1].image.reference(), Some("bitcoindevproject/bitcoin:24.2"));

        let topology = two_tanks(
            attrs(&[("image", "example/custom:abc")]),
            attrs(&[("version", "bitcoin/bitcoin#master"), ("build_args", "--without-gui")]),
        );
        let plan = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap();
        assert_eq!(plan.nodes[0].image.reference(), Some("example/custom:abc"));
        assert_eq!(plan.nodes[0].version, "abc");
        assert!(matches!(
            &plan.nodes[1].image,
            NodeImage::SourceBuild { repo, branch, build_args }
                if repo == "bitcoin/bitcoin" && branch == "master" && build_args.as_deref() == Some("--without-gui")
        ));

        let topology = two_tanks(Attributes::new(), Attributes::new());
        let plan = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap();
        assert_eq!(plan.nodes[0].version, DEFAULT_TAG);
    }

    #[test]
    fn test_overlay_merges_into_chain_section() {
        let topology = two_tanks(
            attrs(&[("bitcoin_config", "debug=net,uacomment=w0,blocksonly")]),
            Attributes::new(),
        );
        let plan = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap();

        let conf = NodeConf::parse(&plan.nodes[0].config);
        assert_eq!(conf.get(None, "regtest"), Some("1"));
        assert_eq!(conf.get_all(Some("regtest"), "debug").collect::<Vec<_>>(), vec!["net"]);
        assert_eq!(conf.get(Some("regtest"), "server"), Some("1"));
        assert_eq!(conf.get(Some("regtest"), "uacomment"), Some("w0"));
        assert_eq!(conf.get(Some("regtest"), "blocksonly"), Some("1"));
        assert_eq!(conf.get(Some("regtest"), "rpcuser"), Some("warnet_user"));
        assert_eq!(conf.get(Some("regtest"), "rpcport"), Some("18443"));
        assert!(plan.nodes[0].config.starts_with("regtest=1\n\n[regtest]"));

        let untouched = NodeConf::parse(&plan.nodes[1].config);
        assert_eq!(untouched.get(Some("regtest"), "debug"), Some("rpc"));
    }

    #[test]
    fn test_signet_ports_and_section() {
        let topology = two_tanks(Attributes::new(), Attributes::new());
        let defaults = PlanDefaults {
            chain: Chain::Signet,
            ..Default::default()
        };
        let plan = DeploymentCompiler::new().compile(&topology, &defaults).unwrap();
        assert_eq!(plan.nodes[0].rpc_port, 38332);
        assert_eq!(plan.nodes[0].p2p_port, 38333);
        let conf = NodeConf::parse(&plan.nodes[0].config);
        assert_eq!(conf.get(Some("signet"), "rpcport"), Some("38332"));
    }

    #[test]
    fn test_addresses_are_unique_and_public() {
        let topology = TopologyGenerator::default()
            .generate_cycle(50, false, &GenerateOptions::default())
            .unwrap();
        let subnet: Subnet = "100.20.0.0/24".parse().unwrap();
        let defaults = PlanDefaults {
            subnet,
            ..Default::default()
        };
        let plan = DeploymentCompiler::new().compile(&topology, &defaults).unwrap();

        let addresses: HashSet<_> = plan.nodes.iter().map(|n| n.address).collect();
        assert_eq!(addresses.len(), 50);
        for address in addresses {
            assert!(subnet.contains(address));
            assert_ne!(address, subnet.network());
            assert_ne!(address, subnet.broadcast());
        }
    }

    #[test]
    fn test_small_subnet_is_exhausted_not_retried_forever() {
        let topology = two_tanks(Attributes::new(), Attributes::new());
        let defaults = PlanDefaults {
            subnet: "100.20.0.0/30".parse().unwrap(),
            ..Default::default()
        };
        match DeploymentCompiler::new().compile(&topology, &defaults) {
            Err(CompileError::AddressAssignment { tank, reason }) => {
                assert_eq!(tank, TankId(1));
                assert!(reason.contains("subnet exhausted"), "{reason}");
            }
            other => panic!("expected address exhaustion, got {other:?}"),
        }

        // One usable host is enough for a single tank.
        let mut single = Topology::new();
        single.add_vertex(Attributes::new());
        let plan = DeploymentCompiler::new().compile(&single, &defaults).unwrap();
        assert_eq!(plan.nodes[0].address, "100.20.0.2".parse::<std::net::Ipv4Addr>().unwrap());

        for subnet in ["100.20.0.0/31", "100.20.0.1/32"] {
            let defaults = PlanDefaults {
                subnet: subnet.parse().unwrap(),
                ..Default::default()
            };
            assert!(matches!(
                DeploymentCompiler::new().compile(&single, &defaults),
                Err(CompileError::AddressAssignment { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let topology = two_tanks(Attributes::new(), attrs(&[("resources", "mainframe")]));
        let err = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownResourceProfile {
                tank: TankId(1),
                profile: "mainframe".into()
            }
        );
    }

    #[test]
    fn test_labels_and_unit_names() {
        let topology = two_tanks(
            attrs(&[("resources", "laptop")]),
            Attributes::new(),
        );
        let mut topology = topology;
        if let Some(vertex) = topology.vertex_mut(TankId(1)) {
            vertex.attributes.insert("exporter".into(), AttrValue::from(true));
        }
        let defaults = PlanDefaults {
            network: "lab".into(),
            ..Default::default()
        };
        let plan = DeploymentCompiler::new().compile(&topology, &defaults).unwrap();
        assert_eq!(plan.nodes[0].unit_name, "lab-tank-0000");
        assert_eq!(plan.nodes[0].profile, ResourceProfile::Laptop);
        assert!(!plan.nodes[0].exporter());
        assert!(plan.nodes[1].exporter());
        assert_eq!(plan.nodes[1].labels[LABEL_NETWORK], "lab");
        assert_eq!(plan.nodes[1].labels[LABEL_TANK], "1");
    }
}
