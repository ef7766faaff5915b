//! In-memory backend for tests and dry runs.
//!
//! Units are records in a table and come up after a configurable start
//! delay. The backend doubles as an [`RpcConnector`]: each simulated node
//! answers a small set of RPC methods, warms up before it accepts calls and
//! remembers the peers it was told to connect to.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use warnet_core::TankId;
use warnet_rpc::{NodeRpc, RpcConnector, RpcEndpoint, RpcError};

use crate::backend::r#trait::{ContainerBackend, ExecOutput, UnitId, UnitStatus};
use crate::error::{OrchestratorError, Result};
use crate::plan::{DeploymentPlan, NodeSpec};

/// Timing of simulated units.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedConfig {
    /// Time from creation until a unit reports `Running`.
    pub start_delay: Duration,
    /// Time after `Running` during which RPC answers "warming up".
    pub rpc_warmup: Duration,
}

struct SimUnit {
    spec: NodeSpec,
    created_at: Instant,
    forced: Option<UnitStatus>,
    peers: Vec<String>,
    execs: Vec<String>,
    log: Vec<String>,
    blocks: u64,
    wallets: Vec<String>,
    spent_sats: u64,
}

impl SimUnit {
    fn status(&self, config: &SimulatedConfig) -> UnitStatus {
        if let Some(forced) = self.forced {
            return forced;
        }
        if self.created_at.elapsed() < config.start_delay {
            UnitStatus::Starting
        } else {
            UnitStatus::Running
        }
    }

    /// Mature coinbase outputs minus what was sent, in sats.
    fn balance_sats(&self) -> u64 {
        const SUBSIDY: u64 = 50 * 100_000_000;
        (self.blocks.saturating_sub(100) * SUBSIDY).saturating_sub(self.spent_sats)
    }

    fn warm(&self, config: &SimulatedConfig) -> bool {
        self.created_at.elapsed() >= config.start_delay + config.rpc_warmup
    }
}

#[derive(Default)]
struct SimState {
    units: BTreeMap<UnitId, SimUnit>,
    by_tank: HashMap<TankId, UnitId>,
    by_address: HashMap<Ipv4Addr, UnitId>,
    networks: HashSet<String>,
    refuse_create: HashSet<TankId>,
    created: usize,
}

/// Backend whose units live in memory.
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    config: SimulatedConfig,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    /// Creates a backend whose units start instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with the given timing.
    pub fn with_config(config: SimulatedConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `create_unit` fail for `tank`.
    pub fn refuse_create(&self, tank: TankId) {
        self.state().refuse_create.insert(tank);
    }

    /// Marks the unit of `tank` as crashed.
    pub fn crash(&self, tank: TankId) {
        let mut state = self.state();
        if let Some(unit) = state.by_tank.get(&tank).cloned() {
            if let Some(unit) = state.units.get_mut(&unit) {
                unit.forced = Some(UnitStatus::Crashed { exit_code: Some(137) });
                unit.log.push("received SIGKILL".to_string());
            }
        }
    }

    /// Peers `tank` has been asked to connect to, in order.
    pub fn peers(&self, tank: TankId) -> Vec<String> {
        self.with_unit(tank, |unit| unit.peers.clone())
            .unwrap_or_default()
    }

    /// Commands executed in the unit of `tank`.
    pub fn execs(&self, tank: TankId) -> Vec<String> {
        self.with_unit(tank, |unit| unit.execs.clone())
            .unwrap_or_default()
    }

    /// Number of units currently present.
    pub fn unit_count(&self) -> usize {
        self.state().units.len()
    }

    /// Number of units ever created.
    pub fn created_count(&self) -> usize {
        self.state().created
    }

    /// Returns true while `network` exists.
    pub fn has_network(&self, network: &str) -> bool {
        self.state().networks.contains(network)
    }

    fn with_unit<T>(&self, tank: TankId, f: impl FnOnce(&SimUnit) -> T) -> Option<T> {
        let state = self.state();
        let unit = state.by_tank.get(&tank)?;
        state.units.get(unit).map(f)
    }

    fn unit_mut<T>(&self, unit: &UnitId, f: impl FnOnce(&mut SimUnit) -> T) -> Result<T> {
        let mut state = self.state();
        state
            .units
            .get_mut(unit)
            .map(f)
            .ok_or_else(|| OrchestratorError::unit_not_found(unit.as_str()))
    }
}

#[async_trait]
impl ContainerBackend for SimulatedBackend {
    async fn prepare_network(&self, plan: &DeploymentPlan) -> Result<()> {
        self.state().networks.insert(plan.network.clone());
        Ok(())
    }

    async fn remove_network(&self, network: &str) -> Result<()> {
        self.state().networks.remove(network);
        Ok(())
    }

    async fn create_unit(&self, spec: &NodeSpec) -> Result<UnitId> {
        let mut state = self.state();
        if state.refuse_create.contains(&spec.tank) {
            return Err(OrchestratorError::unit_creation_failed(
                &spec.unit_name,
                "simulated creation failure",
            ));
        }
        let id = UnitId::new(format!("sim-{}", spec.unit_name));
        let unit = SimUnit {
            spec: spec.clone(),
            created_at: Instant::now(),
            forced: None,
            peers: Vec::new(),
            execs: Vec::new(),
            log: vec![format!("{} starting with image {}", spec.unit_name, spec.image)],
            blocks: 0,
            wallets: Vec::new(),
            spent_sats: 0,
        };
        state.units.insert(id.clone(), unit);
        state.by_tank.insert(spec.tank, id.clone());
        state.by_address.insert(spec.address, id.clone());
        state.created += 1;
        debug!(tank = %spec.tank, unit = %id, "simulated unit created");
        Ok(id)
    }

    async fn destroy_unit(&self, unit: &UnitId) -> Result<()> {
        let mut state = self.state();
        if let Some(removed) = state.units.remove(unit) {
            state.by_tank.remove(&removed.spec.tank);
            state.by_address.remove(&removed.spec.address);
        }
        Ok(())
    }

    async fn unit_status(&self, unit: &UnitId) -> Result<UnitStatus> {
        let config = self.config;
        self.unit_mut(unit, |u| u.status(&config))
    }

    async fn unit_address(&self, unit: &UnitId) -> Result<Option<Ipv4Addr>> {
        let config = self.config;
        self.unit_mut(unit, |u| {
            (u.status(&config) == UnitStatus::Running).then_some(u.spec.address)
        })
    }

    async fn exec(&self, unit: &UnitId, cmd: &[&str]) -> Result<ExecOutput> {
        let line = cmd.join(" ");
        self.unit_mut(unit, |u| {
            u.execs.push(line.clone());
            u.log.push(format!("exec: {line}"));
        })?;
        Ok(ExecOutput::new("", "", 0))
    }

    async fn logs(&self, unit: &UnitId, tail: Option<usize>) -> Result<String> {
        self.unit_mut(unit, |u| {
            let skip = tail.map_or(0, |n| u.log.len().saturating_sub(n));
            u.log[skip..].join("\n")
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

impl RpcConnector for SimulatedBackend {
    fn connect(&self, tank: TankId, endpoint: &RpcEndpoint) -> Arc<dyn NodeRpc> {
        Arc::new(SimulatedNodeRpc {
            tank,
            host: endpoint.host,
            backend: self.clone(),
        })
    }
}

/// RPC client for one simulated node.
pub struct SimulatedNodeRpc {
    tank: TankId,
    host: Ipv4Addr,
    backend: SimulatedBackend,
}

impl SimulatedNodeRpc {
    fn dispatch(&self, unit: &mut SimUnit, method: &str, params: &Value) -> warnet_rpc::Result<Value> {
        let args = params.as_array().cloned().unwrap_or_default();
        match method {
            "getblockchaininfo" => Ok(json!({
                "chain": chain_name(&unit.spec),
                "blocks": unit.blocks,
                "initialblockdownload": false,
            })),
            "getblockcount" => Ok(json!(unit.blocks)),
            "getnetworkinfo" => Ok(json!({
                "subversion": format!("/Satoshi:{}/", unit.spec.version),
                "connections": unit.peers.len(),
            })),
            "getpeerinfo" => Ok(Value::Array(
                unit.peers.iter().map(|p| json!({ "addr": p })).collect(),
            )),
            "addpeeraddress" => {
                let (Some(ip), Some(port)) = (
                    args.first().and_then(Value::as_str),
                    args.get(1).and_then(Value::as_u64),
                ) else {
                    return Err(RpcError::from_node(-32602, "expected [address, port]"));
                };
                unit.peers.push(format!("{ip}:{port}"));
                unit.log.push(format!("added peer address {ip}:{port}"));
                Ok(json!({ "success": true }))
            }
            "addnode" => {
                let Some(node) = args.first().and_then(Value::as_str) else {
                    return Err(RpcError::from_node(-32602, "expected [node, command]"));
                };
                unit.peers.push(node.to_string());
                unit.log.push(format!("addnode {node}"));
                Ok(Value::Null)
            }
            "generatetoaddress" => {
                let count = args.first().and_then(Value::as_u64).unwrap_or(1);
                unit.blocks += count;
                Ok(Value::Array(
                    (0..count).map(|i| json!(format!("{:064x}", unit.blocks - i))).collect(),
                ))
            }
            "createwallet" => {
                let name = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
                if unit.wallets.contains(&name) {
                    return Err(RpcError::from_node(-4, format!("Wallet {name:?} already exists.")));
                }
                unit.wallets.push(name.clone());
                Ok(json!({ "name": name, "warning": "" }))
            }
            "getnewaddress" => {
                if unit.wallets.is_empty() {
                    return Err(RpcError::from_node(-18, "No wallet is loaded."));
                }
                let kind = args.get(1).and_then(Value::as_str).unwrap_or("bech32");
                Ok(json!(format!("{kind}-{}-{}", self.tank.index(), unit.log.len())))
            }
            "getbalance" => {
                if unit.wallets.is_empty() {
                    return Err(RpcError::from_node(-18, "No wallet is loaded."));
                }
                Ok(json!(unit.balance_sats() as f64 / 1e8))
            }
            "sendtoaddress" => {
                let amount = args.get(1).and_then(Value::as_f64).unwrap_or_default();
                let sats = (amount * 1e8) as u64;
                if sats > unit.balance_sats() {
                    return Err(RpcError::from_node(-6, "Insufficient funds"));
                }
                unit.spent_sats += sats;
                unit.log.push("sent transaction".to_string());
                Ok(json!(format!("{:064x}", unit.log.len())))
            }
            _ => Ok(json!({ "tank": self.tank.index(), "method": method })),
        }
    }
}

fn chain_name(spec: &NodeSpec) -> &'static str {
    if spec.rpc_port == warnet_rpc::Chain::Signet.rpc_port() {
        "signet"
    } else {
        "regtest"
    }
}

#[async_trait]
impl NodeRpc for SimulatedNodeRpc {
    async fn call(&self, method: &str, params: &Value) -> warnet_rpc::Result<Value> {
        let config = self.backend.config;
        let mut state = self.backend.state();
        let Some(unit_id) = state.by_address.get(&self.host).cloned() else {
            return Err(RpcError::not_ready(format!("connection refused by {}", self.host)));
        };
        let Some(unit) = state.units.get_mut(&unit_id) else {
            return Err(RpcError::not_ready(format!("connection refused by {}", self.host)));
        };
        if unit.status(&config) != UnitStatus::Running {
            return Err(RpcError::not_ready(format!("connection refused by {}", self.host)));
        }
        if !unit.warm(&config) {
            return Err(RpcError::from_node(
                warnet_rpc::error::RPC_IN_WARMUP,
                "Loading block index...",
            ));
        }
        self.dispatch(unit, method, params)
    }
}
