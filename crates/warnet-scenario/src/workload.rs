//! Built-in workloads.
//!
//! `tx-flood` runs one worker per tank. Each worker sets up a wallet, then
//! every interval mines when its balance is low or sends a random amount to
//! an address owned by some tank in the network. Workers run under a
//! [`Supervisor`], so a worker that dies is restarted rather than ending
//! the scenario.

use async_trait::async_trait;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warnet_core::TankId;
use warnet_rpc::{RpcError, RpcTarget};

use crate::error::{Result, ScenarioError};
use crate::executor::{LaunchSpec, ScenarioExecutor, ScenarioUnit};
use crate::handle::{LogBuffer, ScenarioExit};
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};

const ADDRESS_TYPES: [&str; 4] = ["legacy", "p2sh-segwit", "bech32", "bech32m"];

/// Wallet already exists.
const RPC_WALLET_EXISTS: i64 = -4;
/// Wallet already loaded.
const RPC_WALLET_LOADED: i64 = -35;

/// Live RPC targets of a network.
pub trait TargetSource: Send + Sync {
    /// Targets for every live tank of `network`, or `None` if the network
    /// is not deployed.
    fn targets(&self, network: &str) -> Option<Vec<RpcTarget>>;
}

/// Settings for `tx-flood`.
#[derive(Debug, Clone, PartialEq)]
pub struct TxFloodConfig {
    /// Time between transactions per worker.
    pub interval: Duration,
    /// Delay between starting consecutive workers.
    pub stagger: Duration,
    /// Blocks mined when a wallet cannot pay.
    pub mine_batch: u64,
    /// Wallet name on every tank.
    pub wallet: String,
}

impl Default for TxFloodConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stagger: Duration::from_secs(1),
            mine_batch: 101,
            wallet: "warnet".to_string(),
        }
    }
}

impl TxFloodConfig {
    /// Parses `--interval`, `--mine-batch` and `--wallet`, in either
    /// `--flag=value` or `--flag value` form.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg.as_str(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| iter.next().cloned())
                    .ok_or_else(|| ScenarioError::invalid_argument(flag, "missing value"))
            };
            match flag {
                "--interval" => {
                    let secs: u64 = value()?
                        .parse()
                        .map_err(|_| ScenarioError::invalid_argument(flag, "expected seconds"))?;
                    if secs == 0 {
                        return Err(ScenarioError::invalid_argument(flag, "must be positive"));
                    }
                    config.interval = Duration::from_secs(secs);
                }
                "--mine-batch" => {
                    config.mine_batch = value()?
                        .parse()
                        .map_err(|_| ScenarioError::invalid_argument(flag, "expected a count"))?;
                }
                "--wallet" => config.wallet = value()?,
                _ => return Err(ScenarioError::invalid_argument(arg, "unknown option")),
            }
        }
        Ok(config)
    }
}

/// Addresses shared by all workers of one run.
#[derive(Clone, Default)]
struct AddressBook(Arc<Mutex<Vec<String>>>);

impl AddressBook {
    fn add(&self, address: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(address);
    }

    fn pick(&self, rng: &mut StdRng) -> Option<String> {
        let book = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if book.is_empty() {
            return None;
        }
        Some(book[rng.gen_range(0..book.len())].clone())
    }
}

struct Worker {
    target: RpcTarget,
    config: Arc<TxFloodConfig>,
    book: AddressBook,
    logs: LogBuffer,
}

impl Worker {
    async fn setup(&self) -> std::result::Result<String, RpcError> {
        let client = &self.target.client;
        match client.call("createwallet", &json!([self.config.wallet])).await {
            Ok(_) => {}
            Err(err) if matches!(err.code, Some(RPC_WALLET_EXISTS | RPC_WALLET_LOADED)) => {}
            Err(err) => return Err(err),
        }
        let mut own = None;
        for kind in ADDRESS_TYPES {
            let address = client.call("getnewaddress", &json!(["", kind])).await?;
            let address = address
                .as_str()
                .ok_or_else(|| RpcError::malformed("getnewaddress returned a non-string"))?
                .to_string();
            own.get_or_insert_with(|| address.clone());
            self.book.add(address);
        }
        own.ok_or_else(|| RpcError::malformed("no address"))
    }

    async fn round(&self, mine_to: &str, rng: &mut StdRng) -> std::result::Result<String, RpcError> {
        let tank = self.target.tank.index();
        let client = &self.target.client;
        let balance = client
            .call("getbalance", &Value::Null)
            .await?
            .as_f64()
            .ok_or_else(|| RpcError::malformed("getbalance returned a non-number"))?;
        if balance < 1.0 {
            client
                .call("generatetoaddress", &json!([self.config.mine_batch, mine_to]))
                .await?;
            return Ok(format!("tank {tank} mined {} blocks", self.config.mine_batch));
        }
        let to = self.book.pick(rng).unwrap_or_else(|| mine_to.to_string());
        let ceiling = ((balance / 20.0) * 1e8) as u64;
        let sats = rng.gen_range(ceiling / 4..ceiling.max(ceiling / 4 + 1));
        let amount = sats as f64 / 1e8;
        client.call("sendtoaddress", &json!([to, amount])).await?;
        Ok(format!("tank {tank} sent tx of {amount:.8} BTC"))
    }

    async fn run(self, delay: Duration, cancel: CancellationToken) {
        let tank = self.target.tank.index();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
        let mine_to = match self.setup().await {
            Ok(address) => address,
            Err(err) => {
                error!(tank, error = %err, "wallet setup failed");
                self.logs.push(format!("tank {tank} setup error: {err}"));
                return;
            }
        };
        let mut rng = StdRng::from_entropy();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.interval) => {}
            }
            match self.round(&mine_to, &mut rng).await {
                Ok(line) => {
                    info!(tank, "{line}");
                    self.logs.push(line);
                }
                Err(err) => {
                    error!(tank, error = %err, "tx round failed");
                    self.logs.push(format!("tank {tank} error: {err}"));
                }
            }
        }
    }
}

/// The `tx-flood` workload as a scenario executor.
pub struct TxFlood {
    source: Arc<dyn TargetSource>,
    supervision: SupervisorConfig,
    running: Mutex<BTreeMap<String, SupervisorHandle>>,
}

impl TxFlood {
    /// Program name the workload is registered under.
    pub const NAME: &'static str = "tx-flood";

    /// Creates the workload.
    pub fn new(source: Arc<dyn TargetSource>, supervision: SupervisorConfig) -> Self {
        Self {
            source,
            supervision,
            running: Mutex::default(),
        }
    }

    /// Supervisor of the most recent run against `network`.
    pub fn supervisor(&self, network: &str) -> Option<SupervisorHandle> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .cloned()
    }
}

#[async_trait]
impl ScenarioExecutor for TxFlood {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ScenarioUnit> {
        let config = Arc::new(TxFloodConfig::from_args(&spec.args)?);
        let targets = self
            .source
            .targets(&spec.network)
            .ok_or_else(|| ScenarioError::NetworkUnavailable(spec.network.clone()))?;
        let targets: Arc<BTreeMap<TankId, RpcTarget>> =
            Arc::new(targets.into_iter().map(|t| (t.tank, t)).collect());

        let logs = LogBuffer::default();
        logs.push(format!("starting tx flood with {} workers", targets.len()));

        let book = AddressBook::default();
        let tanks: Vec<TankId> = targets.keys().copied().collect();
        let factory = {
            let logs = logs.clone();
            move |tank: TankId, cancel: CancellationToken| {
                let position = targets.keys().position(|t| *t == tank).unwrap_or(0) as u32;
                let delay = config.stagger * position;
                match targets.get(&tank) {
                    Some(target) => Worker {
                        target: target.clone(),
                        config: config.clone(),
                        book: book.clone(),
                        logs: logs.clone(),
                    }
                    .run(delay, cancel)
                    .boxed(),
                    None => futures::future::ready(()).boxed(),
                }
            }
        };

        let supervisor =
            Supervisor::new(self.supervision.clone(), factory, tanks).with_logs(logs.clone());
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.network.clone(), supervisor.handle());

        let stop = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let token = stop.clone();
        tokio::spawn(async move {
            supervisor.run(token).await;
            exit_tx.send_replace(Some(ScenarioExit::Stopped));
        });

        let cmd = std::iter::once(Self::NAME.to_string())
            .chain(spec.args.iter().cloned())
            .chain(std::iter::once(spec.network_arg()))
            .collect();
        info!(scenario = %spec.id, network = %spec.network, "launched tx flood");
        Ok(ScenarioUnit {
            pid: None,
            cmd,
            logs,
            exit: exit_rx,
            stop,
        })
    }
}
