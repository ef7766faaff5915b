//! The operator command surface.
//!
//! Every command runs as: pre hooks, body, post hooks. Post hooks only run
//! when the body succeeded. Hook failures are logged by the dispatcher and
//! never change a command's result.

use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use warnet_core::{GenerateOptions, TankId, TankSelector, Topology, TopologyDocument, TopologyGenerator};
use warnet_hooks::{HookContext, HookDispatcher, HookPhase};
use warnet_orchestrator::{
    DeploymentCompiler, DeploymentReport, ExecOutput, FleetOrchestrator, LogMatch, NetworkStatus,
    OrchestratorContext, PlanDefaults, PlanSummary,
};
use warnet_rpc::FanOutResult;
use warnet_scenario::{
    ProcessExecutor, ScenarioHandle, ScenarioRunner, SupervisorConfig, TxFlood,
};

use crate::error::{ControlError, Result};
use crate::registry::NetworkRegistry;

/// Command names as seen by hooks.
pub mod commands {
    /// `graph generate`
    pub const GRAPH_GENERATE: &str = "graph generate";
    /// `graph validate`
    pub const GRAPH_VALIDATE: &str = "graph validate";
    /// `network deploy`
    pub const NETWORK_DEPLOY: &str = "network deploy";
    /// `network status`
    pub const NETWORK_STATUS: &str = "network status";
    /// `network stop`
    pub const NETWORK_STOP: &str = "network stop";
    /// `network connected`
    pub const NETWORK_CONNECTED: &str = "network connected";
    /// `network info`
    pub const NETWORK_INFO: &str = "network info";
    /// `network reconnect`
    pub const NETWORK_RECONNECT: &str = "network reconnect";
    /// `rpc`
    pub const RPC: &str = "rpc";
    /// `tank exec`
    pub const TANK_EXEC: &str = "tank exec";
    /// `tank logs`
    pub const TANK_LOGS: &str = "tank logs";
    /// `logs grep`
    pub const LOGS_GREP: &str = "logs grep";
    /// `scenario run`
    pub const SCENARIO_RUN: &str = "scenario run";
    /// `scenario stop`
    pub const SCENARIO_STOP: &str = "scenario stop";
    /// `scenario list`
    pub const SCENARIO_LIST: &str = "scenario list";
    /// `scenario logs`
    pub const SCENARIO_LOGS: &str = "scenario logs";
    /// `scenario available`
    pub const SCENARIO_AVAILABLE: &str = "scenario available";
}

use commands::*;

/// Control plane settings.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Plan defaults; the network name is the default for `network deploy`.
    pub defaults: PlanDefaults,
    /// Deadline for operator RPC calls.
    pub rpc_deadline: Duration,
    /// Supervision of built-in workloads.
    pub supervision: SupervisorConfig,
    /// Where scenario programs live.
    pub scenarios_dir: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            defaults: PlanDefaults::default(),
            rpc_deadline: Duration::from_secs(30),
            supervision: SupervisorConfig::default(),
            scenarios_dir: None,
        }
    }
}

/// Executes operator commands against deployed networks.
pub struct ControlPlane {
    generator: TopologyGenerator,
    compiler: DeploymentCompiler,
    fleet: FleetOrchestrator,
    networks: NetworkRegistry,
    scenarios: ScenarioRunner,
    hooks: HookDispatcher,
    config: ControlConfig,
}

impl ControlPlane {
    /// Creates a control plane. `process` launches file-based scenarios;
    /// `tx-flood` is always available as a built-in.
    pub fn new(
        fleet: FleetOrchestrator,
        process: ProcessExecutor,
        hooks: HookDispatcher,
        config: ControlConfig,
    ) -> Self {
        let networks = NetworkRegistry::default();
        let flood = TxFlood::new(Arc::new(networks.clone()), config.supervision.clone());
        let mut scenarios = ScenarioRunner::new(process).with_builtin(TxFlood::NAME, Arc::new(flood));
        if let Some(dir) = &config.scenarios_dir {
            scenarios = scenarios.with_scenarios_dir(dir);
        }
        Self {
            generator: TopologyGenerator::default(),
            compiler: DeploymentCompiler::new(),
            fleet,
            networks,
            scenarios,
            hooks,
            config,
        }
    }

    /// Settings.
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Scenario runner.
    pub fn scenarios(&self) -> &ScenarioRunner {
        &self.scenarios
    }

    async fn hooked<T, F>(&self, command: &str, network: Option<&str>, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.hooks
            .dispatch(&HookContext::new(command, HookPhase::Pre, network))
            .await;
        let output = body.await?;
        self.hooks
            .dispatch(&HookContext::new(command, HookPhase::Post, network))
            .await;
        Ok(output)
    }

    fn context(&self, network: &str) -> Result<OrchestratorContext> {
        self.networks
            .get(network)
            .ok_or_else(|| ControlError::NetworkNotFound(network.to_string()))
    }

    /// Generates a ring of `n` tanks, optionally with random extra edges.
    pub async fn graph_generate(
        &self,
        n: usize,
        random_extra: bool,
        options: &GenerateOptions,
    ) -> Result<TopologyDocument> {
        self.hooked(GRAPH_GENERATE, None, async {
            let topology = self.generator.generate_cycle(n, random_extra, options)?;
            Ok(topology.to_document())
        })
        .await
    }

    /// Validates a topology document.
    pub async fn graph_validate(&self, raw: &str) -> Result<Topology> {
        self.hooked(GRAPH_VALIDATE, None, async {
            Ok(self.generator.load_and_validate(raw)?)
        })
        .await
    }

    /// Deploys a topology document as `network`, or the default network
    /// name. Returns once every tank worker runs; use
    /// [`ControlPlane::network_wait`] for the outcome.
    #[instrument(skip(self, raw))]
    pub async fn network_deploy(&self, raw: &str, network: Option<&str>) -> Result<String> {
        let name = network.unwrap_or(&self.config.defaults.network).to_string();
        self.hooked(NETWORK_DEPLOY, Some(&name), async {
            if self.networks.contains(&name) {
                return Err(ControlError::NetworkExists(name.clone()));
            }
            let topology = self.generator.load_and_validate(raw)?;
            let defaults = PlanDefaults {
                network: name.clone(),
                ..self.config.defaults.clone()
            };
            let plan = self.compiler.compile(&topology, &defaults)?;
            info!(
                network = %name,
                tanks = plan.nodes.len(),
                connections = plan.connections.len(),
                "deploying network"
            );
            let context = self.fleet.deploy(plan).await?;
            if !self.networks.insert(context.clone()) {
                context.shutdown().await?;
                return Err(ControlError::NetworkExists(name.clone()));
            }
            Ok(name.clone())
        })
        .await
    }

    /// Waits for `network` to settle, up to `limit` or the configured
    /// readiness timeout.
    pub async fn network_wait(&self, network: &str, limit: Option<Duration>) -> Result<DeploymentReport> {
        let context = self.context(network)?;
        let limit = limit.unwrap_or(self.fleet.config().readiness_timeout);
        Ok(context.wait_settled(limit).await?)
    }

    /// Deployed network names.
    pub fn network_list(&self) -> Vec<String> {
        self.networks.names()
    }

    /// Tank and edge states of `network`.
    pub async fn network_status(&self, network: &str) -> Result<NetworkStatus> {
        self.hooked(NETWORK_STATUS, Some(network), async {
            Ok(self.context(network)?.status())
        })
        .await
    }

    /// Tears `network` down, stopping its scenarios first. Returns how many
    /// scenarios were stopped.
    #[instrument(skip(self))]
    pub async fn network_stop(&self, network: &str) -> Result<usize> {
        self.hooked(NETWORK_STOP, Some(network), async {
            let context = self
                .networks
                .remove(network)
                .ok_or_else(|| ControlError::NetworkNotFound(network.to_string()))?;
            let stopped = self.scenarios.stop_for_network(network).await;
            context.shutdown().await?;
            info!(network, scenarios = stopped, "network stopped");
            Ok(stopped)
        })
        .await
    }

    /// Whether every connection of `network` is applied.
    pub async fn network_connected(&self, network: &str) -> Result<bool> {
        self.hooked(NETWORK_CONNECTED, Some(network), async {
            Ok(self.context(network)?.is_connected())
        })
        .await
    }

    /// Plan summary of `network`.
    pub async fn network_info(&self, network: &str) -> Result<PlanSummary> {
        self.hooked(NETWORK_INFO, Some(network), async {
            Ok(self.context(network)?.plan().summary())
        })
        .await
    }

    /// Retries failed connections of `network`. Returns how many were reset.
    pub async fn network_reconnect(&self, network: &str) -> Result<usize> {
        self.hooked(NETWORK_RECONNECT, Some(network), async {
            Ok(self.context(network)?.reconnect()?)
        })
        .await
    }

    /// Calls `method` on the selected tanks of `network`.
    pub async fn rpc(
        &self,
        network: &str,
        selector: TankSelector,
        method: &str,
        params: Value,
    ) -> Result<FanOutResult> {
        self.hooked(RPC, Some(network), async {
            let context = self.context(network)?;
            Ok(context
                .rpc(&selector, method, &params, self.config.rpc_deadline)
                .await?)
        })
        .await
    }

    /// Runs `cmd` inside a tank's unit.
    pub async fn tank_exec(&self, network: &str, tank: TankId, cmd: &[String]) -> Result<ExecOutput> {
        self.hooked(TANK_EXEC, Some(network), async {
            let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
            Ok(self.context(network)?.exec(tank, &args).await?)
        })
        .await
    }

    /// A tank's node log.
    pub async fn tank_logs(&self, network: &str, tank: TankId, tail: Option<usize>) -> Result<String> {
        self.hooked(TANK_LOGS, Some(network), async {
            Ok(self.context(network)?.logs(tank, tail).await?)
        })
        .await
    }

    /// Log lines containing `pattern` across every tank of `network`.
    pub async fn logs_grep(&self, network: &str, pattern: &str) -> Result<Vec<LogMatch>> {
        self.hooked(LOGS_GREP, Some(network), async {
            Ok(self.context(network)?.grep_logs(pattern).await?)
        })
        .await
    }

    /// Launches a scenario against a deployed network.
    pub async fn scenario_run(&self, program: &str, network: &str, args: Vec<String>) -> Result<ScenarioHandle> {
        self.hooked(SCENARIO_RUN, Some(network), async {
            self.context(network)?;
            Ok(self.scenarios.launch(program, network, args).await?)
        })
        .await
    }

    /// Stops a scenario. Stopping a finished one is a no-op.
    pub async fn scenario_stop(&self, id: Uuid) -> Result<ScenarioHandle> {
        self.hooked(SCENARIO_STOP, None, async {
            Ok(self.scenarios.stop(id).await?)
        })
        .await
    }

    /// Current record of a scenario.
    pub fn scenario_status(&self, id: Uuid) -> Result<ScenarioHandle> {
        Ok(self.scenarios.status(id)?)
    }

    /// Every known scenario, optionally only those still running.
    pub async fn scenario_list(&self, running_only: bool) -> Result<Vec<ScenarioHandle>> {
        self.hooked(SCENARIO_LIST, None, async {
            Ok(if running_only {
                self.scenarios.list_running()
            } else {
                self.scenarios.list()
            })
        })
        .await
    }

    /// Captured output of a scenario.
    pub async fn scenario_logs(&self, id: Uuid) -> Result<String> {
        self.hooked(SCENARIO_LOGS, None, async {
            Ok(self.scenarios.logs(id)?)
        })
        .await
    }

    /// Launchable scenario programs.
    pub async fn scenario_available(&self) -> Result<Vec<String>> {
        self.hooked(SCENARIO_AVAILABLE, None, async {
            Ok(self.scenarios.available()?)
        })
        .await
    }

    /// Stops every deployed network.
    pub async fn shutdown(&self) {
        for network in self.networks.names() {
            if let Err(err) = self.network_stop(&network).await {
                warn!(network = %network, error = %err, "failed to stop network");
            }
        }
    }
}
