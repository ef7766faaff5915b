//! The per-network orchestrator context.
//!
//! An [`OrchestratorContext`] is created by a deployment and owns everything
//! that belongs to that network: the plan, the state table, the backend and
//! RPC handles, the worker tasks and their cancellation token. Commands that
//! act on a deployed network go through it; tearing the network down is
//! [`OrchestratorContext::shutdown`].

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use warnet_core::{TankId, TankPhase, TankSelector, TankState};
use warnet_rpc::{
    FanOutResult, RpcConnector, RpcCredentials, RpcEndpoint, RpcError, RpcErrorKind, RpcGateway,
    RpcTarget,
};

use crate::backend::{ContainerBackend, ExecOutput, UnitId};
use crate::error::{OrchestratorError, Result};
use crate::plan::DeploymentPlan;
use crate::state::{EdgeStatus, StateTable};

/// Tank and edge states of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Network name.
    pub network: String,
    /// Tank records in order.
    pub tanks: Vec<TankState>,
    /// Edge states in order.
    pub edges: Vec<EdgeStatus>,
}

/// Outcome of waiting for a deployment to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Tanks that reached `Ready`.
    pub ready: Vec<TankId>,
    /// Tanks that failed, with the recorded reason.
    pub failed: Vec<(TankId, Option<String>)>,
    /// Edges that could not be applied.
    pub failed_edges: Vec<EdgeStatus>,
}

impl DeploymentReport {
    /// Returns true if every tank is ready and every edge applied.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.failed_edges.is_empty()
    }
}

/// One log line matching a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMatch {
    /// Tank the line came from.
    pub tank: TankId,
    /// The matching line.
    pub line: String,
}

struct ContextInner {
    plan: Arc<DeploymentPlan>,
    states: StateTable,
    backend: Arc<dyn ContainerBackend>,
    connector: Arc<dyn RpcConnector>,
    gateway: RpcGateway,
    credentials: RpcCredentials,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnect: watch::Sender<u64>,
    stopped: AtomicBool,
}

/// Handle to one deployed network.
#[derive(Clone)]
pub struct OrchestratorContext {
    inner: Arc<ContextInner>,
}

impl OrchestratorContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        plan: Arc<DeploymentPlan>,
        states: StateTable,
        backend: Arc<dyn ContainerBackend>,
        connector: Arc<dyn RpcConnector>,
        gateway: RpcGateway,
        credentials: RpcCredentials,
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
        reconnect: watch::Sender<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plan,
                states,
                backend,
                connector,
                gateway,
                credentials,
                cancel,
                tasks: Mutex::new(tasks),
                reconnect,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Network name.
    pub fn network(&self) -> &str {
        &self.inner.plan.network
    }

    /// The plan this network was deployed from.
    pub fn plan(&self) -> &DeploymentPlan {
        &self.inner.plan
    }

    /// The state table.
    pub fn states(&self) -> &StateTable {
        &self.inner.states
    }

    /// The backend the network runs on.
    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.inner.backend
    }

    /// A token that fires when the network is torn down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Snapshot of every tank and edge.
    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            network: self.network().to_string(),
            tanks: self.inner.states.snapshot(),
            edges: self.inner.states.edges(),
        }
    }

    /// Returns true if every edge has been applied.
    pub fn is_connected(&self) -> bool {
        self.inner.states.all_edges_applied()
    }

    /// Resolves a selector into RPC targets.
    ///
    /// Tanks that are failed or torn down cannot be called and come back as
    /// immediate errors instead of targets. Tanks still coming up get a target
    /// at their planned address so the gateway's not-ready retry covers them.
    pub fn resolve_targets(&self, selector: &TankSelector) -> Result<(Vec<RpcTarget>, FanOutResult)> {
        self.ensure_running()?;
        let plan = &self.inner.plan;
        if let TankSelector::One(tank) = selector {
            if plan.node(*tank).is_none() {
                return Err(OrchestratorError::TankNotFound(*tank));
            }
        }

        let mut targets = Vec::new();
        let mut unavailable = FanOutResult::new();
        for tank in selector.resolve(&plan.tanks()) {
            let (Some(spec), Some(state)) = (plan.node(tank), self.inner.states.tank(tank)) else {
                continue;
            };
            if state.phase.is_terminal() || state.phase == TankPhase::Stopping {
                unavailable.insert(
                    tank,
                    Err(RpcError::new(
                        RpcErrorKind::NotReady,
                        format!("{tank} is {}", state.phase),
                    )),
                );
                continue;
            }
            let endpoint = RpcEndpoint {
                host: state.address.unwrap_or(spec.address),
                port: spec.rpc_port,
                credentials: self.inner.credentials.clone(),
            };
            targets.push(RpcTarget::new(tank, self.inner.connector.connect(tank, &endpoint)));
        }
        Ok((targets, unavailable))
    }

    /// Calls `method` on every selected tank.
    #[instrument(skip(self, params), fields(network = %self.network()))]
    pub async fn rpc(
        &self,
        selector: &TankSelector,
        method: &str,
        params: &Value,
        deadline: Duration,
    ) -> Result<FanOutResult> {
        let (targets, mut results) = self.resolve_targets(selector)?;
        results.extend(self.inner.gateway.call(targets, method, params, deadline).await);
        Ok(results)
    }

    fn unit_of(&self, tank: TankId) -> Result<UnitId> {
        self.ensure_running()?;
        let state = self
            .inner
            .states
            .tank(tank)
            .ok_or(OrchestratorError::TankNotFound(tank))?;
        state
            .unit_id
            .map(UnitId::new)
            .ok_or_else(|| OrchestratorError::unit_not_found(tank.to_string()))
    }

    /// Runs a command inside a tank's unit.
    pub async fn exec(&self, tank: TankId, cmd: &[&str]) -> Result<ExecOutput> {
        let unit = self.unit_of(tank)?;
        self.inner.backend.exec(&unit, cmd).await
    }

    /// Reads a tank's logs.
    pub async fn logs(&self, tank: TankId, tail: Option<usize>) -> Result<String> {
        let unit = self.unit_of(tank)?;
        self.inner.backend.logs(&unit, tail).await
    }

    /// Lines containing `pattern` across every tank's logs.
    pub async fn grep_logs(&self, pattern: &str) -> Result<Vec<LogMatch>> {
        let mut matches = Vec::new();
        for tank in self.inner.plan.tanks() {
            let log = match self.logs(tank, None).await {
                Ok(log) => log,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            matches.extend(
                log.lines()
                    .filter(|line| line.contains(pattern))
                    .map(|line| LogMatch {
                        tank,
                        line: line.to_string(),
                    }),
            );
        }
        Ok(matches)
    }

    /// Waits until every tank is `Ready` or failed.
    ///
    /// Failed tanks and edges are reported, not raised. Only running out of
    /// time is an error.
    pub async fn wait_settled(&self, limit: Duration) -> Result<DeploymentReport> {
        let started = Instant::now();
        let waits = self
            .inner
            .states
            .tanks()
            .into_iter()
            .filter_map(|tank| self.inner.states.watch_tank(tank))
            .map(|mut rx| async move {
                let _ = rx
                    .wait_for(|s| s.phase == TankPhase::Ready || s.phase.is_terminal())
                    .await;
            });

        if timeout(limit, join_all(waits)).await.is_err() {
            let pending = self
                .inner
                .states
                .snapshot()
                .into_iter()
                .filter(|s| s.phase != TankPhase::Ready && !s.phase.is_terminal())
                .map(|s| s.tank)
                .collect();
            return Err(OrchestratorError::ReadinessTimeout {
                pending,
                waited: started.elapsed(),
            });
        }
        Ok(self.report())
    }

    /// Current deployment outcome.
    pub fn report(&self) -> DeploymentReport {
        let mut report = DeploymentReport {
            ready: Vec::new(),
            failed: Vec::new(),
            failed_edges: Vec::new(),
        };
        for state in self.inner.states.snapshot() {
            match state.phase {
                TankPhase::Ready => report.ready.push(state.tank),
                TankPhase::Failed => report.failed.push((state.tank, state.last_error)),
                _ => {}
            }
        }
        report.failed_edges = self
            .inner
            .states
            .edges()
            .into_iter()
            .filter(|e| e.state.is_failed())
            .collect();
        report
    }

    /// Asks every ready tank to retry its failed edges. Returns how many edges were failed.
    pub fn reconnect(&self) -> Result<usize> {
        self.ensure_running()?;
        let failed = self
            .inner
            .states
            .edges()
            .iter()
            .filter(|e| e.state.is_failed())
            .count();
        if failed > 0 {
            self.inner.reconnect.send_modify(|generation| *generation += 1);
            info!(network = %self.network(), edges = failed, "reconnect requested");
        }
        Ok(failed)
    }

    /// Cancels every worker, destroys every unit and removes the network.
    ///
    /// Calling it again is a no-op.
    #[instrument(skip(self), fields(network = %self.network()))]
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for result in join_all(tasks).await {
            if let Err(err) = result {
                warn!(error = %err, "tank worker ended abnormally");
            }
        }
        self.inner.backend.remove_network(self.network()).await?;
        info!("network stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(OrchestratorError::NetworkStopped(self.network().to_string()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("network", &self.network())
            .field("backend", &self.inner.backend.name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
