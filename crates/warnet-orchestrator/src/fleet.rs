//! Fleet orchestration.
//!
//! [`FleetOrchestrator::deploy`] spawns one worker per tank. A worker owns
//! the only writer for its tank's state and walks it through
//! `Provisioning -> Running -> Connecting -> Ready`, polling with its own
//! backoff so a slow unit never holds up the others. Outbound edges are
//! issued only once the peer is live, retried a bounded number of times and
//! left `Failed` without aborting the deployment. Every wait is raced against
//! the network's cancellation token; on cancel the worker moves its tank to
//! `Stopping`, destroys the unit and finishes in `Stopped`.

use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use warnet_core::netem::is_safe_netem;
use warnet_core::{TankPhase, TankState};
use warnet_rpc::{RpcConnector, RpcCredentials, RpcEndpoint, RpcGateway, RpcTarget};

use crate::backend::{ContainerBackend, UnitId, UnitStatus};
use crate::context::OrchestratorContext;
use crate::error::Result;
use crate::plan::{ConnectionDirective, DeploymentPlan, NodeSpec};
use crate::state::{EdgeState, StateTable, TankWriter};

/// Timing and retry bounds for fleet workers.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// First delay between unit status polls.
    pub poll_interval: Duration,
    /// Cap on the per-tank poll backoff.
    pub max_poll_backoff: Duration,
    /// Consecutive failed liveness probes before a tank is `Failed`.
    pub max_probe_failures: u32,
    /// Deadline for one liveness probe or add-peer call.
    pub probe_deadline: Duration,
    /// Default bound for waiting on the whole network.
    pub readiness_timeout: Duration,
    /// Add-peer attempts before an edge is `Failed`.
    pub edge_max_attempts: u32,
    /// First delay between add-peer attempts.
    pub edge_initial_backoff: Duration,
    /// Cap on the add-peer backoff.
    pub edge_max_backoff: Duration,
    /// RPC method used as the liveness probe.
    pub probe_method: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_poll_backoff: Duration::from_secs(5),
            max_probe_failures: 20,
            probe_deadline: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(300),
            edge_max_attempts: 5,
            edge_initial_backoff: Duration::from_millis(500),
            edge_max_backoff: Duration::from_secs(8),
            probe_method: "getblockchaininfo".to_string(),
        }
    }
}

/// Brings deployment plans to life on a backend.
#[derive(Clone)]
pub struct FleetOrchestrator {
    backend: Arc<dyn ContainerBackend>,
    connector: Arc<dyn RpcConnector>,
    gateway: RpcGateway,
    credentials: RpcCredentials,
    config: FleetConfig,
}

impl FleetOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        connector: Arc<dyn RpcConnector>,
        gateway: RpcGateway,
        credentials: RpcCredentials,
        config: FleetConfig,
    ) -> Self {
        Self {
            backend,
            connector,
            gateway,
            credentials,
            config,
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Starts deploying `plan` and returns as soon as every worker is running.
    ///
    /// Use [`OrchestratorContext::wait_settled`] to wait for the outcome.
    #[instrument(skip(self, plan), fields(network = %plan.network, tanks = plan.nodes.len()))]
    pub async fn deploy(&self, plan: DeploymentPlan) -> Result<OrchestratorContext> {
        self.backend.prepare_network(&plan).await?;

        let plan = Arc::new(plan);
        let (states, writers) = StateTable::new(&plan);
        let cancel = CancellationToken::new();
        let (reconnect_tx, reconnect_rx) = watch::channel(0u64);

        let mut tasks = Vec::with_capacity(writers.len());
        for writer in writers {
            let tank = writer.tank();
            let Some(spec) = plan.node(tank).cloned() else {
                continue;
            };
            let worker = TankWorker {
                writer,
                spec,
                plan: Arc::clone(&plan),
                states: states.clone(),
                backend: Arc::clone(&self.backend),
                connector: Arc::clone(&self.connector),
                gateway: self.gateway.clone(),
                credentials: self.credentials.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
                reconnect: reconnect_rx.clone(),
            };
            let span = info_span!("tank", network = %plan.network, %tank);
            tasks.push(tokio::spawn(worker.run().instrument(span)));
        }
        info!("deployment started");

        Ok(OrchestratorContext::new(
            plan,
            states,
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
            self.gateway.clone(),
            self.credentials.clone(),
            cancel,
            tasks,
            reconnect_tx,
        ))
    }
}

/// Owns one tank for the lifetime of a deployment.
struct TankWorker {
    writer: TankWriter,
    spec: NodeSpec,
    plan: Arc<DeploymentPlan>,
    states: StateTable,
    backend: Arc<dyn ContainerBackend>,
    connector: Arc<dyn RpcConnector>,
    gateway: RpcGateway,
    credentials: RpcCredentials,
    config: FleetConfig,
    cancel: CancellationToken,
    reconnect: watch::Receiver<u64>,
}

enum MonitorEvent {
    Tick,
    Reconnect,
    Closed,
}

impl TankWorker {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = self.drive() => false,
        };
        if !cancelled {
            cancel.cancelled().await;
        }
        self.teardown().await;
    }

    async fn drive(&mut self) {
        let Some(unit) = self.provision().await else {
            return;
        };
        if !self.wait_running(&unit).await {
            return;
        }
        let Some(target) = self.probe(&unit).await else {
            return;
        };

        self.writer.transition(TankPhase::Connecting);
        let edges: Vec<ConnectionDirective> = self.writer.edges().copied().collect();
        join_all(edges.iter().map(|edge| self.apply_edge(&target, edge))).await;
        self.writer.transition(TankPhase::Ready);
        info!(edges = edges.len(), "tank ready");

        self.monitor(&unit, &target).await;
    }

    async fn provision(&self) -> Option<UnitId> {
        self.writer.transition(TankPhase::Provisioning);
        match self.backend.create_unit(&self.spec).await {
            Ok(unit) => {
                debug!(%unit, "unit created");
                self.writer
                    .update(|state| state.unit_id = Some(unit.to_string()));
                Some(unit)
            }
            Err(err) => {
                error!(error = %err, "unit creation failed");
                self.writer.fail(err.to_string());
                None
            }
        }
    }

    /// Polls until the unit runs. Returns false if the tank failed.
    async fn wait_running(&self, unit: &UnitId) -> bool {
        let mut backoff = self.config.poll_interval;
        let mut errors = 0u32;
        loop {
            match self.backend.unit_status(unit).await {
                Ok(UnitStatus::Running) => break,
                Ok(status) if status.is_dead() => {
                    self.writer
                        .fail(format!("unit stopped before running: {status:?}"));
                    return false;
                }
                Ok(_) => {}
                Err(err) => {
                    errors += 1;
                    warn!(error = %err, errors, "unit status poll failed");
                    if errors >= self.config.max_probe_failures {
                        self.writer.fail(err.to_string());
                        return false;
                    }
                }
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_poll_backoff);
        }

        let address = match self.backend.unit_address(unit).await {
            Ok(Some(address)) => address,
            Ok(None) => self.spec.address,
            Err(err) => {
                debug!(error = %err, "address lookup failed, using planned address");
                self.spec.address
            }
        };
        self.writer.update(|state| state.address = Some(address));
        self.writer.transition(TankPhase::Running);

        if let Some(command) = &self.spec.tc_netem {
            self.apply_netem(unit, command).await;
        }
        true
    }

    async fn apply_netem(&self, unit: &UnitId, command: &str) {
        if !is_safe_netem(command) {
            warn!(command, "refusing unsafe tc-netem command");
            return;
        }
        match self.backend.exec(unit, &["sh", "-c", command]).await {
            Ok(output) if output.success() => info!(command, "applied network conditions"),
            Ok(output) => warn!(command, exit_code = output.exit_code, stderr = %output.stderr, "tc-netem command failed"),
            Err(err) => warn!(command, error = %err, "tc-netem exec failed"),
        }
    }

    /// Probes the node until it answers. Returns its RPC target once live.
    async fn probe(&self, unit: &UnitId) -> Option<RpcTarget> {
        let address = self.writer.current().address.unwrap_or(self.spec.address);
        let endpoint = RpcEndpoint {
            host: address,
            port: self.spec.rpc_port,
            credentials: self.credentials.clone(),
        };
        let target = RpcTarget::new(self.spec.tank, self.connector.connect(self.spec.tank, &endpoint));

        let mut backoff = self.config.poll_interval;
        let mut failures = 0u32;
        loop {
            if let Ok(status) = self.backend.unit_status(unit).await {
                if status.is_dead() {
                    self.writer.fail(format!("unit died during startup: {status:?}"));
                    return None;
                }
            }

            let probe = self
                .gateway
                .call_one(&target, &self.config.probe_method, &json!([]), self.config.probe_deadline)
                .await;
            match probe {
                Ok(_) => {
                    self.writer.update(|state| {
                        state.rpc_reachable = true;
                        state.last_error = None;
                    });
                    return Some(target);
                }
                Err(err) => {
                    failures += 1;
                    debug!(error = %err, failures, "liveness probe failed");
                    let message = err.to_string();
                    self.writer.update(|state| {
                        state.rpc_reachable = false;
                        state.last_error = Some(message);
                    });
                    if failures >= self.config.max_probe_failures {
                        error!(failures, "node never answered");
                        self.writer.fail(format!(
                            "no liveness response after {failures} probes: {err}"
                        ));
                        return None;
                    }
                }
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_poll_backoff);
        }
    }

    /// Waits for the peer to be live, then issues the add-peer call.
    async fn apply_edge(&self, target: &RpcTarget, edge: &ConnectionDirective) {
        let Some(mut peer_rx) = self.states.watch_tank(edge.to) else {
            self.writer.set_edge(edge, edge_failed(0, format!("{} is not in the plan", edge.to)));
            return;
        };
        let peer = match peer_rx
            .wait_for(|s| s.phase.is_live() || s.phase.is_terminal() || s.phase == TankPhase::Stopping)
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => {
                self.writer.set_edge(edge, edge_failed(0, format!("{} went away", edge.to)));
                return;
            }
        };
        if !peer.phase.is_live() {
            warn!(peer = %edge.to, phase = %peer.phase, "peer never came up, edge not applied");
            self.writer
                .set_edge(edge, edge_failed(0, format!("{} is {}", edge.to, peer.phase)));
            return;
        }

        let Some(peer_spec) = self.plan.node(edge.to) else {
            return;
        };
        let peer_address = peer.address.unwrap_or(peer_spec.address);
        let (method, params) = self.spec.peer_command(peer_address, peer_spec.p2p_port);

        let mut backoff = self.config.edge_initial_backoff;
        let mut last_error = String::new();
        let max_attempts = self.config.edge_max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if !self.both_live(edge) {
                self.writer.set_edge(
                    edge,
                    edge_failed(attempt - 1, format!("an endpoint of {} -> {} left the live set", edge.from, edge.to)),
                );
                return;
            }
            match self
                .gateway
                .call_one(target, method, &params, self.config.probe_deadline)
                .await
            {
                Ok(_) => {
                    info!(peer = %edge.to, method, attempt, "edge applied");
                    self.writer.set_edge(edge, EdgeState::Applied);
                    return;
                }
                Err(err) => {
                    debug!(peer = %edge.to, attempt, error = %err, "add-peer failed");
                    last_error = err.to_string();
                }
            }
            if attempt < max_attempts {
                sleep(backoff).await;
                backoff = (backoff * 2).min(self.config.edge_max_backoff);
            }
        }
        warn!(peer = %edge.to, attempts = max_attempts, error = %last_error, "giving up on edge");
        self.writer.set_edge(edge, edge_failed(max_attempts, last_error));
    }

    fn both_live(&self, edge: &ConnectionDirective) -> bool {
        let live = |state: Option<TankState>| state.is_some_and(|s| s.phase.is_live());
        self.writer.phase().is_live() && live(self.states.tank(edge.to))
    }

    /// Watches a ready tank for crashes and operator reconnect requests.
    async fn monitor(&mut self, unit: &UnitId, target: &RpcTarget) {
        loop {
            let event = tokio::select! {
                _ = sleep(self.config.poll_interval) => MonitorEvent::Tick,
                changed = self.reconnect.changed() => match changed {
                    Ok(()) => MonitorEvent::Reconnect,
                    Err(_) => MonitorEvent::Closed,
                },
            };
            match event {
                MonitorEvent::Tick => match self.backend.unit_status(unit).await {
                    Ok(status) if status.is_dead() => {
                        error!(?status, "unit died");
                        self.writer.fail(format!("unit died: {status:?}"));
                        return;
                    }
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {
                        self.writer.fail("unit disappeared");
                        return;
                    }
                    Err(err) => debug!(error = %err, "status poll failed"),
                },
                MonitorEvent::Reconnect => {
                    let failed: Vec<ConnectionDirective> = self
                        .writer
                        .edges()
                        .filter(|e| self.writer.edge_state(e).is_some_and(|s| s.is_failed()))
                        .copied()
                        .collect();
                    if failed.is_empty() {
                        continue;
                    }
                    info!(edges = failed.len(), "retrying failed edges");
                    for edge in &failed {
                        self.writer.set_edge(edge, EdgeState::Pending);
                    }
                    join_all(failed.iter().map(|edge| self.apply_edge(target, edge))).await;
                }
                MonitorEvent::Closed => return,
            }
        }
    }

    async fn teardown(&self) {
        self.writer.transition(TankPhase::Stopping);
        if let Some(unit) = self.writer.current().unit_id {
            if let Err(err) = self.backend.destroy_unit(&UnitId::new(unit)).await {
                warn!(error = %err, "failed to destroy unit");
                self.writer.update(|state| state.last_error = Some(err.to_string()));
            }
        }
        self.writer.update(|state| state.rpc_reachable = false);
        self.writer.transition(TankPhase::Stopped);
        debug!("tank stopped");
    }
}

fn edge_failed(attempts: u32, last_error: impl Into<String>) -> EdgeState {
    EdgeState::Failed {
        attempts,
        last_error: last_error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedBackend, SimulatedConfig};
    use crate::compiler::{DeploymentCompiler, PlanDefaults};
    use crate::error::OrchestratorError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use warnet_core::{AttrValue, GenerateOptions, TankId, TankSelector, Topology, TopologyGenerator};
    use warnet_rpc::{GatewayConfig, NodeRpc, RpcError};

    fn ring(n: usize) -> Topology {
        TopologyGenerator::default()
            .generate_cycle(n, false, &GenerateOptions::default())
            .unwrap()
    }

    fn compile(topology: &Topology) -> DeploymentPlan {
        DeploymentCompiler::new()
            .compile(topology, &PlanDefaults::default())
            .unwrap()
    }

    fn fast_config() -> FleetConfig {
        FleetConfig {
            poll_interval: Duration::from_millis(10),
            max_poll_backoff: Duration::from_millis(100),
            max_probe_failures: 5,
            probe_deadline: Duration::from_millis(200),
            readiness_timeout: Duration::from_secs(60),
            edge_max_attempts: 3,
            edge_initial_backoff: Duration::from_millis(10),
            edge_max_backoff: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn gateway() -> RpcGateway {
        RpcGateway::new(GatewayConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..Default::default()
        })
    }

    fn fleet(backend: &SimulatedBackend, connector: Arc<dyn RpcConnector>) -> FleetOrchestrator {
        FleetOrchestrator::new(
            Arc::new(backend.clone()),
            connector,
            gateway(),
            RpcCredentials::default(),
            fast_config(),
        )
    }

    /// Observes add-peer calls against the live state table.
    #[derive(Default)]
    struct Shared {
        table: Mutex<Option<StateTable>>,
        addresses: Mutex<HashMap<Ipv4Addr, TankId>>,
        violations: Mutex<Vec<String>>,
        add_peer_calls: AtomicUsize,
        reject_add_peer: AtomicBool,
    }

    struct Recording {
        inner: SimulatedBackend,
        shared: Arc<Shared>,
    }

    struct RecordingNode {
        tank: TankId,
        inner: Arc<dyn NodeRpc>,
        shared: Arc<Shared>,
    }

    impl RpcConnector for Recording {
        fn connect(&self, tank: TankId, endpoint: &RpcEndpoint) -> Arc<dyn NodeRpc> {
            Arc::new(RecordingNode {
                tank,
                inner: self.inner.connect(tank, endpoint),
                shared: Arc::clone(&self.shared),
            })
        }
    }

    #[async_trait]
    impl NodeRpc for RecordingNode {
        async fn call(&self, method: &str, params: &Value) -> warnet_rpc::Result<Value> {
            if method == "addpeeraddress" || method == "addnode" {
                self.shared.add_peer_calls.fetch_add(1, Ordering::SeqCst);
                let peer_ip: Option<Ipv4Addr> = params[0]
                    .as_str()
                    .and_then(|s| s.split(':').next())
                    .and_then(|s| s.parse().ok());
                let peer = peer_ip.and_then(|ip| self.shared.addresses.lock().unwrap().get(&ip).copied());
                if let Some(table) = self.shared.table.lock().unwrap().as_ref() {
                    for tank in [Some(self.tank), peer].into_iter().flatten() {
                        let phase = table.tank(tank).map(|s| s.phase);
                        if !phase.is_some_and(|p| p.is_live()) {
                            self.shared
                                .violations
                                .lock()
                                .unwrap()
                                .push(format!("{} -> {:?}: {tank} was {phase:?}", self.tank, peer));
                        }
                    }
                }
                if self.shared.reject_add_peer.load(Ordering::SeqCst) {
                    return Err(RpcError::application("peer rejected"));
                }
            }
            self.inner.call(method, params).await
        }
    }

    fn recording(backend: &SimulatedBackend, plan: &DeploymentPlan) -> (Arc<Recording>, Arc<Shared>) {
        let shared = Arc::new(Shared::default());
        *shared.addresses.lock().unwrap() = plan.nodes.iter().map(|n| (n.address, n.tank)).collect();
        let connector = Arc::new(Recording {
            inner: backend.clone(),
            shared: Arc::clone(&shared),
        });
        (connector, shared)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_reaches_ready_and_applies_edges() {
        let backend = SimulatedBackend::with_config(SimulatedConfig {
            start_delay: Duration::from_secs(1),
            rpc_warmup: Duration::from_millis(500),
        });
        let plan = compile(&ring(3));
        let tank1_address = plan.nodes[1].address;
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(plan)
            .await
            .unwrap();

        let report = context.wait_settled(Duration::from_secs(60)).await.unwrap();
        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.ready, vec![TankId(0), TankId(1), TankId(2)]);
        assert!(context.is_connected());
        assert_eq!(backend.peers(TankId(0)), vec![format!("{tank1_address}:18444")]);

        let status = context.status();
        assert!(status.tanks.iter().all(|t| t.rpc_reachable && t.address.is_some()));
        assert!(status.edges.iter().all(|e| e.state == EdgeState::Applied));

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_edges_wait_for_live_endpoints() {
        let backend = SimulatedBackend::with_config(SimulatedConfig {
            start_delay: Duration::from_millis(300),
            rpc_warmup: Duration::from_millis(200),
        });
        let mut topology = ring(4);
        topology.add_edge(TankId(0), TankId(2)).unwrap();
        let plan = compile(&topology);
        backend.refuse_create(TankId(2));
        let (connector, shared) = recording(&backend, &plan);

        let context = fleet(&backend, connector).deploy(plan).await.unwrap();
        *shared.table.lock().unwrap() = Some(context.states().clone());

        let report = context.wait_settled(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, TankId(2));
        assert_eq!(report.ready, vec![TankId(0), TankId(1), TankId(3)]);

        let violations = shared.violations.lock().unwrap().clone();
        assert!(violations.is_empty(), "{violations:?}");
        assert!(shared.add_peer_calls.load(Ordering::SeqCst) >= 2);

        let failed: Vec<_> = report
            .failed_edges
            .iter()
            .map(|e| (e.directive.from, e.directive.to))
            .collect();
        assert_eq!(failed, vec![(TankId(0), TankId(2)), (TankId(1), TankId(2))]);
        assert!(backend.peers(TankId(1)).is_empty());

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_retry_is_bounded_and_reconnect_recovers() {
        let backend = SimulatedBackend::new();
        let plan = compile(&ring(2));
        let (connector, shared) = recording(&backend, &plan);
        shared.reject_add_peer.store(true, Ordering::SeqCst);

        let context = fleet(&backend, connector).deploy(plan).await.unwrap();
        let report = context.wait_settled(Duration::from_secs(60)).await.unwrap();

        assert_eq!(report.ready.len(), 2);
        assert_eq!(report.failed_edges.len(), 2);
        for edge in &report.failed_edges {
            assert!(matches!(
                &edge.state,
                EdgeState::Failed { attempts: 3, last_error } if last_error.contains("peer rejected")
            ));
        }
        assert_eq!(shared.add_peer_calls.load(Ordering::SeqCst), 6);
        assert!(!context.is_connected());

        shared.reject_add_peer.store(false, Ordering::SeqCst);
        assert_eq!(context.reconnect().unwrap(), 2);
        for _ in 0..100 {
            if context.is_connected() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(context.is_connected());
        assert_eq!(context.reconnect().unwrap(), 0);

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_after_ready_marks_failed() {
        let backend = SimulatedBackend::new();
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&ring(2)))
            .await
            .unwrap();
        context.wait_settled(Duration::from_secs(10)).await.unwrap();

        backend.crash(TankId(1));
        sleep(Duration::from_millis(100)).await;

        let state = context.states().tank(TankId(1)).unwrap();
        assert_eq!(state.phase, TankPhase::Failed);
        assert!(state.last_error.unwrap().contains("unit died"));
        assert_eq!(context.states().tank(TankId(0)).unwrap().phase, TankPhase::Ready);

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_answering_node_fails_after_probe_bound() {
        let backend = SimulatedBackend::with_config(SimulatedConfig {
            start_delay: Duration::ZERO,
            rpc_warmup: Duration::from_secs(3600),
        });
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&ring(1)))
            .await
            .unwrap();

        let report = context.wait_settled(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        let reason = report.failed[0].1.clone().unwrap();
        assert!(reason.contains("no liveness response after 5 probes"), "{reason}");

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_names_pending_tanks() {
        let backend = SimulatedBackend::with_config(SimulatedConfig {
            start_delay: Duration::from_secs(3600),
            rpc_warmup: Duration::ZERO,
        });
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&ring(2)))
            .await
            .unwrap();

        let err = context.wait_settled(Duration::from_secs(5)).await.unwrap_err();
        match err {
            OrchestratorError::ReadinessTimeout { pending, .. } => {
                assert_eq!(pending, vec![TankId(0), TankId(1)]);
            }
            other => panic!("unexpected error: {other}"),
        }
        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_and_cleans_up() {
        let backend = SimulatedBackend::with_config(SimulatedConfig {
            start_delay: Duration::from_secs(3600),
            rpc_warmup: Duration::ZERO,
        });
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&ring(3)))
            .await
            .unwrap();
        assert!(backend.has_network("warnet"));
        sleep(Duration::from_millis(50)).await;

        context.shutdown().await.unwrap();
        assert!(context
            .status()
            .tanks
            .iter()
            .all(|t| t.phase == TankPhase::Stopped));
        assert_eq!(backend.unit_count(), 0);
        assert!(!backend.has_network("warnet"));

        let err = context
            .rpc(&TankSelector::All, "getblockcount", &json!([]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NetworkStopped(_)));
        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_netem_is_applied_only_when_safe() {
        let backend = SimulatedBackend::new();
        let mut topology = ring(2);
        let safe = "tc qdisc add dev eth0 root netem delay 100ms 20ms distribution normal";
        topology
            .vertex_mut(TankId(0))
            .unwrap()
            .attributes
            .insert("tc_netem".into(), AttrValue::from(safe));
        topology
            .vertex_mut(TankId(1))
            .unwrap()
            .attributes
            .insert("tc_netem".into(), AttrValue::from("tc qdisc add dev eth0 root netem delay 1ms; rm -rf /"));

        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&topology))
            .await
            .unwrap();
        context.wait_settled(Duration::from_secs(10)).await.unwrap();

        assert_eq!(backend.execs(TankId(0)), vec![format!("sh -c {safe}")]);
        assert!(backend.execs(TankId(1)).is_empty());

        context.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_fan_out_through_context() {
        let backend = SimulatedBackend::new();
        let context = fleet(&backend, Arc::new(backend.clone()))
            .deploy(compile(&ring(3)))
            .await
            .unwrap();
        context.wait_settled(Duration::from_secs(10)).await.unwrap();

        let results = context
            .rpc(&TankSelector::All, "getblockcount", &json!([]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.is_ok()));

        let err = context
            .rpc(&TankSelector::One(TankId(9)), "getblockcount", &json!([]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let matches = context.grep_logs("added peer address").await.unwrap();
        assert_eq!(matches.len(), 3);

        context.shutdown().await.unwrap();
    }
}
