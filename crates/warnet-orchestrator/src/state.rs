//! Per-network state table.
//!
//! Every tank and every connection directive owns one `watch` channel. The
//! fleet worker for a tank holds the only sender for that tank's record (and
//! for its outbound edges), so state is single-writer. Readers take cheap
//! snapshots through the receivers and never block the writer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;
use tracing::{debug, warn};
use warnet_core::{TankId, TankPhase, TankState};

use crate::plan::{ConnectionDirective, DeploymentPlan};

/// Application state of one connection directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EdgeState {
    /// Not yet issued.
    Pending,
    /// The add-peer call succeeded.
    Applied,
    /// Gave up after `attempts` tries.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last_error: String,
    },
}

impl EdgeState {
    /// Returns true if the edge was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Returns true if the edge failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// An edge and its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStatus {
    /// The directive.
    #[serde(flatten)]
    pub directive: ConnectionDirective,
    /// Its state.
    pub state: EdgeState,
}

/// Read side of a network's state.
#[derive(Debug, Clone)]
pub struct StateTable {
    tanks: BTreeMap<TankId, watch::Receiver<TankState>>,
    edges: BTreeMap<ConnectionDirective, watch::Receiver<EdgeState>>,
}

/// Write side for one tank and its outbound edges.
#[derive(Debug)]
pub struct TankWriter {
    tank: TankId,
    tx: watch::Sender<TankState>,
    edges: Vec<(ConnectionDirective, watch::Sender<EdgeState>)>,
}

impl StateTable {
    /// Creates the table for `plan`, every tank `Pending` and every edge `Pending`.
    ///
    /// Returns the table with one writer per tank, in tank order.
    pub fn new(plan: &DeploymentPlan) -> (Self, Vec<TankWriter>) {
        let mut edge_senders: HashMap<TankId, Vec<(ConnectionDirective, watch::Sender<EdgeState>)>> =
            HashMap::new();
        let mut edges = BTreeMap::new();
        for directive in &plan.connections {
            let (tx, rx) = watch::channel(EdgeState::Pending);
            edges.insert(*directive, rx);
            edge_senders
                .entry(directive.from)
                .or_default()
                .push((*directive, tx));
        }

        let mut tanks = BTreeMap::new();
        let mut writers = Vec::with_capacity(plan.nodes.len());
        for node in &plan.nodes {
            let (tx, rx) = watch::channel(TankState::pending(node.tank));
            tanks.insert(node.tank, rx);
            writers.push(TankWriter {
                tank: node.tank,
                tx,
                edges: edge_senders.remove(&node.tank).unwrap_or_default(),
            });
        }

        (Self { tanks, edges }, writers)
    }

    /// Tank identities in order.
    pub fn tanks(&self) -> Vec<TankId> {
        self.tanks.keys().copied().collect()
    }

    /// Current record of one tank.
    pub fn tank(&self, tank: TankId) -> Option<TankState> {
        self.tanks.get(&tank).map(|rx| rx.borrow().clone())
    }

    /// A receiver that observes `tank`'s changes.
    pub fn watch_tank(&self, tank: TankId) -> Option<watch::Receiver<TankState>> {
        self.tanks.get(&tank).cloned()
    }

    /// Every tank record, in tank order.
    pub fn snapshot(&self) -> Vec<TankState> {
        self.tanks.values().map(|rx| rx.borrow().clone()).collect()
    }

    /// Every edge with its state, in directive order.
    pub fn edges(&self) -> Vec<EdgeStatus> {
        self.edges
            .iter()
            .map(|(directive, rx)| EdgeStatus {
                directive: *directive,
                state: rx.borrow().clone(),
            })
            .collect()
    }

    /// Gets the count of tanks by phase.
    pub fn state_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rx in self.tanks.values() {
            *counts.entry(rx.borrow().phase.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns true if every tank is `Ready`.
    pub fn all_ready(&self) -> bool {
        self.tanks
            .values()
            .all(|rx| rx.borrow().phase == TankPhase::Ready)
    }

    /// Returns true if every tank is `Ready` or terminal.
    pub fn settled(&self) -> bool {
        self.tanks.values().all(|rx| {
            let phase = rx.borrow().phase;
            phase == TankPhase::Ready || phase.is_terminal()
        })
    }

    /// Returns true if every edge was applied.
    pub fn all_edges_applied(&self) -> bool {
        self.edges.values().all(|rx| rx.borrow().is_applied())
    }
}

impl TankWriter {
    /// The tank this writer owns.
    pub fn tank(&self) -> TankId {
        self.tank
    }

    /// Current record.
    pub fn current(&self) -> TankState {
        self.tx.borrow().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> TankPhase {
        self.tx.borrow().phase
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub fn transition(&self, next: TankPhase) -> bool {
        let tank = self.tank;
        self.tx.send_if_modified(|state| {
            if state.phase == next {
                return false;
            }
            if !state.phase.can_transition_to(next) {
                warn!(%tank, from = %state.phase, to = %next, "illegal phase transition ignored");
                return false;
            }
            debug!(%tank, from = %state.phase, to = %next, "phase transition");
            state.phase = next;
            true
        })
    }

    /// Moves to `Failed`, recording `reason`.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.update(|state| state.last_error = Some(reason));
        self.transition(TankPhase::Failed)
    }

    /// Applies a field update that does not change the phase.
    pub fn update(&self, f: impl FnOnce(&mut TankState)) {
        self.tx.send_modify(|state| {
            let phase = state.phase;
            f(state);
            state.phase = phase;
        });
    }

    /// Outbound edges this writer owns.
    pub fn edges(&self) -> impl Iterator<Item = &ConnectionDirective> {
        self.edges.iter().map(|(directive, _)| directive)
    }

    /// Current state of an outbound edge.
    pub fn edge_state(&self, directive: &ConnectionDirective) -> Option<EdgeState> {
        self.edge_sender(directive).map(|tx| tx.borrow().clone())
    }

    /// Sets the state of an outbound edge.
    pub fn set_edge(&self, directive: &ConnectionDirective, state: EdgeState) {
        if let Some(tx) = self.edge_sender(directive) {
            tx.send_replace(state);
        }
    }

    fn edge_sender(&self, directive: &ConnectionDirective) -> Option<&watch::Sender<EdgeState>> {
        self.edges
            .iter()
            .find(|(d, _)| d == directive)
            .map(|(_, tx)| tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{DeploymentCompiler, PlanDefaults};
    use warnet_core::{GenerateOptions, TopologyGenerator};

    fn table(n: usize) -> (StateTable, Vec<TankWriter>) {
        let topology = TopologyGenerator::default()
            .generate_cycle(n, false, &GenerateOptions::default())
            .unwrap();
        let plan = DeploymentCompiler::new()
            .compile(&topology, &PlanDefaults::default())
            .unwrap();
        StateTable::new(&plan)
    }

    #[test]
    fn test_writers_own_outbound_edges() {
        let (table, writers) = table(3);
        assert_eq!(writers.len(), 3);
        for writer in &writers {
            let edges: Vec<_> = writer.edges().collect();
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].from, writer.tank());
        }
        assert_eq!(table.edges().len(), 3);
        assert!(!table.all_edges_applied());
    }

    #[test]
    fn test_transitions_are_validated() {
        let (table, writers) = table(2);
        let writer = &writers[0];

        assert!(!writer.transition(TankPhase::Ready));
        assert!(writer.transition(TankPhase::Provisioning));
        assert!(writer.transition(TankPhase::Running));
        assert_eq!(table.tank(TankId(0)).unwrap().phase, TankPhase::Running);

        assert!(writer.fail("crashed"));
        let state = table.tank(TankId(0)).unwrap();
        assert_eq!(state.phase, TankPhase::Failed);
        assert_eq!(state.last_error.as_deref(), Some("crashed"));
        assert!(!writer.transition(TankPhase::Connecting));

        let counts = table.state_counts();
        assert_eq!(counts.get("failed"), Some(&1));
        assert_eq!(counts.get("pending"), Some(&1));
    }

    #[test]
    fn test_update_keeps_phase() {
        let (table, writers) = table(1);
        writers[0].update(|state| {
            state.phase = TankPhase::Ready;
            state.rpc_reachable = true;
        });
        let state = table.tank(TankId(0)).unwrap();
        assert_eq!(state.phase, TankPhase::Pending);
        assert!(state.rpc_reachable);
    }

    #[test]
    fn test_readiness_predicates() {
        let (table, writers) = table(2);
        for writer in &writers {
            for phase in [
                TankPhase::Provisioning,
                TankPhase::Running,
                TankPhase::Connecting,
                TankPhase::Ready,
            ] {
                writer.transition(phase);
            }
            let edges: Vec<_> = writer.edges().copied().collect();
            for edge in edges {
                writer.set_edge(&edge, EdgeState::Applied);
            }
        }
        assert!(table.all_ready());
        assert!(table.settled());
        assert!(table.all_edges_applied());
    }

    #[tokio::test]
    async fn test_watchers_see_changes() {
        let (table, writers) = table(2);
        let mut rx = table.watch_tank(TankId(1)).unwrap();
        writers[1].transition(TankPhase::Provisioning);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, TankPhase::Provisioning);
    }
}
