//! Runtime state shared between the orchestrator and its readers.

use crate::tank::TankId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Lifecycle phase of one tank.
///
/// `Pending -> Provisioning -> Running -> Connecting -> Ready`, with `Failed`
/// reachable from any non-terminal phase and `Stopping -> Stopped` reachable
/// from anywhere on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankPhase {
    /// Not yet requested from the backend.
    Pending,
    /// Unit creation requested.
    Provisioning,
    /// Unit started; waiting for the node to answer.
    Running,
    /// Node answers; outbound edges being applied.
    Connecting,
    /// All outbound edges issued.
    Ready,
    /// Crashed, exited, or never became live.
    Failed,
    /// Teardown requested.
    Stopping,
    /// Unit destroyed.
    Stopped,
}

impl TankPhase {
    /// Returns true if no further transitions happen without teardown.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Returns true once the unit is up, i.e. `Running` or later on the happy path.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Connecting | Self::Ready)
    }

    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TankPhase) -> bool {
        use TankPhase::*;
        match (self, next) {
            (_, Stopping) => !matches!(self, Stopping | Stopped),
            (Stopping, Stopped) => true,
            (s, Failed) => !s.is_terminal() && *s != Stopping,
            (Pending, Provisioning)
            | (Provisioning, Running)
            | (Running, Connecting)
            | (Connecting, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TankPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of one tank's runtime record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankState {
    /// Which tank.
    pub tank: TankId,
    /// Current phase.
    pub phase: TankPhase,
    /// Backend unit identifier once created.
    pub unit_id: Option<String>,
    /// Reachable address once known.
    pub address: Option<Ipv4Addr>,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    /// Whether the node answered its last liveness probe.
    pub rpc_reachable: bool,
}

impl TankState {
    /// A fresh `Pending` record.
    pub fn pending(tank: TankId) -> Self {
        Self {
            tank,
            phase: TankPhase::Pending,
            unit_id: None,
            address: None,
            last_error: None,
            rpc_reachable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use TankPhase::*;
        let path = [Pending, Provisioning, Running, Connecting, Ready];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Pending.can_transition_to(Running));
        assert!(!Ready.can_transition_to(Connecting));
    }

    #[test]
    fn test_failed_and_stopping_transitions() {
        use TankPhase::*;
        assert!(Running.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Stopping));
        assert!(Ready.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn test_phase_predicates() {
        assert!(TankPhase::Connecting.is_live());
        assert!(!TankPhase::Provisioning.is_live());
        assert!(TankPhase::Stopped.is_terminal());
        assert_eq!(TankPhase::Ready.to_string(), "ready");
    }
}
