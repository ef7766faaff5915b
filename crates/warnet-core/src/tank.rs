//! Tank identification.
//!
//! A tank is one simulated node of the network. Its identity is its position
//! in the topology, which is also how it is named inside the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Positional identifier of a tank.
///
/// # Examples
///
/// ```
/// use warnet_core::tank::TankId;
///
/// let tank = TankId::new(7);
/// assert_eq!(tank.to_string(), "tank-0007");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TankId(pub u32);

impl TankId {
    /// Creates a new TankId with the given index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the positional index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Name of the runtime unit hosting this tank inside `network`.
    pub fn unit_name(self, network: &str) -> String {
        format!("{network}-{self}")
    }
}

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tank-{:04}", self.0)
    }
}

impl From<u32> for TankId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl From<TankId> for u32 {
    fn from(id: TankId) -> Self {
        id.0
    }
}

/// Selects which tanks a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankSelector {
    /// A single tank.
    One(TankId),
    /// Every tank in the network.
    All,
}

impl TankSelector {
    /// Expands the selector against the tanks that exist.
    pub fn resolve(&self, known: &[TankId]) -> Vec<TankId> {
        match self {
            Self::One(id) => vec![*id],
            Self::All => known.to_vec(),
        }
    }
}

impl std::str::FromStr for TankSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<u32>()
            .map(|i| Self::One(TankId(i)))
            .map_err(|_| format!("expected a tank index or \"all\", got {s:?}"))
    }
}
