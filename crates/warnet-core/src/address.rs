//! Random public IPv4 address assignment.

use crate::error::{CoreError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Default subnet tanks are addressed from.
pub const DEFAULT_SUBNET: &str = "100.0.0.0/8";

const MAX_ATTEMPTS: u32 = 1_000_000;

/// Address blocks that are never handed out.
pub const RESERVED_RANGES: [(Ipv4Addr, u8); 14] = [
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 88, 99, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
];

/// An IPv4 CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Creates a subnet, masking host bits off `addr`.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(CoreError::invalid_subnet(
                format!("{addr}/{prefix}"),
                "prefix length exceeds 32",
            ));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        Ok(Self { network, prefix })
    }

    /// First address of the block.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Last address of the block.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix))
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block, network and broadcast included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Returns true if `addr` lies inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix) == u32::from(self.network)
    }

    /// Returns true if every address of `self` lies inside `other`.
    pub fn is_within(&self, other: &Subnet) -> bool {
        self.prefix >= other.prefix && other.contains(self.network)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl Default for Subnet {
    /// `100.0.0.0/8`, see [`DEFAULT_SUBNET`].
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(100, 0, 0, 0),
            prefix: 8,
        }
    }
}

impl FromStr for Subnet {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CoreError::invalid_subnet(s, "expected <address>/<prefix>"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| CoreError::invalid_subnet(s, format!("{e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| CoreError::invalid_subnet(s, format!("{e}")))?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Subnet {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn reserved() -> impl Iterator<Item = Subnet> {
    RESERVED_RANGES
        .iter()
        .map(|&(network, prefix)| Subnet { network, prefix })
}

/// Returns true if `addr` falls in any reserved block.
pub fn is_reserved(addr: Ipv4Addr) -> bool {
    reserved().any(|r| r.contains(addr))
}

/// Picks a uniformly random non-reserved address inside `subnet`.
///
/// Candidates are drawn from the whole block, network and broadcast
/// addresses included, and redrawn while they land in a reserved range.
pub fn generate_address<R: Rng + ?Sized>(subnet: &Subnet, rng: &mut R) -> Result<Ipv4Addr> {
    if reserved().any(|r| subnet.is_within(&r)) {
        return Err(CoreError::invalid_subnet(
            subnet.to_string(),
            "subnet lies entirely inside a reserved range",
        ));
    }
    let low = u32::from(subnet.network());
    let high = u32::from(subnet.broadcast());
    for _ in 0..MAX_ATTEMPTS {
        let candidate = Ipv4Addr::from(rng.gen_range(low..=high));
        if !is_reserved(candidate) {
            return Ok(candidate);
        }
    }
    Err(CoreError::invalid_subnet(
        subnet.to_string(),
        "no public address found",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_parse_and_display() {
        let subnet: Subnet = "100.12.34.56/8".parse().unwrap();
        assert_eq!(subnet.to_string(), "100.0.0.0/8");
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(100, 255, 255, 255));
        assert!("100.0.0.0".parse::<Subnet>().is_err());
        assert!("100.0.0.0/33".parse::<Subnet>().is_err());
        assert_eq!(Subnet::default().to_string(), DEFAULT_SUBNET);
    }

    #[test]
    fn test_subnet_size() {
        assert_eq!("100.20.0.0/30".parse::<Subnet>().unwrap().size(), 4);
        assert_eq!("100.20.0.1/32".parse::<Subnet>().unwrap().size(), 1);
        assert_eq!(Subnet::default().size(), 1 << 24);
    }

    #[test]
    fn test_reserved_table() {
        assert!(is_reserved(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_reserved(Ipv4Addr::new(100, 64, 1, 1)));
        assert!(is_reserved(Ipv4Addr::new(239, 1, 1, 1)));
        assert!(!is_reserved(Ipv4Addr::new(100, 1, 2, 3)));
    }

    #[test]
    fn test_generated_addresses_avoid_reserved_ranges() {
        let subnet: Subnet = DEFAULT_SUBNET.parse().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10_000 {
            let addr = generate_address(&subnet, &mut rng).unwrap();
            assert!(subnet.contains(addr));
            assert!(!is_reserved(addr), "{addr} is reserved");
        }
    }

    #[test]
    fn test_generation_is_reproducible_for_a_seed() {
        let subnet: Subnet = DEFAULT_SUBNET.parse().unwrap();
        let a = generate_address(&subnet, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let b = generate_address(&subnet, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fully_reserved_subnet_is_rejected() {
        let subnet: Subnet = "10.1.0.0/16".parse().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(generate_address(&subnet, &mut rng).is_err());
    }
}
