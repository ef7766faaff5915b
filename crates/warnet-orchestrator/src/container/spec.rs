//! Container specification types.
//!
//! This module provides node image references and the fixed set of resource
//! profiles a tank can request.

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use warnet_core::TankId;

/// Image a tank's node process runs from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeImage {
    /// A published image reference (`registry/repository:tag`).
    Published {
        /// Full image reference.
        reference: String,
    },
    /// Built from a source branch.
    SourceBuild {
        /// Repository, e.g. `bitcoin/bitcoin`.
        repo: String,
        /// Branch to build.
        branch: String,
        /// Extra build arguments.
        build_args: Option<String>,
    },
}

impl NodeImage {
    /// Creates a published image reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use warnet_orchestrator::container::NodeImage;
    ///
    /// let image = NodeImage::published("bitcoindevproject/bitcoin:27.0");
    /// assert_eq!(image.tag(), Some("27.0"));
    /// ```
    pub fn published(reference: impl Into<String>) -> Self {
        Self::Published {
            reference: reference.into(),
        }
    }

    /// Parses a `<repo>#<branch>` source reference.
    pub fn source_build(version: &str, build_args: Option<&str>) -> Option<Self> {
        let (repo, branch) = version.split_once('#')?;
        Some(Self::SourceBuild {
            repo: repo.to_string(),
            branch: branch.to_string(),
            build_args: build_args.map(str::to_string),
        })
    }

    /// Returns the image reference for published images.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Published { reference } => Some(reference),
            Self::SourceBuild { .. } => None,
        }
    }

    /// Returns the image tag if present.
    pub fn tag(&self) -> Option<&str> {
        let reference = self.reference()?;
        let without_digest = reference.split('@').next()?;
        let last = without_digest.rsplit('/').next()?;
        last.split_once(':').map(|(_, tag)| tag)
    }
}

impl fmt::Display for NodeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published { reference } => write!(f, "{reference}"),
            Self::SourceBuild { repo, branch, .. } => write!(f, "{repo}#{branch}"),
        }
    }
}

/// Named CPU and memory quota a tank can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceProfile {
    /// 4 CPUs, 4 GiB.
    #[default]
    Default,
    /// 2 CPUs, 2 GiB.
    RaspberryPi,
    /// 4 CPUs, 8 GiB.
    Laptop,
    /// 8 CPUs, 16 GiB.
    Desktop,
    /// 16 CPUs, 32 GiB.
    Server,
}

impl ResourceProfile {
    /// All profiles.
    pub const ALL: [ResourceProfile; 5] = [
        Self::Default,
        Self::RaspberryPi,
        Self::Laptop,
        Self::Desktop,
        Self::Server,
    ];

    /// Profile name as written in topology documents.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::RaspberryPi => "raspberry_pi",
            Self::Laptop => "laptop",
            Self::Desktop => "desktop",
            Self::Server => "server",
        }
    }

    /// Concrete limits for this profile.
    pub fn limits(&self) -> ResourceLimits {
        let (cpus, memory_gb) = match self {
            Self::Default => (4, 4),
            Self::RaspberryPi => (2, 2),
            Self::Laptop => (4, 8),
            Self::Desktop => (8, 16),
            Self::Server => (16, 32),
        };
        ResourceLimits::new(cpus * 1000, memory_gb * 1024)
    }

    /// Resolves a profile name for `tank`.
    pub fn resolve(tank: TankId, name: &str) -> Result<Self, CompileError> {
        name.parse()
            .map_err(|_| CompileError::UnknownResourceProfile {
                tank,
                profile: name.to_string(),
            })
    }
}

impl FromStr for ResourceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown resource profile {s:?}"))
    }
}

/// Resource limits for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit in millicores (1000 = 1 CPU).
    pub cpu_millicores: u32,

    /// Memory limit in bytes.
    pub memory_bytes: u64,
}

impl ResourceLimits {
    /// Creates resource limits with CPU and memory limits.
    pub fn new(cpu_millicores: u32, memory_mb: u64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes: memory_mb * 1024 * 1024,
        }
    }

    /// Returns the memory limit in megabytes.
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }

    /// Returns the NanoCPUs value for Docker API.
    pub fn nano_cpus(&self) -> i64 {
        i64::from(self.cpu_millicores) * 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag_parsing() {
        assert_eq!(NodeImage::published("bitcoindevproject/bitcoin:26.0").tag(), Some("26.0"));
        assert_eq!(NodeImage::published("registry:5000/bitcoin").tag(), None);
        assert_eq!(NodeImage::published("registry:5000/bitcoin:25.1").tag(), Some("25.1"));
    }

    #[test]
    fn test_source_build_parsing() {
        let image = NodeImage::source_build("bitcoin/bitcoin#master", Some("--disable-tests")).unwrap();
        assert_eq!(image.to_string(), "bitcoin/bitcoin#master");
        assert_eq!(image.reference(), None);
        assert!(NodeImage::source_build("27.0", None).is_none());
    }

    #[test]
    fn test_profile_limits() {
        let laptop = ResourceProfile::Laptop.limits();
        assert_eq!(laptop.cpu_millicores, 4000);
        assert_eq!(laptop.memory_mb(), 8 * 1024);
        assert_eq!(ResourceProfile::Server.limits().nano_cpus(), 16_000_000_000);
        assert_eq!(ResourceProfile::RaspberryPi.limits().memory_bytes, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_profile_names_round_trip() {
        for profile in ResourceProfile::ALL {
            assert_eq!(profile.name().parse::<ResourceProfile>().unwrap(), profile);
        }
        let err = ResourceProfile::resolve(TankId(3), "mainframe").unwrap_err();
        assert!(matches!(err, CompileError::UnknownResourceProfile { tank, .. } if tank == TankId(3)));
    }
}
