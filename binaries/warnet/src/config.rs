//! Warnet configuration.
//!
//! Loaded from a TOML file, then overridden by command line flags. Every
//! section has defaults, so an empty file is a valid configuration.

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warnet_control::ControlConfig;
use warnet_core::Subnet;
use warnet_orchestrator::{FleetConfig, PlanDefaults, DEFAULT_IMAGE_REPO};
use warnet_rpc::{Chain, GatewayConfig, RpcCredentials};
use warnet_scenario::SupervisorConfig;

/// Longest accepted per-command RPC deadline, one day.
const MAX_RPC_DEADLINE_SECS: u64 = 86_400;

/// Warnet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarnetConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Network defaults.
    pub network: NetworkConfig,

    /// Node RPC configuration.
    pub rpc: RpcConfig,

    /// Fleet worker timing.
    pub orchestrator: OrchestratorConfig,

    /// Scenario configuration.
    pub scenario: ScenarioConfig,

    /// Plugin configuration.
    pub plugins: PluginsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, compact, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Which container backend runs the tanks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local Docker daemon.
    Docker,
    /// In-memory simulation.
    Simulated,
}

/// Network defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network name used when none is given.
    pub name: String,

    /// Subnet tank addresses are drawn from.
    pub subnet: String,

    /// Chain every node runs.
    pub chain: Chain,

    /// Container backend.
    pub backend: BackendKind,

    /// Repository for published node images.
    pub image_repo: String,

    /// Seed for address assignment.
    pub seed: u64,

    /// Pull missing images before creating units.
    pub pull_images: bool,

    /// Image for lightning companions.
    pub ln_image: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "warnet".to_string(),
            subnet: warnet_core::DEFAULT_SUBNET.to_string(),
            chain: Chain::Regtest,
            backend: BackendKind::Docker,
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            seed: 0,
            pull_images: true,
            ln_image: None,
        }
    }
}

/// Node RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// RPC username written into every node config.
    pub user: String,

    /// RPC password written into every node config.
    pub password: String,

    /// Maximum calls in flight across all fan-outs.
    pub max_in_flight: usize,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Default deadline for operator calls in seconds.
    pub deadline_secs: u64,

    /// First not-ready retry delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let credentials = RpcCredentials::default();
        Self {
            user: credentials.user,
            password: credentials.password,
            max_in_flight: 16,
            request_timeout_ms: 5000,
            deadline_secs: 30,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl RpcConfig {
    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the operator call deadline as a Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Node credentials.
    pub fn credentials(&self) -> RpcCredentials {
        RpcCredentials {
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    /// Gateway tuning.
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            max_in_flight: self.max_in_flight,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Fleet worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// First delay between unit status polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Cap on the poll backoff in milliseconds.
    pub max_poll_backoff_ms: u64,

    /// Failed liveness probes before a tank is marked failed.
    pub max_probe_failures: u32,

    /// Deadline of one probe or add-peer call in milliseconds.
    pub probe_deadline_ms: u64,

    /// Time to wait for the whole network in seconds.
    pub readiness_timeout_secs: u64,

    /// Add-peer attempts per connection.
    pub edge_max_attempts: u32,

    /// First add-peer retry delay in milliseconds.
    pub edge_initial_backoff_ms: u64,

    /// Cap on the add-peer retry delay in milliseconds.
    pub edge_max_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let fleet = FleetConfig::default();
        Self {
            poll_interval_ms: fleet.poll_interval.as_millis() as u64,
            max_poll_backoff_ms: fleet.max_poll_backoff.as_millis() as u64,
            max_probe_failures: fleet.max_probe_failures,
            probe_deadline_ms: fleet.probe_deadline.as_millis() as u64,
            readiness_timeout_secs: fleet.readiness_timeout.as_secs(),
            edge_max_attempts: fleet.edge_max_attempts,
            edge_initial_backoff_ms: fleet.edge_initial_backoff.as_millis() as u64,
            edge_max_backoff_ms: fleet.edge_max_backoff.as_millis() as u64,
        }
    }
}

impl OrchestratorConfig {
    /// Returns the readiness timeout as a Duration.
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Fleet worker configuration.
    pub fn fleet(&self) -> FleetConfig {
        FleetConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_backoff: Duration::from_millis(self.max_poll_backoff_ms),
            max_probe_failures: self.max_probe_failures,
            probe_deadline: Duration::from_millis(self.probe_deadline_ms),
            readiness_timeout: self.readiness_timeout(),
            edge_max_attempts: self.edge_max_attempts,
            edge_initial_backoff: Duration::from_millis(self.edge_initial_backoff_ms),
            edge_max_backoff: Duration::from_millis(self.edge_max_backoff_ms),
            ..FleetConfig::default()
        }
    }
}

/// Scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Directory bare program names are resolved against.
    pub scenarios_dir: PathBuf,

    /// Program that runs scenario files, e.g. an interpreter.
    pub launcher: Option<String>,

    /// Seconds between worker liveness checks.
    pub supervision_interval_secs: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("scenarios"),
            launcher: Some("python3".to_string()),
            supervision_interval_secs: 30,
        }
    }
}

impl ScenarioConfig {
    /// Returns the supervision interval as a Duration.
    pub fn supervision_interval(&self) -> Duration {
        Duration::from_secs(self.supervision_interval_secs)
    }
}

/// Plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory holding one subdirectory per plugin.
    pub plugins_dir: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
        }
    }
}

impl WarnetConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.format = "json".to_string();
        }
        if let Some(backend) = args.backend {
            self.network.backend = backend;
        }
        if let Some(ref network) = args.network {
            self.network.name = network.clone();
        }
        if let Some(ref dir) = args.scenarios_dir {
            self.scenario.scenarios_dir = dir.clone();
        }
        if let Some(ref dir) = args.plugins_dir {
            self.plugins.plugins_dir = dir.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        self.subnet()?;
        if self.network.name.is_empty() {
            anyhow::bail!("Network name must not be empty");
        }
        if self.rpc.max_in_flight == 0 {
            anyhow::bail!("rpc.max_in_flight must be positive");
        }
        if self.rpc.deadline_secs == 0 || self.rpc.deadline_secs > MAX_RPC_DEADLINE_SECS {
            anyhow::bail!(
                "rpc.deadline_secs must be between 1 and {}",
                MAX_RPC_DEADLINE_SECS
            );
        }
        if self.orchestrator.poll_interval_ms == 0 {
            anyhow::bail!("orchestrator.poll_interval_ms must be positive");
        }
        if self.orchestrator.edge_max_attempts == 0 {
            anyhow::bail!("orchestrator.edge_max_attempts must be positive");
        }
        if self.scenario.supervision_interval_secs == 0 {
            anyhow::bail!("scenario.supervision_interval_secs must be positive");
        }

        Ok(())
    }

    /// Parsed subnet.
    pub fn subnet(&self) -> anyhow::Result<Subnet> {
        self.network
            .subnet
            .parse()
            .with_context(|| format!("Invalid subnet {:?}", self.network.subnet))
    }

    /// Compilation defaults.
    pub fn plan_defaults(&self) -> anyhow::Result<PlanDefaults> {
        Ok(PlanDefaults {
            network: self.network.name.clone(),
            subnet: self.subnet()?,
            chain: self.network.chain,
            image_repo: self.network.image_repo.clone(),
            credentials: self.rpc.credentials(),
            seed: self.network.seed,
        })
    }

    /// Control plane configuration.
    pub fn control(&self) -> anyhow::Result<ControlConfig> {
        Ok(ControlConfig {
            defaults: self.plan_defaults()?,
            rpc_deadline: self.rpc.deadline(),
            supervision: SupervisorConfig::default().with_interval(self.scenario.supervision_interval()),
            scenarios_dir: Some(self.scenario.scenarios_dir.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WarnetConfig::default();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.network.name, "warnet");
        assert_eq!(config.network.subnet, "100.0.0.0/8");
        assert_eq!(config.network.chain, Chain::Regtest);
        assert_eq!(config.rpc.user, "warnet_user");
        assert_eq!(config.rpc.password, "2themoon");
        assert_eq!(config.orchestrator.edge_max_attempts, 5);
        assert_eq!(config.scenario.supervision_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WarnetConfig::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "debug".to_string();

        config.network.subnet = "100.0.0.0/40".to_string();
        assert!(config.validate().is_err());
        config.network.subnet = "10.0.0.0/16".to_string();
        assert!(config.validate().is_ok());

        config.rpc.max_in_flight = 0;
        assert!(config.validate().is_err());
        config.rpc.max_in_flight = 1;

        config.rpc.deadline_secs = u64::MAX;
        assert!(config.validate().is_err());
        config.rpc.deadline_secs = MAX_RPC_DEADLINE_SECS;
        assert!(config.validate().is_ok());

        config.orchestrator.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[network]\nname = \"lab\"\nchain = \"signet\"\nbackend = \"simulated\"\n\n[rpc]\nmax_in_flight = 4"
        )
        .unwrap();

        let config = WarnetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.network.name, "lab");
        assert_eq!(config.network.chain, Chain::Signet);
        assert_eq!(config.network.backend, BackendKind::Simulated);
        assert_eq!(config.rpc.max_in_flight, 4);
        assert_eq!(config.rpc.deadline_secs, 30);
        assert_eq!(config.logging.format, "pretty");

        let defaults = config.plan_defaults().unwrap();
        assert_eq!(defaults.network, "lab");
        assert_eq!(defaults.chain, Chain::Signet);
    }

    #[test]
    fn test_fleet_config_durations() {
        let config = OrchestratorConfig::default();
        let fleet = config.fleet();
        assert_eq!(fleet.poll_interval, Duration::from_millis(500));
        assert_eq!(fleet.edge_max_backoff, Duration::from_secs(8));
        assert_eq!(fleet.readiness_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_serialization() {
        let config = WarnetConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: WarnetConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.network.subnet, config.network.subnet);
        assert_eq!(parsed.scenario.launcher, config.scenario.launcher);
    }
}
