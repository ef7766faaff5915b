//! Docker backend implementation.
//!
//! Each tank becomes one container on a per-network bridge whose IPAM subnet
//! is the plan's subnet, so the compiler's addresses can be assigned
//! statically. The rendered node config travels in an environment variable
//! and is written to disk by the container's start command.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerStateStatusEnum, EndpointIpamConfig, EndpointSettings, HostConfig, Ipam, IpamConfig,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::r#trait::{ContainerBackend, ExecOutput, UnitId, UnitStatus};
use crate::container::NodeImage;
use crate::error::{OrchestratorError, Result};
use crate::plan::{DeploymentPlan, NodeSpec, LABEL_NETWORK};

/// Environment variable the rendered node config is passed in.
pub const NODE_CONF_ENV: &str = "WARNET_NODE_CONF";

/// Default Lightning companion image.
pub const DEFAULT_LN_IMAGE: &str = "lightninglabs/lnd:v0.17.4-beta";

const START_SCRIPT: &str = "mkdir -p /root/.bitcoin \
    && printf '%s\\n' \"$WARNET_NODE_CONF\" > /root/.bitcoin/bitcoin.conf \
    && exec bitcoind -printtoconsole=1";

/// Configuration for the Docker backend.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Pull images that are not present locally.
    pub pull_images: bool,

    /// Seconds to wait for a graceful stop before killing.
    pub stop_timeout_secs: i64,

    /// Lightning companion image when a tank does not name one.
    pub ln_image: String,

    /// Labels added to every container and network.
    pub labels: HashMap<String, String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            pull_images: true,
            stop_timeout_secs: 10,
            ln_image: DEFAULT_LN_IMAGE.to_string(),
            labels: HashMap::new(),
        }
    }
}

impl DockerConfig {
    /// Sets whether to pull missing images.
    pub fn pull_images(mut self, pull: bool) -> Self {
        self.pull_images = pull;
        self
    }

    /// Sets the graceful stop timeout.
    pub fn stop_timeout_secs(mut self, secs: i64) -> Self {
        self.stop_timeout_secs = secs;
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Docker backend.
pub struct DockerBackend {
    docker: Docker,
    config: DockerConfig,

    /// Lightning companions by the unit they belong to.
    companions: Arc<RwLock<HashMap<UnitId, String>>>,
}

impl DockerBackend {
    /// Connects to the local Docker daemon with default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(DockerConfig::default()).await
    }

    /// Connects to the local Docker daemon.
    pub async fn with_config(config: DockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("connected to Docker daemon");

        Ok(Self {
            docker,
            config,
            companions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if !self.config.pull_images || self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => return Err(OrchestratorError::image_pull_failed(image, e.to_string())),
            }
        }
        Ok(())
    }

    fn labels_for(&self, network: &str, extra: &BTreeMap<String, String>) -> HashMap<String, String> {
        let mut labels = self.config.labels.clone();
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.insert(LABEL_NETWORK.to_string(), network.to_string());
        labels
    }

    async fn start_container(
        &self,
        name: &str,
        network: &str,
        address: Option<Ipv4Addr>,
        config: Config<String>,
    ) -> Result<String> {
        let endpoint = EndpointSettings {
            ipam_config: address.map(|ip| EndpointIpamConfig {
                ipv4_address: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = Config {
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(network.to_string(), endpoint)]),
            }),
            ..config
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| OrchestratorError::unit_creation_failed(name, e.to_string()))?;
        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::unit_creation_failed(name, e.to_string()))?;

        info!(container = %name, id = %response.id, "started container");
        Ok(response.id)
    }

    async fn start_companion(&self, spec: &NodeSpec, network: &str) -> Result<String> {
        let image = spec.ln_image.as_deref().unwrap_or(&self.config.ln_image);
        self.ensure_image(image).await?;

        let name = format!("{}-ln", spec.unit_name);
        let env = vec![
            format!("BITCOIND_HOST={}", spec.address),
            format!("BITCOIND_RPCPORT={}", spec.rpc_port),
        ];
        let config = Config {
            image: Some(image.to_string()),
            hostname: Some(name.clone()),
            env: Some(env),
            labels: Some(self.labels_for(network, &spec.labels)),
            ..Default::default()
        };
        self.start_container(&name, network, None, config).await
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let stop = StopContainerOptions {
            t: self.config.stop_timeout_secs,
        };
        if let Err(e) = self.docker.stop_container(id, Some(stop)).await {
            debug!(container = %id, error = %e, "stop before remove failed");
        }
        let remove = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(remove)).await {
            Ok(()) => {
                info!(container = %id, "removed container");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(OrchestratorError::unit_destroy_failed(id, e.to_string())),
        }
    }

    async fn inspect(&self, unit: &UnitId) -> Result<bollard::models::ContainerInspectResponse> {
        self.docker
            .inspect_container(unit.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    OrchestratorError::unit_not_found(unit.as_str())
                } else {
                    OrchestratorError::DockerApi(e)
                }
            })
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn prepare_network(&self, plan: &DeploymentPlan) -> Result<()> {
        let filters: HashMap<String, Vec<String>> =
            [("name".to_string(), vec![plan.network.clone()])]
                .into_iter()
                .collect();
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;
        if existing.iter().any(|n| n.name.as_deref() == Some(plan.network.as_str())) {
            info!(network = %plan.network, "using existing network");
            return Ok(());
        }

        let labels = self.labels_for(&plan.network, &Default::default());
        let options = CreateNetworkOptions {
            name: plan.network.clone(),
            driver: "bridge".to_string(),
            ipam: Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(plan.subnet.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            labels,
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| OrchestratorError::network_creation_failed(&plan.network, e.to_string()))?;
        info!(network = %plan.network, id = ?response.id, subnet = %plan.subnet, "created network");
        Ok(())
    }

    async fn remove_network(&self, network: &str) -> Result<()> {
        match self.docker.remove_network(network).await {
            Ok(()) => {
                info!(network = %network, "removed network");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_unit(&self, spec: &NodeSpec) -> Result<UnitId> {
        let image = match &spec.image {
            NodeImage::Published { reference } => reference.clone(),
            NodeImage::SourceBuild { .. } => {
                return Err(OrchestratorError::capability_not_supported(format!(
                    "source build {} for {}",
                    spec.image, spec.tank
                )))
            }
        };
        self.ensure_image(&image).await?;

        let network = spec
            .labels
            .get(LABEL_NETWORK)
            .cloned()
            .unwrap_or_default();
        let mut env = vec![format!("{NODE_CONF_ENV}={}", spec.config)];
        if spec.tor {
            env.push("WARNET_TOR=1".to_string());
        }

        let host_config = HostConfig {
            memory: i64::try_from(spec.limits.memory_bytes).ok(),
            nano_cpus: Some(spec.limits.nano_cpus()),
            cap_add: Some(vec!["NET_ADMIN".to_string()]),
            ..Default::default()
        };
        let config = Config {
            image: Some(image),
            hostname: Some(spec.unit_name.clone()),
            env: Some(env),
            labels: Some(self.labels_for(&network, &spec.labels)),
            entrypoint: Some(vec!["sh".to_string(), "-c".to_string()]),
            cmd: Some(vec![START_SCRIPT.to_string()]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let id = UnitId::new(
            self.start_container(&spec.unit_name, &network, Some(spec.address), config)
                .await?,
        );

        if spec.ln {
            match self.start_companion(spec, &network).await {
                Ok(companion) => {
                    self.companions.write().await.insert(id.clone(), companion);
                }
                Err(e) => {
                    warn!(tank = %spec.tank, error = %e, "lightning companion failed to start");
                }
            }
        }
        Ok(id)
    }

    async fn destroy_unit(&self, unit: &UnitId) -> Result<()> {
        if let Some(companion) = self.companions.write().await.remove(unit) {
            if let Err(e) = self.remove_container(&companion).await {
                warn!(container = %companion, error = %e, "failed to remove companion");
            }
        }
        self.remove_container(unit.as_str()).await
    }

    async fn unit_status(&self, unit: &UnitId) -> Result<UnitStatus> {
        let inspect = self.inspect(unit).await?;
        let Some(state) = inspect.state else {
            return Ok(UnitStatus::Starting);
        };
        let status = match state.status {
            Some(ContainerStateStatusEnum::RUNNING) => UnitStatus::Running,
            Some(ContainerStateStatusEnum::EXITED) => {
                let exit_code = state.exit_code.unwrap_or(-1);
                if state.oom_killed == Some(true) || exit_code != 0 {
                    UnitStatus::Crashed {
                        exit_code: Some(exit_code),
                    }
                } else {
                    UnitStatus::Exited { exit_code }
                }
            }
            Some(ContainerStateStatusEnum::DEAD) => UnitStatus::Crashed {
                exit_code: state.exit_code,
            },
            _ => UnitStatus::Starting,
        };
        Ok(status)
    }

    async fn unit_address(&self, unit: &UnitId) -> Result<Option<Ipv4Addr>> {
        let inspect = self.inspect(unit).await?;
        let address = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .filter_map(|endpoint| endpoint.ip_address)
                    .find_map(|ip| ip.parse::<Ipv4Addr>().ok())
            });
        Ok(address)
    }

    async fn exec(&self, unit: &UnitId, cmd: &[&str]) -> Result<ExecOutput> {
        debug!(container = %unit, cmd = ?cmd, "executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(unit.as_str(), exec_options)
            .await
            .map_err(|e| OrchestratorError::exec_failed(unit.as_str(), e.to_string()))?;
        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(bollard::container::LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(OrchestratorError::exec_failed(unit.as_str(), e.to_string())),
                }
            }
        }

        let exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn logs(&self, unit: &UnitId, tail: Option<usize>) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(unit.as_str(), Some(options));
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) if is_not_found(&e) => {
                    return Err(OrchestratorError::unit_not_found(unit.as_str()))
                }
                Err(e) => return Err(OrchestratorError::DockerApi(e)),
            }
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        "docker"
    }
}
