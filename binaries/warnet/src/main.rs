//! Warnet - deploy and drive simulated node networks.
//!
//! # Usage
//!
//! ```bash
//! # Generate a ring of 12 tanks with a few random extra connections
//! warnet graph generate -n 12 --random-extra -o ring.yaml
//!
//! # Check a document against the schema
//! warnet graph validate ring.yaml
//!
//! # Deploy it, start a workload and open the console
//! warnet deploy ring.yaml --scenario tx-flood
//!
//! # Try it without Docker
//! warnet --backend simulated deploy ring.yaml
//! ```
//!
//! `deploy` holds the network until `quit`, Ctrl+C or SIGTERM, then stops
//! every scenario and removes every unit.

mod config;
mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{BackendKind, WarnetConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warnet_control::ControlPlane;
use warnet_core::GenerateOptions;
use warnet_hooks::HookRegistry;
use warnet_orchestrator::{
    ContainerBackend, DockerBackend, DockerConfig, FleetOrchestrator, SimulatedBackend,
};
use warnet_rpc::{HttpConnector, RpcConnector, RpcGateway};
use warnet_scenario::ProcessExecutor;

/// CLI arguments for warnet.
#[derive(Parser, Debug)]
#[command(
    name = "warnet",
    about = "Deploy and drive simulated peer-to-peer node networks",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Container backend.
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Network name.
    #[arg(long, value_name = "NAME")]
    network: Option<String>,

    /// Directory scenario programs are resolved against.
    #[arg(long, value_name = "DIR")]
    scenarios_dir: Option<PathBuf>,

    /// Directory plugins are discovered in.
    #[arg(long, value_name = "DIR")]
    plugins_dir: Option<PathBuf>,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Topology documents.
    #[command(subcommand)]
    Graph(GraphCommand),

    /// Deploy a topology and hold it until interrupted.
    Deploy {
        /// Topology document (YAML or JSON).
        file: PathBuf,

        /// Scenario to launch once the network is ready. Repeatable.
        #[arg(long = "scenario", value_name = "PROGRAM")]
        scenarios: Vec<String>,

        /// Do not read console commands from stdin.
        #[arg(long)]
        no_console: bool,
    },

    /// List launchable scenario programs.
    Scenarios,
}

#[derive(Subcommand, Debug)]
enum GraphCommand {
    /// Generate a ring topology.
    Generate {
        /// Number of tanks.
        #[arg(short = 'n', long, default_value_t = 3)]
        nodes: usize,

        /// Add random extra connections.
        #[arg(long)]
        random_extra: bool,

        /// Node version for every tank, a release tag or `<repo>#<branch>`.
        #[arg(long, value_name = "VERSION")]
        node_version: Option<String>,

        /// Draw each tank's version at random, favouring older releases.
        #[arg(long, conflicts_with = "node_version")]
        random_version: bool,

        /// Config overlay for every tank, e.g. `debug=net,maxconnections=20`.
        #[arg(long, value_name = "OPTIONS")]
        bitcoin_config: Option<String>,

        /// Seed for reproducible graphs.
        #[arg(long)]
        seed: Option<u64>,

        /// Write JSON instead of YAML.
        #[arg(long)]
        json: bool,

        /// Output file. Defaults to stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Validate a topology document.
    Validate {
        /// Topology document (YAML or JSON).
        file: PathBuf,
    },
}

/// Initialize tracing/logging. Logs go to stderr, command output to stdout.
fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format.to_lowercase().as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "compact" => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Builds the control plane for the configured backend.
async fn build_control_plane(config: &WarnetConfig) -> Result<ControlPlane> {
    let (backend, connector): (Arc<dyn ContainerBackend>, Arc<dyn RpcConnector>) =
        match config.network.backend {
            BackendKind::Docker => {
                let mut docker = DockerConfig::default().pull_images(config.network.pull_images);
                if let Some(ref image) = config.network.ln_image {
                    docker.ln_image = image.clone();
                }
                let backend = DockerBackend::with_config(docker)
                    .await
                    .context("Failed to connect to Docker")?;
                let connector = HttpConnector::new(config.rpc.request_timeout())
                    .context("Failed to build RPC client")?;
                (Arc::new(backend), Arc::new(connector))
            }
            BackendKind::Simulated => {
                let backend = SimulatedBackend::new();
                (Arc::new(backend.clone()), Arc::new(backend))
            }
        };
    info!(backend = backend.name(), "using container backend");

    let fleet = FleetOrchestrator::new(
        backend,
        connector,
        RpcGateway::new(config.rpc.gateway()),
        config.rpc.credentials(),
        config.orchestrator.fleet(),
    );

    let mut hooks = HookRegistry::new();
    let plugins = warnet_hooks::discover(&config.plugins.plugins_dir, &mut hooks)
        .with_context(|| format!("Failed to load plugins from {:?}", config.plugins.plugins_dir))?;
    info!(plugins = ?plugins, hooks = hooks.len(), "plugins loaded");

    let process = match config.scenario.launcher {
        Some(ref launcher) => ProcessExecutor::with_launcher(launcher),
        None => ProcessExecutor::new(),
    };

    Ok(ControlPlane::new(fleet, process, hooks.build(), config.control()?))
}

async fn graph(plane: &ControlPlane, command: GraphCommand) -> Result<()> {
    match command {
        GraphCommand::Generate {
            nodes,
            random_extra,
            node_version,
            random_version,
            bitcoin_config,
            seed,
            json,
            output,
        } => {
            let options = GenerateOptions {
                version: node_version,
                random_version,
                bitcoin_config,
                seed,
            };
            let document = plane.graph_generate(nodes, random_extra, &options).await?;
            let text = if json {
                serde_json::to_string_pretty(&document)?
            } else {
                serde_yaml::to_string(&document)?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    info!(path = ?path, tanks = nodes, "graph written");
                }
                None => print!("{text}"),
            }
        }
        GraphCommand::Validate { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let topology = plane.graph_validate(&raw).await?;
            println!(
                "{} is valid: {} tanks, {} edges",
                file.display(),
                topology.vertices().len(),
                topology.edges().len()
            );
        }
    }
    Ok(())
}

async fn deploy(
    plane: &ControlPlane,
    file: PathBuf,
    scenarios: Vec<String>,
    no_console: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
    let network = plane.network_deploy(&raw, None).await?;

    let report = tokio::select! {
        report = plane.network_wait(&network, None) => report,
        _ = shutdown_signal() => {
            info!("Shutdown signal received during deployment");
            plane.shutdown().await;
            return Ok(());
        }
    };
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Network did not settle");
            plane.shutdown().await;
            return Err(e.into());
        }
    };
    if !report.is_complete() {
        warn!(
            failed = report.failed.len(),
            failed_edges = report.failed_edges.len(),
            "Network is up with failures"
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    for program in scenarios {
        match plane.scenario_run(&program, &network, Vec::new()).await {
            Ok(handle) => info!(scenario = %handle.id, program = %program, "scenario started"),
            Err(e) => error!(program = %program, error = %e, "Failed to start scenario"),
        }
    }

    if no_console {
        shutdown_signal().await;
    } else {
        console::run(plane, &network, shutdown_signal()).await;
    }
    info!(network = %network, "Stopping network");
    plane.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        println!("{}", toml::to_string_pretty(&WarnetConfig::default())?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        WarnetConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        WarnetConfig::default()
    };
    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    let Some(command) = args.command else {
        anyhow::bail!("No command given, see --help");
    };

    // Graph commands never touch a backend.
    if let Command::Graph(_) = command {
        config.network.backend = BackendKind::Simulated;
    }
    let plane = build_control_plane(&config).await?;

    match command {
        Command::Graph(graph_command) => graph(&plane, graph_command).await,
        Command::Deploy {
            file,
            scenarios,
            no_console,
        } => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                network = %config.network.name,
                "warnet starting"
            );
            deploy(&plane, file, scenarios, no_console).await
        }
        Command::Scenarios => {
            for name in plane.scenario_available().await? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_deploy() {
        let args = CliArgs::try_parse_from([
            "warnet",
            "--backend",
            "simulated",
            "deploy",
            "ring.yaml",
            "--scenario",
            "tx-flood",
            "--no-console",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(BackendKind::Simulated));
        match args.command {
            Some(Command::Deploy {
                file,
                scenarios,
                no_console,
            }) => {
                assert_eq!(file, PathBuf::from("ring.yaml"));
                assert_eq!(scenarios, vec!["tx-flood"]);
                assert!(no_console);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_merges_into_config() {
        let args = CliArgs::try_parse_from([
            "warnet",
            "--network",
            "lab",
            "--json-logs",
            "--log-level",
            "debug",
            "scenarios",
        ])
        .unwrap();
        let mut config = WarnetConfig::default();
        config.merge_cli_args(&args);
        assert_eq!(config.network.name, "lab");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_random_version_conflicts_with_fixed_version() {
        let err = CliArgs::try_parse_from([
            "warnet",
            "graph",
            "generate",
            "--node-version",
            "26.0",
            "--random-version",
        ]);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_generate_and_validate_with_simulated_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = WarnetConfig::default();
        config.network.backend = BackendKind::Simulated;
        config.plugins.plugins_dir = dir.path().join("plugins");
        config.scenario.scenarios_dir = dir.path().join("scenarios");
        let plane = build_control_plane(&config).await.unwrap();

        let path = dir.path().join("ring.yaml");
        graph(
            &plane,
            GraphCommand::Generate {
                nodes: 4,
                random_extra: false,
                node_version: None,
                random_version: false,
                bitcoin_config: None,
                seed: Some(7),
                json: false,
                output: Some(path.clone()),
            },
        )
        .await
        .unwrap();
        graph(&plane, GraphCommand::Validate { file: path }).await.unwrap();
    }
}
