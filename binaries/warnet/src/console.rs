//! Line console for a deployed network.
//!
//! Each input line is parsed with clap as one [`ConsoleCommand`] and run
//! against the control plane. Results are printed as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;
use warnet_control::ControlPlane;
use warnet_core::{TankId, TankSelector};
use warnet_rpc::FanOutResult;

/// One console line.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, name = "warnet>", disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

/// Commands available while a network is deployed.
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConsoleCommand {
    /// Tank and connection states.
    Status,
    /// Whether every connection is applied.
    Connected,
    /// Plan summary.
    Info,
    /// Retry failed connections.
    Reconnect,
    /// Call an RPC method on one tank or on all of them.
    Rpc {
        /// Tank index or "all".
        selector: TankSelector,
        /// Method name.
        method: String,
        /// JSON parameters.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        params: Vec<String>,
    },
    /// Run a command inside a tank.
    Exec {
        /// Tank index.
        tank: u32,
        /// Command and arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        cmd: Vec<String>,
    },
    /// Show a tank's node log.
    Logs {
        /// Tank index.
        tank: u32,
        /// Only the last N lines.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Search every tank's log for a substring.
    Grep {
        /// Text to look for.
        pattern: String,
    },
    /// Launch a scenario against this network.
    Run {
        /// Built-in name or program file.
        program: String,
        /// Program arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop a scenario.
    Stop {
        /// Scenario id.
        id: Uuid,
    },
    /// List scenarios.
    Scenarios {
        /// Include finished scenarios.
        #[arg(long)]
        all: bool,
    },
    /// Show a scenario's output.
    ScenarioLogs {
        /// Scenario id.
        id: Uuid,
    },
    /// List launchable scenario programs.
    Available,
    /// Tear the network down and exit.
    Quit,
}

/// Parses one input line.
pub fn parse(line: &str) -> Result<ConsoleCommand, clap::Error> {
    ConsoleLine::try_parse_from(line.split_whitespace()).map(|l| l.command)
}

fn pretty<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("Failed to render output")
}

/// Renders fan-out results keyed by tank index.
pub fn render_fanout(results: &FanOutResult) -> Value {
    let entries = results
        .iter()
        .map(|(tank, result)| {
            let entry = match result {
                Ok(value) => json!({ "result": value }),
                Err(err) => json!({ "error": err.to_string() }),
            };
            (tank.index().to_string(), entry)
        })
        .collect::<serde_json::Map<_, _>>();
    Value::Object(entries)
}

/// Runs one command. Returns `None` when the console should exit.
pub async fn execute(
    plane: &ControlPlane,
    network: &str,
    command: ConsoleCommand,
) -> anyhow::Result<Option<String>> {
    let output = match command {
        ConsoleCommand::Status => pretty(&plane.network_status(network).await?)?,
        ConsoleCommand::Connected => plane.network_connected(network).await?.to_string(),
        ConsoleCommand::Info => pretty(&plane.network_info(network).await?)?,
        ConsoleCommand::Reconnect => {
            let reset = plane.network_reconnect(network).await?;
            format!("retrying {reset} connection(s)")
        }
        ConsoleCommand::Rpc {
            selector,
            method,
            params,
        } => {
            let params = if params.is_empty() {
                Value::Array(Vec::new())
            } else {
                serde_json::from_str(&params.join(" ")).context("Params must be JSON")?
            };
            let results = plane.rpc(network, selector, &method, params).await?;
            pretty(&render_fanout(&results))?
        }
        ConsoleCommand::Exec { tank, cmd } => {
            let output = plane.tank_exec(network, TankId(tank), &cmd).await?;
            pretty(&output)?
        }
        ConsoleCommand::Logs { tank, tail } => plane.tank_logs(network, TankId(tank), tail).await?,
        ConsoleCommand::Grep { pattern } => plane
            .logs_grep(network, &pattern)
            .await?
            .into_iter()
            .map(|m| format!("{}: {}", m.tank, m.line))
            .collect::<Vec<_>>()
            .join("\n"),
        ConsoleCommand::Run { program, args } => {
            pretty(&plane.scenario_run(&program, network, args).await?)?
        }
        ConsoleCommand::Stop { id } => pretty(&plane.scenario_stop(id).await?)?,
        ConsoleCommand::Scenarios { all } => pretty(&plane.scenario_list(!all).await?)?,
        ConsoleCommand::ScenarioLogs { id } => plane.scenario_logs(id).await?,
        ConsoleCommand::Available => plane.scenario_available().await?.join("\n"),
        ConsoleCommand::Quit => return Ok(None),
    };
    Ok(Some(output))
}

/// Reads commands from stdin until `quit` or `shutdown` resolves. When stdin
/// closes, keeps the network up until `shutdown`.
pub async fn run(plane: &ControlPlane, network: &str, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(network, "console ready, type `help` for commands");

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, waiting for shutdown signal");
                shutdown.await;
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to read console input");
                shutdown.await;
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse(&line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match execute(plane, network, command).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => return,
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warnet_rpc::RpcError;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("status").unwrap(), ConsoleCommand::Status);
        assert_eq!(
            parse("rpc all getblockcount").unwrap(),
            ConsoleCommand::Rpc {
                selector: TankSelector::All,
                method: "getblockcount".to_string(),
                params: Vec::new(),
            }
        );
        assert_eq!(
            parse("exec 2 tc qdisc show").unwrap(),
            ConsoleCommand::Exec {
                tank: 2,
                cmd: vec!["tc".into(), "qdisc".into(), "show".into()],
            }
        );
        assert_eq!(
            parse("run tx-flood --interval 5").unwrap(),
            ConsoleCommand::Run {
                program: "tx-flood".to_string(),
                args: vec!["--interval".into(), "5".into()],
            }
        );
        assert_eq!(
            parse("logs 1 --tail 20").unwrap(),
            ConsoleCommand::Logs {
                tank: 1,
                tail: Some(20)
            }
        );
        assert!(parse("rpc nobody getblockcount").is_err());
        assert!(parse("launch").is_err());
    }

    #[test]
    fn test_render_fanout() {
        let mut results = FanOutResult::new();
        results.insert(TankId(0), Ok(json!(101)));
        results.insert(TankId(1), Err(RpcError::not_ready("warming up")));
        let rendered = render_fanout(&results);
        assert_eq!(rendered["0"]["result"], json!(101));
        assert!(rendered["1"]["error"].as_str().unwrap().contains("warming up"));
    }
}
