//! Execution units for scenarios.
//!
//! A [`ScenarioExecutor`] turns a [`LaunchSpec`] into a running
//! [`ScenarioUnit`]: something with captured output, an exit that can be
//! observed and a token that stops it. [`ProcessExecutor`] runs programs as
//! child processes; built-in workloads implement the same trait in-process.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ScenarioError};
use crate::handle::{LogBuffer, ScenarioExit};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Run identity.
    pub id: Uuid,
    /// Program name or path.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Target network.
    pub network: String,
}

impl LaunchSpec {
    /// Argument naming the target network, always passed last.
    pub fn network_arg(&self) -> String {
        format!("--network={}", self.network)
    }
}

/// A launched scenario.
#[derive(Debug)]
pub struct ScenarioUnit {
    /// OS process id, when the unit is a process.
    pub pid: Option<u32>,
    /// Command line as executed.
    pub cmd: Vec<String>,
    /// Captured output.
    pub logs: LogBuffer,
    /// Exit, once it happened.
    pub exit: watch::Receiver<Option<ScenarioExit>>,
    /// Fires to request termination.
    pub stop: CancellationToken,
}

impl ScenarioUnit {
    /// Exit if the unit has ended.
    pub fn exit_state(&self) -> Option<ScenarioExit> {
        *self.exit.borrow()
    }

    /// Waits until the unit ends.
    pub async fn wait(&self) -> ScenarioExit {
        let mut exit = self.exit.clone();
        let result = match exit.wait_for(Option::is_some).await {
            Ok(value) => value.unwrap_or(ScenarioExit::Killed),
            Err(_) => ScenarioExit::Killed,
        };
        result
    }
}

/// Starts scenario units.
#[async_trait]
pub trait ScenarioExecutor: Send + Sync {
    /// Launches `spec`. Returns once the unit is running.
    async fn launch(&self, spec: &LaunchSpec) -> Result<ScenarioUnit>;
}

/// Runs scenario programs as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    launcher: Option<String>,
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    /// Runs programs directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs programs through `launcher`, e.g. an interpreter.
    pub fn with_launcher(launcher: impl Into<String>) -> Self {
        Self {
            launcher: Some(launcher.into()),
            env: Vec::new(),
        }
    }

    /// Adds an environment variable for every launched process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line for `spec`.
    pub fn command_line(&self, spec: &LaunchSpec) -> Vec<String> {
        self.launcher
            .iter()
            .cloned()
            .chain(std::iter::once(spec.program.clone()))
            .chain(spec.args.iter().cloned())
            .chain(std::iter::once(spec.network_arg()))
            .collect()
    }
}

fn capture<R>(stream: Option<R>, logs: LogBuffer)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push(line);
        }
    });
}

#[async_trait]
impl ScenarioExecutor for ProcessExecutor {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ScenarioUnit> {
        let cmd = self.command_line(spec);
        let Some((program, args)) = cmd.split_first() else {
            return Err(ScenarioError::launch(&spec.program, "empty command line"));
        };

        let mut child = Command::new(program)
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("WARNET_NETWORK", &spec.network)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScenarioError::launch(&spec.program, e.to_string()))?;

        let pid = child.id();
        let logs = LogBuffer::default();
        capture(child.stdout.take(), logs.clone());
        capture(child.stderr.take(), logs.clone());

        let (exit_tx, exit_rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let cancel = stop.clone();
        let id = spec.id;
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            };
            let exit = match waited {
                Some(Ok(status)) => status.code().map_or(ScenarioExit::Killed, ScenarioExit::Code),
                Some(Err(err)) => {
                    warn!(scenario = %id, error = %err, "waiting on scenario process failed");
                    ScenarioExit::Killed
                }
                None => {
                    if let Err(err) = child.kill().await {
                        debug!(scenario = %id, error = %err, "kill after stop failed");
                    }
                    ScenarioExit::Stopped
                }
            };
            debug!(scenario = %id, ?exit, "scenario process ended");
            exit_tx.send_replace(Some(exit));
        });

        info!(scenario = %spec.id, ?pid, cmd = ?cmd, "launched scenario process");
        Ok(ScenarioUnit {
            pid,
            cmd,
            logs,
            exit: exit_rx,
            stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            id: Uuid::new_v4(),
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            network: "warnet".to_string(),
        }
    }

    #[test]
    fn test_network_argument_is_last() {
        let executor = ProcessExecutor::with_launcher("python3");
        let cmd = executor.command_line(&spec("tx_flood.py", &["--interval", "5"]));
        assert_eq!(cmd, vec!["python3", "tx_flood.py", "--interval", "5", "--network=warnet"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_output_and_exit_code() {
        let executor = ProcessExecutor::new();
        let unit = executor
            .launch(&spec("sh", &["-c", "echo hello; echo oops >&2; exit 3", "sh"]))
            .await
            .unwrap();
        assert!(unit.pid.is_some());
        assert_eq!(unit.wait().await, ScenarioExit::Code(3));

        // Output readers run independently of the exit watcher.
        for _ in 0..50 {
            if unit.logs.len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let logs = unit.logs.contents();
        assert!(logs.contains("hello"));
        assert!(logs.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_process() {
        let executor = ProcessExecutor::new();
        let unit = executor
            .launch(&spec("sh", &["-c", "sleep 600", "sh"]))
            .await
            .unwrap();
        assert_eq!(unit.exit_state(), None);
        unit.stop.cancel();
        assert_eq!(unit.wait().await, ScenarioExit::Stopped);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let err = ProcessExecutor::new()
            .launch(&spec("/definitely/not/here", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Launch { .. }));
    }
}
