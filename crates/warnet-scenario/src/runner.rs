//! The scenario runner.
//!
//! Tracks every launched scenario by id. Built-in workloads are looked up by
//! name first, anything else is resolved as a program path, either as given
//! or relative to the scenarios directory. Status is refreshed from the
//! unit's exit watch on every read; nothing polls in the background.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, ScenarioError};
use crate::executor::{LaunchSpec, ScenarioExecutor, ScenarioUnit};
use crate::handle::{LogBuffer, ScenarioExit, ScenarioHandle, ScenarioStatus};

/// How long `stop` waits for a unit to acknowledge.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct Entry {
    handle: ScenarioHandle,
    logs: LogBuffer,
    exit: watch::Receiver<Option<ScenarioExit>>,
    stop: CancellationToken,
}

impl Entry {
    fn new(handle: ScenarioHandle, unit: ScenarioUnit) -> Self {
        Self {
            handle,
            logs: unit.logs,
            exit: unit.exit,
            stop: unit.stop,
        }
    }

    fn refresh(&mut self) -> &ScenarioHandle {
        if !self.handle.status.is_terminal() {
            if let Some(exit) = *self.exit.borrow() {
                self.handle.status = exit.status();
                self.handle.return_code = exit.code();
            }
        }
        &self.handle
    }
}

/// Launches and tracks scenarios.
pub struct ScenarioRunner {
    process: Arc<dyn ScenarioExecutor>,
    builtins: BTreeMap<String, Arc<dyn ScenarioExecutor>>,
    scenarios_dir: Option<PathBuf>,
    stop_timeout: Duration,
    entries: RwLock<BTreeMap<Uuid, Entry>>,
}

impl ScenarioRunner {
    /// Creates a runner that launches programs with `process`.
    pub fn new(process: impl ScenarioExecutor + 'static) -> Self {
        Self {
            process: Arc::new(process),
            builtins: BTreeMap::new(),
            scenarios_dir: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            entries: RwLock::default(),
        }
    }

    /// Resolves bare program names against `dir`.
    pub fn with_scenarios_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scenarios_dir = Some(dir.into());
        self
    }

    /// Registers a built-in workload under `name`.
    pub fn with_builtin(mut self, name: impl Into<String>, executor: Arc<dyn ScenarioExecutor>) -> Self {
        self.builtins.insert(name.into(), executor);
        self
    }

    /// Sets how long `stop` waits for the unit to end.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn resolve(&self, program: &str) -> Result<(Arc<dyn ScenarioExecutor>, String)> {
        if let Some(builtin) = self.builtins.get(program) {
            return Ok((builtin.clone(), program.to_string()));
        }
        let direct = Path::new(program);
        if direct.is_file() {
            return Ok((self.process.clone(), program.to_string()));
        }
        if let Some(dir) = &self.scenarios_dir {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Ok((self.process.clone(), candidate.display().to_string()));
            }
        }
        Err(ScenarioError::UnknownProgram(program.to_string()))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Uuid, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Uuid, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches `program` against `network`.
    #[instrument(skip(self, args))]
    pub async fn launch(&self, program: &str, network: &str, args: Vec<String>) -> Result<ScenarioHandle> {
        let (executor, resolved) = self.resolve(program)?;
        let spec = LaunchSpec {
            id: Uuid::new_v4(),
            program: resolved,
            args,
            network: network.to_string(),
        };
        let unit = executor.launch(&spec).await?;
        let handle = ScenarioHandle {
            id: spec.id,
            program: program.to_string(),
            cmd: unit.cmd.clone(),
            network: spec.network.clone(),
            pid: unit.pid,
            started_at: Utc::now(),
            status: ScenarioStatus::Running,
            return_code: None,
        };
        info!(scenario = %handle.id, pid = ?handle.pid, "scenario running");
        self.write().insert(handle.id, Entry::new(handle.clone(), unit));
        Ok(handle)
    }

    /// Current record of scenario `id`.
    pub fn status(&self, id: Uuid) -> Result<ScenarioHandle> {
        self.write()
            .get_mut(&id)
            .map(|entry| entry.refresh().clone())
            .ok_or(ScenarioError::NotFound(id))
    }

    /// Captured output of scenario `id`.
    pub fn logs(&self, id: Uuid) -> Result<String> {
        self.read()
            .get(&id)
            .map(|entry| entry.logs.contents())
            .ok_or(ScenarioError::NotFound(id))
    }

    /// Waits until scenario `id` ends on its own or is stopped.
    pub async fn wait(&self, id: Uuid) -> Result<ScenarioHandle> {
        let mut exit = self
            .read()
            .get(&id)
            .map(|entry| entry.exit.clone())
            .ok_or(ScenarioError::NotFound(id))?;
        // A closed channel means the unit is gone; the refresh below reports it.
        let _ = exit.wait_for(Option::is_some).await;
        self.status(id)
    }

    /// Stops scenario `id`. Stopping a finished scenario is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: Uuid) -> Result<ScenarioHandle> {
        let (stop, mut exit) = {
            let mut entries = self.write();
            let entry = entries.get_mut(&id).ok_or(ScenarioError::NotFound(id))?;
            if entry.refresh().status.is_terminal() {
                return Ok(entry.handle.clone());
            }
            (entry.stop.clone(), entry.exit.clone())
        };

        stop.cancel();
        let acknowledged = tokio::time::timeout(self.stop_timeout, exit.wait_for(Option::is_some))
            .await
            .is_ok_and(|waited| waited.is_ok());

        let mut entries = self.write();
        let entry = entries.get_mut(&id).ok_or(ScenarioError::NotFound(id))?;
        entry.refresh();
        if !acknowledged && !entry.handle.status.is_terminal() {
            warn!(scenario = %id, "scenario did not acknowledge stop in time");
            entry.handle.status = ScenarioStatus::Stopped;
        }
        info!(scenario = %id, status = %entry.handle.status, "scenario stopped");
        Ok(entry.handle.clone())
    }

    /// Stops every scenario targeting `network`. Returns how many were running.
    pub async fn stop_for_network(&self, network: &str) -> usize {
        let running: Vec<Uuid> = self
            .list_running()
            .into_iter()
            .filter(|h| h.network == network)
            .map(|h| h.id)
            .collect();
        for id in &running {
            if let Err(err) = self.stop(*id).await {
                warn!(scenario = %id, error = %err, "failed to stop scenario");
            }
        }
        running.len()
    }

    /// All scenarios, oldest first.
    pub fn list(&self) -> Vec<ScenarioHandle> {
        let mut handles: Vec<ScenarioHandle> = self
            .write()
            .values_mut()
            .map(|entry| entry.refresh().clone())
            .collect();
        handles.sort_by_key(|h| h.started_at);
        handles
    }

    /// Scenarios that have not ended.
    pub fn list_running(&self) -> Vec<ScenarioHandle> {
        self.list()
            .into_iter()
            .filter(|h| !h.status.is_terminal())
            .collect()
    }

    /// Forgets finished scenarios. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.refresh().status.is_terminal());
        before - entries.len()
    }

    /// Names of launchable programs: built-ins and files in the scenarios
    /// directory.
    pub fn available(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.builtins.keys().cloned().collect();
        if let Some(dir) = &self.scenarios_dir {
            if dir.is_dir() {
                for entry in std::fs::read_dir(dir)? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type()?.is_file() && !name.starts_with('.') && !name.starts_with("__") {
                        names.insert(name);
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessExecutor;
    use std::fs;
    use tempfile::TempDir;

    fn scripts() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("echo_args.sh"), "echo \"args: $*\"\n").unwrap();
        fs::write(dir.path().join("fail.sh"), "echo broken >&2\nexit 7\n").unwrap();
        fs::write(dir.path().join("sleepy.sh"), "sleep 600\n").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        dir
    }

    fn runner(dir: &TempDir) -> ScenarioRunner {
        ScenarioRunner::new(ProcessExecutor::with_launcher("sh")).with_scenarios_dir(dir.path())
    }

    #[tokio::test]
    async fn test_launch_to_success() {
        let dir = scripts();
        let runner = runner(&dir);
        let handle = runner
            .launch("echo_args.sh", "warnet", vec!["--interval=1".into()])
            .await
            .unwrap();
        assert_eq!(handle.status, ScenarioStatus::Running);
        assert_eq!(handle.cmd.last().map(String::as_str), Some("--network=warnet"));
        assert!(handle.pid.is_some());

        let done = runner.wait(handle.id).await.unwrap();
        assert_eq!(done.status, ScenarioStatus::Succeeded);
        assert_eq!(done.return_code, Some(0));
        assert!(runner.list_running().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runner
            .logs(handle.id)
            .unwrap()
            .contains("args: --interval=1 --network=warnet"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let dir = scripts();
        let runner = runner(&dir);
        let handle = runner.launch("fail.sh", "warnet", Vec::new()).await.unwrap();
        let done = runner.wait(handle.id).await.unwrap();
        assert_eq!(done.status, ScenarioStatus::Failed);
        assert_eq!(done.return_code, Some(7));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = scripts();
        let runner = runner(&dir);
        let handle = runner.launch("sleepy.sh", "warnet", Vec::new()).await.unwrap();
        assert_eq!(runner.list_running().len(), 1);

        let stopped = runner.stop(handle.id).await.unwrap();
        assert_eq!(stopped.status, ScenarioStatus::Stopped);
        let again = runner.stop(handle.id).await.unwrap();
        assert_eq!(again, stopped);
        assert!(runner.list_running().is_empty());

        assert_eq!(runner.prune(), 1);
        assert!(runner.status(handle.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stop_for_network_only_touches_that_network() {
        let dir = scripts();
        let runner = runner(&dir);
        let a = runner.launch("sleepy.sh", "alpha", Vec::new()).await.unwrap();
        let b = runner.launch("sleepy.sh", "beta", Vec::new()).await.unwrap();

        assert_eq!(runner.stop_for_network("alpha").await, 1);
        assert_eq!(runner.status(a.id).unwrap().status, ScenarioStatus::Stopped);
        assert_eq!(runner.status(b.id).unwrap().status, ScenarioStatus::Running);
        runner.stop(b.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_program_and_available() {
        let dir = scripts();
        let runner = runner(&dir);
        let err = runner.launch("nope.py", "warnet", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownProgram(_)));
        assert!(runner.stop(Uuid::new_v4()).await.unwrap_err().is_not_found());

        assert_eq!(
            runner.available().unwrap(),
            vec!["echo_args.sh", "fail.sh", "sleepy.sh"]
        );
    }
}
