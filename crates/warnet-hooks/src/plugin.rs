//! Plugin discovery.
//!
//! A plugin is a directory holding a `plugin.yaml`:
//!
//! ```yaml
//! enabled: true
//! hooks:
//!   - command: network deploy
//!     phase: post
//!     run: ./notify.sh
//! ```
//!
//! Each hook entry becomes a [`ShellHook`] run with `sh -c` from the plugin
//! directory.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{HookError, Result};
use crate::registry::{Hook, HookContext, HookPhase, HookRegistry};

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Default limit on a shell hook's run time.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Parsed `plugin.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginManifest {
    /// Only enabled plugins register hooks.
    #[serde(default)]
    pub enabled: bool,
    /// Hook entries.
    #[serde(default)]
    pub hooks: Vec<HookEntry>,
}

/// One hook entry of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HookEntry {
    /// Command name to attach to.
    pub command: String,
    /// Phase to run in.
    pub phase: HookPhase,
    /// Shell command to run.
    pub run: String,
}

impl PluginManifest {
    /// Reads and parses a manifest file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| HookError::manifest(path, e.to_string()))
    }
}

/// Runs a shell command as a hook.
#[derive(Debug, Clone)]
pub struct ShellHook {
    run: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl ShellHook {
    /// Creates a hook running `run` from `workdir`.
    pub fn new(run: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            run: run.into(),
            workdir: workdir.into(),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Sets the run time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Hook for ShellHook {
    async fn run(&self, ctx: &HookContext) -> Result<()> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.run)
            .current_dir(&self.workdir)
            .env("WARNET_COMMAND", &ctx.command)
            .env("WARNET_PHASE", ctx.phase.to_string())
            .env("WARNET_NETWORK", ctx.network.as_deref().unwrap_or_default())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| HookError::Timeout {
                run: self.run.clone(),
                after: self.timeout,
            })??;

        if output.status.success() {
            debug!(run = %self.run, "hook command succeeded");
            Ok(())
        } else {
            Err(HookError::Shell {
                run: self.run.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Registers the hooks of every enabled plugin under `dir`.
///
/// Plugin directories are visited in name order. A plugin with an
/// unreadable manifest is skipped with a warning. Returns the names of the
/// plugins that registered.
pub fn discover(dir: &Path, registry: &mut HookRegistry) -> Result<Vec<String>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no plugins directory");
        return Ok(Vec::new());
    }

    let mut plugin_dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            plugin_dirs.push(entry.path());
        }
    }
    plugin_dirs.sort();

    let mut loaded = Vec::new();
    for plugin_dir in plugin_dirs {
        let manifest_path = plugin_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        let name = plugin_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = match PluginManifest::from_file(&manifest_path) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(plugin = %name, error = %err, "skipping plugin");
                continue;
            }
        };
        if !manifest.enabled {
            debug!(plugin = %name, "plugin disabled");
            continue;
        }
        for entry in manifest.hooks {
            let hook = ShellHook::new(entry.run, &plugin_dir);
            registry.register(entry.command, entry.phase, name.clone(), Arc::new(hook));
        }
        info!(plugin = %name, "loaded plugin");
        loaded.push(name);
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plugin(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn test_manifest_parse() {
        let manifest: PluginManifest = serde_yaml::from_str(
            "enabled: true\nhooks:\n  - command: network deploy\n    phase: pre\n    run: echo hi\n",
        )
        .unwrap();
        assert!(manifest.enabled);
        assert_eq!(manifest.hooks[0].phase, HookPhase::Pre);

        let bare: PluginManifest = serde_yaml::from_str("hooks: []").unwrap();
        assert!(!bare.enabled);
    }

    #[test]
    fn test_discover_sorted_and_enabled_only() {
        let root = TempDir::new().unwrap();
        plugin(
            root.path(),
            "b-second",
            "enabled: true\nhooks:\n  - {command: rpc, phase: pre, run: 'true'}\n",
        );
        plugin(
            root.path(),
            "a-first",
            "enabled: true\nhooks:\n  - {command: rpc, phase: pre, run: 'true'}\n",
        );
        plugin(
            root.path(),
            "c-off",
            "enabled: false\nhooks:\n  - {command: rpc, phase: pre, run: 'true'}\n",
        );
        plugin(root.path(), "d-broken", "enabled: [not a bool");
        fs::create_dir_all(root.path().join("e-empty")).unwrap();

        let mut registry = HookRegistry::new();
        let loaded = discover(root.path(), &mut registry).unwrap();
        assert_eq!(loaded, vec!["a-first", "b-second"]);

        let dispatcher = registry.build();
        let origins: Vec<&str> = dispatcher
            .hooks_for("rpc", HookPhase::Pre)
            .map(|h| h.origin.as_str())
            .collect();
        assert_eq!(origins, vec!["a-first", "b-second"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let mut registry = HookRegistry::new();
        let loaded = discover(Path::new("/nonexistent/plugins"), &mut registry).unwrap();
        assert!(loaded.is_empty());
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_hook_sees_context() {
        let dir = TempDir::new().unwrap();
        let hook = ShellHook::new(
            "echo \"$WARNET_COMMAND/$WARNET_PHASE/$WARNET_NETWORK\" > seen.txt",
            dir.path(),
        );
        hook.run(&HookContext::new("network deploy", HookPhase::Post, Some("warnet")))
            .await
            .unwrap();
        let seen = fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen.trim(), "network deploy/post/warnet");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_hook_failure() {
        let dir = TempDir::new().unwrap();
        let hook = ShellHook::new("echo nope >&2; exit 2", dir.path());
        let err = hook
            .run(&HookContext::new("rpc", HookPhase::Pre, None))
            .await
            .unwrap_err();
        match err {
            HookError::Shell { status, stderr, .. } => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
