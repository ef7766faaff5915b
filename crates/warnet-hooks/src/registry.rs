//! Hook registration and dispatch.
//!
//! Hooks are collected into a [`HookRegistry`] while the process starts and
//! frozen into a [`HookDispatcher`]. After that the set of hooks never
//! changes, so the dispatcher is shared freely without locking.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// When a hook runs relative to its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    /// Before the command body.
    Pre,
    /// After the command body succeeded.
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => f.write_str("pre"),
            Self::Post => f.write_str("post"),
        }
    }
}

/// What a hook is told about the command it wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Command name, e.g. `network deploy`.
    pub command: String,
    /// Phase being dispatched.
    pub phase: HookPhase,
    /// Network the command targets, if any.
    pub network: Option<String>,
}

impl HookContext {
    /// Creates a context.
    pub fn new(command: impl Into<String>, phase: HookPhase, network: Option<&str>) -> Self {
        Self {
            command: command.into(),
            phase,
            network: network.map(str::to_string),
        }
    }
}

/// A hook body.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Runs the hook.
    async fn run(&self, ctx: &HookContext) -> Result<()>;
}

/// Adapts a synchronous closure into a [`Hook`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext) -> Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &HookContext) -> Result<()> {
        (self.0)(ctx)
    }
}

/// One `(command, phase, hook)` entry.
#[derive(Clone)]
pub struct HookRegistration {
    /// Command name the hook is attached to.
    pub command: String,
    /// Phase it runs in.
    pub phase: HookPhase,
    /// Where it came from, usually a plugin name.
    pub origin: String,
    hook: Arc<dyn Hook>,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("command", &self.command)
            .field("phase", &self.phase)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Collects hooks in registration order.
#[derive(Debug, Default)]
pub struct HookRegistry {
    entries: Vec<HookRegistration>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook.
    pub fn register(
        &mut self,
        command: impl Into<String>,
        phase: HookPhase,
        origin: impl Into<String>,
        hook: Arc<dyn Hook>,
    ) -> &mut Self {
        let registration = HookRegistration {
            command: command.into(),
            phase,
            origin: origin.into(),
            hook,
        };
        debug!(command = %registration.command, phase = %phase, origin = %registration.origin, "registered hook");
        self.entries.push(registration);
        self
    }

    /// Adds a closure hook.
    pub fn register_fn<F>(
        &mut self,
        command: impl Into<String>,
        phase: HookPhase,
        origin: impl Into<String>,
        f: F,
    ) -> &mut Self
    where
        F: Fn(&HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.register(command, phase, origin, Arc::new(FnHook(f)))
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the registry.
    pub fn build(self) -> HookDispatcher {
        HookDispatcher {
            hooks: self.entries.into(),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Hooks that ran.
    pub ran: usize,
    /// Failures, as `(origin, message)`, in run order.
    pub failed: Vec<(String, String)>,
}

/// Runs registered hooks. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct HookDispatcher {
    hooks: Arc<[HookRegistration]>,
}

impl HookDispatcher {
    /// A dispatcher with no hooks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Hooks registered for `command` in `phase`, in order.
    pub fn hooks_for<'a>(
        &'a self,
        command: &'a str,
        phase: HookPhase,
    ) -> impl Iterator<Item = &'a HookRegistration> + 'a {
        self.hooks
            .iter()
            .filter(move |h| h.command == command && h.phase == phase)
    }

    /// Runs every hook for the context's command and phase, in registration
    /// order. Failures and panics are logged and reported, never returned.
    pub async fn dispatch(&self, ctx: &HookContext) -> DispatchReport {
        let mut report = DispatchReport::default();
        for registration in self.hooks_for(&ctx.command, ctx.phase) {
            report.ran += 1;
            let error = match AssertUnwindSafe(registration.hook.run(ctx)).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("hook panicked: {}", panic_message(panic.as_ref())),
            };
            warn!(
                command = %ctx.command,
                phase = %ctx.phase,
                origin = %registration.origin,
                error = %error,
                "hook failed"
            );
            report.failed.push((registration.origin.clone(), error));
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use std::sync::Mutex;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(&HookContext) -> Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |ctx| {
            log.lock().unwrap().push(format!("{tag}:{}:{}", ctx.command, ctx.phase));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry
            .register_fn("network deploy", HookPhase::Pre, "a", recorder(&log, "a"))
            .register_fn("network deploy", HookPhase::Post, "b", recorder(&log, "b"))
            .register_fn("network deploy", HookPhase::Pre, "c", recorder(&log, "c"))
            .register_fn("network stop", HookPhase::Pre, "d", recorder(&log, "d"));
        let dispatcher = registry.build();

        let report = dispatcher
            .dispatch(&HookContext::new("network deploy", HookPhase::Pre, Some("warnet")))
            .await;
        assert_eq!(report.ran, 2);
        assert!(report.failed.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:network deploy:pre", "c:network deploy:pre"]
        );
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_later_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry
            .register_fn("rpc", HookPhase::Pre, "broken", |ctx: &HookContext| {
                Err(HookError::handler(&ctx.command, ctx.phase, "boom"))
            })
            .register_fn("rpc", HookPhase::Pre, "fine", recorder(&log, "fine"));
        let dispatcher = registry.build();

        let report = dispatcher
            .dispatch(&HookContext::new("rpc", HookPhase::Pre, None))
            .await;
        assert_eq!(report.ran, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(report.failed[0].1.contains("boom"));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_hook_is_reported_not_propagated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry
            .register_fn("network stop", HookPhase::Post, "explodes", |_ctx: &HookContext| -> Result<()> {
                panic!("index out of range")
            })
            .register_fn("network stop", HookPhase::Post, "after", recorder(&log, "after"));
        let dispatcher = registry.build();

        let report = dispatcher
            .dispatch(&HookContext::new("network stop", HookPhase::Post, Some("warnet")))
            .await;
        assert_eq!(report.ran, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "explodes");
        assert_eq!(report.failed[0].1, "hook panicked: index out of range");
        assert_eq!(*log.lock().unwrap(), vec!["after:network stop:post"]);
    }

    #[tokio::test]
    async fn test_empty_dispatcher() {
        let report = HookDispatcher::empty()
            .dispatch(&HookContext::new("scenario run", HookPhase::Post, None))
            .await;
        assert_eq!(report, DispatchReport::default());
    }
}
