//! Warnet Hooks - side effects around operator commands.
//!
//! Hooks attach to a command name and a [`HookPhase`]. They are registered
//! once at startup, from code or from plugin manifests, and frozen into a
//! [`HookDispatcher`]. A failing hook is logged and reported; it never
//! fails the command it wraps.

#![warn(missing_docs)]

pub mod error;
pub mod plugin;
pub mod registry;

pub use error::{HookError, Result};
pub use plugin::{discover, HookEntry, PluginManifest, ShellHook, MANIFEST_FILE};
pub use registry::{
    DispatchReport, FnHook, Hook, HookContext, HookDispatcher, HookPhase, HookRegistration,
    HookRegistry,
};
