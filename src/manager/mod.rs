//! Service manager core
//!
//! A [`Manager`] is a handle over the filesystem layout: it resolves
//! service names to init scripts, tracks per-service state, spawns the
//! scripts for start/stop and answers dependency-ordering queries.
//!
//! The filesystem is the single source of truth. Several processes may
//! hold a `Manager` over the same layout at once; transitions are
//! serialized per service with an advisory file lock, everything else is
//! plain atomic link and rename traffic.

mod daemons;
mod options;
pub mod pids;
mod process;
mod runlevel;
mod schedule;
mod state;

pub use daemons::DaemonRecord;
pub use process::SpawnError;
pub use state::{ServiceState, StateError};

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use crate::hooks::{Hook, HookFn};
use crate::layout::{self, Layout};

/// Handle over one service-management layout.
pub struct Manager {
    layout: Layout,
    hook: Option<Box<HookFn>>,
    /// Write-only descriptor plugins publish `KEY=VALUE\0` records to.
    environ_fd: Option<File>,
    /// Transition locks this process currently holds, keyed by service.
    locks: HashMap<String, File>,
}

impl Manager {
    /// Create a manager with no plugin hook.
    pub fn new(layout: Layout) -> Self {
        Manager {
            layout,
            hook: None,
            environ_fd: None,
            locks: HashMap::new(),
        }
    }

    /// Create a manager that invokes `hook` at the defined transition
    /// points.
    pub fn with_hook(layout: Layout, hook: Box<HookFn>) -> Self {
        Manager {
            layout,
            hook: Some(hook),
            environ_fd: None,
            locks: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Resolve a bare service name to the path of its init script,
    /// preferring earlier (more local) service directories.
    pub fn resolve_service(&self, name: &str) -> Option<PathBuf> {
        if !valid_name(name) {
            return None;
        }
        for dir in &self.layout.service_dirs {
            let path = dir.join(name);
            if layout::is_executable(&path) {
                return Some(path);
            }
        }
        None
    }

    pub fn service_exists(&self, name: &str) -> bool {
        self.resolve_service(name).is_some()
    }

    /// Sorted list of every resolvable service. Earlier service
    /// directories shadow later ones.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for dir in &self.layout.service_dirs {
            for name in layout::ls_dir(dir) {
                if layout::is_executable(&dir.join(&name)) && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        names
    }

    /// Invoke the plugin hook, if one is wired. The return value is
    /// logged and otherwise ignored.
    pub fn plugin_hook(&self, hook: Hook, name: &str) {
        if let Some(callback) = &self.hook {
            let status = callback(hook, name);
            log::debug!("hook {} for {} returned {}", hook, name, status);
        }
    }

    /// Hand the manager the descriptor plugins write environment records
    /// to. The core never reads it.
    pub fn set_environ_fd(&mut self, fd: File) {
        self.environ_fd = Some(fd);
    }

    pub fn environ_fd(&self) -> Option<&File> {
        self.environ_fd.as_ref()
    }
}

/// Service, runlevel and option names are path components: non-empty,
/// no separators, not dot-prefixed.
pub(crate) fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.starts_with('.')
}
