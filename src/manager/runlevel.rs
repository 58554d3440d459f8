//! Runlevel registry
//!
//! A runlevel is a directory of membership symlinks under
//! `runlevels/<level>/`. The active runlevel's name lives in the
//! `softlevel` file; two transient flag files say whether a transition
//! is currently starting or stopping services.

use std::fs;
use std::os::unix::fs::symlink;

use super::{valid_name, Manager, StateError};
use crate::layout::{atomic_write, ls_dir, symlink_exists, SYSINIT};

const STARTING_FLAG: &str = "rc.starting";
const STOPPING_FLAG: &str = "rc.stopping";

impl Manager {
    /// The active runlevel; `sysinit` until one was ever stored.
    pub fn runlevel(&self) -> String {
        fs::read_to_string(self.layout().softlevel_file())
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| SYSINIT.to_string())
    }

    /// Store the active runlevel. Does not start or stop anything.
    pub fn set_runlevel(&mut self, runlevel: &str) -> Result<(), StateError> {
        if !valid_name(runlevel) {
            return Err(StateError::InvalidName(runlevel.to_string()));
        }
        let path = self.layout().softlevel_file();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        atomic_write(&path, runlevel.as_bytes())?;
        Ok(())
    }

    pub fn runlevel_exists(&self, runlevel: &str) -> bool {
        valid_name(runlevel) && self.layout().runlevel_dir(runlevel).is_dir()
    }

    /// Sorted names of every runlevel directory.
    pub fn runlevels(&self) -> Vec<String> {
        let root = &self.layout().runlevel_root;
        ls_dir(root)
            .into_iter()
            .filter(|name| root.join(name).is_dir())
            .collect()
    }

    pub fn service_in_runlevel(&self, service: &str, runlevel: &str) -> bool {
        symlink_exists(&self.layout().runlevel_dir(runlevel).join(service))
    }

    /// Sorted members of a runlevel.
    pub fn services_in_runlevel(&self, runlevel: &str) -> Vec<String> {
        ls_dir(&self.layout().runlevel_dir(runlevel))
    }

    /// Add a service to a runlevel by symlinking its init script.
    pub fn add_service_to_runlevel(
        &mut self,
        runlevel: &str,
        service: &str,
    ) -> Result<(), StateError> {
        if !valid_name(runlevel) {
            return Err(StateError::InvalidName(runlevel.to_string()));
        }
        let script = self
            .resolve_service(service)
            .ok_or_else(|| StateError::NotFound(service.to_string()))?;
        let dir = self.layout().runlevel_dir(runlevel);
        fs::create_dir_all(&dir)?;
        let link = dir.join(service);
        if !symlink_exists(&link) {
            symlink(&script, &link)?;
        }
        Ok(())
    }

    /// Remove a service's membership symlink from a runlevel.
    pub fn remove_service_from_runlevel(
        &mut self,
        runlevel: &str,
        service: &str,
    ) -> Result<(), StateError> {
        let link = self.layout().runlevel_dir(runlevel).join(service);
        if !symlink_exists(&link) {
            return Err(StateError::NotFound(service.to_string()));
        }
        fs::remove_file(&link)?;
        Ok(())
    }

    /// Is a runlevel transition currently starting services?
    pub fn runlevel_starting(&self) -> bool {
        self.layout().transition_flag(STARTING_FLAG).exists()
    }

    /// Is a runlevel transition currently stopping services?
    pub fn runlevel_stopping(&self) -> bool {
        self.layout().transition_flag(STOPPING_FLAG).exists()
    }

    pub fn set_runlevel_starting(&mut self, on: bool) -> Result<(), StateError> {
        self.set_flag(STARTING_FLAG, on)
    }

    pub fn set_runlevel_stopping(&mut self, on: bool) -> Result<(), StateError> {
        self.set_flag(STOPPING_FLAG, on)
    }

    fn set_flag(&self, flag: &str, on: bool) -> Result<(), StateError> {
        let path = self.layout().transition_flag(flag);
        if on {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, b"")?;
        } else if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}
