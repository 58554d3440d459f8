//! Init-script spawning
//!
//! Starting or stopping a service forks its init script with the
//! matching verb and hands the pid back; collecting the exit status is
//! the caller's job via [`Manager::waitpid`]. A service already on the
//! requested side of its lifecycle yields `Ok(None)` instead of a
//! child.

use std::process::{Command, Stdio};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use super::{Manager, ServiceState};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("failed to spawn {script}: {err}")]
    Spawn { script: String, err: String },
}

impl Manager {
    /// Spawn `<script> start`. `Ok(None)` when the service is already
    /// started or starting.
    pub fn start_service(&mut self, name: &str) -> Result<Option<Pid>, SpawnError> {
        if self.service_state(name, ServiceState::Starting)
            || self.service_state(name, ServiceState::Started)
        {
            log::debug!("{} already started, nothing to do", name);
            return Ok(None);
        }
        self.spawn_verb(name, "start").map(Some)
    }

    /// Spawn `<script> stop`. `Ok(None)` when the service is already
    /// stopped or stopping.
    pub fn stop_service(&mut self, name: &str) -> Result<Option<Pid>, SpawnError> {
        if self.service_state(name, ServiceState::Stopping)
            || self.service_state(name, ServiceState::Stopped)
        {
            log::debug!("{} already stopped, nothing to do", name);
            return Ok(None);
        }
        self.spawn_verb(name, "stop").map(Some)
    }

    fn spawn_verb(&self, name: &str, verb: &str) -> Result<Pid, SpawnError> {
        let script = self
            .resolve_service(name)
            .ok_or_else(|| SpawnError::NotFound(name.to_string()))?;

        let child = Command::new(&script)
            .arg(verb)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SpawnError::Spawn {
                script: script.display().to_string(),
                err: e.to_string(),
            })?;

        let pid = child.id() as i32;
        log::info!("spawned {} {} (pid {})", name, verb, pid);
        Ok(Pid::from_raw(pid))
    }

    /// Collect a child spawned by start/stop and return its exit
    /// status. Termination by signal reports as `128 + signo`, the
    /// shell convention. `None` when the pid is not ours to reap.
    pub fn waitpid(&self, pid: Pid) -> Option<i32> {
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Some(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Some(128 + signal as i32),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::manager::testutil::{unique_root, write_script};

    #[test]
    fn test_start_collects_exit_status() {
        let root = unique_root();
        write_script(&root, "ok", "#!/bin/sh\nexit 0\n");
        write_script(&root, "bad", "#!/bin/sh\nexit 3\n");
        let mut manager = Manager::new(Layout::under(&root));

        let pid = manager.start_service("ok").unwrap().unwrap();
        assert_eq!(manager.waitpid(pid), Some(0));

        let pid = manager.start_service("bad").unwrap().unwrap();
        assert_eq!(manager.waitpid(pid), Some(3));
    }

    #[test]
    fn test_verb_reaches_script() {
        let root = unique_root();
        let marker = root.join("verb");
        write_script(
            &root,
            "echoer",
            &format!("#!/bin/sh\nprintf %s \"$1\" > {}\n", marker.display()),
        );
        let mut manager = Manager::new(Layout::under(&root));

        let pid = manager.stop_service("echoer").unwrap().unwrap();
        assert_eq!(manager.waitpid(pid), Some(0));
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "stop");
    }

    #[test]
    fn test_already_started_is_sentinel() {
        let root = unique_root();
        write_script(&root, "net", "#!/bin/sh\nexit 0\n");
        let mut manager = Manager::new(Layout::under(&root));

        manager.mark_service("net", ServiceState::Started).unwrap();
        assert!(manager.start_service("net").unwrap().is_none());

        // an untouched service is implicitly stopped
        manager.mark_service("net", ServiceState::Stopped).unwrap();
        assert!(manager.stop_service("net").unwrap().is_none());
    }

    #[test]
    fn test_start_unknown_service() {
        let root = unique_root();
        let mut manager = Manager::new(Layout::under(&root));
        assert!(matches!(
            manager.start_service("ghost"),
            Err(SpawnError::NotFound(_))
        ));
    }
}
