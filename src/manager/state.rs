//! Service state machine
//!
//! Per-service state is a set of symlinks under `state/<name>/`. The
//! exclusive states replace each other; the marker states coexist with
//! them. A symlink is created before its predecessor is removed, so a
//! concurrent observer sees the old state or the new state, never
//! neither.
//!
//! ```text
//!    ┌─────────┐ start  ┌──────────┐ ok  ┌─────────┐
//!    │ Stopped │───────▶│ Starting │────▶│ Started │
//!    └─────────┘        └────┬─────┘     └────┬────┘
//!         ▲                  │ script said    │ stop
//!         │                  ▼ "inactive"     ▼
//!    ┌────┴─────┐       ┌──────────┐     ┌──────────┐
//!    │ Stopping │◀──────│ Inactive │     │ Stopping │
//!    └──────────┘       └──────────┘     └──────────┘
//! ```
//!
//! `starting` and `stopping` hold an exclusive `flock` on
//! `lock/<name>`; the kernel drops it when the holder exits, however
//! abnormally.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::symlink;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::{valid_name, Manager};
use crate::hooks::Hook;
use crate::layout::{ls_dir, symlink_exists};

/// Everything a service can be, or be marked as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Off, no transition in flight. A service nothing ever touched is
    /// implicitly stopped.
    Stopped,
    /// Start script running; exclusive transition lock held.
    Starting,
    /// On.
    Started,
    /// Stop script running; exclusive transition lock held.
    Stopping,
    /// The script declared itself neither started nor stopped.
    Inactive,
    /// Marker: was inactive before the transition in flight.
    WasInactive,
    /// Marker: activated outside any runlevel (hot/cold plug).
    Coldplugged,
    /// Marker: last transition exited non-zero.
    Failed,
    /// Marker: waiting for a trigger service to start.
    Scheduled,
    /// Computed, never stored: started but none of its daemons remain.
    Crashed,
}

/// The mutually exclusive lifecycle states, at most one set at a time.
const EXCLUSIVE: [ServiceState; 5] = [
    ServiceState::Stopped,
    ServiceState::Starting,
    ServiceState::Started,
    ServiceState::Stopping,
    ServiceState::Inactive,
];

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Inactive => "inactive",
            Self::WasInactive => "wasinactive",
            Self::Coldplugged => "coldplugged",
            Self::Failed => "failed",
            Self::Scheduled => "scheduled",
            Self::Crashed => "crashed",
        }
    }

    pub fn is_exclusive(&self) -> bool {
        EXCLUSIVE.contains(self)
    }

    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "stopping" => Ok(Self::Stopping),
            "inactive" => Ok(Self::Inactive),
            "wasinactive" => Ok(Self::WasInactive),
            "coldplugged" => Ok(Self::Coldplugged),
            "failed" => Ok(Self::Failed),
            "scheduled" => Ok(Self::Scheduled),
            "crashed" => Ok(Self::Crashed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("state {0} is computed and cannot be marked")]
    NotMarkable(ServiceState),

    #[error("another process is transitioning {0}")]
    TransitionBusy(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Manager {
    /// Move a service into `state`.
    ///
    /// Exclusive states replace each other; entering `starting` or
    /// `stopping` takes the per-service transition lock and fires the
    /// corresponding `_in` hook, reaching a terminal state releases it.
    /// Marker states are simply set.
    pub fn mark_service(&mut self, name: &str, state: ServiceState) -> Result<(), StateError> {
        if !valid_name(name) {
            return Err(StateError::InvalidName(name.to_string()));
        }
        if state == ServiceState::Crashed {
            return Err(StateError::NotMarkable(state));
        }
        let script = self
            .resolve_service(name)
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;

        if state.is_exclusive() {
            self.mark_exclusive(name, &script, state)
        } else {
            self.make_state_link(state, name, &script)?;
            Ok(())
        }
    }

    fn mark_exclusive(
        &mut self,
        name: &str,
        script: &Path,
        state: ServiceState,
    ) -> Result<(), StateError> {
        if state.is_transitional() {
            self.acquire_transition_lock(name)?;
            // a fresh transition voids the verdict of the previous one
            self.remove_state_link(ServiceState::Failed, name)?;
            let hook = match state {
                ServiceState::Starting => Hook::ServiceStartIn,
                _ => Hook::ServiceStopIn,
            };
            self.plugin_hook(hook, name);
        }

        self.make_state_link(state, name, script)?;

        let mut was_inactive = false;
        for other in EXCLUSIVE {
            if other == state {
                continue;
            }
            let link = self.layout().state_link(other.as_str(), name);
            if symlink_exists(&link) {
                if other == ServiceState::Inactive {
                    was_inactive = true;
                }
                fs::remove_file(&link)?;
            }
        }

        if was_inactive && state != ServiceState::Started {
            self.make_state_link(ServiceState::WasInactive, name, script)?;
        }

        match state {
            ServiceState::Started => {
                self.remove_state_link(ServiceState::WasInactive, name)?;
                self.remove_state_link(ServiceState::Failed, name)?;
                self.clear_scheduled(name)?;
                self.release_transition_lock(name);
            }
            ServiceState::Stopped => {
                self.remove_state_link(ServiceState::WasInactive, name)?;
                self.remove_state_link(ServiceState::Coldplugged, name)?;
                self.clear_scheduled(name)?;
                self.clear_service_daemons(name)?;
                self.release_transition_lock(name);
            }
            ServiceState::Inactive => {
                self.release_transition_lock(name);
            }
            _ => {}
        }
        Ok(())
    }

    /// Is the service in the given state?
    ///
    /// `Crashed` is computed from the daemon records; `Stopped` is also
    /// true for a service with no exclusive state link at all.
    pub fn service_state(&self, name: &str, state: ServiceState) -> bool {
        match state {
            ServiceState::Crashed => self.service_daemons_crashed(name),
            ServiceState::Stopped => {
                if symlink_exists(&self.layout().state_link(state.as_str(), name)) {
                    return true;
                }
                EXCLUSIVE
                    .iter()
                    .all(|s| !symlink_exists(&self.layout().state_link(s.as_str(), name)))
            }
            _ => symlink_exists(&self.layout().state_link(state.as_str(), name)),
        }
    }

    /// Sorted names of every service currently in `state`.
    pub fn services_in_state(&self, state: ServiceState) -> Vec<String> {
        if state == ServiceState::Crashed {
            return self
                .services_in_state(ServiceState::Started)
                .into_iter()
                .filter(|name| self.service_daemons_crashed(name))
                .collect();
        }
        ls_dir(&self.layout().state_dir(state.as_str()))
    }

    /// Block until no process holds the service's transition lock, or
    /// `timeout` passes. Polls with bounded backoff.
    pub fn wait_service(&self, name: &str, timeout: Duration) -> bool {
        let lock = self.layout().lock_file(name);
        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(20);

        loop {
            let file = match OpenOptions::new().read(true).open(&lock) {
                Ok(file) => file,
                // never locked, or already cleaned up
                Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
                Err(_) => return false,
            };
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
            if ret == 0 {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(Duration::from_millis(200));
        }
    }

    fn make_state_link(
        &self,
        state: ServiceState,
        name: &str,
        script: &Path,
    ) -> Result<(), StateError> {
        let dir = self.layout().state_dir(state.as_str());
        fs::create_dir_all(&dir)?;
        let link = dir.join(name);
        if symlink_exists(&link) {
            // re-marking the current state is a no-op
            return Ok(());
        }
        symlink(script, &link)?;
        Ok(())
    }

    fn remove_state_link(&self, state: ServiceState, name: &str) -> Result<(), StateError> {
        let link = self.layout().state_link(state.as_str(), name);
        match fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn acquire_transition_lock(&mut self, name: &str) -> Result<(), StateError> {
        if self.locks.contains_key(name) {
            return Ok(());
        }
        let path = self.layout().lock_file(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().write(true).create(true).open(&path)?;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(StateError::TransitionBusy(name.to_string()));
            }
            return Err(err.into());
        }
        self.locks.insert(name.to_string(), file);
        Ok(())
    }

    fn release_transition_lock(&mut self, name: &str) {
        // dropping the file closes the fd, which releases the flock
        self.locks.remove(name);
    }
}
