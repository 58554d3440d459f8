//! Scheduled-start relations
//!
//! `scheduled/<trigger>/<target>` links record that `target` should be
//! started once `trigger` reaches `started`. The driver walks
//! [`Manager::services_scheduled_by`] at that point; the core only
//! maintains the links and the `scheduled` marker on the targets.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;

use super::{valid_name, Manager, ServiceState, StateError};
use crate::layout::{ls_dir, rm_dir, symlink_exists};

impl Manager {
    /// Arrange for `target` to be started when `trigger` starts.
    pub fn schedule_start_service(&mut self, trigger: &str, target: &str) -> Result<(), StateError> {
        if !valid_name(trigger) {
            return Err(StateError::InvalidName(trigger.to_string()));
        }
        let script = self
            .resolve_service(target)
            .ok_or_else(|| StateError::NotFound(target.to_string()))?;

        let dir = self.layout().scheduled_dir(trigger);
        fs::create_dir_all(&dir)?;
        let link = dir.join(target);
        if !symlink_exists(&link) {
            symlink(&script, &link)?;
        }
        self.mark_service(target, ServiceState::Scheduled)
    }

    /// Sorted list of services scheduled to start when `trigger` does.
    pub fn services_scheduled_by(&self, trigger: &str) -> Vec<String> {
        ls_dir(&self.layout().scheduled_dir(trigger))
    }

    /// Forget everything scheduled on `trigger`.
    pub fn schedule_clear(&mut self, trigger: &str) -> Result<(), StateError> {
        let targets = self.services_scheduled_by(trigger);
        rm_dir(&self.layout().scheduled_dir(trigger), true)?;

        // drop the scheduled marker from targets nobody else schedules
        for target in targets {
            if !self.service_scheduled_anywhere(&target) {
                let link = self
                    .layout()
                    .state_link(ServiceState::Scheduled.as_str(), &target);
                let _ = fs::remove_file(&link);
            }
        }
        Ok(())
    }

    /// Remove the scheduled marker from a service and erase it from
    /// every trigger's set. Runs when the service reaches `started` or
    /// `stopped`.
    pub(crate) fn clear_scheduled(&self, target: &str) -> Result<(), io::Error> {
        let root = self.layout().scheduled_root();
        for trigger in ls_dir(&root) {
            let link = root.join(&trigger).join(target);
            match fs::remove_file(&link) {
                Ok(()) => {
                    // drop now-empty trigger directories
                    let _ = fs::remove_dir(root.join(&trigger));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        let link = self
            .layout()
            .state_link(ServiceState::Scheduled.as_str(), target);
        match fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn service_scheduled_anywhere(&self, target: &str) -> bool {
        let root = self.layout().scheduled_root();
        ls_dir(&root)
            .iter()
            .any(|trigger| symlink_exists(&root.join(trigger).join(target)))
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::Layout;
    use crate::manager::testutil::{unique_root, write_script};
    use crate::manager::{Manager, ServiceState};

    fn manager_with_scripts(names: &[&str]) -> Manager {
        let root = unique_root();
        for name in names {
            write_script(&root, name, "#!/bin/sh\nexit 0\n");
        }
        Manager::new(Layout::under(&root))
    }

    #[test]
    fn test_schedule_marks_target() {
        let mut m = manager_with_scripts(&["net", "sshd"]);
        m.schedule_start_service("net", "sshd").unwrap();
        assert_eq!(m.services_scheduled_by("net"), vec!["sshd"]);
        assert!(m.service_state("sshd", ServiceState::Scheduled));
    }

    #[test]
    fn test_schedule_clear_unmarks() {
        let mut m = manager_with_scripts(&["net", "sshd", "ntpd"]);
        m.schedule_start_service("net", "sshd").unwrap();
        m.schedule_start_service("net", "ntpd").unwrap();
        m.schedule_clear("net").unwrap();
        assert!(m.services_scheduled_by("net").is_empty());
        assert!(!m.service_state("sshd", ServiceState::Scheduled));
        assert!(!m.service_state("ntpd", ServiceState::Scheduled));
    }

    #[test]
    fn test_target_started_leaves_other_triggers_alone() {
        let mut m = manager_with_scripts(&["net", "mta", "sshd"]);
        m.schedule_start_service("net", "sshd").unwrap();
        m.schedule_start_service("mta", "sshd").unwrap();

        // starting the target erases it from every scheduler
        m.mark_service("sshd", ServiceState::Started).unwrap();
        assert!(m.services_scheduled_by("net").is_empty());
        assert!(m.services_scheduled_by("mta").is_empty());
        assert!(!m.service_state("sshd", ServiceState::Scheduled));
    }

    #[test]
    fn test_clear_keeps_marker_when_still_scheduled_elsewhere() {
        let mut m = manager_with_scripts(&["net", "mta", "sshd"]);
        m.schedule_start_service("net", "sshd").unwrap();
        m.schedule_start_service("mta", "sshd").unwrap();

        m.schedule_clear("net").unwrap();
        assert!(m.services_scheduled_by("net").is_empty());
        assert_eq!(m.services_scheduled_by("mta"), vec!["sshd"]);
        assert!(m.service_state("sshd", ServiceState::Scheduled));
    }

    #[test]
    fn test_schedule_unknown_target() {
        let mut m = manager_with_scripts(&["net"]);
        assert!(m.schedule_start_service("net", "ghost").is_err());
    }
}
