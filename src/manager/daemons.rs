//! Daemon record bookkeeping
//!
//! A service that launches long-running children records how to find
//! them again: one numbered file per daemon under `daemons/<service>/`,
//! `KEY=value` lines. Indices are 1-based, allocated lowest-free-first
//! and left holey by deletions so surviving records keep their ordinal.

use std::fs;
use std::io;

use super::{valid_name, Manager, StateError};
use crate::layout::ls_dir;

/// How to find one daemon a service started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonRecord {
    pub exec: Option<String>,
    pub name: Option<String>,
    pub pidfile: Option<String>,
    /// 1-based ordinal, stable across deletions of other records.
    pub index: u32,
}

impl DaemonRecord {
    fn to_contents(&self) -> String {
        let mut out = String::new();
        if let Some(exec) = &self.exec {
            out.push_str("exec=");
            out.push_str(exec);
            out.push('\n');
        }
        if let Some(name) = &self.name {
            out.push_str("name=");
            out.push_str(name);
            out.push('\n');
        }
        if let Some(pidfile) = &self.pidfile {
            out.push_str("pidfile=");
            out.push_str(pidfile);
            out.push('\n');
        }
        out
    }

    fn parse(index: u32, contents: &str) -> Self {
        let mut record = DaemonRecord {
            exec: None,
            name: None,
            pidfile: None,
            index,
        };
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "exec" => record.exec = Some(value.to_string()),
                "name" => record.name = Some(value.to_string()),
                "pidfile" => record.pidfile = Some(value.to_string()),
                _ => {}
            }
        }
        record
    }

    /// Does this record match the supplied fields? Fields the caller
    /// left out match anything.
    fn matches(&self, exec: Option<&str>, name: Option<&str>, pidfile: Option<&str>) -> bool {
        fn field(want: Option<&str>, have: &Option<String>) -> bool {
            match want {
                None => true,
                Some(want) => have.as_deref() == Some(want),
            }
        }
        field(exec, &self.exec) && field(name, &self.name) && field(pidfile, &self.pidfile)
    }
}

impl Manager {
    /// The service's daemon records, ordered by index.
    pub fn service_daemons(&self, service: &str) -> Vec<DaemonRecord> {
        let dir = self.layout().daemons_dir(service);
        let mut records = Vec::new();
        for entry in ls_dir(&dir) {
            let Ok(index) = entry.parse::<u32>() else {
                continue;
            };
            let Ok(contents) = fs::read_to_string(dir.join(&entry)) else {
                continue;
            };
            records.push(DaemonRecord::parse(index, &contents));
        }
        records.sort_by_key(|r| r.index);
        records
    }

    /// Record (`started`) or forget (`!started`) a daemon the service
    /// launched.
    ///
    /// Recording picks the lowest free index. Forgetting removes the
    /// first record whose supplied fields all match; fields passed as
    /// `None` act as wildcards.
    pub fn set_service_daemon(
        &self,
        service: &str,
        exec: Option<&str>,
        name: Option<&str>,
        pidfile: Option<&str>,
        started: bool,
    ) -> Result<(), StateError> {
        if !valid_name(service) {
            return Err(StateError::InvalidName(service.to_string()));
        }
        let records = self.service_daemons(service);

        if started {
            let mut index = 1u32;
            while records.iter().any(|r| r.index == index) {
                index += 1;
            }
            let record = DaemonRecord {
                exec: exec.map(str::to_string),
                name: name.map(str::to_string),
                pidfile: pidfile.map(str::to_string),
                index,
            };
            let dir = self.layout().daemons_dir(service);
            fs::create_dir_all(&dir)?;
            fs::write(
                self.layout().daemon_file(service, index),
                record.to_contents(),
            )?;
            return Ok(());
        }

        if let Some(record) = records.iter().find(|r| r.matches(exec, name, pidfile)) {
            fs::remove_file(self.layout().daemon_file(service, record.index))?;
        }
        Ok(())
    }

    /// Did the service start a daemon running `exec`? With `index`,
    /// only that ordinal is considered.
    pub fn service_started_daemon(&self, service: &str, exec: &str, index: Option<u32>) -> bool {
        self.service_daemons(service).iter().any(|r| {
            r.exec.as_deref() == Some(exec) && index.map_or(true, |want| r.index == want)
        })
    }

    /// Drop every daemon record; part of the stopped-state reset.
    pub(crate) fn clear_service_daemons(&self, service: &str) -> Result<(), io::Error> {
        crate::layout::rm_dir(&self.layout().daemons_dir(service), true)
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::Layout;
    use crate::manager::testutil::unique_root;
    use crate::manager::Manager;

    fn manager() -> Manager {
        Manager::new(Layout::under(unique_root()))
    }

    #[test]
    fn test_indices_allocate_lowest_free() {
        let m = manager();
        m.set_service_daemon("d", Some("/usr/bin/a"), None, None, true)
            .unwrap();
        m.set_service_daemon("d", Some("/usr/bin/b"), None, None, true)
            .unwrap();
        m.set_service_daemon("d", Some("/usr/bin/c"), None, None, true)
            .unwrap();

        // delete the middle record, the hole stays
        m.set_service_daemon("d", Some("/usr/bin/b"), None, None, false)
            .unwrap();
        let indices: Vec<u32> = m.service_daemons("d").iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 3]);

        // the next record fills the hole
        m.set_service_daemon("d", Some("/usr/bin/e"), None, None, true)
            .unwrap();
        let records = m.service_daemons("d");
        assert_eq!(records[1].index, 2);
        assert_eq!(records[1].exec.as_deref(), Some("/usr/bin/e"));
    }

    #[test]
    fn test_delete_matches_all_supplied_fields() {
        let m = manager();
        m.set_service_daemon("d", Some("/bin/x"), Some("one"), None, true)
            .unwrap();
        m.set_service_daemon("d", Some("/bin/x"), Some("two"), None, true)
            .unwrap();

        // wrong name matches nothing
        m.set_service_daemon("d", Some("/bin/x"), Some("three"), None, false)
            .unwrap();
        assert_eq!(m.service_daemons("d").len(), 2);

        // absent fields wildcard: first /bin/x record goes
        m.set_service_daemon("d", Some("/bin/x"), None, None, false)
            .unwrap();
        let left = m.service_daemons("d");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name.as_deref(), Some("two"));
        assert_eq!(left[0].index, 2);
    }

    #[test]
    fn test_started_daemon_by_exec_and_index() {
        let m = manager();
        m.set_service_daemon("d", Some("/bin/x"), None, None, true)
            .unwrap();
        m.set_service_daemon("d", Some("/bin/y"), None, Some("/run/y.pid"), true)
            .unwrap();

        assert!(m.service_started_daemon("d", "/bin/y", None));
        assert!(m.service_started_daemon("d", "/bin/y", Some(2)));
        assert!(!m.service_started_daemon("d", "/bin/y", Some(1)));
        assert!(!m.service_started_daemon("d", "/bin/z", None));
    }

    #[test]
    fn test_pidfile_roundtrips() {
        let m = manager();
        m.set_service_daemon("d", Some("/bin/x"), Some("xd"), Some("/run/x.pid"), true)
            .unwrap();
        let records = m.service_daemons("d");
        assert_eq!(records[0].pidfile.as_deref(), Some("/run/x.pid"));
        assert_eq!(records[0].name.as_deref(), Some("xd"));
    }
}
