//! Process table queries
//!
//! `/proc` scanning for daemon liveness: find processes by executable,
//! process name, uid or pid, and decide whether a started service has
//! lost its daemons.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::{Pid, Uid};

use super::Manager;
use crate::config;

/// Find processes matching all of the given criteria.
///
/// A given `pid` overrides every other filter. When both `exec` and
/// `cmd` are given, `exec` is ignored. `uid` filters on the real uid,
/// `exec` on argv[0], `cmd` on the process name.
pub fn find_pids(
    exec: Option<&str>,
    cmd: Option<&str>,
    uid: Option<Uid>,
    pid: Option<Pid>,
) -> Vec<Pid> {
    if let Some(pid) = pid {
        if Path::new(&format!("/proc/{}", pid)).exists() {
            return vec![pid];
        }
        return Vec::new();
    }

    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return found;
    };
    for entry in entries.flatten() {
        let Some(candidate) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };

        if let Some(uid) = uid {
            if process_uid(candidate) != Some(uid) {
                continue;
            }
        }
        if let Some(cmd) = cmd {
            if process_comm(candidate).as_deref() != Some(cmd) {
                continue;
            }
        } else if let Some(exec) = exec {
            if process_argv0(candidate).as_deref() != Some(exec) {
                continue;
            }
        }
        found.push(Pid::from_raw(candidate));
    }
    found.sort_by_key(|pid| pid.as_raw());
    found
}

/// Real uid, from the `Uid:` line of `/proc/<pid>/status`.
fn process_uid(pid: i32) -> Option<Uid> {
    let status = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let line = status.lines().find(|l| l.starts_with("Uid:"))?;
    let real = line.split_whitespace().nth(1)?;
    Some(Uid::from_raw(real.parse().ok()?))
}

fn process_comm(pid: i32) -> Option<String> {
    fs::read_to_string(format!("/proc/{}/comm", pid))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// argv[0] from the NUL-separated cmdline, falling back to the exe
/// symlink for processes that scrub their arguments.
fn process_argv0(pid: i32) -> Option<String> {
    if let Ok(cmdline) = fs::read(format!("/proc/{}/cmdline", pid)) {
        if let Some(first) = cmdline.split(|b| *b == 0).next() {
            if !first.is_empty() {
                return String::from_utf8(first.to_vec()).ok();
            }
        }
    }
    fs::read_link(format!("/proc/{}/exe", pid))
        .ok()
        .map(|p| p.display().to_string())
}

impl Manager {
    /// True when any daemon record of a started service has no live
    /// process behind it.
    ///
    /// Matching runs under the uid that recorded the daemons (the owner
    /// of the service's daemon directory). A record with a pidfile only
    /// accepts the pid stored there.
    pub fn service_daemons_crashed(&self, service: &str) -> bool {
        let records = self.service_daemons(service);
        if records.is_empty() {
            return false;
        }
        let uid = fs::metadata(self.layout().daemons_dir(service))
            .map(|m| Uid::from_raw(m.uid()))
            .ok();

        for record in records {
            let mut pids = find_pids(record.exec.as_deref(), record.name.as_deref(), uid, None);

            if let Some(pidfile) = &record.pidfile {
                match read_pidfile(Path::new(pidfile)) {
                    Some(pid) => pids.retain(|p| *p == pid),
                    // pidfile gone or unreadable: the daemon is too
                    None => pids.clear(),
                }
            }

            if pids.is_empty() {
                log::debug!("daemon {:?} of {} has no live process", record, service);
                return true;
            }
        }
        false
    }

    /// May this service be hot/cold plugged outside a runlevel?
    ///
    /// Consults the `rc_plug_services` pattern list of the first extra
    /// config file defining it: `!pat` denies, patterns may use `*` and
    /// `?`, first match wins, unmatched services are allowed.
    pub fn allow_service_plug(&self, service: &str) -> bool {
        for conf in &self.layout().extra_conf {
            let entries = config::get_config(conf);
            let Some(value) = config::get_config_entry(&entries, "rc_plug_services") else {
                continue;
            };
            for pattern in value.split_whitespace() {
                let (deny, pattern) = match pattern.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, pattern),
                };
                if wildcard_match(pattern, service) {
                    return !deny;
                }
            }
            break;
        }
        true
    }
}

fn read_pidfile(path: &Path) -> Option<Pid> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .split_whitespace()
        .next()?
        .parse::<i32>()
        .ok()
        .map(Pid::from_raw)
}

/// Shell-style wildcard match: `*` any run, `?` any single char.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();

    fn at(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => at(&p[1..], n) || (!n.is_empty() && at(p, &n[1..])),
            (Some('?'), Some(_)) => at(&p[1..], &n[1..]),
            (Some(c), Some(d)) if c == d => at(&p[1..], &n[1..]),
            _ => false,
        }
    }
    at(&p, &n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::manager::testutil::unique_root;
    use std::process::{Command, Stdio};

    #[test]
    fn test_find_pids_by_pid() {
        let me = Pid::from_raw(std::process::id() as i32);
        assert_eq!(find_pids(None, None, None, Some(me)), vec![me]);
        assert!(find_pids(None, None, None, Some(Pid::from_raw(-2))).is_empty());
    }

    #[test]
    fn test_find_pids_by_uid_includes_self() {
        let me = Pid::from_raw(std::process::id() as i32);
        let pids = find_pids(None, None, Some(Uid::current()), None);
        assert!(pids.contains(&me));
    }

    #[test]
    fn test_find_pids_by_cmd() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        let by_cmd = find_pids(None, Some("sleep"), None, None);
        assert!(by_cmd.contains(&pid));

        // cmd shadows exec: a bogus exec must not filter anything out
        let shadowed = find_pids(Some("/nonexistent"), Some("sleep"), None, None);
        assert!(shadowed.contains(&pid));

        let by_exec = find_pids(Some("/bin/sleep"), None, None, None);
        assert!(by_exec.contains(&pid));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_daemons_crashed() {
        let root = unique_root();
        let manager = crate::manager::Manager::new(Layout::under(&root));

        // no records, nothing to crash
        assert!(!manager.service_daemons_crashed("d"));

        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        manager
            .set_service_daemon("d", Some("/bin/sleep"), None, None, true)
            .unwrap();
        assert!(!manager.service_daemons_crashed("d"));

        manager
            .set_service_daemon("d", Some("/no/such/daemon"), None, None, true)
            .unwrap();
        assert!(manager.service_daemons_crashed("d"));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_pidfile_restricts_match() {
        let root = unique_root();
        let manager = crate::manager::Manager::new(Layout::under(&root));

        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pidfile = root.join("d.pid");

        manager
            .set_service_daemon(
                "d",
                Some("/bin/sleep"),
                None,
                Some(&pidfile.display().to_string()),
                true,
            )
            .unwrap();

        // pidfile not written yet: treated as crashed
        assert!(manager.service_daemons_crashed("d"));

        std::fs::write(&pidfile, format!("{}\n", child.id())).unwrap();
        assert!(!manager.service_daemons_crashed("d"));

        // stale pid in the file
        std::fs::write(&pidfile, "1\n").unwrap();
        assert!(manager.service_daemons_crashed("d"));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("net.*", "net.eth0"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("net.eth?", "net.eth1"));
        assert!(!wildcard_match("net.*", "local"));
        assert!(!wildcard_match("net.eth?", "net.eth10"));
    }

    #[test]
    fn test_allow_service_plug() {
        let root = unique_root();
        std::fs::write(
            root.join("rc.conf"),
            "rc_plug_services=\"!net.eth1 net.* !*\"\n",
        )
        .unwrap();
        let manager = crate::manager::Manager::new(Layout::under(&root));

        assert!(!manager.allow_service_plug("net.eth1"));
        assert!(manager.allow_service_plug("net.eth0"));
        assert!(!manager.allow_service_plug("sshd"));
    }

    #[test]
    fn test_allow_service_plug_default() {
        let root = unique_root();
        let manager = crate::manager::Manager::new(Layout::under(&root));
        assert!(manager.allow_service_plug("anything"));
    }
}
