//! Filesystem layout
//!
//! Canonical locations for init scripts, runlevel directories, service
//! state, options, daemon records, scheduled-start links and the
//! dependency cache. The layout is the persistence format: existing
//! scripts and tools read these paths directly, so they are kept stable.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Reserved runlevel names.
pub const SYSINIT: &str = "sysinit";
pub const BOOT: &str = "boot";
pub const SINGLE: &str = "single";
pub const SHUTDOWN: &str = "shutdown";
pub const REBOOT: &str = "reboot";

/// Where everything lives on disk.
///
/// `service_dirs` is a search path, most specific first, the same way the
/// manager searches unit paths. Everything mutable hangs off `run_root`.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Init script search path, user-local directories first.
    pub service_dirs: Vec<PathBuf>,
    /// Directory containing one subdirectory per runlevel.
    pub runlevel_root: PathBuf,
    /// Root of the mutable state tree (state links, options, daemons,
    /// schedule links, lockfiles, deptree cache).
    pub run_root: PathBuf,
    /// Per-service configuration directory.
    pub conf_dir: PathBuf,
    /// Externally referenced configuration files, newest-mtime checked
    /// by the dependency cache and consulted for hotplug policy.
    pub extra_conf: Vec<PathBuf>,
}

impl Layout {
    /// The standard system locations.
    pub fn system() -> Self {
        Layout {
            service_dirs: vec![
                PathBuf::from("/usr/local/etc/init.d"),
                PathBuf::from("/etc/init.d"),
            ],
            runlevel_root: PathBuf::from("/etc/runlevels"),
            run_root: PathBuf::from("/var/lib/rcd"),
            conf_dir: PathBuf::from("/etc/conf.d"),
            extra_conf: vec![PathBuf::from("/etc/rc.conf")],
        }
    }

    /// Anchor the entire layout under a single root directory.
    ///
    /// Used by tests and by chroot-style drivers.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Layout {
            service_dirs: vec![root.join("init.d")],
            runlevel_root: root.join("runlevels"),
            run_root: root.to_path_buf(),
            conf_dir: root.join("conf.d"),
            extra_conf: vec![root.join("rc.conf")],
        }
    }

    pub fn runlevel_dir(&self, runlevel: &str) -> PathBuf {
        self.runlevel_root.join(runlevel)
    }

    /// `softlevel` stores the name of the active runlevel.
    pub fn softlevel_file(&self) -> PathBuf {
        self.run_root.join("softlevel")
    }

    /// Transient flag file present while a runlevel transition runs.
    pub fn transition_flag(&self, flag: &str) -> PathBuf {
        self.run_root.join(flag)
    }

    pub fn state_dir(&self, state: &str) -> PathBuf {
        self.run_root.join("state").join(state)
    }

    pub fn state_link(&self, state: &str, service: &str) -> PathBuf {
        self.state_dir(state).join(service)
    }

    pub fn lock_file(&self, service: &str) -> PathBuf {
        self.run_root.join("lock").join(service)
    }

    pub fn options_dir(&self, service: &str) -> PathBuf {
        self.run_root.join("options").join(service)
    }

    pub fn option_file(&self, service: &str, option: &str) -> PathBuf {
        self.options_dir(service).join(option)
    }

    pub fn daemons_dir(&self, service: &str) -> PathBuf {
        self.run_root.join("daemons").join(service)
    }

    pub fn daemon_file(&self, service: &str, index: u32) -> PathBuf {
        self.daemons_dir(service).join(index.to_string())
    }

    pub fn scheduled_root(&self) -> PathBuf {
        self.run_root.join("scheduled")
    }

    pub fn scheduled_dir(&self, trigger: &str) -> PathBuf {
        self.scheduled_root().join(trigger)
    }

    pub fn scheduled_link(&self, trigger: &str, target: &str) -> PathBuf {
        self.scheduled_dir(trigger).join(target)
    }

    pub fn deptree_file(&self) -> PathBuf {
        self.run_root.join("deptree")
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::system()
    }
}

/// Sorted names of the entries in a directory, hidden files skipped.
/// A missing directory lists as empty.
pub(crate) fn ls_dir(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return names;
    };
    for entry in entries.flatten() {
        if let Ok(name) = entry.file_name().into_string() {
            if !name.starts_with('.') {
                names.push(name);
            }
        }
    }
    names.sort();
    names
}

/// Remove every entry of a directory, and the directory itself when `top`.
pub(crate) fn rm_dir(dir: &Path, top: bool) -> io::Result<()> {
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && !path.is_symlink() {
                    rm_dir(&path, true)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }
    if top {
        fs::remove_dir(dir)?;
    }
    Ok(())
}

pub(crate) fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Write a file atomically: temp file in the same directory, then rename.
/// Readers see either the old contents or the new, never a torn write.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

pub(crate) fn symlink_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
