//! Dependency cache
//!
//! Interrogating every init script is slow, so the built tree is kept
//! serialized in one file. MessagePack via serde round-trips the graph
//! exactly; the file is replaced with a rename so readers see the old
//! tree or the new one, never a torn write.

use std::fs;
use std::path::Path;

use super::{DepError, DepTree};
use crate::layout::{atomic_write, ls_dir};
use crate::manager::Manager;

impl Manager {
    /// Rebuild the on-disk dependency cache when `force` is set or any
    /// init script or configuration file is newer than it. Returns
    /// whether a rebuild happened.
    pub fn update_deptree(&self, force: bool) -> Result<bool, DepError> {
        if !force && !self.deptree_stale() {
            return Ok(false);
        }

        let tree = self.build_deptree();
        let encoded = rmp_serde::to_vec(&tree)?;
        let path = self.layout().deptree_file();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        atomic_write(&path, &encoded)?;
        log::info!("dependency cache rebuilt ({} services)", tree.len());
        Ok(true)
    }

    /// Load the cached tree. The caller owns the returned value.
    pub fn load_deptree(&self) -> Result<DepTree, DepError> {
        let encoded = fs::read(self.layout().deptree_file())?;
        Ok(rmp_serde::from_slice(&encoded)?)
    }

    fn deptree_stale(&self) -> bool {
        let Ok(cache_mtime) = fs::metadata(self.layout().deptree_file()).and_then(|m| m.modified())
        else {
            return true;
        };

        let newer = |path: &Path| -> bool {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|mtime| mtime > cache_mtime)
                .unwrap_or(false)
        };

        for dir in &self.layout().service_dirs {
            if newer(dir) || ls_dir(dir).iter().any(|name| newer(&dir.join(name))) {
                return true;
            }
        }
        let conf_dir = &self.layout().conf_dir;
        if newer(conf_dir) || ls_dir(conf_dir).iter().any(|name| newer(&conf_dir.join(name))) {
            return true;
        }
        self.layout().extra_conf.iter().any(|path| newer(path))
    }
}

/// Bump a path's mtime past another file's; test helper for staleness.
#[cfg(test)]
fn touch_after(path: &Path) {
    use std::time::SystemTime;
    let future = SystemTime::now() + std::time::Duration::from_secs(5);
    let times = fs::FileTimes::new().set_modified(future);
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_times(times).unwrap();
}
