//! Configuration file readers
//!
//! Plain-text helpers shared by the dependency cache stale check and the
//! hotplug policy. Files are line oriented; `#` starts a comment.

use std::fs;
use std::path::Path;

/// Non-comment, non-blank lines of a file, trimmed. Missing files read
/// as empty.
pub fn get_list(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// `key=value` entries of a file, in file order, quotes stripped from
/// values.
pub fn get_config(path: &Path) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in get_list(path) {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            entries.push((key.trim().to_string(), value.to_string()));
        }
    }
    entries
}

/// First value recorded for `key`.
pub fn get_config_entry<'a>(entries: &'a [(String, String)], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_tmp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("rcd-config-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_get_list_skips_comments() {
        let path = write_tmp(
            "list",
            "# header\n\nnet.eth0\n  local  \n# trailing comment\n",
        );
        assert_eq!(get_list(&path), vec!["net.eth0", "local"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_get_config_strips_quotes() {
        let path = write_tmp(
            "conf",
            "rc_plug_services=\"!net.eth1 *\"\nrc_parallel='no'\n# x=y\n",
        );
        let entries = get_config(&path);
        assert_eq!(
            get_config_entry(&entries, "rc_plug_services"),
            Some("!net.eth1 *")
        );
        assert_eq!(get_config_entry(&entries, "rc_parallel"), Some("no"));
        assert_eq!(get_config_entry(&entries, "missing"), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let path = std::env::temp_dir().join("rcd-config-does-not-exist");
        assert!(get_list(&path).is_empty());
        assert!(get_config(&path).is_empty());
    }
}
