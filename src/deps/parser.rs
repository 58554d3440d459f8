//! Dependency extraction
//!
//! Every init script can report its own dependencies: run with the
//! `depend` verb it prints one `<relation> <service...>` line per
//! bucket. Scripts that fail to run or print garbage are skipped with
//! a warning rather than failing the whole build.

use std::process::{Command, Stdio};

use super::{DepKind, DepTree};
use crate::manager::Manager;

impl Manager {
    /// Build a fresh dependency tree by interrogating every resolvable
    /// init script.
    pub fn build_deptree(&self) -> DepTree {
        let mut tree = DepTree::default();

        for name in self.services() {
            // make sure every service has a node even with no deps
            tree.entry(&name);
            for (kind, services) in self.script_depend_lines(&name) {
                let info = tree.entry(&name);
                for service in services {
                    info.add(kind, &service);
                }
            }
        }

        resolve_provides(&mut tree, self);
        materialize_reverse(&mut tree);

        for (_, info) in tree.iter_mut() {
            info.normalize();
        }
        tree
    }

    /// `(relation, services)` pairs reported by one script. Unknown
    /// relations are ignored; lines with no service names are dropped.
    fn script_depend_lines(&self, name: &str) -> Vec<(DepKind, Vec<String>)> {
        let Some(script) = self.resolve_service(name) else {
            return Vec::new();
        };
        let output = Command::new(&script)
            .arg("depend")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                log::warn!("could not run {} depend: {}", script.display(), e);
                return Vec::new();
            }
        };
        if !output.status.success() {
            log::warn!("{} depend exited {}", script.display(), output.status);
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut buckets = Vec::new();
        for line in stdout.lines() {
            let mut words = line.split_whitespace();
            let Some(relation) = words.next() else {
                continue;
            };
            let services: Vec<String> = words.map(str::to_string).collect();
            match relation.parse::<DepKind>() {
                Ok(kind) if kind.is_forward() => {
                    if services.is_empty() {
                        log::warn!("{}: empty {} line skipped", name, relation);
                        continue;
                    }
                    buckets.push((kind, services));
                }
                // computed duals and unknown words alike are not ours
                _ => log::debug!("{}: ignoring relation {}", name, relation),
            }
        }
        buckets
    }
}

/// Rewrite provided aliases to their canonical provider.
///
/// When several services provide the same alias the member of the
/// active runlevel wins; with none (or several) in it, the
/// lexicographically first provider does.
fn resolve_provides(tree: &mut DepTree, manager: &Manager) {
    let runlevel = manager.runlevel();

    let mut providers: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    let names: Vec<String> = tree.services().cloned().collect();
    for name in &names {
        let Some(info) = tree.get_depinfo(name) else {
            continue;
        };
        for alias in info.depend(DepKind::Iprovide) {
            providers.entry(alias.clone()).or_default().push(name.clone());
        }
    }

    let mut aliases: Vec<(String, String)> = Vec::new();
    for (alias, mut candidates) in providers {
        candidates.sort();
        let winner = candidates
            .iter()
            .find(|c| manager.service_in_runlevel(c, &runlevel))
            .unwrap_or(&candidates[0])
            .clone();
        if winner != alias {
            tree.set_alias(&alias, &winner);
            aliases.push((alias, winner));
        }
    }
    if aliases.is_empty() {
        return;
    }

    // rewrite alias occurrences inside every dependency bucket
    for name in &names {
        if let Some(info) = tree.get_mut(name) {
            for (kind, bucket) in info.buckets_mut() {
                if *kind == DepKind::Iprovide {
                    continue;
                }
                for entry in bucket.iter_mut() {
                    if let Some((_, provider)) = aliases.iter().find(|(a, _)| a == entry) {
                        *entry = provider.clone();
                    }
                }
            }
        }
    }
}

/// Walk the forward edges once and fill in the `*me` duals.
/// Edges toward services missing from the tree get no dual, the same
/// way unknown targets get no edge at all.
fn materialize_reverse(tree: &mut DepTree) {
    let names: Vec<String> = tree.services().cloned().collect();
    let mut reversed: Vec<(String, DepKind, String)> = Vec::new();

    for name in &names {
        let Some(info) = tree.get_depinfo(name) else {
            continue;
        };
        for kind in [
            DepKind::Ineed,
            DepKind::Iuse,
            DepKind::Iwant,
            DepKind::Ibefore,
            DepKind::Iafter,
        ] {
            let dual = kind.reverse().unwrap();
            for target in info.depend(kind) {
                let target = tree.resolve_alias(target).to_string();
                if names.iter().any(|n| *n == target) {
                    reversed.push((target, dual, name.clone()));
                }
            }
        }
    }

    for (target, dual, source) in reversed {
        tree.entry(&target).add(dual, &source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::manager::testutil::{unique_root, write_script};

    fn depend_script(lines: &[&str]) -> String {
        let mut body = String::from("#!/bin/sh\nif [ \"$1\" = depend ]; then\n");
        for line in lines {
            body.push_str(&format!("  echo \"{}\"\n", line));
        }
        body.push_str("fi\nexit 0\n");
        body
    }

    #[test]
    fn test_parse_and_reverse() {
        let root = unique_root();
        write_script(&root, "net", &depend_script(&[]));
        write_script(&root, "sshd", &depend_script(&["ineed net", "iafter logger"]));
        write_script(&root, "logger", &depend_script(&["ibefore sshd"]));
        let manager = Manager::new(Layout::under(&root));

        let tree = manager.build_deptree();
        let sshd = tree.get_depinfo("sshd").unwrap();
        assert_eq!(sshd.depend(DepKind::Ineed), ["net"]);
        assert_eq!(sshd.depend(DepKind::Iafter), ["logger"]);
        assert_eq!(sshd.depend(DepKind::Beforeme), ["logger"]);

        let net = tree.get_depinfo("net").unwrap();
        assert_eq!(net.depend(DepKind::Needsme), ["sshd"]);

        let logger = tree.get_depinfo("logger").unwrap();
        assert_eq!(logger.depend(DepKind::Afterme), ["sshd"]);
    }

    #[test]
    fn test_unknown_relations_ignored() {
        let root = unique_root();
        write_script(
            &root,
            "odd",
            &depend_script(&["keyword -docker", "ineed net", "ineed"]),
        );
        write_script(&root, "net", &depend_script(&[]));
        let manager = Manager::new(Layout::under(&root));

        let tree = manager.build_deptree();
        let odd = tree.get_depinfo("odd").unwrap();
        assert_eq!(odd.depend(DepKind::Ineed), ["net"]);
    }

    #[test]
    fn test_failing_script_skipped() {
        let root = unique_root();
        write_script(&root, "broken", "#!/bin/sh\nexit 1\n");
        write_script(&root, "net", &depend_script(&["iprovide lan"]));
        let manager = Manager::new(Layout::under(&root));

        let tree = manager.build_deptree();
        assert!(tree.contains("broken"));
        assert!(tree
            .get_depinfo("broken")
            .unwrap()
            .depend(DepKind::Ineed)
            .is_empty());
    }

    #[test]
    fn test_provide_rewrites_consumers() {
        let root = unique_root();
        write_script(&root, "net.eth0", &depend_script(&["iprovide net"]));
        write_script(&root, "sshd", &depend_script(&["ineed net"]));
        let manager = Manager::new(Layout::under(&root));

        let tree = manager.build_deptree();
        assert_eq!(tree.resolve_alias("net"), "net.eth0");
        let sshd = tree.get_depinfo("sshd").unwrap();
        assert_eq!(sshd.depend(DepKind::Ineed), ["net.eth0"]);
        assert_eq!(
            tree.get_depinfo("net.eth0").unwrap().depend(DepKind::Needsme),
            ["sshd"]
        );
    }

    #[test]
    fn test_provide_prefers_active_runlevel() {
        let root = unique_root();
        write_script(&root, "net.a", &depend_script(&["iprovide net"]));
        write_script(&root, "net.b", &depend_script(&["iprovide net"]));
        write_script(&root, "sshd", &depend_script(&["ineed net"]));
        let mut manager = Manager::new(Layout::under(&root));
        manager.set_runlevel("default").unwrap();
        manager.add_service_to_runlevel("default", "net.b").unwrap();

        let tree = manager.build_deptree();
        assert_eq!(tree.resolve_alias("net"), "net.b");
        assert_eq!(
            tree.get_depinfo("sshd").unwrap().depend(DepKind::Ineed),
            ["net.b"]
        );
    }

    #[test]
    fn test_provide_tiebreak_lexicographic() {
        let root = unique_root();
        write_script(&root, "net.b", &depend_script(&["iprovide net"]));
        write_script(&root, "net.a", &depend_script(&["iprovide net"]));
        let manager = Manager::new(Layout::under(&root));

        let tree = manager.build_deptree();
        assert_eq!(tree.resolve_alias("net"), "net.a");
    }
}
