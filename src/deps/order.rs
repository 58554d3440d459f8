//! Dependency queries and runlevel ordering
//!
//! Two consumers: `get_depends` answers "what does this set of services
//! pull in" for a given relation set, and `order_services` produces the
//! full stop-then-start sequence for a runlevel change.
//!
//! Ordering is Kahn's algorithm with a lexicographic ready set, so the
//! same tree and inputs always produce the same sequence. When the
//! queue runs dry before every node is placed there is a cycle: the
//! weakest edge inside the stuck set (`iafter`, then `iuse`) is dropped
//! and reported; a cycle held together by `ineed` alone is fatal.

use std::collections::BTreeSet;

use super::{DepError, DepKind, DepTree};
use crate::layout::{BOOT, SYSINIT};
use crate::manager::{Manager, ServiceState};

/// Option flags for dependency expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepFlags {
    /// Expand transitively instead of direct neighbors only.
    pub trace: bool,
    /// Only report services that are members of the runlevel (plus
    /// sysinit/boot when starting).
    pub strict: bool,
    /// The closure is computed for a start.
    pub start: bool,
    /// The closure is computed for a stop; reverse relations join in.
    pub stop: bool,
}

impl DepFlags {
    pub fn starting() -> Self {
        DepFlags {
            trace: true,
            start: true,
            ..Default::default()
        }
    }

    pub fn stopping() -> Self {
        DepFlags {
            trace: true,
            stop: true,
            ..Default::default()
        }
    }
}

/// An ordering edge dropped to break a weak dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenEdge {
    pub from: String,
    pub to: String,
    pub kind: DepKind,
}

/// The full sequence for a runlevel change: everything to stop, in
/// stop order, then everything to start, in start order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceOrdering {
    pub stop: Vec<String>,
    pub start: Vec<String>,
    /// Weak edges dropped while ordering; empty on a clean graph.
    pub broken: Vec<BrokenEdge>,
}

impl ServiceOrdering {
    /// The deduplicated action sequence, stops first.
    pub fn sequence(&self) -> Vec<String> {
        self.stop.iter().chain(self.start.iter()).cloned().collect()
    }
}

/// Relations that order activation, strongest first. `ineed` can never
/// be broken, `iuse` orders when both sides are present, `iafter` is
/// ordering advice only.
const ORDER_KINDS: [DepKind; 3] = [DepKind::Ineed, DepKind::Iuse, DepKind::Iafter];

impl Manager {
    /// The closure of `seeds` under `kinds`, in visitation order with
    /// lexicographic tie-breaks. Seeds themselves are not reported.
    pub fn get_depends(
        &self,
        tree: &DepTree,
        kinds: &[DepKind],
        seeds: &[&str],
        runlevel: &str,
        flags: DepFlags,
    ) -> Vec<String> {
        let mut kinds: Vec<DepKind> = kinds.to_vec();
        if flags.stop {
            for kind in kinds.clone() {
                if let Some(dual) = kind.reverse() {
                    if !kinds.contains(&dual) {
                        kinds.push(dual);
                    }
                }
            }
        }

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut order = Vec::new();
        for seed in seeds {
            seen.insert(tree.resolve_alias(seed).to_string());
        }
        for seed in seeds {
            self.expand(
                tree,
                &kinds,
                tree.resolve_alias(seed),
                runlevel,
                flags,
                &mut seen,
                &mut order,
            );
        }
        order
    }

    fn expand(
        &self,
        tree: &DepTree,
        kinds: &[DepKind],
        service: &str,
        runlevel: &str,
        flags: DepFlags,
        seen: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) {
        let Some(info) = tree.get_depinfo(service) else {
            return;
        };
        for kind in kinds {
            for dep in info.depend(*kind) {
                let dep = tree.resolve_alias(dep);

                // iuse is best-effort on a start: skip services that
                // are not present or have no place in the start set
                if flags.start
                    && *kind == DepKind::Iuse
                    && (!self.service_exists(dep) || !self.in_scope(dep, runlevel, flags))
                {
                    continue;
                }
                if flags.strict && !self.in_scope(dep, runlevel, flags) {
                    continue;
                }

                if seen.insert(dep.to_string()) {
                    order.push(dep.to_string());
                    if flags.trace {
                        self.expand(tree, kinds, dep, runlevel, flags, seen, order);
                    }
                }
            }
        }
    }

    /// Strict-mode membership: the runlevel itself, widened to sysinit
    /// and boot while starting.
    fn in_scope(&self, service: &str, runlevel: &str, flags: DepFlags) -> bool {
        if self.service_in_runlevel(service, runlevel) {
            return true;
        }
        flags.start
            && (self.service_in_runlevel(service, SYSINIT)
                || self.service_in_runlevel(service, BOOT))
    }

    /// Everything to do, in order, to move the system to `runlevel`.
    ///
    /// Stops come first: currently-started services with no place in
    /// the target runlevel, in reverse dependency order. Then the
    /// target's services in forward order.
    pub fn order_services(
        &self,
        tree: &DepTree,
        runlevel: &str,
        flags: DepFlags,
    ) -> Result<ServiceOrdering, DepError> {
        let mut to_start: BTreeSet<String> = BTreeSet::new();
        for level in [SYSINIT, BOOT, runlevel] {
            to_start.extend(self.services_in_runlevel(level));
        }
        to_start.extend(self.services_in_state(ServiceState::Coldplugged));

        let mut to_stop: BTreeSet<String> = self
            .services_in_state(ServiceState::Started)
            .into_iter()
            .collect();
        if flags.stop {
            to_stop.extend(self.services_in_state(ServiceState::Inactive));
        }
        for name in &to_start {
            to_stop.remove(name);
        }

        let mut broken = Vec::new();
        let mut stop = topo_sort(tree, &to_stop, &mut broken)?;
        stop.reverse();
        let start = topo_sort(tree, &to_start, &mut broken)?;

        Ok(ServiceOrdering {
            stop,
            start,
            broken,
        })
    }
}

struct Edge {
    /// Must be placed before `to`.
    from: String,
    to: String,
    kind: DepKind,
    alive: bool,
}

/// Forward topological order of `set`: every service after its `ineed`,
/// `iuse` and `iafter` dependencies inside the set.
fn topo_sort(
    tree: &DepTree,
    set: &BTreeSet<String>,
    broken: &mut Vec<BrokenEdge>,
) -> Result<Vec<String>, DepError> {
    let mut edges: Vec<Edge> = Vec::new();
    for service in set {
        let Some(info) = tree.get_depinfo(service) else {
            continue;
        };
        for kind in ORDER_KINDS {
            for dep in info.depend(kind) {
                let dep = tree.resolve_alias(dep);
                if dep == service || !set.contains(dep) {
                    continue;
                }
                // one edge per pair; the strongest relation wins
                if let Some(existing) = edges
                    .iter_mut()
                    .find(|e| e.from == dep && e.to == *service)
                {
                    if kind < existing.kind {
                        existing.kind = kind;
                    }
                    continue;
                }
                edges.push(Edge {
                    from: dep.to_string(),
                    to: service.clone(),
                    kind,
                    alive: true,
                });
            }
        }
    }

    let mut indegree: std::collections::BTreeMap<String, usize> =
        set.iter().map(|s| (s.clone(), 0)).collect();
    for edge in &edges {
        *indegree.get_mut(&edge.to).unwrap() += 1;
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| name.clone())
        .collect();
    let mut placed: BTreeSet<String> = BTreeSet::new();
    let mut result: Vec<String> = Vec::new();

    while result.len() < set.len() {
        if let Some(name) = ready.pop_first() {
            let unblocked: Vec<String> = edges
                .iter()
                .filter(|e| e.alive && e.from == name)
                .map(|e| e.to.clone())
                .collect();
            placed.insert(name.clone());
            result.push(name);
            for to in unblocked {
                let deg = indegree.get_mut(&to).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(to);
                }
            }
            continue;
        }

        // stuck: a cycle among the unplaced nodes. Drop the weakest
        // edge inside the stuck set, deterministically.
        let stuck: BTreeSet<&String> = set.iter().filter(|s| !placed.contains(*s)).collect();

        let victim = edges
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.alive
                    && e.kind != DepKind::Ineed
                    && stuck.contains(&e.from)
                    && stuck.contains(&e.to)
            })
            .min_by_key(|(_, e)| {
                let weakness = match e.kind {
                    DepKind::Iafter => 0,
                    _ => 1,
                };
                (weakness, e.from.clone(), e.to.clone())
            })
            .map(|(i, _)| i);

        let Some(victim) = victim else {
            let cycle: Vec<String> = stuck.into_iter().cloned().collect();
            return Err(DepError::Cycle(cycle));
        };

        edges[victim].alive = false;
        let (from, to, kind) = {
            let edge = &edges[victim];
            (edge.from.clone(), edge.to.clone(), edge.kind)
        };
        log::warn!("breaking dependency cycle: dropping {} {} {}", to, kind, from);
        broken.push(BrokenEdge {
            from: from.clone(),
            to: to.clone(),
            kind,
        });
        let deg = indegree.get_mut(&to).unwrap();
        *deg -= 1;
        if *deg == 0 {
            ready.insert(to);
        }
    }

    Ok(result)
}
