//! Dependency graph
//!
//! The deptree maps each service name to its dependency buckets. All
//! cross-references are by name, never by pointer: `iprovide` rewrites
//! and serialization stay trivial that way. Reverse relations are
//! materialized once at build time so stop-side walks need no extra
//! pass.

mod cache;
mod order;
mod parser;

pub use order::{BrokenEdge, DepFlags, ServiceOrdering};

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of dependency relations.
///
/// Forward kinds come out of the scripts; the `*me` duals are computed
/// while the tree is built.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    Ineed,
    Iuse,
    Iwant,
    Iafter,
    Ibefore,
    Iprovide,
    Needsme,
    Usesme,
    Wantsme,
    Beforeme,
    Afterme,
}

impl DepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ineed => "ineed",
            Self::Iuse => "iuse",
            Self::Iwant => "iwant",
            Self::Iafter => "iafter",
            Self::Ibefore => "ibefore",
            Self::Iprovide => "iprovide",
            Self::Needsme => "needsme",
            Self::Usesme => "usesme",
            Self::Wantsme => "wantsme",
            Self::Beforeme => "beforeme",
            Self::Afterme => "afterme",
        }
    }

    /// Relations a script may declare about itself.
    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Ineed | Self::Iuse | Self::Iwant | Self::Iafter | Self::Ibefore | Self::Iprovide
        )
    }

    /// The dual walked from the other end, for the kinds that have one.
    pub fn reverse(&self) -> Option<DepKind> {
        match self {
            Self::Ineed => Some(Self::Needsme),
            Self::Iuse => Some(Self::Usesme),
            Self::Iwant => Some(Self::Wantsme),
            Self::Ibefore => Some(Self::Beforeme),
            Self::Iafter => Some(Self::Afterme),
            _ => None,
        }
    }
}

impl std::fmt::Display for DepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ineed" => Ok(Self::Ineed),
            "iuse" => Ok(Self::Iuse),
            "iwant" => Ok(Self::Iwant),
            "iafter" => Ok(Self::Iafter),
            "ibefore" => Ok(Self::Ibefore),
            "iprovide" => Ok(Self::Iprovide),
            "needsme" => Ok(Self::Needsme),
            "usesme" => Ok(Self::Usesme),
            "wantsme" => Ok(Self::Wantsme),
            "beforeme" => Ok(Self::Beforeme),
            "afterme" => Ok(Self::Afterme),
            _ => Err(()),
        }
    }
}

/// One service's dependency buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepInfo {
    depends: BTreeMap<DepKind, Vec<String>>,
}

impl DepInfo {
    /// The services listed under one relation; empty when the bucket
    /// was never filled.
    pub fn depend(&self, kind: DepKind) -> &[String] {
        self.depends.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn add(&mut self, kind: DepKind, service: &str) {
        let bucket = self.depends.entry(kind).or_default();
        if !bucket.iter().any(|s| s == service) {
            bucket.push(service.to_string());
        }
    }

    pub(crate) fn buckets_mut(&mut self) -> impl Iterator<Item = (&DepKind, &mut Vec<String>)> {
        self.depends.iter_mut()
    }

    /// Keep every bucket sorted so walks are deterministic.
    pub(crate) fn normalize(&mut self) {
        for bucket in self.depends.values_mut() {
            bucket.sort();
            bucket.dedup();
        }
    }
}

/// The parsed and rewritten dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepTree {
    services: BTreeMap<String, DepInfo>,
    /// Provided alias -> canonical provider, after `iprovide`
    /// resolution.
    aliases: BTreeMap<String, String>,
}

impl DepTree {
    /// Look up a service's dependency record, resolving provided
    /// aliases to their provider.
    pub fn get_depinfo(&self, service: &str) -> Option<&DepInfo> {
        self.services
            .get(self.resolve_alias(service))
            .or_else(|| self.services.get(service))
    }

    /// The canonical name behind a possibly-provided alias.
    pub fn resolve_alias<'a>(&'a self, service: &'a str) -> &'a str {
        self.aliases.get(service).map(String::as_str).unwrap_or(service)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(self.resolve_alias(service))
    }

    /// Service names in the tree, lexicographic.
    pub fn services(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn entry(&mut self, service: &str) -> &mut DepInfo {
        self.services.entry(service.to_string()).or_default()
    }

    pub(crate) fn get_mut(&mut self, service: &str) -> Option<&mut DepInfo> {
        self.services.get_mut(service)
    }

    pub(crate) fn set_alias(&mut self, alias: &str, provider: &str) {
        self.aliases.insert(alias.to_string(), provider.to_string());
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut DepInfo)> {
        self.services.iter_mut()
    }
}

/// Direct bucket lookup, the two-step query surface.
pub fn get_deptype(depinfo: &DepInfo, kind: DepKind) -> &[String] {
    depinfo.depend(kind)
}

#[derive(Debug, thiserror::Error)]
pub enum DepError {
    #[error("dependency cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt dependency cache: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("failed to encode dependency cache: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depkind_str_roundtrip() {
        for kind in [
            DepKind::Ineed,
            DepKind::Iuse,
            DepKind::Iwant,
            DepKind::Iafter,
            DepKind::Ibefore,
            DepKind::Iprovide,
            DepKind::Needsme,
            DepKind::Usesme,
            DepKind::Wantsme,
            DepKind::Beforeme,
            DepKind::Afterme,
        ] {
            assert_eq!(kind.as_str().parse::<DepKind>(), Ok(kind));
        }
        assert!("keyword".parse::<DepKind>().is_err());
    }

    #[test]
    fn test_depinfo_buckets_dedup() {
        let mut info = DepInfo::default();
        info.add(DepKind::Ineed, "net");
        info.add(DepKind::Ineed, "net");
        info.add(DepKind::Ineed, "localmount");
        assert_eq!(info.depend(DepKind::Ineed), ["net", "localmount"]);
        assert!(info.depend(DepKind::Iuse).is_empty());
    }

    #[test]
    fn test_alias_resolution() {
        let mut tree = DepTree::default();
        tree.entry("net.eth0").add(DepKind::Iprovide, "net");
        tree.set_alias("net", "net.eth0");

        assert_eq!(tree.resolve_alias("net"), "net.eth0");
        assert_eq!(tree.resolve_alias("sshd"), "sshd");
        assert!(tree.get_depinfo("net").is_some());
        assert!(tree.contains("net"));
        assert!(!tree.contains("ghost"));
    }
}
