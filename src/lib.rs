//! rcd - dependency-based service manager core
//!
//! The library init scripts and the runlevel driver consult to compute
//! start/stop orders and to observe and mutate per-service state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                       rcd                        │
//! ├──────────────────┬───────────────┬───────────────┤
//! │  Service State   │  Dependency   │    Process    │
//! │  Store (links)   │  Engine       │  Supervision  │
//! ├──────────────────┴───────────────┴───────────────┤
//! │          Filesystem Layout (single truth)        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! State lives on the filesystem so any number of processes can
//! cooperate: symlinks encode service state and runlevel membership,
//! `flock` serializes transitions, and the dependency graph is cached
//! in a single MessagePack file.

pub mod config;
pub mod deps;
pub mod hooks;
pub mod layout;
pub mod manager;

pub use deps::{
    get_deptype, BrokenEdge, DepError, DepFlags, DepInfo, DepKind, DepTree, ServiceOrdering,
};
pub use hooks::{Hook, HookFn};
pub use layout::Layout;
pub use manager::pids::find_pids;
pub use manager::{DaemonRecord, Manager, ServiceState, SpawnError, StateError};
