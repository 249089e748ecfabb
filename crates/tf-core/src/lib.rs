//! Core types for tapflow
//!
//! This crate provides the fundamental types used throughout the tapflow
//! trigger engine: UI element nodes, the snapshot tree they live in, and the
//! monotonic timestamps used for all interval math.

mod node;
mod snapshot;
mod time;

pub use node::{AttrValue, Bounds, Node, StableId};
pub use snapshot::{
    ElementTree, NodeId, NodeRef, Snapshot, SnapshotError, SnapshotRecord, MAX_TREE_DEPTH,
};
pub use time::Timestamp;

/// Separator between a package name and a short view id (`pkg:id/name`)
pub const VIEW_ID_SEPARATOR: &str = ":id/";
