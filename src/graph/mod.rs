//! Reachability trees for the repacking engine.
//!
//! This module defines the [`DependencyForest`] arena, its [`TreeNode`]s, and the
//! stack-based [`TreeBuilder`] that expands root objects through their pointer fields.

/// Stack-based tree expansion.
pub mod builder;
/// Defines the `DependencyForest` and `TreeNode` structures.
pub mod core;
/// Defines the `NodeId` type.
pub mod id;

pub use builder::TreeBuilder;
pub use core::{BoundaryEdge, BoundaryKind, DependencyForest, Descendants, TreeNode};
pub use id::NodeId;
