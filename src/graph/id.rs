use std::fmt;

/// Position of one node in a [`DependencyForest`](super::DependencyForest) arena.
///
/// Distinct from object identity: an object reached through three paths occupies
/// three nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Only the forest hands out node ids.
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Arena slot of this node.
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
