use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use super::id::NodeId;
use crate::error::{RepackError, Result};
use crate::field::PPtr;
use crate::object::{ObjectIdentity, ObjectKey};

/// One position in a depth-first expansion.
///
/// Equality and hashing consider only the object identity, never the position,
/// so two nodes reached through different paths compare equal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The unique identifier for this node.
    pub id: NodeId,
    /// The node this one was reached from; `None` for roots.
    pub parent: Option<NodeId>,
    /// The object at this position.
    pub object: ObjectKey,
    /// Identity of `object`, cached for structure-independent comparisons.
    pub identity: ObjectIdentity,
    /// Distance from the root.
    pub depth: u32,
    /// Whether this node's pointers were followed. False when the same identity was
    /// already expanded earlier in the same tree.
    pub expanded: bool,
    /// Child nodes in pointer order.
    pub children: Vec<NodeId>,
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for TreeNode {}

impl Hash for TreeNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

/// Why a pointer did not become a tree node.
#[derive(Debug, Clone)]
pub enum BoundaryKind {
    /// The target was resolved but the policy marked its type opaque.
    Opaque(ObjectIdentity),
    /// The target points back to an object on the current path.
    Cycle(ObjectIdentity),
    /// The target could not be loaded.
    Unresolved(RepackError),
}

/// A pointer that stops the expansion, recorded for dependency bookkeeping.
#[derive(Debug, Clone)]
pub struct BoundaryEdge {
    /// Object holding the pointer.
    pub from: ObjectIdentity,
    /// The pointer as stored in `from`.
    pub ptr: PPtr,
    /// Why expansion stopped.
    pub kind: BoundaryKind,
}

/// Arena holding one tree per root.
///
/// Roots are kept in caller order; all views are pure functions of the arena and
/// can be restarted at will.
#[derive(Debug, Default)]
pub struct DependencyForest {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    boundaries: Vec<BoundaryEdge>,
}

impl DependencyForest {
    /// Creates a new, empty forest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. A `None` parent starts a new tree.
    pub fn add_node(
        &mut self,
        object: ObjectKey,
        identity: ObjectIdentity,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let raw = u32::try_from(self.nodes.len())
            .map_err(|_| RepackError::Internal("Forest exceeds u32 node capacity".into()))?;
        let id = NodeId::new(raw);
        let depth = match parent {
            Some(pid) => {
                let parent_node = self.node_mut(pid)?;
                parent_node.children.push(id);
                parent_node.depth + 1
            }
            None => {
                self.roots.push(id);
                0
            }
        };
        self.nodes.push(TreeNode {
            id,
            parent,
            object,
            identity,
            depth,
            expanded: true,
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Records a pointer that was not expanded.
    pub fn add_boundary(&mut self, edge: BoundaryEdge) {
        self.boundaries.push(edge);
    }

    /// Retrieves a node by id.
    pub fn node(&self, id: NodeId) -> Result<&TreeNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| RepackError::Internal(format!("Node {id} out of bounds")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| RepackError::Internal(format!("Node {id} out of bounds")))
    }

    /// Root nodes in caller order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Pointers that stopped the expansion, in discovery order.
    pub fn boundaries(&self) -> &[BoundaryEdge] {
        &self.boundaries
    }

    /// Total number of tree positions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the forest has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `identity` sits on the path from `node` up to its root.
    pub fn on_path(&self, node: NodeId, identity: &ObjectIdentity) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            match self.nodes.get(id.index()) {
                Some(n) if n.identity == *identity => return true,
                Some(n) => cursor = n.parent,
                None => return false,
            }
        }
        false
    }

    /// Depth-first pre-order walk of the subtree under `node`, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Descendants<'_> {
        let start = self
            .nodes
            .get(node.index())
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        Descendants {
            forest: self,
            stack: start,
        }
    }

    /// Identities of every node under `node`, pre-order, duplicates included.
    pub fn descendant_ids(&self, node: NodeId) -> impl Iterator<Item = ObjectIdentity> + '_ {
        self.descendants(node).map(|n| n.identity)
    }

    /// `node` followed by its descendants.
    pub fn subtree(&self, node: NodeId) -> impl Iterator<Item = &TreeNode> + '_ {
        self.nodes
            .get(node.index())
            .into_iter()
            .chain(self.descendants(node))
    }

    /// Identities reachable from the roots without passing through `blocked`.
    ///
    /// Works on identities, not positions: an object expanded under a blocked parent
    /// still counts as reachable through any other path that leads to it.
    pub fn reachable(&self, blocked: &HashSet<ObjectIdentity>) -> HashSet<ObjectIdentity> {
        let mut edges: HashMap<ObjectIdentity, Vec<ObjectIdentity>> = HashMap::new();
        for node in &self.nodes {
            let targets = edges.entry(node.identity).or_default();
            for child in &node.children {
                if let Some(c) = self.nodes.get(child.index()) {
                    targets.push(c.identity);
                }
            }
        }

        let mut seen = HashSet::new();
        let mut stack: Vec<ObjectIdentity> = self
            .roots
            .iter()
            .filter_map(|r| self.nodes.get(r.index()).map(|n| n.identity))
            .collect();
        while let Some(identity) = stack.pop() {
            if blocked.contains(&identity) || !seen.insert(identity) {
                continue;
            }
            if let Some(targets) = edges.get(&identity) {
                stack.extend(targets.iter().copied());
            }
        }
        seen
    }

    /// Every node of every tree: roots in caller order, each tree depth-first.
    pub fn flatten(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        self.roots.iter().flat_map(move |root| self.subtree(*root))
    }
}

/// Iterator returned by [`DependencyForest::descendants`].
#[derive(Debug, Clone)]
pub struct Descendants<'a> {
    forest: &'a DependencyForest,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.forest.nodes.get(id.index())?;
        self.stack.extend(node.children.iter().rev().copied());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ContainerId, ObjectStore, ResolvedObject};
    use crate::field::{FieldNode, FieldValue};

    fn key(store: &mut ObjectStore, local_id: i64) -> Result<(ObjectKey, ObjectIdentity)> {
        let identity = ObjectIdentity::new(ContainerId::new(0), local_id);
        let root = FieldNode {
            name: "Base".into(),
            type_name: "T".into(),
            has_pointers: false,
            value: FieldValue::Struct(Vec::new()),
        };
        Ok((store.insert(ResolvedObject::new(identity, 1, root))?, identity))
    }

    #[test]
    fn views_are_preorder_and_restartable() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let (a, ia) = key(&mut store, 10)?;
        let (b, ib) = key(&mut store, 11)?;
        let (c, ic) = key(&mut store, 12)?;
        let root = forest.add_node(a, ia, None)?;
        let nb = forest.add_node(b, ib, Some(root))?;
        forest.add_node(c, ic, Some(nb))?;
        forest.add_node(c, ic, Some(root))?;

        let ids: Vec<i64> = forest.descendant_ids(root).map(|i| i.local_id).collect();
        assert_eq!(ids, vec![11, 12, 12]);
        let again: Vec<i64> = forest.descendant_ids(root).map(|i| i.local_id).collect();
        assert_eq!(ids, again);
        assert_eq!(forest.flatten().count(), 4);
        assert_eq!(forest.node(nb)?.depth, 1);
        Ok(())
    }

    #[test]
    fn nodes_compare_by_identity_only() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let (a, ia) = key(&mut store, 1)?;
        let (c, ic) = key(&mut store, 2)?;
        let r = forest.add_node(a, ia, None)?;
        let deep = forest.add_node(c, ic, Some(r))?;
        let r2 = forest.add_node(c, ic, None)?;
        assert_eq!(forest.node(deep)?, forest.node(r2)?);
        assert!(forest.on_path(deep, &ia));
        assert!(!forest.on_path(r2, &ia));
        Ok(())
    }

    #[test]
    fn reachability_stops_at_blocked_identities() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let (a, ia) = key(&mut store, 10)?;
        let (b, ib) = key(&mut store, 11)?;
        let (c, ic) = key(&mut store, 12)?;
        let (d, id) = key(&mut store, 13)?;
        let root = forest.add_node(a, ia, None)?;
        let nb = forest.add_node(b, ib, Some(root))?;
        forest.add_node(c, ic, Some(nb))?;
        forest.add_node(d, id, Some(nb))?;
        // 13 is also reached, unexpanded, straight from the root.
        forest.add_node(d, id, Some(root))?;

        let reachable = forest.reachable(&HashSet::from([ib]));
        assert!(reachable.contains(&ia));
        assert!(!reachable.contains(&ib));
        assert!(!reachable.contains(&ic));
        assert!(reachable.contains(&id));
        Ok(())
    }
}
