use std::collections::HashSet;

use super::core::{BoundaryEdge, BoundaryKind, DependencyForest};
use super::id::NodeId;
use crate::accessor::ObjectAccessor;
use crate::error::{RepackError, Result};
use crate::field::PPtr;
use crate::object::{ContainerId, ObjectIdentity, ObjectKey, ObjectStore, ResolvedObject};
use crate::policy::ExpandPolicy;
use crate::resolver;

/// One pending pointer: the node holding it, where the holder lives, and the pointer.
struct PendingPointer {
    parent: NodeId,
    holder: ObjectIdentity,
    ptr: PPtr,
}

/// Expands root objects into trees, one explicit-stack DFS per root.
///
/// * Null pointers are skipped.
/// * Targets that fail to resolve become [`BoundaryKind::Unresolved`] edges.
/// * Targets the policy rejects become [`BoundaryKind::Opaque`] edges and are not copied.
/// * A target already on the path from the root is a [`BoundaryKind::Cycle`] edge.
/// * A target already expanded elsewhere in the same tree becomes a leaf node that is
///   not expanded again, which keeps convergent graphs linear in size.
#[derive(Debug)]
pub struct TreeBuilder<'p, P: ExpandPolicy + ?Sized> {
    policy: &'p P,
}

impl<'p, P: ExpandPolicy + ?Sized> TreeBuilder<'p, P> {
    /// Creates a builder applying `policy`.
    pub fn new(policy: &'p P) -> Self {
        Self { policy }
    }

    /// Expands `root` into a new tree of `forest` and returns the tree's root node.
    ///
    /// The root itself is always part of the tree regardless of the policy.
    pub fn build<A: ObjectAccessor + ?Sized>(
        &self,
        accessor: &mut A,
        store: &mut ObjectStore,
        forest: &mut DependencyForest,
        root: ResolvedObject,
    ) -> Result<NodeId> {
        let root_identity = root.identity;
        let root_key = store.insert(root)?;
        let root_node = forest.add_node(root_key, root_identity, None)?;

        let mut expanded_here: HashSet<ObjectIdentity> = HashSet::new();
        expanded_here.insert(root_identity);

        let mut stack = Vec::new();
        push_pointers(&mut stack, store, root_key, root_node)?;

        while let Some(pending) = stack.pop() {
            if self.policy.is_null_pointer(pending.ptr) {
                continue;
            }

            let target = match self.load_target(accessor, store, pending.holder.container, pending.ptr) {
                Ok(target) => target,
                Err(err) if !err.is_fatal_for_batch() => {
                    tracing::debug!(from = %pending.holder, ptr = ?pending.ptr, error = %err, "pointer left unresolved");
                    forest.add_boundary(BoundaryEdge {
                        from: pending.holder,
                        ptr: pending.ptr,
                        kind: BoundaryKind::Unresolved(err),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };
            let (key, identity) = target;

            if !self.policy.should_expand(store.get(key)?) {
                forest.add_boundary(BoundaryEdge {
                    from: pending.holder,
                    ptr: pending.ptr,
                    kind: BoundaryKind::Opaque(identity),
                });
                continue;
            }

            if forest.on_path(pending.parent, &identity) {
                forest.add_boundary(BoundaryEdge {
                    from: pending.holder,
                    ptr: pending.ptr,
                    kind: BoundaryKind::Cycle(identity),
                });
                continue;
            }

            let node = forest.add_node(key, identity, Some(pending.parent))?;
            if expanded_here.insert(identity) {
                push_pointers(&mut stack, store, key, node)?;
            } else {
                forest.node_mut(node)?.expanded = false;
            }
        }

        tracing::debug!(
            root = %root_identity,
            nodes = forest.descendants(root_node).count() + 1,
            distinct = expanded_here.len(),
            "tree built"
        );
        Ok(root_node)
    }

    /// Resolves a pointer to a stored object, loading it only the first time.
    fn load_target<A: ObjectAccessor + ?Sized>(
        &self,
        accessor: &mut A,
        store: &mut ObjectStore,
        holder: ContainerId,
        ptr: PPtr,
    ) -> Result<(ObjectKey, ObjectIdentity)> {
        let container = resolver::target_container(accessor, holder, ptr)?;
        let identity = ObjectIdentity::new(container, ptr.local_id);
        if let Some(key) = store.key_of(&identity) {
            return Ok((key, identity));
        }
        let object = accessor
            .load_object(container, ptr.local_id)?
            .ok_or_else(|| RepackError::UnresolvedReference {
                container: accessor
                    .container_path(holder)
                    .map(str::to_string)
                    .unwrap_or_else(|_| holder.to_string()),
                file_ref: ptr.file_ref,
                local_id: ptr.local_id,
            })?;
        Ok((store.insert(object)?, identity))
    }
}

/// Pushes the pointers of `key` so that they pop in document order.
fn push_pointers(
    stack: &mut Vec<PendingPointer>,
    store: &ObjectStore,
    key: ObjectKey,
    node: NodeId,
) -> Result<()> {
    let object = store.get(key)?;
    let holder = object.identity;
    let start = stack.len();
    stack.extend(object.root.pointers().map(|(_, ptr)| PendingPointer {
        parent: node,
        holder,
        ptr,
    }));
    stack[start..].reverse();
    Ok(())
}
