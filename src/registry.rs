//! Identity deduplication and new id assignment.
//!
//! The registry flattens a [`DependencyForest`], groups nodes by object identity, and
//! hands every distinct identity exactly one new local id in the output container.
//! It is append-only for the lifetime of one repack operation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{RepackError, Result};
use crate::format::FIRST_ASSIGNABLE_ID;
use crate::graph::{DependencyForest, NodeId};
use crate::object::{ObjectIdentity, ObjectKey};

/// How new ids are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdOrder {
    /// Order of first discovery: roots in caller order, each tree depth-first.
    #[default]
    Discovery,
    /// Sorted by an explicit key supplied at registration time.
    Source,
}

/// The registry's record for one distinct identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Id in the output container.
    pub new_id: i64,
    /// First tree node that reached this identity.
    pub representative: NodeId,
    /// Object store key.
    pub object: ObjectKey,
}

/// Mapping from source identity to output local id.
#[derive(Debug)]
pub struct IdentityRegistry {
    next_id: i64,
    assignments: IndexMap<ObjectIdentity, Assignment>,
    owners: HashMap<i64, ObjectIdentity>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new(FIRST_ASSIGNABLE_ID)
    }
}

impl IdentityRegistry {
    /// Creates a registry handing out ids from `base` upwards.
    pub fn new(base: i64) -> Self {
        Self {
            next_id: base,
            assignments: IndexMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Registers every identity of `forest` in discovery order.
    ///
    /// Identities already registered keep their id.
    pub fn register(&mut self, forest: &DependencyForest) -> Result<()> {
        self.register_excluding(forest, &HashSet::new())
    }

    /// Like [`IdentityRegistry::register`], skipping the identities in `excluded`.
    pub fn register_excluding(
        &mut self,
        forest: &DependencyForest,
        excluded: &HashSet<ObjectIdentity>,
    ) -> Result<()> {
        for (identity, (node, object)) in self.first_seen(forest, excluded) {
            self.assign(identity, node, object)?;
        }
        Ok(())
    }

    /// Registers every identity of `forest` not in `excluded`, ordering new identities
    /// by `sort_key`.
    ///
    /// Ties keep discovery order, so the result is deterministic for any key.
    pub fn register_sorted<K, F>(
        &mut self,
        forest: &DependencyForest,
        excluded: &HashSet<ObjectIdentity>,
        sort_key: F,
    ) -> Result<()>
    where
        K: Ord,
        F: Fn(&ObjectIdentity) -> K,
    {
        let mut pending: Vec<_> = self.first_seen(forest, excluded).into_iter().collect();
        pending.sort_by_key(|(identity, _)| sort_key(identity));
        for (identity, (node, object)) in pending {
            self.assign(identity, node, object)?;
        }
        Ok(())
    }

    /// Unregistered identities of `forest` with their first node, in discovery order.
    fn first_seen(
        &self,
        forest: &DependencyForest,
        excluded: &HashSet<ObjectIdentity>,
    ) -> IndexMap<ObjectIdentity, (NodeId, ObjectKey)> {
        let mut firsts = IndexMap::new();
        for node in forest.flatten() {
            if !self.assignments.contains_key(&node.identity) && !excluded.contains(&node.identity) {
                firsts.entry(node.identity).or_insert((node.id, node.object));
            }
        }
        firsts
    }

    /// Assigns the next id to `identity` unless it already has one.
    pub fn assign(&mut self, identity: ObjectIdentity, node: NodeId, object: ObjectKey) -> Result<i64> {
        if let Some(existing) = self.assignments.get(&identity) {
            return Ok(existing.new_id);
        }
        let new_id = self.next_id;
        if let Some(owner) = self.owners.get(&new_id) {
            return Err(RepackError::DuplicateIdentityConflict {
                new_id,
                first: owner.to_string(),
                second: identity.to_string(),
            });
        }
        self.next_id = new_id
            .checked_add(1)
            .ok_or_else(|| RepackError::Internal("Local id space exhausted".into()))?;
        self.owners.insert(new_id, identity);
        self.assignments.insert(
            identity,
            Assignment {
                new_id,
                representative: node,
                object,
            },
        );
        Ok(new_id)
    }

    /// The new id of `identity`, if registered.
    pub fn new_id(&self, identity: &ObjectIdentity) -> Option<i64> {
        self.assignments.get(identity).map(|a| a.new_id)
    }

    /// Full assignment record of `identity`.
    pub fn get(&self, identity: &ObjectIdentity) -> Option<&Assignment> {
        self.assignments.get(identity)
    }

    /// Assignments in ascending new id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectIdentity, &Assignment)> {
        self.assignments.iter()
    }

    /// Number of distinct identities.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns true if nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldNode, FieldValue};
    use crate::object::{ContainerId, ObjectStore, ResolvedObject};

    fn add(
        store: &mut ObjectStore,
        forest: &mut DependencyForest,
        container: u32,
        local_id: i64,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let identity = ObjectIdentity::new(ContainerId::new(container), local_id);
        let root = FieldNode {
            name: "Base".into(),
            type_name: "T".into(),
            has_pointers: false,
            value: FieldValue::Struct(Vec::new()),
        };
        let key = store.insert(ResolvedObject::new(identity, 1, root))?;
        forest.add_node(key, identity, parent)
    }

    #[test]
    fn shared_objects_get_one_id() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let a = add(&mut store, &mut forest, 0, 100, None)?;
        add(&mut store, &mut forest, 0, 300, Some(a))?;
        let b = add(&mut store, &mut forest, 0, 200, None)?;
        add(&mut store, &mut forest, 0, 300, Some(b))?;

        let mut reg = IdentityRegistry::default();
        reg.register(&forest)?;
        let id = |l| reg.new_id(&ObjectIdentity::new(ContainerId::new(0), l));
        assert_eq!(id(100), Some(2));
        assert_eq!(id(300), Some(3));
        assert_eq!(id(200), Some(4));
        assert_eq!(reg.len(), 3);
        Ok(())
    }

    #[test]
    fn same_local_id_in_two_containers_does_not_collide() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let a = add(&mut store, &mut forest, 0, 5, None)?;
        add(&mut store, &mut forest, 1, 5, Some(a))?;
        let mut reg = IdentityRegistry::default();
        reg.register(&forest)?;
        assert_eq!(reg.len(), 2);
        Ok(())
    }

    #[test]
    fn sorted_registration_is_key_ordered() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let a = add(&mut store, &mut forest, 0, 9, None)?;
        add(&mut store, &mut forest, 0, 4, Some(a))?;
        add(&mut store, &mut forest, 0, 7, Some(a))?;
        let mut reg = IdentityRegistry::new(10);
        reg.register_sorted(&forest, &HashSet::new(), |i| i.local_id)?;
        let ids: Vec<(i64, i64)> = reg.iter().map(|(i, a)| (i.local_id, a.new_id)).collect();
        assert_eq!(ids, vec![(4, 10), (7, 11), (9, 12)]);
        Ok(())
    }

    #[test]
    fn registration_is_append_only() -> Result<()> {
        let mut store = ObjectStore::new();
        let mut first = DependencyForest::new();
        add(&mut store, &mut first, 0, 1, None)?;
        let mut reg = IdentityRegistry::default();
        reg.register(&first)?;
        reg.register(&first)?;
        assert_eq!(reg.len(), 1);
        Ok(())
    }
}
