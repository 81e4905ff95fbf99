//! Object identities and the arena that owns every loaded object.
//!
//! Tree nodes and the identity registry never own objects; they hold [`ObjectKey`]s into
//! one [`ObjectStore`] per repack operation.

use std::collections::HashMap;
use std::fmt;

use crate::error::{RepackError, Result};
use crate::field::FieldNode;

/// Handle of a container loaded by an [`ObjectAccessor`](crate::accessor::ObjectAccessor).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u32);

impl ContainerId {
    /// Creates a handle. Handles are issued by accessors in load order.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Global uniqueness key of an object: its container plus its local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity {
    /// Container holding the object.
    pub container: ContainerId,
    /// Local id inside that container.
    pub local_id: i64,
}

impl ObjectIdentity {
    /// Creates an identity.
    pub fn new(container: ContainerId, local_id: i64) -> Self {
        Self {
            container,
            local_id,
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.local_id)
    }
}

/// An object read from a source container and parsed into its field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedObject {
    /// Where the object lives.
    pub identity: ObjectIdentity,
    /// Schema type id.
    pub type_id: i32,
    /// `m_Name`/`name` field if the type has one, otherwise empty.
    pub display_name: String,
    /// Parsed payload.
    pub root: FieldNode,
}

impl ResolvedObject {
    /// Wraps a parsed payload, deriving the display name from the tree.
    pub fn new(identity: ObjectIdentity, type_id: i32, root: FieldNode) -> Self {
        let display_name = ["m_Name", "name"]
            .iter()
            .find_map(|n| root.child(n).and_then(FieldNode::as_str))
            .unwrap_or_default()
            .to_string();
        Self {
            identity,
            type_id,
            display_name,
            root,
        }
    }

    /// The container the object was read from.
    pub fn source_container(&self) -> ContainerId {
        self.identity.container
    }
}

/// Index of an object inside an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(u32);

impl ObjectKey {
    /// Returns the raw index.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Arena owning every object loaded during one repack operation.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: Vec<ResolvedObject>,
    index: HashMap<ObjectIdentity, ObjectKey>,
}

impl ObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of an already loaded identity.
    pub fn key_of(&self, identity: &ObjectIdentity) -> Option<ObjectKey> {
        self.index.get(identity).copied()
    }

    /// Stores `object` unless its identity is already present; returns its key either way.
    pub fn insert(&mut self, object: ResolvedObject) -> Result<ObjectKey> {
        if let Some(key) = self.key_of(&object.identity) {
            return Ok(key);
        }
        let raw = u32::try_from(self.objects.len())
            .map_err(|_| RepackError::Internal("Object store exceeds u32 capacity".into()))?;
        let key = ObjectKey(raw);
        self.index.insert(object.identity, key);
        self.objects.push(object);
        Ok(key)
    }

    /// Retrieves an object by key.
    pub fn get(&self, key: ObjectKey) -> Result<&ResolvedObject> {
        self.objects
            .get(key.as_usize())
            .ok_or_else(|| RepackError::Internal(format!("Object key {} out of bounds", key.0)))
    }

    /// Number of distinct objects loaded.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldValue, Scalar};

    fn named(container: u32, local_id: i64, name: &str) -> ResolvedObject {
        let root = FieldNode {
            name: "Base".into(),
            type_name: "Thing".into(),
            has_pointers: false,
            value: FieldValue::Struct(vec![FieldNode {
                name: "m_Name".into(),
                type_name: "string".into(),
                has_pointers: false,
                value: FieldValue::Scalar(Scalar::Blob(name.as_bytes().to_vec())),
            }]),
        };
        ResolvedObject::new(ObjectIdentity::new(ContainerId::new(container), local_id), 1, root)
    }

    #[test]
    fn identity_includes_container() {
        let a = ObjectIdentity::new(ContainerId::new(0), 5);
        let b = ObjectIdentity::new(ContainerId::new(1), 5);
        assert_ne!(a, b);
    }

    #[test]
    fn store_deduplicates_by_identity() -> Result<()> {
        let mut store = ObjectStore::new();
        let first = store.insert(named(0, 5, "rock"))?;
        let again = store.insert(named(0, 5, "rock"))?;
        let other = store.insert(named(1, 5, "tree"))?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(other)?.display_name, "tree");
        Ok(())
    }
}
