//! Pointer rewriting.
//!
//! Rewriting happens in two passes. [`RemapPlanner`] runs single-threaded over every
//! retained object and decides, per pointer, what it becomes in the output container:
//! `(0, new id)` for copied targets, or a re-indexed external reference for everything
//! else. That pass also builds the output [`DependencyTable`]. The resulting
//! [`PointerRemap`] is read-only, so [`FieldRewriter`] can patch objects independently.

use indexmap::IndexSet;
use std::collections::HashMap;

use crate::accessor::ObjectAccessor;
use crate::error::{RepackError, Result};
use crate::field::{FieldNode, PPtr};
use crate::format::MAX_DEPENDENCIES;
use crate::object::{ContainerId, ObjectIdentity, ResolvedObject};
use crate::policy::ExpandPolicy;
use crate::registry::IdentityRegistry;
use crate::resolver;
use crate::schema::TypeNode;

/// Ordered list of external containers the output still points into.
#[derive(Debug, Clone)]
pub struct DependencyTable {
    paths: IndexSet<String>,
    max: usize,
}

impl Default for DependencyTable {
    fn default() -> Self {
        Self::new(MAX_DEPENDENCIES)
    }
}

impl DependencyTable {
    /// Creates an empty table admitting at most `max` entries.
    pub fn new(max: usize) -> Self {
        Self {
            paths: IndexSet::new(),
            max: max.min(MAX_DEPENDENCIES),
        }
    }

    /// Returns the `file_ref` for `path`, appending it if new.
    pub fn intern(&mut self, path: &str) -> Result<i32> {
        let idx = match self.paths.get_index_of(path) {
            Some(idx) => idx,
            None => {
                if self.paths.len() >= self.max {
                    return Err(RepackError::DependencyListOverflow {
                        count: self.paths.len() + 1,
                        max: self.max,
                    });
                }
                self.paths.insert_full(path.to_string()).0
            }
        };
        i32::try_from(idx + 1).map_err(|_| RepackError::DependencyListOverflow {
            count: idx + 1,
            max: self.max,
        })
    }

    /// Paths in `file_ref` order.
    pub fn paths(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns true if the output has no external dependencies.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Frozen per-pointer translation, keyed by the holder's container and the original pointer.
#[derive(Debug, Clone, Default)]
pub struct PointerRemap {
    map: HashMap<(ContainerId, PPtr), PPtr>,
}

impl PointerRemap {
    /// Translation of `ptr` found in an object of `holder`.
    pub fn lookup(&self, holder: ContainerId, ptr: PPtr) -> Option<PPtr> {
        self.map.get(&(holder, ptr)).copied()
    }

    /// Records a translation.
    pub fn insert(&mut self, holder: ContainerId, from: PPtr, to: PPtr) {
        self.map.insert((holder, from), to);
    }

    /// Number of recorded translations.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Builds a [`PointerRemap`] and the output [`DependencyTable`].
#[derive(Debug)]
pub struct RemapPlanner<'a, A: ObjectAccessor + ?Sized, P: ExpandPolicy + ?Sized> {
    accessor: &'a A,
    registry: &'a IdentityRegistry,
    policy: &'a P,
    remap: PointerRemap,
    dependencies: DependencyTable,
}

impl<'a, A: ObjectAccessor + ?Sized, P: ExpandPolicy + ?Sized> RemapPlanner<'a, A, P> {
    /// Starts a plan over `registry`.
    pub fn new(
        accessor: &'a A,
        registry: &'a IdentityRegistry,
        policy: &'a P,
        dependencies: DependencyTable,
    ) -> Self {
        Self {
            accessor,
            registry,
            policy,
            remap: PointerRemap::default(),
            dependencies,
        }
    }

    /// Plans every pointer of `object`.
    ///
    /// Fails with [`RepackError::UnresolvedReference`] if a pointer's `file_ref` is past
    /// the holder's dependency list; the caller decides whether to exclude the object.
    /// [`RepackError::DependencyListOverflow`] is fatal for the whole repack.
    pub fn plan(&mut self, object: &ResolvedObject) -> Result<()> {
        let holder = object.identity.container;
        let mut planned = Vec::new();
        for (_, ptr) in object.root.pointers() {
            if self.policy.is_null_pointer(ptr) || self.remap.lookup(holder, ptr).is_some() {
                continue;
            }
            let path = resolver::target_path(self.accessor, holder, ptr)?;
            let internal = self
                .accessor
                .find_container(path)
                .map(|c| ObjectIdentity::new(c, ptr.local_id))
                .and_then(|identity| self.registry.new_id(&identity));
            let to = match internal {
                Some(new_id) => PPtr::new(0, new_id),
                None => PPtr::new(self.dependencies.intern(path)?, ptr.local_id),
            };
            planned.push((ptr, to));
        }
        for (from, to) in planned {
            self.remap.insert(holder, from, to);
        }
        Ok(())
    }

    /// Finishes the plan.
    pub fn finish(self) -> (PointerRemap, DependencyTable) {
        (self.remap, self.dependencies)
    }
}

/// Patches pointer fields in place according to a [`PointerRemap`].
#[derive(Debug, Clone, Copy)]
pub struct FieldRewriter<'r> {
    remap: &'r PointerRemap,
}

impl<'r> FieldRewriter<'r> {
    /// Creates a rewriter over a finished plan.
    pub fn new(remap: &'r PointerRemap) -> Self {
        Self { remap }
    }

    /// Rewrites every mapped pointer of `root`. Unmapped pointers are left untouched.
    pub fn rewrite_tree(&self, holder: ContainerId, root: &mut FieldNode) -> Result<usize> {
        let mut rewritten = 0;
        root.visit_pointers_mut(|_, ptr| {
            if let Some(to) = self.remap.lookup(holder, *ptr) {
                *ptr = to;
                rewritten += 1;
            }
            Ok(())
        })?;
        Ok(rewritten)
    }

    /// Returns the rewritten payload of `object`.
    pub fn rewrite(&self, object: &ResolvedObject) -> Result<Vec<u8>> {
        let mut root = object.root.clone();
        self.rewrite_tree(object.identity.container, &mut root)?;
        Ok(root.serialize())
    }

    /// Parses a raw payload and rewrites it.
    ///
    /// Fails with [`RepackError::MalformedField`] if the payload does not match `schema`,
    /// including pointer fields whose declared width is not the pointer width.
    pub fn rewrite_raw(&self, holder: ContainerId, raw: &[u8], schema: &TypeNode) -> Result<Vec<u8>> {
        let mut root = FieldNode::parse(raw, schema)?;
        self.rewrite_tree(holder, &mut root)?;
        let out = root.serialize();
        if out.len() != raw.len() {
            return Err(RepackError::Internal(format!(
                "Rewrite changed payload length from {} to {}",
                raw.len(),
                out.len()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PayloadBuilder;
    use crate::schema::TypeKind;

    #[test]
    fn interning_is_stable_and_bounded() -> Result<()> {
        let mut deps = DependencyTable::new(2);
        assert_eq!(deps.intern("a.rpk")?, 1);
        assert_eq!(deps.intern("b.rpk")?, 2);
        assert_eq!(deps.intern("a.rpk")?, 1);
        assert!(matches!(
            deps.intern("c.rpk"),
            Err(RepackError::DependencyListOverflow { count: 3, max: 2 })
        ));
        assert_eq!(deps.paths(), vec!["a.rpk".to_string(), "b.rpk".to_string()]);
        Ok(())
    }

    #[test]
    fn rewrite_raw_only_touches_mapped_pointers() -> Result<()> {
        let schema = TypeNode::structure(
            "Base",
            "Holder",
            vec![
                TypeNode::scalar("m_Flags", "int", 4),
                TypeNode::pointer("m_Near", "Object"),
                TypeNode::pointer("m_Far", "Object"),
            ],
        );
        let raw = PayloadBuilder::new()
            .i32(-1)
            .pointer(PPtr::new(0, 40))
            .pointer(PPtr::new(2, 41))
            .build();
        let holder = ContainerId::new(0);
        let mut remap = PointerRemap::default();
        remap.insert(holder, PPtr::new(0, 40), PPtr::new(0, 2));

        let out = FieldRewriter::new(&remap).rewrite_raw(holder, &raw, &schema)?;
        let expected = PayloadBuilder::new()
            .i32(-1)
            .pointer(PPtr::new(0, 2))
            .pointer(PPtr::new(2, 41))
            .build();
        assert_eq!(out, expected);
        Ok(())
    }

    #[test]
    fn rewrite_raw_rejects_wrong_pointer_width() {
        let schema = TypeNode::structure(
            "Base",
            "Holder",
            vec![TypeNode {
                name: "m_Ref".into(),
                type_name: "PPtr<Object>".into(),
                kind: TypeKind::Pointer { width: 16 },
            }],
        );
        let remap = PointerRemap::default();
        let err = FieldRewriter::new(&remap).rewrite_raw(ContainerId::new(0), &[0u8; 16], &schema);
        assert!(matches!(err, Err(RepackError::MalformedField { .. })));
    }
}
