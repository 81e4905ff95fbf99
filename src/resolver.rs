//! Pointer resolution.
//!
//! A pointer found in an object of container `C` names `(file_ref, local_id)`.
//! `file_ref == 0` means `C` itself; any other value is a 1-based index into `C`'s
//! dependency list.

use crate::accessor::ObjectAccessor;
use crate::error::{RepackError, Result};
use crate::field::PPtr;
use crate::object::{ContainerId, ResolvedObject};

fn unresolved<A: ObjectAccessor + ?Sized>(accessor: &A, container: ContainerId, ptr: PPtr) -> RepackError {
    RepackError::UnresolvedReference {
        container: accessor
            .container_path(container)
            .map(str::to_string)
            .unwrap_or_else(|_| container.to_string()),
        file_ref: ptr.file_ref,
        local_id: ptr.local_id,
    }
}

/// Path of the container `ptr` points into, as seen from `container`.
pub fn target_path<'a, A: ObjectAccessor + ?Sized>(
    accessor: &'a A,
    container: ContainerId,
    ptr: PPtr,
) -> Result<&'a str> {
    if ptr.file_ref == 0 {
        return accessor.container_path(container);
    }
    let deps = accessor.dependency_list(container)?;
    usize::try_from(ptr.file_ref)
        .ok()
        .and_then(|r| deps.get(r - 1))
        .map(String::as_str)
        .ok_or_else(|| unresolved(accessor, container, ptr))
}

/// Resolves the container `ptr` points into, loading it if needed.
pub fn target_container<A: ObjectAccessor + ?Sized>(
    accessor: &mut A,
    container: ContainerId,
    ptr: PPtr,
) -> Result<ContainerId> {
    if ptr.file_ref == 0 {
        return Ok(container);
    }
    let path = target_path(accessor, container, ptr)?.to_string();
    match accessor.load_container(&path) {
        Ok(id) => Ok(id),
        Err(RepackError::ContainerNotFound(_)) => Err(unresolved(accessor, container, ptr)),
        Err(e) => Err(e),
    }
}

/// Loads the object `ptr` names.
///
/// Fails with [`RepackError::UnresolvedReference`] when `file_ref` is past the
/// dependency list, the dependency cannot be loaded, or `local_id` does not exist.
/// Parse failures of the target surface as [`RepackError::MalformedField`].
pub fn resolve<A: ObjectAccessor + ?Sized>(
    accessor: &mut A,
    container: ContainerId,
    ptr: PPtr,
) -> Result<ResolvedObject> {
    let target = target_container(accessor, container, ptr)?;
    accessor
        .load_object(target, ptr.local_id)?
        .ok_or_else(|| unresolved(accessor, container, ptr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ContainerLibrary;
    use crate::field::PayloadBuilder;
    use crate::reader::ContainerReader;
    use crate::schema::TypeNode;
    use crate::writer::ContainerWriter;

    fn container(deps: &[&str], ids: &[i64]) -> Result<ContainerReader> {
        let mut w = ContainerWriter::new("t");
        w.add_type(1, &TypeNode::structure("Base", "Marker", vec![TypeNode::string("m_Name")]))?;
        w.set_dependencies(deps.iter().map(|d| d.to_string()).collect())?;
        for id in ids {
            w.add_object(*id, 1, PayloadBuilder::new().string("m").build())?;
        }
        ContainerReader::from_bytes(w.to_bytes()?)
    }

    #[test]
    fn resolves_local_and_external_targets() -> Result<()> {
        let mut lib = ContainerLibrary::new(std::env::temp_dir());
        let a = lib.insert("a.rpk", container(&["b.rpk"], &[3])?)?;
        let b = lib.insert("b.rpk", container(&[], &[7])?)?;

        assert_eq!(resolve(&mut lib, a, PPtr::new(0, 3))?.identity.container, a);
        let ext = resolve(&mut lib, a, PPtr::new(1, 7))?;
        assert_eq!((ext.identity.container, ext.identity.local_id), (b, 7));
        assert_eq!(target_path(&lib, a, PPtr::new(1, 7))?, "b.rpk");
        Ok(())
    }

    #[test]
    fn reports_unresolvable_pointers() -> Result<()> {
        let mut lib = ContainerLibrary::new(std::env::temp_dir());
        let a = lib.insert("a.rpk", container(&["missing-4c1e.rpk"], &[3])?)?;

        for ptr in [PPtr::new(0, 99), PPtr::new(2, 1), PPtr::new(1, 1), PPtr::new(-1, 1)] {
            let err = resolve(&mut lib, a, ptr);
            assert!(
                matches!(err, Err(RepackError::UnresolvedReference { .. })),
                "{ptr:?} resolved"
            );
        }
        Ok(())
    }
}
