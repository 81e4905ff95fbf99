//! Fixtures shared by the integration tests: a tiny schema and helpers that write
//! source containers into a temporary directory.

#![allow(dead_code)]

use std::path::Path;

use repack::field::PayloadBuilder;
use repack::schema::TypeKind;
use repack::{ContainerReader, ContainerWriter, FieldNode, PPtr, Result, TypeNode};

/// Named object with a list of references.
pub const NODE: i32 = 1;
/// Object whose pointer field is declared 8 bytes wide.
pub const BROKEN: i32 = 2;
/// Same layout as [`NODE`], used for opaque-type tests.
pub const MATERIAL: i32 = 3;
/// Texture with a side-car stream reference.
pub const TEXTURE: i32 = 28;

pub fn node_type(class: &str) -> TypeNode {
    TypeNode::structure(
        "Base",
        class,
        vec![
            TypeNode::string("m_Name"),
            TypeNode::array("m_Refs", TypeNode::pointer("data", "Object")),
        ],
    )
}

pub fn broken_type() -> TypeNode {
    TypeNode::structure(
        "Base",
        "Broken",
        vec![
            TypeNode::string("m_Name"),
            TypeNode {
                name: "m_Target".into(),
                type_name: "PPtr<Object>".into(),
                kind: TypeKind::Pointer { width: 8 },
            },
        ],
    )
}

pub fn texture_type() -> TypeNode {
    TypeNode::structure(
        "Base",
        "Texture2D",
        vec![
            TypeNode::string("m_Name"),
            TypeNode::blob("image data", "TypelessData"),
            TypeNode::structure(
                "m_StreamData",
                "StreamingInfo",
                vec![
                    TypeNode::scalar("offset", "UInt64", 8),
                    TypeNode::scalar("size", "unsigned int", 4),
                    TypeNode::string("path"),
                ],
            ),
        ],
    )
}

/// Payload of a [`NODE`] (or [`MATERIAL`]) object.
pub fn node(name: &str, refs: &[PPtr]) -> Vec<u8> {
    let mut b = PayloadBuilder::new().string(name).count(refs.len() as u32);
    for r in refs {
        b = b.pointer(*r);
    }
    b.build()
}

/// Payload of a [`BROKEN`] object.
pub fn broken(name: &str) -> Vec<u8> {
    PayloadBuilder::new().string(name).u64(0).build()
}

/// Payload of a [`TEXTURE`] object.
pub fn texture(name: &str, offset: u64, size: u32, path: &str) -> Vec<u8> {
    PayloadBuilder::new()
        .string(name)
        .blob(&[])
        .u64(offset)
        .u32(size)
        .string(path)
        .build()
}

/// Same-container pointer.
pub fn local(id: i64) -> PPtr {
    PPtr::new(0, id)
}

/// Writes a source container to `dir/path`.
pub fn write_container(
    dir: &Path,
    path: &str,
    dependencies: &[&str],
    objects: &[(i64, i32, Vec<u8>)],
) -> Result<()> {
    let mut w = ContainerWriter::new(path);
    w.add_type(NODE, &node_type("GameObject"))?;
    w.add_type(BROKEN, &broken_type())?;
    w.add_type(MATERIAL, &node_type("Material"))?;
    w.add_type(TEXTURE, &texture_type())?;
    w.set_dependencies(dependencies.iter().map(|d| d.to_string()).collect())?;
    for (local_id, type_id, payload) in objects {
        w.add_object(*local_id, *type_id, payload.clone())?;
    }
    w.write_atomic(&dir.join(path))?;
    Ok(())
}

/// Parses object `local_id` of an output container.
pub fn object(reader: &ContainerReader, local_id: i64) -> Result<FieldNode> {
    reader
        .parse_object(local_id)?
        .map(|(_, root)| root)
        .ok_or_else(|| repack::RepackError::Internal(format!("object {local_id} missing")))
}

/// Every pointer of object `local_id`, in document order.
pub fn pointers(reader: &ContainerReader, local_id: i64) -> Result<Vec<PPtr>> {
    Ok(object(reader, local_id)?.pointers().map(|(_, p)| p).collect())
}
