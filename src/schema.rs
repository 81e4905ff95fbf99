//! Runtime type schema.
//!
//! Object payloads carry no self-describing structure; their layout is given by a
//! [`TypeNode`] tree looked up by the object's type id. Containers embed the schema
//! of every type they store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RepackError, Result};
use crate::format::DESCRIPTOR_TYPE_ID;

/// Width in bytes of a serialized pointer: `file_ref: i32` + `local_id: i64`.
pub const POINTER_WIDTH: u32 = 12;

/// Layout class of a schema node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    /// Fixed-width raw value.
    Scalar {
        /// Width in bytes.
        width: u32,
    },
    /// Variable-length bytes prefixed by a `u32` length (strings, raw buffers).
    Blob,
    /// `u32` count followed by `count` elements.
    Array {
        /// Element layout.
        element: Box<TypeNode>,
    },
    /// Concatenation of named fields.
    Struct {
        /// Fields in declaration order.
        fields: Vec<TypeNode>,
    },
    /// Typed reference to another object.
    Pointer {
        /// Declared width; anything but [`POINTER_WIDTH`] is malformed.
        width: u32,
    },
}

/// One node of a type tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeNode {
    /// Field name (`"Base"` for the root).
    pub name: String,
    /// Declared type name, e.g. `"int"` or `"PPtr<Material>"`.
    pub type_name: String,
    /// Layout.
    pub kind: TypeKind,
}

impl TypeNode {
    /// A fixed-width scalar field.
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind: TypeKind::Scalar { width },
        }
    }

    /// A length-prefixed string field.
    pub fn string(name: impl Into<String>) -> Self {
        Self::blob(name, "string")
    }

    /// A length-prefixed byte field.
    pub fn blob(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind: TypeKind::Blob,
        }
    }

    /// An array of `element`.
    pub fn array(name: impl Into<String>, element: TypeNode) -> Self {
        let name = name.into();
        Self {
            type_name: format!("vector<{}>", element.type_name),
            name,
            kind: TypeKind::Array {
                element: Box::new(element),
            },
        }
    }

    /// A nested structure.
    pub fn structure(
        name: impl Into<String>,
        type_name: impl Into<String>,
        fields: Vec<TypeNode>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind: TypeKind::Struct { fields },
        }
    }

    /// A pointer to an object of class `target`.
    pub fn pointer(name: impl Into<String>, target: &str) -> Self {
        Self {
            name: name.into(),
            type_name: format!("PPtr<{target}>"),
            kind: TypeKind::Pointer {
                width: POINTER_WIDTH,
            },
        }
    }

    /// Returns true if this node or any descendant is a pointer.
    pub fn contains_pointers(&self) -> bool {
        match &self.kind {
            TypeKind::Pointer { .. } => true,
            TypeKind::Scalar { .. } | TypeKind::Blob => false,
            TypeKind::Array { element } => element.contains_pointers(),
            TypeKind::Struct { fields } => fields.iter().any(TypeNode::contains_pointers),
        }
    }

    /// Returns the direct child field called `name`, if this is a struct.
    pub fn field(&self, name: &str) -> Option<&TypeNode> {
        match &self.kind {
            TypeKind::Struct { fields } => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }
}

/// Type id to type tree mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeMap<i32, TypeNode>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the layout of `type_id`.
    pub fn insert(&mut self, type_id: i32, root: TypeNode) {
        self.types.insert(type_id, root);
    }

    /// Looks up a type tree.
    pub fn get(&self, type_id: i32) -> Result<&TypeNode> {
        self.types
            .get(&type_id)
            .ok_or_else(|| RepackError::Format(format!("No schema for type id {type_id}")))
    }

    /// Returns true if the schema knows `type_id`.
    pub fn contains(&self, type_id: i32) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Iterates types in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &TypeNode)> {
        self.types.iter().map(|(id, node)| (*id, node))
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<(i32, TypeNode)> for Schema {
    fn from_iter<I: IntoIterator<Item = (i32, TypeNode)>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

/// Layout of the self-descriptor object every written container carries at local id 1.
pub fn descriptor_type() -> TypeNode {
    let entry = TypeNode::structure(
        "data",
        "ContainerEntry",
        vec![
            TypeNode::string("name"),
            TypeNode::scalar("preload_index", "int", 4),
            TypeNode::scalar("preload_size", "int", 4),
            TypeNode::pointer("asset", "Object"),
        ],
    );
    TypeNode::structure(
        "Base",
        "ContainerDescriptor",
        vec![
            TypeNode::string("name"),
            TypeNode::array("preload_table", TypeNode::pointer("data", "Object")),
            TypeNode::array("entries", entry),
            TypeNode::array("dependencies", TypeNode::string("data")),
        ],
    )
}

/// Returns true if `type_id` is the builtin self-descriptor type.
pub fn is_descriptor_type(type_id: i32) -> bool {
    type_id == DESCRIPTOR_TYPE_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_detection_looks_through_arrays() {
        let mesh = TypeNode::structure(
            "Base",
            "MeshFilter",
            vec![
                TypeNode::scalar("m_Enabled", "bool", 1),
                TypeNode::array("m_Materials", TypeNode::pointer("data", "Material")),
            ],
        );
        assert!(mesh.contains_pointers());
        assert!(!TypeNode::array("m_Data", TypeNode::scalar("data", "float", 4)).contains_pointers());
    }

    #[test]
    fn descriptor_layout_has_entry_table() {
        let desc = descriptor_type();
        assert!(desc.contains_pointers());
        assert!(desc.field("entries").is_some());
        assert!(desc.field("m_Missing").is_none());
    }

    #[test]
    fn missing_type_is_a_format_error() {
        let schema = Schema::new();
        assert!(matches!(schema.get(3), Err(RepackError::Format(_))));
    }
}
