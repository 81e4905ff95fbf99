//! Schema-driven field tree.
//!
//! [`FieldNode::parse`] turns an object's raw payload into an owned tree by walking the
//! object's [`TypeNode`]; [`FieldNode::serialize`] writes it back. The two are exact
//! inverses for any tree that was not mutated in between.
//!
//! Pointer fields are fixed width ([`PPtr::SIZE`]) so rewriting a pointer in place never
//! changes the layout of its siblings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RepackError, Result};
use crate::schema::{POINTER_WIDTH, TypeKind, TypeNode};

/// A typed pointer as stored inside an object: dependency index plus local id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PPtr {
    /// 0 for the same container, otherwise `dependency index + 1`.
    pub file_ref: i32,
    /// Local id of the target inside the container named by `file_ref`.
    pub local_id: i64,
}

impl PPtr {
    /// The size in bytes of a serialized pointer.
    pub const SIZE: usize = POINTER_WIDTH as usize;

    /// The "no reference" sentinel.
    pub const NULL: PPtr = PPtr {
        file_ref: 0,
        local_id: 0,
    };

    /// Creates a pointer.
    pub fn new(file_ref: i32, local_id: i64) -> Self {
        Self { file_ref, local_id }
    }

    /// Returns true if the pointer names no object.
    pub fn is_null(&self) -> bool {
        self.local_id == 0
    }

    /// Serializes to a fixed-size byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.file_ref.to_le_bytes());
        buf[4..12].copy_from_slice(&self.local_id.to_le_bytes());
        buf
    }

    /// Deserializes from exactly [`PPtr::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let file_ref = i32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let local_id = i64::from_le_bytes(bytes[4..12].try_into().ok()?);
        Some(Self { file_ref, local_id })
    }
}

impl fmt::Debug for PPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PPtr({}, {})", self.file_ref, self.local_id)
    }
}

/// Raw scalar content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    /// Fixed-width bytes, width given by the schema.
    Fixed(Vec<u8>),
    /// Length-prefixed bytes.
    Blob(Vec<u8>),
}

impl Scalar {
    /// The scalar's content, without any length prefix.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Fixed(b) | Self::Blob(b) => b,
        }
    }
}

/// Kind tag of a [`FieldNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Scalar or blob.
    Scalar,
    /// Counted sequence.
    Array,
    /// Named fields.
    Struct,
    /// Reference to another object.
    Pointer,
}

/// Content of a [`FieldNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Leaf data, never inspected by the engine.
    Scalar(Scalar),
    /// Array elements.
    Array(Vec<FieldNode>),
    /// Struct fields.
    Struct(Vec<FieldNode>),
    /// Pointer target.
    Pointer(PPtr),
}

/// One node of an object's field tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    /// Field name.
    pub name: String,
    /// Declared type name.
    pub type_name: String,
    /// Whether the subtree contains any pointer. Lets walkers skip plain data.
    pub has_pointers: bool,
    /// Content.
    pub value: FieldValue,
}

impl FieldNode {
    /// Parses `bytes` according to `schema`. The whole slice must be consumed.
    pub fn parse(bytes: &[u8], schema: &TypeNode) -> Result<Self> {
        let mut cursor = ByteCursor { bytes, pos: 0 };
        let root = cursor.read_node(schema)?;
        if cursor.pos != bytes.len() {
            return Err(RepackError::malformed(
                &schema.type_name,
                &schema.name,
                format!("{} trailing bytes", bytes.len() - cursor.pos),
            ));
        }
        Ok(root)
    }

    /// Writes the tree back to its binary form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match &node.value {
                FieldValue::Scalar(Scalar::Fixed(b)) => out.extend_from_slice(b),
                FieldValue::Scalar(Scalar::Blob(b)) => {
                    out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                    out.extend_from_slice(b);
                }
                FieldValue::Pointer(p) => out.extend_from_slice(&p.to_bytes()),
                FieldValue::Array(items) => {
                    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                    stack.extend(items.iter().rev());
                }
                FieldValue::Struct(fields) => stack.extend(fields.iter().rev()),
            }
        }
        out
    }

    /// Kind tag.
    pub fn kind(&self) -> FieldKind {
        match self.value {
            FieldValue::Scalar(_) => FieldKind::Scalar,
            FieldValue::Array(_) => FieldKind::Array,
            FieldValue::Struct(_) => FieldKind::Struct,
            FieldValue::Pointer(_) => FieldKind::Pointer,
        }
    }

    /// Returns true for pointer nodes.
    pub fn is_pointer(&self) -> bool {
        matches!(self.value, FieldValue::Pointer(_))
    }

    /// The pointer target, for pointer nodes.
    pub fn pointer(&self) -> Option<PPtr> {
        match self.value {
            FieldValue::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Child nodes of structs and arrays.
    pub fn children(&self) -> &[FieldNode] {
        match &self.value {
            FieldValue::Array(c) | FieldValue::Struct(c) => c,
            _ => &[],
        }
    }

    /// Direct struct field by name.
    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        match &self.value {
            FieldValue::Struct(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Mutable direct struct field by name.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut FieldNode> {
        match &mut self.value {
            FieldValue::Struct(fields) => fields.iter_mut().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Raw scalar bytes.
    pub fn scalar_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            FieldValue::Scalar(s) => Some(s.bytes()),
            _ => None,
        }
    }

    /// Reads a little-endian unsigned integer scalar of width 1, 2, 4 or 8.
    pub fn as_u64(&self) -> Option<u64> {
        let bytes = match &self.value {
            FieldValue::Scalar(Scalar::Fixed(b)) => b,
            _ => return None,
        };
        let mut buf = [0u8; 8];
        match bytes.len() {
            1 | 2 | 4 | 8 => {
                buf[..bytes.len()].copy_from_slice(bytes);
                Some(u64::from_le_bytes(buf))
            }
            _ => None,
        }
    }

    /// Reads a blob scalar as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            FieldValue::Scalar(Scalar::Blob(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Overwrites a fixed-width integer scalar, keeping its width.
    pub fn set_u64(&mut self, value: u64) -> Result<()> {
        match &mut self.value {
            FieldValue::Scalar(Scalar::Fixed(b)) if matches!(b.len(), 1 | 2 | 4 | 8) => {
                let width = b.len();
                if width < 8 && value >> (width * 8) != 0 {
                    return Err(RepackError::malformed(
                        &self.type_name,
                        &self.name,
                        format!("value {value} does not fit {width} bytes"),
                    ));
                }
                b.copy_from_slice(&value.to_le_bytes()[..width]);
                Ok(())
            }
            _ => Err(RepackError::malformed(
                &self.type_name,
                &self.name,
                "not an integer scalar",
            )),
        }
    }

    /// Replaces the content of a blob scalar.
    pub fn set_blob(&mut self, data: Vec<u8>) -> Result<()> {
        match &mut self.value {
            FieldValue::Scalar(Scalar::Blob(b)) => {
                *b = data;
                Ok(())
            }
            _ => Err(RepackError::malformed(
                &self.type_name,
                &self.name,
                "not a blob field",
            )),
        }
    }

    /// Iterates every pointer in document order, skipping pointer-free subtrees.
    pub fn pointers(&self) -> Pointers<'_> {
        Pointers { stack: vec![self] }
    }

    /// Calls `f` on every pointer in document order, allowing in-place rewrites.
    ///
    /// Stops at the first error returned by `f`.
    pub fn visit_pointers_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &mut PPtr) -> Result<()>,
    {
        let mut stack: Vec<&mut FieldNode> = vec![self];
        while let Some(node) = stack.pop() {
            if !node.has_pointers {
                continue;
            }
            let FieldNode { name, value, .. } = node;
            match value {
                FieldValue::Pointer(p) => f(name, p)?,
                FieldValue::Array(c) | FieldValue::Struct(c) => stack.extend(c.iter_mut().rev()),
                FieldValue::Scalar(_) => {}
            }
        }
        Ok(())
    }
}

/// Iterator returned by [`FieldNode::pointers`].
#[derive(Debug)]
pub struct Pointers<'a> {
    stack: Vec<&'a FieldNode>,
}

impl<'a> Iterator for Pointers<'a> {
    type Item = (&'a FieldNode, PPtr);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if !node.has_pointers {
                continue;
            }
            match &node.value {
                FieldValue::Pointer(p) => return Some((node, *p)),
                FieldValue::Array(c) | FieldValue::Struct(c) => self.stack.extend(c.iter().rev()),
                FieldValue::Scalar(_) => {}
            }
        }
        None
    }
}

struct ByteCursor<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl ByteCursor<'_> {
    fn take(&mut self, len: usize, schema: &TypeNode) -> Result<&[u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(RepackError::malformed(
                &schema.type_name,
                &schema.name,
                format!(
                    "needs {len} bytes at offset {}, {} available",
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                ),
            )),
        }
    }

    fn read_u32(&mut self, schema: &TypeNode) -> Result<u32> {
        let b = self.take(4, schema)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_node(&mut self, schema: &TypeNode) -> Result<FieldNode> {
        let value = match &schema.kind {
            TypeKind::Scalar { width } => {
                FieldValue::Scalar(Scalar::Fixed(self.take(*width as usize, schema)?.to_vec()))
            }
            TypeKind::Blob => {
                let len = self.read_u32(schema)? as usize;
                FieldValue::Scalar(Scalar::Blob(self.take(len, schema)?.to_vec()))
            }
            TypeKind::Pointer { width } => {
                if *width != POINTER_WIDTH {
                    return Err(RepackError::malformed(
                        &schema.type_name,
                        &schema.name,
                        format!("pointer declared {width} bytes wide, expected {POINTER_WIDTH}"),
                    ));
                }
                let raw = self.take(PPtr::SIZE, schema)?;
                let ptr = PPtr::from_bytes(raw).ok_or_else(|| {
                    RepackError::malformed(&schema.type_name, &schema.name, "bad pointer bytes")
                })?;
                FieldValue::Pointer(ptr)
            }
            TypeKind::Array { element } => {
                let count = self.read_u32(schema)? as usize;
                let remaining = self.bytes.len() - self.pos;
                let mut items = Vec::with_capacity(count.min(remaining));
                for _ in 0..count {
                    items.push(self.read_node(element)?);
                }
                FieldValue::Array(items)
            }
            TypeKind::Struct { fields } => {
                let mut items = Vec::with_capacity(fields.len());
                for field in fields {
                    items.push(self.read_node(field)?);
                }
                FieldValue::Struct(items)
            }
        };
        // Taken from the parsed children so the schema is walked once per node.
        let has_pointers = match (&value, &schema.kind) {
            (FieldValue::Pointer(_), _) => true,
            (FieldValue::Struct(items), _) => items.iter().any(|f| f.has_pointers),
            (FieldValue::Array(items), TypeKind::Array { element }) => match items.first() {
                Some(first) => first.has_pointers,
                None => element.contains_pointers(),
            },
            _ => false,
        };
        Ok(FieldNode {
            name: schema.name.clone(),
            type_name: schema.type_name.clone(),
            has_pointers,
            value,
        })
    }
}

/// Builds raw payload bytes field by field; the writing counterpart to
/// [`FieldNode::parse`] for callers that produce objects from scratch.
#[derive(Debug, Default, Clone)]
pub struct PayloadBuilder {
    buf: Vec<u8>,
}

impl PayloadBuilder {
    /// Starts an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a little-endian `i32`.
    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Appends a little-endian `u32`.
    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Appends a little-endian `u64`.
    pub fn u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Appends a length-prefixed string.
    pub fn string(self, s: &str) -> Self {
        self.blob(s.as_bytes())
    }

    /// Appends length-prefixed bytes.
    pub fn blob(mut self, b: &[u8]) -> Self {
        self.buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(b);
        self
    }

    /// Appends a pointer.
    pub fn pointer(mut self, p: PPtr) -> Self {
        self.buf.extend_from_slice(&p.to_bytes());
        self
    }

    /// Appends an array count; elements follow with further calls.
    pub fn count(self, n: u32) -> Self {
        self.u32(n)
    }

    /// Finishes the payload.
    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer_type() -> TypeNode {
        TypeNode::structure(
            "Base",
            "Renderer",
            vec![
                TypeNode::string("m_Name"),
                TypeNode::scalar("m_Layer", "int", 4),
                TypeNode::array("m_Materials", TypeNode::pointer("data", "Material")),
                TypeNode::pointer("m_Mesh", "Mesh"),
            ],
        )
    }

    fn renderer_bytes() -> Vec<u8> {
        PayloadBuilder::new()
            .string("body")
            .i32(5)
            .count(2)
            .pointer(PPtr::new(0, 7))
            .pointer(PPtr::new(1, 9))
            .pointer(PPtr::NULL)
            .build()
    }

    #[test]
    fn parse_then_serialize_is_identity() -> Result<()> {
        let raw = renderer_bytes();
        let tree = FieldNode::parse(&raw, &renderer_type())?;
        assert_eq!(tree.serialize(), raw);
        assert_eq!(FieldNode::parse(&tree.serialize(), &renderer_type())?, tree);
        Ok(())
    }

    #[test]
    fn pointer_flags_follow_the_layout() -> Result<()> {
        let tree = FieldNode::parse(&renderer_bytes(), &renderer_type())?;
        let flag = |name: &str| tree.child(name).map(|c| c.has_pointers);
        assert!(tree.has_pointers);
        assert_eq!(flag("m_Name"), Some(false));
        assert_eq!(flag("m_Materials"), Some(true));

        let empty = PayloadBuilder::new().string("bare").i32(0).count(0).pointer(PPtr::NULL).build();
        let tree = FieldNode::parse(&empty, &renderer_type())?;
        assert_eq!(tree.child("m_Materials").map(|c| c.has_pointers), Some(true));
        Ok(())
    }

    #[test]
    fn pointers_come_out_in_document_order() -> Result<()> {
        let tree = FieldNode::parse(&renderer_bytes(), &renderer_type())?;
        let found: Vec<_> = tree.pointers().map(|(node, p)| (node.name.clone(), p)).collect();
        assert_eq!(
            found,
            vec![
                ("data".to_string(), PPtr::new(0, 7)),
                ("data".to_string(), PPtr::new(1, 9)),
                ("m_Mesh".to_string(), PPtr::NULL),
            ]
        );
        Ok(())
    }

    #[test]
    fn rewriting_a_pointer_keeps_length() -> Result<()> {
        let raw = renderer_bytes();
        let mut tree = FieldNode::parse(&raw, &renderer_type())?;
        tree.visit_pointers_mut(|_, p| {
            if p.local_id == 7 {
                *p = PPtr::new(0, 2);
            }
            Ok(())
        })?;
        let out = tree.serialize();
        assert_eq!(out.len(), raw.len());
        assert_eq!(tree.child("m_Name").and_then(FieldNode::as_str), Some("body"));
        Ok(())
    }

    #[test]
    fn narrow_pointer_is_malformed() {
        let schema = TypeNode::structure(
            "Base",
            "Broken",
            vec![TypeNode {
                name: "m_Target".into(),
                type_name: "PPtr<Object>".into(),
                kind: TypeKind::Pointer { width: 8 },
            }],
        );
        let err = FieldNode::parse(&[0u8; 8], &schema);
        assert!(matches!(err, Err(RepackError::MalformedField { .. })));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut raw = renderer_bytes();
        raw.truncate(raw.len() - 3);
        assert!(matches!(
            FieldNode::parse(&raw, &renderer_type()),
            Err(RepackError::MalformedField { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = renderer_bytes();
        raw.push(0);
        assert!(FieldNode::parse(&raw, &renderer_type()).is_err());
    }

    #[test]
    fn set_u64_respects_width() -> Result<()> {
        let schema = TypeNode::structure("Base", "S", vec![TypeNode::scalar("m_Size", "unsigned int", 4)]);
        let mut tree = FieldNode::parse(&[1, 0, 0, 0], &schema)?;
        let size = tree.child_mut("m_Size").ok_or_else(|| RepackError::Internal("no field".into()))?;
        size.set_u64(0)?;
        assert!(size.set_u64(u64::from(u32::MAX) + 1).is_err());
        assert_eq!(tree.serialize(), vec![0, 0, 0, 0]);
        Ok(())
    }
}
