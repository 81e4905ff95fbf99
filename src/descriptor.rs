//! The self-descriptor object stored at local id 1 of every written container.
//!
//! It carries the entry table (display name to new id, plus the entry's preload
//! sub-range), the preload table itself, and a copy of the dependency list.

use serde::Serialize;

use crate::error::{RepackError, Result};
use crate::field::{FieldNode, PPtr, PayloadBuilder};
use crate::schema::descriptor_type;

/// One exported object and its preload sub-range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerEntry {
    /// Name the entry is exported under.
    pub display_name: String,
    /// Local id of the object in the written container.
    pub new_local_id: i64,
    /// First index of this entry's range in the preload table.
    pub range_start: i32,
    /// Number of preload table slots belonging to this entry.
    pub range_length: i32,
}

/// Decoded content of a self-descriptor object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    /// Container display name.
    pub name: String,
    /// Flattened per-entry closures, referenced by the entry ranges.
    pub preload_table: Vec<PPtr>,
    /// Exported entries in caller order.
    pub entries: Vec<ContainerEntry>,
    /// External dependency paths.
    pub dependencies: Vec<String>,
}

impl Descriptor {
    /// Encodes the descriptor according to [`descriptor_type`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = PayloadBuilder::new()
            .string(&self.name)
            .count(self.preload_table.len() as u32);
        for p in &self.preload_table {
            b = b.pointer(*p);
        }
        b = b.count(self.entries.len() as u32);
        for e in &self.entries {
            b = b
                .string(&e.display_name)
                .i32(e.range_start)
                .i32(e.range_length)
                .pointer(PPtr::new(0, e.new_local_id));
        }
        b = b.count(self.dependencies.len() as u32);
        for d in &self.dependencies {
            b = b.string(d);
        }
        b.build()
    }

    /// Decodes a descriptor payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tree = FieldNode::parse(bytes, &descriptor_type())?;
        Self::from_tree(&tree)
    }

    /// Decodes a descriptor from its parsed field tree.
    pub fn from_tree(tree: &FieldNode) -> Result<Self> {
        let field = |node: &FieldNode, name: &str| -> Result<FieldNode> {
            node.child(name).cloned().ok_or_else(|| {
                RepackError::malformed("ContainerDescriptor", name, "field missing")
            })
        };
        let text = |node: &FieldNode| -> String { node.as_str().unwrap_or_default().to_string() };

        let name = text(&field(tree, "name")?);
        let preload_table = field(tree, "preload_table")?
            .children()
            .iter()
            .filter_map(FieldNode::pointer)
            .collect();

        let mut entries = Vec::new();
        for item in field(tree, "entries")?.children() {
            let int = |n: &str| -> Result<i32> {
                field(item, n)?
                    .as_u64()
                    .map(|v| v as u32 as i32)
                    .ok_or_else(|| RepackError::malformed("int", n, "not an integer"))
            };
            let asset = field(item, "asset")?
                .pointer()
                .ok_or_else(|| RepackError::malformed("PPtr<Object>", "asset", "not a pointer"))?;
            entries.push(ContainerEntry {
                display_name: text(&field(item, "name")?),
                new_local_id: asset.local_id,
                range_start: int("preload_index")?,
                range_length: int("preload_size")?,
            });
        }

        let dependencies = field(tree, "dependencies")?
            .children()
            .iter()
            .map(text)
            .collect();

        Ok(Self {
            name,
            preload_table,
            entries,
            dependencies,
        })
    }

    /// The preload slice of `entry`.
    pub fn preload_of(&self, entry: &ContainerEntry) -> &[PPtr] {
        let start = entry.range_start.max(0) as usize;
        let end = start.saturating_add(entry.range_length.max(0) as usize);
        self.preload_table.get(start..end).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_decodes_what_it_encodes() -> Result<()> {
        let desc = Descriptor {
            name: "props".into(),
            preload_table: vec![PPtr::new(0, 2), PPtr::new(0, 3), PPtr::new(0, 3)],
            entries: vec![
                ContainerEntry {
                    display_name: "crate".into(),
                    new_local_id: 2,
                    range_start: 0,
                    range_length: 2,
                },
                ContainerEntry {
                    display_name: "lid".into(),
                    new_local_id: 3,
                    range_start: 2,
                    range_length: 1,
                },
            ],
            dependencies: vec!["shared.rpk".into()],
        };
        let decoded = Descriptor::from_bytes(&desc.to_bytes())?;
        assert_eq!(decoded, desc);
        assert_eq!(decoded.preload_of(&decoded.entries[1]), &[PPtr::new(0, 3)]);
        Ok(())
    }
}
