//! The Write-Side Engine.
//!
//! [`ContainerWriter`] collects objects, their schemas, the dependency list and the
//! entry table, then emits a container in one deterministic pass:
//! payloads in ascending local id order (the self-descriptor first, at id 1), the
//! directory, and the global header.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use crate::descriptor::{ContainerEntry, Descriptor};
use crate::error::{RepackError, Result};
use crate::field::PPtr;
use crate::format::{
    DESCRIPTOR_LOCAL_ID, DESCRIPTOR_TYPE_ID, Directory, GlobalHeader, MAX_DEPENDENCIES,
    NULL_LOCAL_ID, ObjectRecord, checksum,
};
use crate::graph::{DependencyForest, NodeId};
use crate::io::{AtomicOutput, SeqWriter};
use crate::registry::IdentityRegistry;
use crate::schema::{TypeNode, descriptor_type};

/// Accumulates the content of one output container.
#[derive(Debug, Default)]
pub struct ContainerWriter {
    name: String,
    dependencies: Vec<String>,
    types: BTreeMap<i32, TypeNode>,
    objects: BTreeMap<i64, (i32, Vec<u8>)>,
    descriptor: Option<(Vec<ContainerEntry>, Vec<PPtr>)>,
}

impl ContainerWriter {
    /// Starts an empty container called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Registers the layout of `type_id`. Re-registering an identical layout is a no-op.
    pub fn add_type(&mut self, type_id: i32, layout: &TypeNode) -> Result<()> {
        match self.types.get(&type_id) {
            Some(existing) if existing != layout => Err(RepackError::Format(format!(
                "Conflicting layouts for type id {type_id}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.types.insert(type_id, layout.clone());
                Ok(())
            }
        }
    }

    /// Adds an object payload under `local_id`.
    pub fn add_object(&mut self, local_id: i64, type_id: i32, payload: Vec<u8>) -> Result<()> {
        if local_id == NULL_LOCAL_ID || (local_id == DESCRIPTOR_LOCAL_ID && self.descriptor.is_some()) {
            return Err(RepackError::Internal(format!(
                "Local id {local_id} is reserved"
            )));
        }
        if self.objects.contains_key(&local_id) {
            return Err(RepackError::DuplicateIdentityConflict {
                new_id: local_id,
                first: format!("object {local_id}"),
                second: format!("object {local_id}"),
            });
        }
        self.objects.insert(local_id, (type_id, payload));
        Ok(())
    }

    /// Sets the external dependency list, in `file_ref` order.
    pub fn set_dependencies(&mut self, dependencies: Vec<String>) -> Result<()> {
        if dependencies.len() > MAX_DEPENDENCIES {
            return Err(RepackError::DependencyListOverflow {
                count: dependencies.len(),
                max: MAX_DEPENDENCIES,
            });
        }
        self.dependencies = dependencies;
        Ok(())
    }

    /// Sets the entry table; a self-descriptor is written at local id 1.
    pub fn set_entries(&mut self, entries: Vec<ContainerEntry>, preload_table: Vec<PPtr>) -> Result<()> {
        if self.objects.contains_key(&DESCRIPTOR_LOCAL_ID) {
            return Err(RepackError::Internal(
                "Local id 1 already holds an object".into(),
            ));
        }
        self.descriptor = Some((entries, preload_table));
        Ok(())
    }

    /// Number of objects added, excluding the self-descriptor.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn descriptor_payload(&self) -> Option<Vec<u8>> {
        self.descriptor.as_ref().map(|(entries, preload_table)| {
            Descriptor {
                name: self.name.clone(),
                preload_table: preload_table.clone(),
                entries: entries.clone(),
                dependencies: self.dependencies.clone(),
            }
            .to_bytes()
        })
    }

    /// Writes the container to `out`. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, out: W) -> Result<u64> {
        let mut types = self.types.clone();
        let descriptor = self.descriptor_payload();
        if descriptor.is_some() {
            types.insert(DESCRIPTOR_TYPE_ID, descriptor_type());
        }
        for (local_id, (type_id, _)) in &self.objects {
            if !types.contains_key(type_id) {
                return Err(RepackError::Format(format!(
                    "Object {local_id} has type id {type_id} without a layout"
                )));
            }
        }

        let mut writer = SeqWriter::new(out);
        let mut records = Vec::with_capacity(self.objects.len() + 1);

        let payloads = descriptor
            .as_ref()
            .map(|p| (DESCRIPTOR_LOCAL_ID, DESCRIPTOR_TYPE_ID, p.as_slice()))
            .into_iter()
            .chain(
                self.objects
                    .iter()
                    .map(|(id, (type_id, payload))| (*id, *type_id, payload.as_slice())),
            );
        for (local_id, type_id, payload) in payloads {
            let offset = writer.write_all(payload)?;
            records.push(ObjectRecord {
                local_id,
                type_id,
                offset,
                length: payload.len() as u64,
            });
        }

        let directory = Directory {
            name: self.name.clone(),
            dependencies: self.dependencies.clone(),
            types: types.into_iter().collect(),
            objects: records,
        };
        let dir_bytes = directory.to_bytes()?;
        let dir_offset = writer.write_all(&dir_bytes)?;
        let header = GlobalHeader::new(dir_offset, dir_bytes.len() as u64, checksum(&dir_bytes));
        writer.write_all(&header.to_bytes())?;
        writer.flush()?;
        Ok(writer.current_offset())
    }

    /// Writes the container into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Writes the container to `path` through a temporary file, moving it into place
    /// only once everything has been written.
    pub fn write_atomic(&self, path: &Path) -> Result<u64> {
        let mut output = AtomicOutput::create(path)?;
        let written = self.write_to(output.writer())?;
        output.commit()?;
        Ok(written)
    }
}

/// Computes entry table rows and the preload table for `roots`.
///
/// Each entry's range lists the distinct identities of its own tree in depth-first
/// order, the entry itself first. Objects shared between entries appear in every
/// range that reaches them; objects without a new id are left out.
pub fn build_entries(
    forest: &DependencyForest,
    registry: &IdentityRegistry,
    roots: &[(NodeId, String)],
) -> Result<(Vec<ContainerEntry>, Vec<PPtr>)> {
    let mut entries = Vec::with_capacity(roots.len());
    let mut preload = Vec::new();
    for (root, display_name) in roots {
        let start = preload.len();
        let mut seen = HashSet::new();
        for node in forest.subtree(*root) {
            if !seen.insert(node.identity) {
                continue;
            }
            // Excluded objects have no new id and stay out of the range.
            if let Some(new_id) = registry.new_id(&node.identity) {
                preload.push(PPtr::new(0, new_id));
            }
        }
        let new_local_id = registry
            .new_id(&forest.node(*root)?.identity)
            .ok_or_else(|| RepackError::Internal("Root missing from registry".into()))?;
        let to_i32 = |v: usize| {
            i32::try_from(v).map_err(|_| RepackError::Format("Preload table exceeds i32 range".into()))
        };
        entries.push(ContainerEntry {
            display_name: display_name.clone(),
            new_local_id,
            range_start: to_i32(start)?,
            range_length: to_i32(preload.len() - start)?,
        });
    }
    Ok((entries, preload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PayloadBuilder;
    use crate::reader::ContainerReader;

    fn point_type() -> TypeNode {
        TypeNode::structure(
            "Base",
            "Marker",
            vec![TypeNode::string("m_Name"), TypeNode::pointer("m_Next", "Marker")],
        )
    }

    fn sample() -> Result<ContainerWriter> {
        let mut w = ContainerWriter::new("markers");
        w.add_type(7, &point_type())?;
        w.add_object(3, 7, PayloadBuilder::new().string("b").pointer(PPtr::NULL).build())?;
        w.add_object(2, 7, PayloadBuilder::new().string("a").pointer(PPtr::new(0, 3)).build())?;
        w.set_dependencies(vec!["shared.rpk".into()])?;
        w.set_entries(
            vec![ContainerEntry {
                display_name: "a".into(),
                new_local_id: 2,
                range_start: 0,
                range_length: 2,
            }],
            vec![PPtr::new(0, 2), PPtr::new(0, 3)],
        )?;
        Ok(w)
    }

    #[test]
    fn output_is_readable_and_ordered() -> Result<()> {
        let reader = ContainerReader::from_bytes(sample()?.to_bytes()?)?;
        let ids: Vec<i64> = reader.records().iter().map(|r| r.local_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(reader.dependencies(), ["shared.rpk".to_string()]);
        let desc = reader.descriptor()?.ok_or_else(|| RepackError::Format("no descriptor".into()))?;
        assert_eq!(desc.entries[0].display_name, "a");
        assert_eq!(desc.dependencies, reader.dependencies());
        Ok(())
    }

    #[test]
    fn writing_twice_is_byte_identical() -> Result<()> {
        assert_eq!(sample()?.to_bytes()?, sample()?.to_bytes()?);
        Ok(())
    }

    #[test]
    fn duplicate_ids_are_rejected() -> Result<()> {
        let mut w = sample()?;
        let err = w.add_object(2, 7, Vec::new());
        assert!(matches!(err, Err(RepackError::DuplicateIdentityConflict { new_id: 2, .. })));
        Ok(())
    }

    #[test]
    fn objects_need_a_layout() -> Result<()> {
        let mut w = ContainerWriter::new("x");
        w.add_object(2, 99, Vec::new())?;
        assert!(matches!(w.to_bytes(), Err(RepackError::Format(_))));
        Ok(())
    }

    #[test]
    fn entry_ranges_skip_unregistered_objects() -> Result<()> {
        use crate::field::{FieldNode, FieldValue};
        use crate::object::{ContainerId, ObjectIdentity, ObjectStore, ResolvedObject};

        let mut store = ObjectStore::new();
        let mut forest = DependencyForest::new();
        let mut add = |local_id: i64, parent: Option<NodeId>| -> Result<NodeId> {
            let identity = ObjectIdentity::new(ContainerId::new(0), local_id);
            let root = FieldNode {
                name: "Base".into(),
                type_name: "T".into(),
                has_pointers: false,
                value: FieldValue::Struct(Vec::new()),
            };
            let key = store.insert(ResolvedObject::new(identity, 1, root))?;
            forest.add_node(key, identity, parent)
        };
        let root = add(10, None)?;
        add(20, Some(root))?;
        add(30, Some(root))?;

        let skipped = HashSet::from([ObjectIdentity::new(ContainerId::new(0), 20)]);
        let mut registry = IdentityRegistry::default();
        registry.register_excluding(&forest, &skipped)?;

        let (entries, preload) = build_entries(&forest, &registry, &[(root, "a".into())])?;
        assert_eq!(preload, vec![PPtr::new(0, 2), PPtr::new(0, 3)]);
        assert_eq!(entries[0].new_local_id, 2);
        assert_eq!(entries[0].range_length, 2);
        Ok(())
    }

    #[test]
    fn atomic_write_lands_at_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.rpk");
        let written = sample()?.write_atomic(&path)?;
        assert_eq!(std::fs::metadata(&path)?.len(), written);
        assert_eq!(ContainerReader::open(&path)?.name(), "markers");
        Ok(())
    }
}
