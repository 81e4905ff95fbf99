//! Tools for inspecting the physical structure of containers.
//! Useful for verifying repack output and debugging broken references.

use crate::error::Result;
use crate::format::{DESCRIPTOR_LOCAL_ID, FORMAT_VERSION};
use crate::reader::ContainerReader;
use serde::Serialize;
use std::path::Path;

/// A structural report of a container.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Total size of the file on disk.
    pub file_size: u64,
    /// Offset where the directory starts.
    pub directory_offset: u64,
    /// Format version.
    pub version: u16,
    /// Container name from the directory.
    pub name: String,
    /// External dependency list, in `file_ref` order.
    pub dependencies: Vec<String>,
    /// Every stored object.
    pub objects: Vec<ObjectInfo>,
    /// Entry table rows with their preload ranges resolved.
    pub entries: Vec<EntryInfo>,
}

/// Metadata for one stored object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    /// Local id.
    pub local_id: i64,
    /// Schema type id.
    pub type_id: i32,
    /// Type name from the schema, or `"?"` if the schema lacks it.
    pub type_name: String,
    /// Display name, empty if the object has none or fails to parse.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Number of non-null pointers.
    pub pointers: usize,
    /// Parse error, if the payload does not match its layout.
    pub error: Option<String>,
}

/// One entry of the self-descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    /// Exported name.
    pub name: String,
    /// Local id of the entry object.
    pub local_id: i64,
    /// Preload range members as `(file_ref, local_id)`.
    pub preload: Vec<(i32, i64)>,
}

/// The container inspector.
#[derive(Debug)]
pub struct ContainerInspector;

impl ContainerInspector {
    /// Analyzes a file and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<InspectReport> {
        Self::inspect_reader(&ContainerReader::open(path)?)
    }

    /// Same as [`ContainerInspector::inspect`] for an already opened container.
    pub fn inspect_reader(reader: &ContainerReader) -> Result<InspectReport> {
        let objects = reader
            .records()
            .iter()
            .filter(|r| r.local_id != DESCRIPTOR_LOCAL_ID)
            .map(|record| {
                let type_name = reader
                    .schema()
                    .get(record.type_id)
                    .map(|t| t.type_name.clone())
                    .unwrap_or_else(|_| "?".to_string());
                let mut info = ObjectInfo {
                    local_id: record.local_id,
                    type_id: record.type_id,
                    type_name,
                    name: String::new(),
                    size: record.length,
                    pointers: 0,
                    error: None,
                };
                match reader.parse_object(record.local_id) {
                    Ok(Some((_, root))) => {
                        info.name = ["m_Name", "name"]
                            .iter()
                            .find_map(|n| root.child(n).and_then(|c| c.as_str()))
                            .unwrap_or_default()
                            .to_string();
                        info.pointers = root.pointers().filter(|(_, p)| !p.is_null()).count();
                    }
                    Ok(None) => {}
                    Err(e) => info.error = Some(e.to_string()),
                }
                info
            })
            .collect();

        let entries = match reader.descriptor()? {
            Some(desc) => desc
                .entries
                .iter()
                .map(|e| EntryInfo {
                    name: e.display_name.clone(),
                    local_id: e.new_local_id,
                    preload: desc
                        .preload_of(e)
                        .iter()
                        .map(|p| (p.file_ref, p.local_id))
                        .collect(),
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(InspectReport {
            file_size: reader.file_size(),
            directory_offset: reader.header().directory_offset,
            version: FORMAT_VERSION,
            name: reader.name().to_string(),
            dependencies: reader.dependencies().to_vec(),
            objects,
            entries,
        })
    }
}

impl InspectReport {
    fn object(&self, local_id: i64) -> Option<&ObjectInfo> {
        self.objects
            .binary_search_by_key(&local_id, |o| o.local_id)
            .ok()
            .and_then(|i| self.objects.get(i))
    }
}

impl std::fmt::Display for InspectReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== CONTAINER REPORT: {} ===", self.name)?;
        writeln!(f, "File Size:        {}", self.file_size)?;
        writeln!(f, "Directory Offset: {}", self.directory_offset)?;
        writeln!(f, "Objects:          {}", self.objects.len())?;
        if !self.dependencies.is_empty() {
            writeln!(f, "\n[DEPENDENCIES]")?;
            for (i, dep) in self.dependencies.iter().enumerate() {
                writeln!(f, "  {}: {}", i + 1, dep)?;
            }
        }
        writeln!(f, "\n[ENTRIES]")?;
        for (i, entry) in self.entries.iter().enumerate() {
            let is_last = i == self.entries.len() - 1;
            self.fmt_entry(f, entry, is_last)?;
        }
        let broken: Vec<_> = self.objects.iter().filter(|o| o.error.is_some()).collect();
        if !broken.is_empty() {
            writeln!(f, "\n[UNREADABLE]")?;
            for o in broken {
                writeln!(f, "  {}: {}", o.local_id, o.error.as_deref().unwrap_or_default())?;
            }
        }
        Ok(())
    }
}

impl InspectReport {
    fn fmt_entry(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        entry: &EntryInfo,
        is_last: bool,
    ) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        writeln!(f, "{}\"{}\" -> {}", connector, entry.name, entry.local_id)?;

        for (i, (file_ref, local_id)) in entry.preload.iter().enumerate() {
            let connector = if i == entry.preload.len() - 1 { "└── " } else { "├── " };
            let label = match (file_ref, self.object(*local_id)) {
                (0, Some(o)) => format!("[{}] {} {:?} | Size: {}b", o.local_id, o.type_name, o.name, o.size),
                (0, None) => format!("[{local_id}] <missing>"),
                (dep, _) => format!("[{dep}:{local_id}] external"),
            };
            writeln!(f, "{child_prefix}{connector}{label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ContainerEntry;
    use crate::field::{PPtr, PayloadBuilder};
    use crate::schema::TypeNode;
    use crate::writer::ContainerWriter;

    #[test]
    fn reports_entries_and_objects() -> Result<()> {
        let ty = TypeNode::structure(
            "Base",
            "Material",
            vec![TypeNode::string("m_Name"), TypeNode::pointer("m_Shader", "Shader")],
        );
        let mut w = ContainerWriter::new("mats");
        w.add_type(21, &ty)?;
        w.add_object(2, 21, PayloadBuilder::new().string("stone").pointer(PPtr::new(1, 9)).build())?;
        w.set_dependencies(vec!["shaders.rpk".into()])?;
        w.set_entries(
            vec![ContainerEntry {
                display_name: "stone".into(),
                new_local_id: 2,
                range_start: 0,
                range_length: 1,
            }],
            vec![PPtr::new(0, 2)],
        )?;

        let report = ContainerInspector::inspect_reader(&ContainerReader::from_bytes(w.to_bytes()?)?)?;
        assert_eq!(report.objects.len(), 1);
        assert_eq!(report.objects[0].name, "stone");
        assert_eq!(report.objects[0].pointers, 1);
        assert_eq!(report.entries[0].preload, vec![(0, 2)]);

        let text = report.to_string();
        assert!(text.contains("\"stone\" -> 2"));
        assert!(text.contains("1: shaders.rpk"));
        Ok(())
    }
}
