//! The Read-Side Engine.
//!
//! Handles memory-mapping the file, validating the global structure,
//! and providing random access to objects by local id.

use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use crate::descriptor::Descriptor;
use crate::error::{RepackError, Result};
use crate::field::FieldNode;
use crate::format::{
    DESCRIPTOR_LOCAL_ID, Directory, GLOBAL_HEADER_SIZE, GlobalHeader, ObjectRecord, checksum,
};
use crate::schema::{Schema, is_descriptor_type};

/// Backing storage of a container.
#[derive(Debug)]
pub enum DataSource {
    /// A memory-mapped file.
    Mapped(Mmap),
    /// An owned in-memory buffer.
    Memory(Vec<u8>),
}

impl Deref for DataSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Memory(v) => v,
        }
    }
}

/// The main handle for reading a container.
/// It holds the data source, the decoded directory and its schema.
#[derive(Debug)]
pub struct ContainerReader {
    data: DataSource,
    header: GlobalHeader,
    directory: Directory,
    schema: Schema,
}

impl ContainerReader {
    /// Opens a container file and validates its integrity.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;

        // Safety: Mmap is fundamentally unsafe as external processes could modify the file.
        // We assume exclusive access for the lifetime of the reader.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        Self::from_source(DataSource::Mapped(mmap))
    }

    /// Reads a container held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(DataSource::Memory(bytes))
    }

    fn from_source(data: DataSource) -> Result<Self> {
        let file_size = data.len();
        if file_size < GLOBAL_HEADER_SIZE {
            return Err(RepackError::Format("File smaller than header".into()));
        }
        let header = GlobalHeader::from_bytes(&data[file_size - GLOBAL_HEADER_SIZE..])?;

        let dir_start = usize::try_from(header.directory_offset)
            .map_err(|_| RepackError::Format("Directory offset overflow".into()))?;
        let dir_len = usize::try_from(header.directory_length)
            .map_err(|_| RepackError::Format("Directory length overflow".into()))?;
        let dir_end = dir_start
            .checked_add(dir_len)
            .filter(|end| *end <= file_size - GLOBAL_HEADER_SIZE)
            .ok_or_else(|| RepackError::Format("Directory out of file bounds".into()))?;

        let dir_bytes = &data[dir_start..dir_end];
        if checksum(dir_bytes) != header.checksum {
            return Err(RepackError::Format("Directory checksum mismatch".into()));
        }
        let directory = Directory::from_bytes(dir_bytes)?;

        let mut previous: Option<i64> = None;
        for record in &directory.objects {
            if previous.is_some_and(|p| p >= record.local_id) {
                return Err(RepackError::Format(format!(
                    "Object records not strictly ascending at local id {}",
                    record.local_id
                )));
            }
            previous = Some(record.local_id);
            let in_bounds = record
                .offset
                .checked_add(record.length)
                .is_some_and(|end| end <= header.directory_offset);
            if !in_bounds {
                return Err(RepackError::Format(format!(
                    "Object {} out of payload bounds",
                    record.local_id
                )));
            }
        }

        let schema = directory.types.iter().cloned().collect();

        Ok(Self {
            data,
            header,
            directory,
            schema,
        })
    }

    /// Container display name.
    pub fn name(&self) -> &str {
        &self.directory.name
    }

    /// External dependency paths; `file_ref` n refers to entry n - 1.
    pub fn dependencies(&self) -> &[String] {
        &self.directory.dependencies
    }

    /// Schema of the stored types.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// All object records in ascending local id order.
    pub fn records(&self) -> &[ObjectRecord] {
        &self.directory.objects
    }

    /// Total size of the container in bytes.
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The parsed global header.
    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    /// Looks up an object record by local id.
    pub fn record(&self, local_id: i64) -> Option<&ObjectRecord> {
        self.directory
            .objects
            .binary_search_by_key(&local_id, |r| r.local_id)
            .ok()
            .and_then(|idx| self.directory.objects.get(idx))
    }

    /// Raw payload bytes of an object.
    ///
    /// Fails if `record` lies outside this container's payload region.
    pub fn raw_object(&self, record: &ObjectRecord) -> Result<&[u8]> {
        let out_of_bounds = || {
            RepackError::Format(format!(
                "Object {} range {}+{} is outside the file",
                record.local_id, record.offset, record.length
            ))
        };
        let start = usize::try_from(record.offset).map_err(|_| out_of_bounds())?;
        let len = usize::try_from(record.length).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        self.data.get(start..end).ok_or_else(out_of_bounds)
    }

    /// Parses an object into its field tree. Returns `None` if the id does not exist.
    pub fn parse_object(&self, local_id: i64) -> Result<Option<(i32, FieldNode)>> {
        let Some(record) = self.record(local_id) else {
            return Ok(None);
        };
        let schema = self.schema.get(record.type_id)?;
        let tree = FieldNode::parse(self.raw_object(record)?, schema)?;
        Ok(Some((record.type_id, tree)))
    }

    /// Decodes the self-descriptor, if the container carries one.
    pub fn descriptor(&self) -> Result<Option<Descriptor>> {
        match self.record(DESCRIPTOR_LOCAL_ID) {
            Some(record) if is_descriptor_type(record.type_id) => {
                Descriptor::from_bytes(self.raw_object(record)?).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_input() {
        assert!(matches!(
            ContainerReader::from_bytes(vec![0; 10]),
            Err(RepackError::Format(_))
        ));
    }

    #[test]
    fn rejects_corrupted_directory() -> Result<()> {
        let dir = Directory {
            name: "x".into(),
            ..Directory::default()
        };
        let dir_bytes = dir.to_bytes()?;
        let mut bytes = dir_bytes.clone();
        let header = GlobalHeader::new(0, dir_bytes.len() as u64, checksum(&dir_bytes) ^ 1);
        bytes.extend_from_slice(&header.to_bytes());
        let err = ContainerReader::from_bytes(bytes);
        assert!(matches!(err, Err(RepackError::Format(msg)) if msg.contains("checksum")));
        Ok(())
    }

    #[test]
    fn reads_an_empty_directory() -> Result<()> {
        let dir = Directory {
            name: "empty".into(),
            dependencies: vec!["a.rpk".into()],
            ..Directory::default()
        };
        let dir_bytes = dir.to_bytes()?;
        let mut bytes = dir_bytes.clone();
        bytes.extend_from_slice(
            &GlobalHeader::new(0, dir_bytes.len() as u64, checksum(&dir_bytes)).to_bytes(),
        );
        let reader = ContainerReader::from_bytes(bytes)?;
        assert_eq!(reader.name(), "empty");
        assert_eq!(reader.dependencies(), ["a.rpk".to_string()]);
        assert!(reader.descriptor()?.is_none());
        assert!(reader.parse_object(2)?.is_none());

        let foreign = ObjectRecord {
            local_id: 9,
            type_id: 1,
            offset: u64::MAX - 2,
            length: 16,
        };
        assert!(matches!(reader.raw_object(&foreign), Err(RepackError::Format(_))));
        Ok(())
    }
}
