//! Defines the physical binary layout of repack containers.
//!
//! # Layout Strategy
//! Object payloads are written first in ascending local id order, followed by the
//! directory and a fixed-size Global Header at the very end of the file.
//!
//! File: `[Object 2] [Object 3] ... [Object N] [Directory] [Global Header]`
//!
//! The self-descriptor object (local id 1) is stored like any other object.
//!
//! ## Directory
//! The directory is a bincode-encoded [`Directory`]: container name, dependency path
//! list, the schema of every stored type, and one [`ObjectRecord`] per object.

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::error::{RepackError, Result};
use crate::schema::TypeNode;

/// Magic bytes identifying the file format: "RPK1".
pub const MAGIC_BYTES: [u8; 4] = *b"RPK1";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// The fixed size of the Global Header.
/// Magic(4) + Version(2) + DirOffset(8) + DirLength(8) + Checksum(8) = 30
pub const GLOBAL_HEADER_SIZE: usize = 30;

/// Local id that is never assigned to an object.
pub const NULL_LOCAL_ID: i64 = 0;

/// Local id of the container's self-descriptor.
pub const DESCRIPTOR_LOCAL_ID: i64 = 1;

/// First local id handed out to repacked objects.
pub const FIRST_ASSIGNABLE_ID: i64 = 2;

/// Builtin type id of the self-descriptor object.
pub const DESCRIPTOR_TYPE_ID: i32 = 142;

/// Largest dependency list a pointer's `file_ref` (i32, 1-based) can address.
pub const MAX_DEPENDENCIES: usize = (i32::MAX - 1) as usize;

/// Location and type of one object inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Local id inside the container.
    pub local_id: i64,
    /// Schema type id.
    pub type_id: i32,
    /// Absolute offset of the payload.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u64,
}

/// Container-level metadata stored just before the Global Header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    /// Display name of the container.
    pub name: String,
    /// External containers referenced by `file_ref` (index + 1).
    pub dependencies: Vec<String>,
    /// Schema of every type stored in the container, sorted by type id.
    pub types: Vec<(i32, TypeNode)>,
    /// Object records, sorted by ascending local id.
    pub objects: Vec<ObjectRecord>,
}

impl Directory {
    /// Encodes the directory with the standard bincode configuration.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RepackError::Serialization(e.to_string()))
    }

    /// Decodes a directory previously written by [`Directory::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(dir, _)| dir)
            .map_err(|e| RepackError::Serialization(e.to_string()))
    }
}

/// xxHash64 (seed 0) of a byte slice, used for the directory checksum.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// The Global Header located at the very end of the file (Tail).
/// It points to the Directory, which is the entry point for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    /// Always [`MAGIC_BYTES`].
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Absolute offset of the directory.
    pub directory_offset: u64,
    /// Directory length in bytes.
    pub directory_length: u64,
    /// xxHash64 of the directory bytes.
    pub checksum: u64,
}

impl GlobalHeader {
    /// Creates a new GlobalHeader.
    pub fn new(directory_offset: u64, directory_length: u64, checksum: u64) -> Self {
        Self {
            magic: MAGIC_BYTES,
            version: FORMAT_VERSION,
            directory_offset,
            directory_length,
            checksum,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; GLOBAL_HEADER_SIZE] {
        let mut buf = [0u8; GLOBAL_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.directory_offset.to_le_bytes());
        buf[14..22].copy_from_slice(&self.directory_length.to_le_bytes());
        buf[22..30].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parses and validates a header from the last [`GLOBAL_HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != GLOBAL_HEADER_SIZE {
            return Err(RepackError::Format("Header has wrong size".into()));
        }
        if bytes[0..4] != MAGIC_BYTES {
            return Err(RepackError::Format("Invalid Magic Bytes".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(RepackError::Format(format!(
                "Unsupported version: {version}"
            )));
        }
        Ok(Self {
            magic: MAGIC_BYTES,
            version,
            directory_offset: read_u64(&bytes[6..14]),
            directory_length: read_u64(&bytes[14..22]),
            checksum: read_u64(&bytes[22..30]),
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8]))
}
