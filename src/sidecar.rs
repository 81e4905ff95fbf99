//! Side-car payload relocation.
//!
//! Large payloads (texture pixels, audio, mesh streams) may live outside the container in
//! a side-car stream. A relocated object gets the bytes inlined into its payload field and
//! its stream reference cleared to `offset = 0, size = 0, path = ""`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{RepackError, Result};
use crate::field::FieldNode;

/// Which fields of a type hold the stream reference and the inline payload.
///
/// The stream field must be a struct with `offset` (integer), `size` (integer) and
/// `path` (string) members; the payload field must be a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarRule {
    /// Type id the rule applies to.
    pub type_id: i32,
    /// Name of the stream reference struct.
    #[serde(default = "default_stream_field")]
    pub stream_field: String,
    /// Name of the inline payload blob.
    #[serde(default = "default_payload_field")]
    pub payload_field: String,
}

fn default_stream_field() -> String {
    "m_StreamData".to_string()
}

fn default_payload_field() -> String {
    "image data".to_string()
}

impl SidecarRule {
    /// A rule with the default field names.
    pub fn new(type_id: i32) -> Self {
        Self {
            type_id,
            stream_field: default_stream_field(),
            payload_field: default_payload_field(),
        }
    }
}

/// Open side-car streams, keyed by resolved path.
///
/// Streams stay open for the lifetime of the cache and are closed when it is dropped,
/// including when a repack bails out with an error.
#[derive(Debug, Default)]
pub struct StreamCache {
    streams: HashMap<PathBuf, (File, u64)>,
}

impl StreamCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `length` bytes at `offset` of the stream at `path`.
    pub fn read_range(&mut self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        if !self.streams.contains_key(path) {
            let file = File::open(path)?;
            let size = file.metadata()?.len();
            tracing::debug!(path = %path.display(), size, "side-car stream opened");
            self.streams.insert(path.to_path_buf(), (file, size));
        }
        let (file, size) = self
            .streams
            .get_mut(path)
            .ok_or_else(|| RepackError::Internal("Stream vanished from cache".into()))?;

        let in_bounds = offset.checked_add(length).is_some_and(|end| end <= *size);
        let len = usize::try_from(length).ok().filter(|_| in_bounds).ok_or_else(|| {
            RepackError::UnsupportedPayloadLayout {
                path: path.display().to_string(),
                offset,
                length,
                available: *size,
            }
        })?;

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }
}

/// Inlines the side-car payload of `root` according to `rule`.
///
/// Returns `Ok(false)` if the stream reference is already empty.
pub fn relocate(
    root: &mut FieldNode,
    rule: &SidecarRule,
    cache: &mut StreamCache,
    base_dir: &Path,
) -> Result<bool> {
    let missing = |field: &str| RepackError::malformed(&root.type_name, field, "field missing");

    let stream = root
        .child(&rule.stream_field)
        .ok_or_else(|| missing(&rule.stream_field))?;
    let member = |name: &str| {
        stream
            .child(name)
            .ok_or_else(|| RepackError::malformed(&stream.type_name, name, "field missing"))
    };
    let path = member("path")?.as_str().unwrap_or_default().to_string();
    if path.is_empty() {
        return Ok(false);
    }
    let offset = member("offset")?
        .as_u64()
        .ok_or_else(|| RepackError::malformed(&stream.type_name, "offset", "not an integer"))?;
    let size = member("size")?
        .as_u64()
        .ok_or_else(|| RepackError::malformed(&stream.type_name, "size", "not an integer"))?;

    let data = cache.read_range(&base_dir.join(&path), offset, size)?;

    root.child_mut(&rule.payload_field)
        .ok_or_else(|| RepackError::malformed("", &rule.payload_field, "field missing"))?
        .set_blob(data)?;

    let stream = root
        .child_mut(&rule.stream_field)
        .ok_or_else(|| RepackError::malformed("", &rule.stream_field, "field missing"))?;
    for (name, value) in [("offset", 0u64), ("size", 0u64)] {
        stream
            .child_mut(name)
            .ok_or_else(|| RepackError::malformed("", name, "field missing"))?
            .set_u64(value)?;
    }
    stream
        .child_mut("path")
        .ok_or_else(|| RepackError::malformed("", "path", "field missing"))?
        .set_blob(Vec::new())?;

    tracing::debug!(path = %path, offset, size, "side-car payload inlined");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PayloadBuilder;
    use crate::schema::TypeNode;
    use std::io::Write;

    fn texture_type() -> TypeNode {
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

    fn texture(offset: u64, size: u32, path: &str) -> Result<FieldNode> {
        let raw = PayloadBuilder::new()
            .string("brick")
            .blob(&[])
            .u64(offset)
            .u32(size)
            .string(path)
            .build();
        FieldNode::parse(&raw, &texture_type())
    }

    #[test]
    fn inlines_stream_bytes_and_clears_reference() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut f = File::create(dir.path().join("tex.resS"))?;
        f.write_all(b"0123456789")?;
        drop(f);

        let mut cache = StreamCache::new();
        let mut tex = texture(2, 4, "tex.resS")?;
        assert!(relocate(&mut tex, &SidecarRule::new(28), &mut cache, dir.path())?);

        let expected = PayloadBuilder::new()
            .string("brick")
            .blob(b"2345")
            .u64(0)
            .u32(0)
            .string("")
            .build();
        assert_eq!(tex.serialize(), expected);

        let mut other = texture(0, 2, "tex.resS")?;
        relocate(&mut other, &SidecarRule::new(28), &mut cache, dir.path())?;
        assert_eq!(cache.open_streams(), 1);
        Ok(())
    }

    #[test]
    fn out_of_bounds_range_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("tex.resS"), b"0123")?;
        let mut cache = StreamCache::new();
        let mut tex = texture(2, 4, "tex.resS")?;
        let err = relocate(&mut tex, &SidecarRule::new(28), &mut cache, dir.path());
        assert!(matches!(
            err,
            Err(RepackError::UnsupportedPayloadLayout { available: 4, .. })
        ));
        Ok(())
    }

    #[test]
    fn empty_reference_is_left_alone() -> Result<()> {
        let mut cache = StreamCache::new();
        let mut tex = texture(0, 0, "")?;
        let before = tex.clone();
        assert!(!relocate(&mut tex, &SidecarRule::new(28), &mut cache, Path::new("."))?);
        assert_eq!(tex, before);
        Ok(())
    }
}
