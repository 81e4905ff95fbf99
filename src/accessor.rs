//! Host access to source containers.
//!
//! The engine never touches the file system directly for objects; it goes through an
//! [`ObjectAccessor`]. [`ContainerLibrary`] is the file-backed implementation: it opens
//! containers relative to a search directory and keeps each one open for the lifetime
//! of the repack operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RepackError, Result};
use crate::object::{ContainerId, ObjectIdentity, ResolvedObject};
use crate::reader::ContainerReader;
use crate::schema::TypeNode;

/// Object access contract consumed by the resolver, builder and rewriter.
pub trait ObjectAccessor {
    /// Loads (or returns the already loaded) container named by `path`.
    fn load_container(&mut self, path: &str) -> Result<ContainerId>;

    /// Returns the handle of an already loaded container without loading it.
    fn find_container(&self, path: &str) -> Option<ContainerId>;

    /// Loads and parses one object. `Ok(None)` means the id does not exist.
    fn load_object(&self, container: ContainerId, local_id: i64) -> Result<Option<ResolvedObject>>;

    /// Every local id stored in a container, ascending.
    fn object_ids(&self, container: ContainerId) -> Result<Vec<i64>>;

    /// Ordered dependency paths of a container.
    fn dependency_list(&self, container: ContainerId) -> Result<&[String]>;

    /// The path a container was loaded from.
    fn container_path(&self, container: ContainerId) -> Result<&str>;

    /// Layout of `type_id` as stored in `container`.
    fn type_of(&self, container: ContainerId, type_id: i32) -> Result<&TypeNode>;
}

/// File-backed [`ObjectAccessor`] over a directory of containers.
#[derive(Debug)]
pub struct ContainerLibrary {
    base_dir: PathBuf,
    containers: Vec<(String, ContainerReader)>,
    by_path: HashMap<String, ContainerId>,
}

impl ContainerLibrary {
    /// Creates a library resolving relative container paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            containers: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Directory used to resolve relative paths.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Registers an already opened container under `path`, e.g. one held in memory.
    pub fn insert(&mut self, path: impl Into<String>, reader: ContainerReader) -> Result<ContainerId> {
        let path = path.into();
        if let Some(id) = self.by_path.get(&path) {
            return Ok(*id);
        }
        let raw = u32::try_from(self.containers.len())
            .map_err(|_| RepackError::Internal("Too many containers".into()))?;
        let id = ContainerId::new(raw);
        tracing::debug!(%id, path = %path, objects = reader.records().len(), "container loaded");
        self.by_path.insert(path.clone(), id);
        self.containers.push((path, reader));
        Ok(id)
    }

    /// Direct access to a loaded container.
    pub fn reader(&self, container: ContainerId) -> Result<&ContainerReader> {
        self.containers
            .get(container.as_u32() as usize)
            .map(|(_, r)| r)
            .ok_or_else(|| RepackError::Internal(format!("Unknown container {container}")))
    }

    /// Number of containers loaded so far.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns true if nothing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl ObjectAccessor for ContainerLibrary {
    fn load_container(&mut self, path: &str) -> Result<ContainerId> {
        if let Some(id) = self.by_path.get(path) {
            return Ok(*id);
        }
        let full = self.base_dir.join(path);
        if !full.is_file() {
            return Err(RepackError::ContainerNotFound(path.to_string()));
        }
        let reader = ContainerReader::open(&full)?;
        self.insert(path, reader)
    }

    fn find_container(&self, path: &str) -> Option<ContainerId> {
        self.by_path.get(path).copied()
    }

    fn load_object(&self, container: ContainerId, local_id: i64) -> Result<Option<ResolvedObject>> {
        let reader = self.reader(container)?;
        Ok(reader.parse_object(local_id)?.map(|(type_id, root)| {
            ResolvedObject::new(ObjectIdentity::new(container, local_id), type_id, root)
        }))
    }

    fn object_ids(&self, container: ContainerId) -> Result<Vec<i64>> {
        Ok(self.reader(container)?.records().iter().map(|r| r.local_id).collect())
    }

    fn dependency_list(&self, container: ContainerId) -> Result<&[String]> {
        Ok(self.reader(container)?.dependencies())
    }

    fn container_path(&self, container: ContainerId) -> Result<&str> {
        self.containers
            .get(container.as_u32() as usize)
            .map(|(p, _)| p.as_str())
            .ok_or_else(|| RepackError::Internal(format!("Unknown container {container}")))
    }

    fn type_of(&self, container: ContainerId, type_id: i32) -> Result<&TypeNode> {
        self.reader(container)?.schema().get(type_id)
    }
}
