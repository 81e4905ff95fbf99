//! The repack pipeline.
//!
//! A [`RepackSession`] owns everything one repack operation touches: the object store,
//! the dependency forest, the identity registry and the side-car stream cache. Nothing
//! outlives the session, so abandoning it midway releases every resource.
//!
//! ```text
//! add_root / select_roots   -> TreeBuilder   (one tree per root)
//! finish                    -> validate      (exclude malformed objects)
//!                           -> IdentityRegistry
//!                           -> RemapPlanner  (pointer plan + dependency list)
//!                           -> FieldRewriter (parallel, read-only plan)
//!                           -> ContainerWriter
//! ```

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::accessor::{ContainerLibrary, ObjectAccessor};
use crate::config::RepackConfig;
use crate::descriptor::Descriptor;
use crate::error::{RepackError, Result};
use crate::field::FieldNode;
use crate::format::DESCRIPTOR_LOCAL_ID;
use crate::graph::{BoundaryKind, DependencyForest, NodeId, TreeBuilder};
use crate::object::{ContainerId, ObjectIdentity, ObjectStore, ResolvedObject};
use crate::policy::{ExpandPolicy, RootSelector, TypePolicy};
use crate::registry::{IdOrder, IdentityRegistry};
use crate::resolver;
use crate::rewrite::{DependencyTable, FieldRewriter, RemapPlanner};
use crate::schema::is_descriptor_type;
use crate::sidecar::{self, SidecarRule, StreamCache};
use crate::writer::{ContainerWriter, build_entries};

/// One object copied into the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenObject {
    /// Id in the output container.
    pub new_id: i64,
    /// Source container path.
    pub source: String,
    /// Id in the source container.
    pub source_id: i64,
    /// Schema type id.
    pub type_id: i32,
    /// Display name, possibly empty.
    pub name: String,
}

/// One object left out of the output because of a per-object error.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedObject {
    /// Source container path.
    pub source: String,
    /// Id in the source container.
    pub source_id: i64,
    /// Why it was excluded.
    pub reason: String,
}

/// Summary of a finished repack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepackReport {
    /// Copied objects in ascending new id order.
    pub written: Vec<WrittenObject>,
    /// Objects dropped because of malformed data.
    pub excluded: Vec<ExcludedObject>,
    /// External dependency list of the output.
    pub dependencies: Vec<String>,
    /// Total tree positions visited.
    pub tree_nodes: usize,
    /// Pointers that were not followed (opaque, cyclic or unresolved).
    pub boundaries: usize,
}

/// A finished but not yet written repack.
#[derive(Debug)]
pub struct RepackOutput {
    /// Container ready to be written.
    pub writer: ContainerWriter,
    /// What went in and what was left out.
    pub report: RepackReport,
}

impl RepackOutput {
    /// Writes the container to `path` atomically.
    pub fn write(&self, path: &Path) -> Result<u64> {
        let bytes = self.writer.write_atomic(path)?;
        tracing::info!(path = %path.display(), bytes, objects = self.report.written.len(), "container written");
        Ok(bytes)
    }
}

/// Context for one repack operation.
#[derive(Debug)]
pub struct RepackSession<A: ObjectAccessor> {
    accessor: A,
    config: RepackConfig,
    policy: TypePolicy,
    selector: RootSelector,
    sidecar_dir: PathBuf,
    store: ObjectStore,
    forest: DependencyForest,
    roots: Vec<(NodeId, String)>,
    streams: StreamCache,
}

impl RepackSession<ContainerLibrary> {
    /// Creates a session over the containers in `dir`. Side-car streams are also
    /// resolved relative to `dir`.
    pub fn open(dir: impl Into<PathBuf>, config: RepackConfig) -> Result<Self> {
        let dir = dir.into();
        let mut session = Self::new(ContainerLibrary::new(dir.clone()), config)?;
        session.sidecar_dir = dir;
        Ok(session)
    }
}

impl<A: ObjectAccessor> RepackSession<A> {
    /// Creates a session over any accessor.
    pub fn new(accessor: A, config: RepackConfig) -> Result<Self> {
        let selector = config.selector()?;
        let policy = config.policy();
        Ok(Self {
            accessor,
            config,
            policy,
            selector,
            sidecar_dir: PathBuf::from("."),
            store: ObjectStore::new(),
            forest: DependencyForest::new(),
            roots: Vec::new(),
            streams: StreamCache::new(),
        })
    }

    /// Overrides the directory side-car paths are resolved against.
    pub fn with_sidecar_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sidecar_dir = dir.into();
        self
    }

    /// The accessor, e.g. to inspect loaded containers.
    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    /// The forest built so far.
    pub fn forest(&self) -> &DependencyForest {
        &self.forest
    }

    /// Expands the object `local_id` of `container` into a new tree and exports it
    /// under `name` (its own display name if `None`).
    ///
    /// Roots bypass the name filter. A root that cannot be loaded aborts the repack.
    pub fn add_root(&mut self, container: &str, local_id: i64, name: Option<&str>) -> Result<NodeId> {
        let cid = self.accessor.load_container(container)?;
        let object = self
            .accessor
            .load_object(cid, local_id)?
            .ok_or_else(|| RepackError::UnresolvedReference {
                container: container.to_string(),
                file_ref: 0,
                local_id,
            })?;
        let entry_name = name.map(str::to_string).unwrap_or_else(|| object.display_name.clone());
        let node = TreeBuilder::new(&self.policy).build(
            &mut self.accessor,
            &mut self.store,
            &mut self.forest,
            object,
        )?;
        tracing::info!(container, local_id, name = %entry_name, "root added");
        self.roots.push((node, entry_name));
        Ok(node)
    }

    /// Adds every object of `container` that the configured selector matches.
    ///
    /// Candidates come from the container's entry table when it has one, otherwise from
    /// every object carrying a display name. Returns the new root nodes.
    pub fn select_roots(&mut self, container: &str) -> Result<Vec<NodeId>> {
        let cid = self.accessor.load_container(container)?;
        let candidates = self.root_candidates(cid)?;
        let mut added = Vec::new();
        for (local_id, name) in candidates {
            let Some(object) = self.candidate(cid, local_id)? else {
                continue;
            };
            if !self.selector.matches(object.type_id, &name) {
                continue;
            }
            added.push(self.add_root(container, local_id, Some(&name))?);
        }
        tracing::info!(container, roots = added.len(), "roots selected");
        Ok(added)
    }

    fn root_candidates(&self, cid: ContainerId) -> Result<Vec<(i64, String)>> {
        let path = self.accessor.container_path(cid)?.to_string();
        if let Some(desc) = self.load_descriptor(cid)? {
            return Ok(desc
                .entries
                .into_iter()
                .map(|e| (e.new_local_id, e.display_name))
                .collect());
        }
        let mut out = Vec::new();
        for local_id in self.accessor.object_ids(cid)? {
            if let Some(obj) = self.candidate(cid, local_id)?
                && !obj.display_name.is_empty()
                && !is_descriptor_type(obj.type_id)
            {
                out.push((local_id, obj.display_name));
            }
        }
        tracing::debug!(container = %path, candidates = out.len(), "no entry table, using named objects");
        Ok(out)
    }

    /// Loads a root candidate, skipping objects that fail to parse.
    fn candidate(&self, cid: ContainerId, local_id: i64) -> Result<Option<ResolvedObject>> {
        match self.accessor.load_object(cid, local_id) {
            Ok(object) => Ok(object),
            Err(err) if !err.is_fatal_for_batch() => {
                tracing::warn!(container = %cid, local_id, error = %err, "root candidate skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn load_descriptor(&self, cid: ContainerId) -> Result<Option<Descriptor>> {
        match self.accessor.load_object(cid, DESCRIPTOR_LOCAL_ID)? {
            Some(obj) if is_descriptor_type(obj.type_id) => Descriptor::from_tree(&obj.root).map(Some),
            _ => Ok(None),
        }
    }

    /// Runs registration, rewriting and container assembly.
    pub fn finish(mut self) -> Result<RepackOutput> {
        let (mut prepared, invalid) = self.validate()?;

        let mut excluded: Vec<(ObjectIdentity, String)> =
            invalid.into_iter().map(|(i, err)| (i, err.to_string())).collect();
        let mut excluded_ids: HashSet<ObjectIdentity> = excluded.iter().map(|(i, _)| *i).collect();

        // Objects reachable only through excluded ones would be written unreferenced.
        let reachable = self.forest.reachable(&excluded_ids);
        let orphans: Vec<ObjectIdentity> = self
            .forest
            .flatten()
            .map(|n| n.identity)
            .filter(|i| !reachable.contains(i) && !excluded_ids.contains(i))
            .collect();
        for identity in orphans {
            if excluded_ids.insert(identity) {
                tracing::warn!(object = %identity, "object excluded, only referenced by excluded objects");
                excluded.push((identity, "only referenced by excluded objects".to_string()));
            }
        }
        let mut registry = IdentityRegistry::new(self.config.base_id);
        match self.config.id_order {
            IdOrder::Discovery => registry.register_excluding(&self.forest, &excluded_ids)?,
            IdOrder::Source => {
                let accessor = &self.accessor;
                registry.register_sorted(&self.forest, &excluded_ids, |identity| {
                    let path = accessor
                        .container_path(identity.container)
                        .map(str::to_string)
                        .unwrap_or_default();
                    (path, identity.local_id)
                })?
            }
        }
        tracing::info!(objects = registry.len(), excluded = excluded.len(), "identities registered");

        let mut planner = RemapPlanner::new(
            &self.accessor,
            &registry,
            &self.policy,
            DependencyTable::new(self.config.max_dependencies),
        );
        for (_, assignment) in registry.iter() {
            planner.plan(self.store.get(assignment.object)?)?;
        }
        let (remap, dependencies) = planner.finish();

        let mut jobs = Vec::with_capacity(registry.len());
        for (identity, assignment) in registry.iter() {
            let object = self.store.get(assignment.object)?;
            let tree = prepared
                .remove(identity)
                .unwrap_or_else(|| object.root.clone());
            jobs.push((assignment.new_id, object.type_id, identity.container, tree));
        }
        let rewriter = FieldRewriter::new(&remap);
        let payloads = jobs
            .into_par_iter()
            .map(|(new_id, type_id, holder, mut tree)| {
                rewriter.rewrite_tree(holder, &mut tree)?;
                Ok((new_id, type_id, tree.serialize()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut writer = ContainerWriter::new(self.config.container_name.clone());
        let mut report = RepackReport {
            tree_nodes: self.forest.len(),
            boundaries: self.forest.boundaries().len(),
            ..RepackReport::default()
        };
        for ((identity, assignment), (new_id, type_id, payload)) in registry.iter().zip(payloads) {
            writer.add_type(type_id, self.accessor.type_of(identity.container, type_id)?)?;
            writer.add_object(new_id, type_id, payload)?;
            let object = self.store.get(assignment.object)?;
            report.written.push(WrittenObject {
                new_id,
                source: self.accessor.container_path(identity.container)?.to_string(),
                source_id: identity.local_id,
                type_id,
                name: object.display_name.clone(),
            });
        }
        report.dependencies = dependencies.paths();
        writer.set_dependencies(report.dependencies.clone())?;

        let (entries, preload) = build_entries(&self.forest, &registry, &self.roots)?;
        writer.set_entries(entries, preload)?;

        for (identity, reason) in excluded {
            report.excluded.push(ExcludedObject {
                source: self.accessor.container_path(identity.container)?.to_string(),
                source_id: identity.local_id,
                reason,
            });
        }
        Ok(RepackOutput { writer, report })
    }

    /// Finishes the session and writes the container to `path`.
    pub fn write(self, path: &Path) -> Result<RepackReport> {
        let output = self.finish()?;
        output.write(path)?;
        Ok(output.report)
    }

    /// Checks every distinct object and applies side-car relocation.
    ///
    /// Returns relocated trees and the objects to exclude. A failing root aborts.
    #[allow(clippy::type_complexity)]
    fn validate(
        &mut self,
    ) -> Result<(HashMap<ObjectIdentity, FieldNode>, Vec<(ObjectIdentity, RepackError)>)> {
        let roots: HashSet<ObjectIdentity> = self
            .forest
            .roots()
            .iter()
            .map(|r| self.forest.node(*r).map(|n| n.identity))
            .collect::<Result<_>>()?;

        let mut seen = HashSet::new();
        let mut prepared = HashMap::new();
        let mut excluded = Vec::new();
        for node in self.forest.flatten() {
            if !seen.insert(node.identity) {
                continue;
            }
            let object = self.store.get(node.object)?;
            let rule = self.config.sidecar_rule(object.type_id);
            match check_object(&self.accessor, &self.policy, object, rule, &mut self.streams, &self.sidecar_dir) {
                Ok(Some(tree)) => {
                    prepared.insert(node.identity, tree);
                }
                Ok(None) => {}
                Err(err) if roots.contains(&node.identity) || err.is_fatal_for_batch() => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(object = %node.identity, error = %err, "object excluded");
                    excluded.push((node.identity, err));
                }
            }
        }

        // Targets that failed to parse never entered the forest; report them too.
        for edge in self.forest.boundaries() {
            let BoundaryKind::Unresolved(err) = &edge.kind else {
                continue;
            };
            if !matches!(err, RepackError::MalformedField { .. }) {
                tracing::debug!(from = %edge.from, ptr = ?edge.ptr, error = %err, "unresolved pointer kept external");
                continue;
            }
            let target = resolver::target_path(&self.accessor, edge.from.container, edge.ptr)
                .ok()
                .and_then(|path| self.accessor.find_container(path))
                .map(|c| ObjectIdentity::new(c, edge.ptr.local_id));
            if let Some(identity) = target
                && seen.insert(identity)
            {
                tracing::warn!(object = %identity, error = %err, "object excluded");
                excluded.push((identity, err.clone()));
            }
        }
        Ok((prepared, excluded))
    }
}

/// Validates the pointers of `object` and applies its side-car rule.
///
/// Returns the relocated tree if the rule moved anything.
fn check_object<A: ObjectAccessor + ?Sized>(
    accessor: &A,
    policy: &TypePolicy,
    object: &ResolvedObject,
    rule: Option<&SidecarRule>,
    streams: &mut StreamCache,
    sidecar_dir: &Path,
) -> Result<Option<FieldNode>> {
    for (_, ptr) in object.root.pointers() {
        if !policy.is_null_pointer(ptr) {
            resolver::target_path(accessor, object.identity.container, ptr)?;
        }
    }
    let Some(rule) = rule else {
        return Ok(None);
    };
    let mut tree = object.root.clone();
    let moved = sidecar::relocate(&mut tree, rule, streams, sidecar_dir)?;
    Ok(moved.then_some(tree))
}
