//! # Repack
//!
//! A graph-discovery and identity-remapping engine that copies a chosen set of objects,
//! together with everything they transitively reference, out of binary asset containers
//! and into a single new self-consistent container.
//!
//! ## Overview
//!
//! Objects inside a container reference each other (and objects in other containers)
//! through typed pointers: a `(file_ref, local_id)` pair where `file_ref == 0` means the
//! same container and any other value is a 1-based index into the container's dependency
//! list. Repacking a set of root objects means:
//!
//! *   **Discovery:** follow every pointer from each root, building one dependency tree
//!     per root. Cycles are cut, opaque types are left behind, unresolved targets are
//!     recorded and skipped.
//! *   **Deduplication:** an object reachable from several roots or paths is copied once
//!     and receives exactly one new local id.
//! *   **Rewriting:** every pointer in every copied object is patched so that it points at
//!     the new id, or at a re-indexed external dependency for objects that stay behind.
//! *   **Writing:** payloads, the self-descriptor (entry table and preload table), the
//!     directory and the global header are emitted deterministically.
//!
//! ## Architecture
//!
//! ### File Format
//!
//! ```text
//! [Descriptor (id 1)] [Object 2] [Object 3] ... [Directory] [Global Header]
//! ```
//!
//! The Global Header at the end of the file points to the directory, which lists the
//! container name, the dependency list, the type layouts and one record per object.
//! See [`format`].
//!
//! ### Pipeline
//!
//! The [`RepackSession`] drives the whole operation:
//!
//! 1. [`graph::TreeBuilder`] expands every root into a [`graph::DependencyForest`].
//! 2. [`registry::IdentityRegistry`] assigns new ids, one per distinct source identity.
//! 3. [`rewrite::RemapPlanner`] decides, single-threaded, what each pointer becomes and
//!    builds the output dependency list.
//! 4. [`rewrite::FieldRewriter`] patches payloads in parallel against the frozen plan.
//! 5. [`ContainerWriter`] lays out the new container and writes it atomically.
//!
//! Object access goes through the [`ObjectAccessor`] trait, so hosts can plug in their
//! own container storage; [`ContainerLibrary`] is the file-backed implementation.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use repack::{RepackConfig, RepackSession};
//! use std::path::Path;
//!
//! # fn main() -> repack::Result<()> {
//! let config = RepackConfig::load(Path::new("repack.toml"))?;
//! let mut session = RepackSession::open("assets/", config)?;
//! session.select_roots("characters.rpk")?;
//! session.add_root("props.rpk", 42, Some("crate"))?;
//! let report = session.write(Path::new("out/bundle.rpk"))?;
//! println!("{} objects written", report.written.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` is the memory map in [`reader`].
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`RepackError`]. Per-object
//!   failures exclude the object and are listed in the [`RepackReport`]; batch failures
//!   abort and leave nothing at the destination path.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod accessor;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod format;
pub mod inspector;
pub mod object;
pub mod policy;
pub mod reader;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod sidecar;
pub mod writer;

// --- PIPELINE STAGES ---
pub mod graph;
pub mod registry;
pub mod rewrite;

#[doc(hidden)]
pub mod io;

// --- RE-EXPORTS ---

pub use accessor::{ContainerLibrary, ObjectAccessor};
pub use config::RepackConfig;
pub use error::{RepackError, Result};
pub use field::{FieldNode, PPtr};
pub use inspector::ContainerInspector;
pub use object::{ContainerId, ObjectIdentity, ResolvedObject};
pub use policy::{ExpandPolicy, RootSelector, TypePolicy};
pub use reader::ContainerReader;
pub use registry::IdOrder;
pub use schema::TypeNode;
pub use session::{RepackReport, RepackSession};
pub use writer::ContainerWriter;
