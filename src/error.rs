//! Centralized error handling for the repacking engine.
//!
//! Every failure is represented as a [`RepackError`] value; the library never panics on
//! malformed input.
//!
//! ## Error Categories
//!
//! - **Traversal boundaries** ([`RepackError::UnresolvedReference`]): a pointer names an
//!   object that cannot be loaded. Absorbed by the tree builder, fatal for the rewriter.
//! - **Per-object failures** ([`RepackError::MalformedField`],
//!   [`RepackError::UnsupportedPayloadLayout`]): the object is reported and excluded from
//!   the output, the rest of the batch continues.
//! - **Batch failures** ([`RepackError::DependencyListOverflow`],
//!   [`RepackError::DuplicateIdentityConflict`], I/O and format errors): the whole repack
//!   aborts and no output is left at the destination path.
//!
//! ## Usage
//!
//! ```rust
//! use repack::RepackError;
//!
//! fn describe(err: &RepackError) -> &'static str {
//!     if err.is_fatal_for_batch() { "abort" } else { "skip object" }
//! }
//!
//! let err = RepackError::MalformedField {
//!     type_name: "PPtr<Mesh>".into(),
//!     field: "m_Mesh".into(),
//!     reason: "declared width 8".into(),
//! };
//! assert_eq!(describe(&err), "skip object");
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// A specialized `Result` type for repack operations.
pub type Result<T> = std::result::Result<T, RepackError>;

/// The master error enum covering all failure domains of the engine.
///
/// This type is `Clone` so per-object failures can be stored in a
/// [`RepackReport`](crate::session::RepackReport) while the batch continues.
/// I/O errors are wrapped in `Arc` to make cloning cheap.
#[derive(Debug, Clone, Error)]
pub enum RepackError {
    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The container directory could not be encoded or decoded (bincode).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The container bytes do not follow the expected layout.
    ///
    /// Raised for wrong magic bytes, unsupported versions, checksum mismatches,
    /// truncated payloads, or records pointing outside the file.
    #[error("format error: {0}")]
    Format(String),

    /// A pointer's target cannot be loaded.
    #[error("unresolved reference (file_ref {file_ref}, local_id {local_id}) in {container}")]
    UnresolvedReference {
        /// Path of the container holding the pointer.
        container: String,
        /// Dependency index of the pointer.
        file_ref: i32,
        /// Target local id.
        local_id: i64,
    },

    /// A field does not match the layout its schema declares.
    #[error("malformed field `{field}` ({type_name}): {reason}")]
    MalformedField {
        /// Declared type of the field.
        type_name: String,
        /// Field name.
        field: String,
        /// What went wrong.
        reason: String,
    },

    /// A side-car stream reference points outside the stream bounds.
    #[error(
        "unsupported payload layout in {path}: range {offset}+{length} exceeds stream size {available}"
    )]
    UnsupportedPayloadLayout {
        /// Resolved stream path.
        path: String,
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        length: u64,
        /// Actual stream size.
        available: u64,
    },

    /// Two distinct source identities received the same new id.
    #[error("new id {new_id} assigned to both {first} and {second}")]
    DuplicateIdentityConflict {
        /// The conflicting output id.
        new_id: i64,
        /// First identity holding the id.
        first: String,
        /// Second identity claiming the id.
        second: String,
    },

    /// More external dependencies than the format's dependency index can address.
    #[error("{count} external dependencies exceed the format limit of {max}")]
    DependencyListOverflow {
        /// Number of dependencies requested.
        count: usize,
        /// Maximum the output format supports.
        max: usize,
    },

    /// The host could not locate a container.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// A root name pattern failed to compile.
    #[error("invalid name pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// The configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Logic error inside the engine. Should not occur.
    #[error("internal logic error: {0}")]
    Internal(String),
}

impl RepackError {
    /// Returns true if this error must abort the whole repack rather than
    /// excluding a single object.
    pub fn is_fatal_for_batch(&self) -> bool {
        !matches!(
            self,
            Self::UnresolvedReference { .. }
                | Self::MalformedField { .. }
                | Self::UnsupportedPayloadLayout { .. }
        )
    }

    pub(crate) fn malformed(
        type_name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedField {
            type_name: type_name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for RepackError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<tempfile::PersistError> for RepackError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(Arc::new(err.error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_batch_fatal_errors() {
        let unresolved = RepackError::UnresolvedReference {
            container: "a.rpk".into(),
            file_ref: 3,
            local_id: 7,
        };
        assert!(!unresolved.is_fatal_for_batch());
        assert!(
            RepackError::DependencyListOverflow { count: 4, max: 3 }.is_fatal_for_batch()
        );
        assert!(RepackError::Format("bad magic".into()).is_fatal_for_batch());
    }

    #[test]
    fn io_errors_keep_their_source() {
        use std::error::Error;
        let err: RepackError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("gone"));
    }
}
