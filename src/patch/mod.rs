//! JSON-Patch operations over the schemaless object tree.
//!
//! Operations and pointers are the `json_patch` and `jsonptr` types. This
//! module adds what admission needs on top of them:
//!
//! - `pointer`: tree-walking helpers for pointers
//! - `builder`: computes minimal operation lists for a desired change
//! - `working_copy`: applies operations in order and detects cross-rule conflicts

pub mod builder;
pub mod pointer;
pub mod working_copy;

pub use builder::{PatchBuilder, Target, plan};
pub use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
pub use jsonptr::{Pointer, PointerBuf};
pub use pointer::{END_MARKER, PointerExt};
pub use working_copy::{RulePatch, WorkingCopy};

use serde_json::Value;
use thiserror::Error;

/// `add` at `path`
pub fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

/// `replace` at `path`
pub fn replace(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Replace(ReplaceOperation { path, value })
}

/// `remove` at `path`
pub fn remove(path: PointerBuf) -> PatchOperation {
    PatchOperation::Remove(RemoveOperation { path })
}

/// What the conflict ledger needs to know about an operation
pub trait OperationExt {
    /// The path written (or removed) by the operation
    fn target(&self) -> &Pointer;

    fn is_remove(&self) -> bool;

    /// RFC 6902 `op` name
    fn verb(&self) -> &'static str;
}

impl OperationExt for PatchOperation {
    fn target(&self) -> &Pointer {
        match self {
            PatchOperation::Add(op) => &*op.path,
            PatchOperation::Remove(op) => &*op.path,
            PatchOperation::Replace(op) => &*op.path,
            PatchOperation::Move(op) => &*op.path,
            PatchOperation::Copy(op) => &*op.path,
            PatchOperation::Test(op) => &*op.path,
        }
    }

    fn is_remove(&self) -> bool {
        matches!(self, PatchOperation::Remove(_))
    }

    fn verb(&self) -> &'static str {
        match self {
            PatchOperation::Add(_) => "add",
            PatchOperation::Remove(_) => "remove",
            PatchOperation::Replace(_) => "replace",
            PatchOperation::Move(_) => "move",
            PatchOperation::Copy(_) => "copy",
            PatchOperation::Test(_) => "test",
        }
    }
}

/// Errors raised while planning or applying patch operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Pointer text is not a valid RFC 6901 pointer
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    /// Target (or its parent) does not exist
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// An ancestor is a scalar and cannot hold children
    #[error("path {0} does not address a map or array")]
    NotAContainer(String),

    /// Array index past the end of the array
    #[error("index {index} out of bounds at {path} (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    /// The root of the object tree cannot be added, replaced, or removed
    #[error("operations on the document root are not permitted")]
    RootTarget,

    /// The operation could not be applied to the tree
    #[error("{0}")]
    Apply(String),

    /// Two rules emitted incompatible operations on overlapping paths
    #[error("conflicting operations at {path} from rules {first_rule} and {second_rule}")]
    Conflict {
        path: String,
        first_rule: String,
        second_rule: String,
    },
}

impl From<json_patch::PatchError> for PatchError {
    fn from(err: json_patch::PatchError) -> Self {
        PatchError::Apply(err.to_string())
    }
}
