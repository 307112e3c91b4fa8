//! Ordered application of patch operations to an in-memory copy of the object.
//!
//! Operations are applied in emission order, so later operations observe the
//! effect of earlier ones. Each rule's batch is applied transactionally: a
//! batch that fails part-way leaves the working copy untouched.

use jsonptr::{Pointer, PointerBuf};
use serde_json::Value;

use super::pointer::PointerExt;
use super::{OperationExt, PatchError, PatchOperation};

/// The operations emitted by one rule, in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct RulePatch {
    pub rule: String,
    pub operations: Vec<PatchOperation>,
}

/// Record of a committed operation, used for conflict detection
#[derive(Debug, Clone)]
struct LedgerEntry {
    path: PointerBuf,
    removed: bool,
    rule: String,
}

/// A mutable copy of the object tree plus the ledger of who touched what.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    tree: Value,
    ledger: Vec<LedgerEntry>,
}

impl WorkingCopy {
    pub fn new(tree: Value) -> Self {
        Self {
            tree,
            ledger: Vec::new(),
        }
    }

    /// Current view of the object, reflecting every committed batch
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn into_tree(self) -> Value {
        self.tree
    }

    /// Apply one rule's operations.
    ///
    /// Returns `PatchError::Conflict` when an operation is incompatible with an
    /// operation previously committed by a different rule on the same path or
    /// an enclosing/enclosed path. Nothing is committed on error.
    pub fn apply(&mut self, rule: &str, operations: &[PatchOperation]) -> Result<(), PatchError> {
        for operation in operations {
            if operation.target().is_root() {
                return Err(PatchError::RootTarget);
            }
            self.check_conflict(rule, operation)?;
        }

        let mut scratch = self.tree.clone();
        json_patch::patch(&mut scratch, operations)?;

        self.tree = scratch;
        self.ledger
            .extend(operations.iter().map(|operation| LedgerEntry {
                path: operation.target().to_buf(),
                removed: operation.is_remove(),
                rule: rule.to_string(),
            }));
        Ok(())
    }

    /// Apply a sequence of rule batches in order
    pub fn apply_all<'a, I>(&mut self, patches: I) -> Result<(), PatchError>
    where
        I: IntoIterator<Item = &'a RulePatch>,
    {
        for patch in patches {
            self.apply(&patch.rule, &patch.operations)?;
        }
        Ok(())
    }

    fn check_conflict(&self, rule: &str, operation: &PatchOperation) -> Result<(), PatchError> {
        let path = operation.target();
        let conflicting = self.ledger.iter().find(|entry| {
            entry.rule != rule
                && overlaps(&entry.path, path)
                && (entry.removed || operation.is_remove())
        });
        match conflicting {
            Some(entry) => Err(PatchError::Conflict {
                path: path.to_string(),
                first_rule: entry.rule.clone(),
                second_rule: rule.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Two appends into the same array never overlap; otherwise one path must
/// enclose the other.
fn overlaps(a: &Pointer, b: &Pointer) -> bool {
    if a.is_append() && b.is_append() {
        return false;
    }
    a.within(b) || b.within(a)
}
