//! Computes the minimal operation list that brings a path to a desired state.
//!
//! `plan` is a pure function of (current tree, target path, target change).
//! It never looks at which rule is asking. `PatchBuilder` layers a scratch
//! copy on top so one rule can plan several changes that see each other.

use jsonptr::{Pointer, PointerBuf};
use serde_json::{Map, Value};

use super::pointer::{END_MARKER, PointerExt, parse_index};
use super::{PatchError, PatchOperation, add, remove, replace};

/// Desired change at a path
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The value at the path must equal this value afterwards
    Set(Value),
    /// Push this value onto the array at the path (created if absent)
    Append(Value),
    /// The path must not exist afterwards
    Remove,
}

/// Plan the operations needed to reach `target` at `path` in `tree`.
///
/// - An unchanged value yields no operations.
/// - Missing ancestors are materialized with `add` operations in
///   root-to-leaf order before the leaf is written.
/// - Appends always address the array through the `-` end marker.
/// - `remove` is only produced for `Target::Remove`.
pub fn plan(tree: &Value, path: &Pointer, target: Target) -> Result<Vec<PatchOperation>, PatchError> {
    if path.is_root() {
        return Err(PatchError::RootTarget);
    }
    let segments = path.segments();
    let inner = segments.len().saturating_sub(1);
    if segments.iter().take(inner).any(|s| s == END_MARKER) {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }

    match target {
        Target::Set(value) => plan_set(tree, path, value),
        Target::Append(value) => plan_append(tree, path, value),
        Target::Remove => {
            if path.is_append() {
                return Err(PatchError::InvalidPointer(path.to_string()));
            }
            Ok(match path.lookup(tree) {
                Some(_) => vec![remove(path.to_buf())],
                None => Vec::new(),
            })
        }
    }
}

fn plan_set(tree: &Value, path: &Pointer, value: Value) -> Result<Vec<PatchOperation>, PatchError> {
    let segments = path.segments();
    let mut ops = Vec::new();

    // Walk down to the deepest ancestor that exists.
    let mut node = tree;
    let mut depth = 0;
    while depth + 1 < segments.len() {
        let Some(segment) = segments.get(depth) else {
            break;
        };
        match child(node, segment) {
            Some(next) => {
                node = next;
                depth += 1;
            }
            None => break,
        }
    }

    let existing_parent = prefix(&segments, depth);

    if depth + 1 < segments.len() {
        // Materialize every missing ancestor, then add the leaf.
        if let Some(first_missing) = segments.get(depth) {
            check_insertable(node, &existing_parent, first_missing)?;
        }
        for end in depth + 1..segments.len() {
            let next_is_append = segments.get(end).is_some_and(|s| s == END_MARKER);
            let empty = if next_is_append {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
            ops.push(add(prefix(&segments, end), empty));
        }
        ops.push(add(path.to_buf(), value));
        return Ok(ops);
    }

    let Some(leaf) = segments.last() else {
        return Err(PatchError::RootTarget);
    };
    check_insertable(node, &existing_parent, leaf)?;
    match child(node, leaf) {
        Some(current) => diff(path, current, &value, &mut ops),
        None => ops.push(add(path.to_buf(), value)),
    }
    Ok(ops)
}

fn plan_append(tree: &Value, path: &Pointer, value: Value) -> Result<Vec<PatchOperation>, PatchError> {
    let array = if path.is_append() {
        path.container().ok_or(PatchError::RootTarget)?
    } else {
        path.to_buf()
    };
    if array.is_root() {
        return Err(PatchError::RootTarget);
    }

    match array.lookup(tree) {
        Some(Value::Array(_)) => Ok(vec![add(array.end(), value)]),
        Some(_) => Err(PatchError::NotAContainer(array.to_string())),
        None => {
            let mut ops = plan_set(tree, &array, Value::Array(Vec::new()))?;
            ops.push(add(array.end(), value));
            Ok(ops)
        }
    }
}

/// Minimal operations turning `current` into `desired` at `path`.
///
/// Maps are descended into when every existing key is also desired; anything
/// else that differs is replaced wholesale.
fn diff(path: &Pointer, current: &Value, desired: &Value, ops: &mut Vec<PatchOperation>) {
    if current == desired {
        return;
    }
    match (current, desired) {
        (Value::Object(have), Value::Object(want)) if have.keys().all(|k| want.contains_key(k)) => {
            for (key, wanted) in want {
                let child_path = path.child(key);
                match have.get(key) {
                    Some(existing) => diff(&child_path, existing, wanted, ops),
                    None => ops.push(add(child_path, wanted.clone())),
                }
            }
        }
        _ => ops.push(replace(path.to_buf(), desired.clone())),
    }
}

fn prefix(segments: &[String], len: usize) -> PointerBuf {
    PointerBuf::from_tokens(segments.iter().take(len).map(String::as_str))
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(parse_index(segment)?),
        _ => None,
    }
}

/// Verify that `segment` can be written beneath `node`
fn check_insertable(node: &Value, node_path: &Pointer, segment: &str) -> Result<(), PatchError> {
    match node {
        Value::Object(_) => Ok(()),
        Value::Array(items) => {
            if segment == END_MARKER {
                return Ok(());
            }
            let index = parse_index(segment)
                .ok_or_else(|| PatchError::PathNotFound(node_path.child(segment).to_string()))?;
            if index > items.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: node_path.child(segment).to_string(),
                    index,
                    len: items.len(),
                });
            }
            Ok(())
        }
        _ => Err(PatchError::NotAContainer(node_path.to_string())),
    }
}

/// Accumulates the operations of one rule against a private scratch copy.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    scratch: Value,
    operations: Vec<PatchOperation>,
}

impl PatchBuilder {
    pub fn new(tree: &Value) -> Self {
        Self {
            scratch: tree.clone(),
            operations: Vec::new(),
        }
    }

    /// The tree as it looks after every operation planned so far
    pub fn current(&self) -> &Value {
        &self.scratch
    }

    pub fn set(&mut self, path: &Pointer, value: Value) -> Result<(), PatchError> {
        self.push(path, Target::Set(value))
    }

    pub fn append(&mut self, array: &Pointer, value: Value) -> Result<(), PatchError> {
        self.push(array, Target::Append(value))
    }

    pub fn remove(&mut self, path: &Pointer) -> Result<(), PatchError> {
        self.push(path, Target::Remove)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn finish(self) -> Vec<PatchOperation> {
        self.operations
    }

    fn push(&mut self, path: &Pointer, target: Target) -> Result<(), PatchError> {
        let ops = plan(&self.scratch, path, target)?;
        json_patch::patch(&mut self.scratch, &ops)?;
        self.operations.extend(ops);
        Ok(())
    }
}
