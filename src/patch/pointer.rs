//! Path helpers layered over `jsonptr` pointers.
//!
//! `jsonptr` owns RFC 6901 parsing and escaping. This module adds the few
//! tree-walking questions the planner and the conflict ledger ask.

use jsonptr::{Pointer, PointerBuf};
use serde_json::Value;

use super::PatchError;

/// Marker segment addressing the position past the last array element.
pub const END_MARKER: &str = "-";

/// Parse an escaped pointer such as `/spec/containers/0`
pub fn parse(raw: &str) -> Result<PointerBuf, PatchError> {
    PointerBuf::parse(raw).map_err(|e| PatchError::InvalidPointer(format!("{raw:?}: {e}")))
}

/// Tree-walking helpers for pointers
pub trait PointerExt {
    /// Unescaped segments, root first
    fn segments(&self) -> Vec<String>;

    /// Pointer to `segment` beneath this one
    fn child(&self, segment: &str) -> PointerBuf;

    /// Pointer to the append position of the array addressed here
    fn end(&self) -> PointerBuf {
        self.child(END_MARKER)
    }

    /// Pointer to the enclosing container, `None` for the root
    fn container(&self) -> Option<PointerBuf>;

    /// Whether the last segment is the array end marker
    fn is_append(&self) -> bool;

    /// Whether `self` equals `other` or addresses something beneath it
    fn within(&self, other: &Pointer) -> bool;

    /// Resolve against a tree without modifying it
    fn lookup<'a>(&self, tree: &'a Value) -> Option<&'a Value>;
}

impl PointerExt for Pointer {
    fn segments(&self) -> Vec<String> {
        self.tokens().map(|t| t.decoded().into_owned()).collect()
    }

    fn child(&self, segment: &str) -> PointerBuf {
        let mut child = PointerBuf::from_tokens(self.segments());
        child.push_back(segment);
        child
    }

    fn container(&self) -> Option<PointerBuf> {
        let mut segments = self.segments();
        segments.pop()?;
        Some(PointerBuf::from_tokens(segments))
    }

    fn is_append(&self) -> bool {
        self.tokens().last().is_some_and(|t| t.encoded() == END_MARKER)
    }

    fn within(&self, other: &Pointer) -> bool {
        self.segments().starts_with(&other.segments())
    }

    fn lookup<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        tree.pointer(self.as_str())
    }
}

/// Parse an array index segment. Leading zeros are rejected.
pub fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}
