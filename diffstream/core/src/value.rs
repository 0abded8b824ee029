//! JSON Value Model
//!
//! Answers are arbitrary JSON trees. They are represented with
//! [`serde_json::Value`], a closed tagged union over
//! object / array / string / number / bool / null, so the diff engine can
//! match exhaustively on the variant set instead of inspecting types at
//! runtime.
//!
//! This module adds the pieces the engine needs on top of that union:
//! path segments that address a node inside a tree, a variant
//! classification, and the client-side application of [`Change`]s.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::diff::{Action, Change};

/// The JSON tree type used throughout the engine
pub type JsonValue = Value;

/// One step of a path into a JSON tree
///
/// Serialized untagged so a path renders as `["message", "content", 0]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array index
    Index(usize),
    /// Object key
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Key(k) => write!(f, "{k}"),
        }
    }
}

/// Path from the root of a tree to one of its nodes
pub type Path = Vec<PathSegment>;

/// Variant of a JSON value, without its payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// `{...}`
    Object,
    /// `[...]`
    Array,
    /// `"..."`
    String,
    /// Any JSON number
    Number,
    /// `true` / `false`
    Bool,
    /// `null`
    Null,
}

impl ValueKind {
    /// Classify a value
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Bool,
            Value::Null => Self::Null,
        }
    }
}

/// The baseline every stream starts from: an empty object
#[must_use]
pub fn empty_baseline() -> Value {
    Value::Object(Map::new())
}

/// Errors when applying a change to a tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// An intermediate path segment does not exist
    #[error("path not found at segment {index} of {path}")]
    PathNotFound {
        /// Rendered path of the change
        path: String,
        /// Position of the failing segment
        index: usize,
    },

    /// The segment type does not match the container (key into array, etc.)
    #[error("segment {segment} cannot address a {kind:?}")]
    SegmentMismatch {
        /// The failing segment
        segment: String,
        /// Kind of the container being addressed
        kind: ValueKind,
    },

    /// An array index beyond the end (other than a push at `len`)
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Array length
        len: usize,
    },

    /// `append` on a node that is neither a string nor an array tail
    #[error("cannot append {content:?} to {target:?}")]
    InvalidAppend {
        /// Kind of the existing node
        target: ValueKind,
        /// Kind of the appended content
        content: ValueKind,
    },
}

fn render_path(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("/{}", parts.join("/"))
}

/// Apply one change to a tree in place
///
/// Semantics follow what the diff engine emits:
/// - `upsert` replaces (or inserts) the node at the path
/// - `append` concatenates a string delta, or pushes an element when the
///   index equals the array length
/// - `remove` deletes an object key; for an array index it truncates the
///   array at that index (only tail indices are ever removed)
/// - `end` is a no-op
///
/// # Errors
///
/// Returns [`ApplyError`] if the path cannot be resolved against `root`.
pub fn apply_change(root: &mut Value, change: &Change) -> Result<(), ApplyError> {
    if change.action == Action::End {
        return Ok(());
    }

    let Some((last, parents)) = change.path.split_last() else {
        return apply_at_root(root, change);
    };

    let mut node = root;
    for (index, segment) in parents.iter().enumerate() {
        let kind = ValueKind::of(node);
        let next = match (segment, node) {
            (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
            (PathSegment::Index(i), Value::Array(items)) => items.get_mut(*i),
            _ => {
                return Err(ApplyError::SegmentMismatch {
                    segment: segment.to_string(),
                    kind,
                })
            }
        };
        node = next.ok_or_else(|| ApplyError::PathNotFound {
            path: render_path(&change.path),
            index,
        })?;
    }

    let content = change.content.clone().unwrap_or(Value::Null);
    let kind = ValueKind::of(node);
    match (last, node) {
        (PathSegment::Key(key), Value::Object(map)) => match change.action {
            Action::Upsert => {
                map.insert(key.clone(), content);
            }
            Action::Remove => {
                map.remove(key);
            }
            Action::Append => match map.get_mut(key) {
                Some(existing) => append_delta(existing, content)?,
                None => {
                    map.insert(key.clone(), content);
                }
            },
            Action::End => {}
        },
        (PathSegment::Index(i), Value::Array(items)) => {
            let len = items.len();
            match change.action {
                Action::Upsert if *i < len => items[*i] = content,
                Action::Upsert | Action::Append if *i == len => items.push(content),
                Action::Append if *i < len => append_delta(&mut items[*i], content)?,
                Action::Remove => items.truncate((*i).min(len)),
                Action::End => {}
                Action::Upsert | Action::Append => {
                    return Err(ApplyError::IndexOutOfBounds { index: *i, len })
                }
            }
        }
        (segment, _) => {
            return Err(ApplyError::SegmentMismatch {
                segment: segment.to_string(),
                kind,
            })
        }
    }
    Ok(())
}

fn apply_at_root(root: &mut Value, change: &Change) -> Result<(), ApplyError> {
    let content = change.content.clone().unwrap_or(Value::Null);
    match change.action {
        Action::Upsert => *root = content,
        Action::Remove => *root = Value::Null,
        Action::Append => append_delta(root, content)?,
        Action::End => {}
    }
    Ok(())
}

fn append_delta(target: &mut Value, content: Value) -> Result<(), ApplyError> {
    match (target, content) {
        (Value::String(existing), Value::String(delta)) => {
            existing.push_str(&delta);
            Ok(())
        }
        (target, content) => Err(ApplyError::InvalidAppend {
            target: ValueKind::of(target),
            content: ValueKind::of(&content),
        }),
    }
}

/// Apply a sequence of changes in order
///
/// # Errors
///
/// Stops at the first change that cannot be applied.
pub fn apply_changes<'a>(
    root: &mut Value,
    changes: impl IntoIterator<Item = &'a Change>,
) -> Result<(), ApplyError> {
    for change in changes {
        apply_change(root, change)?;
    }
    Ok(())
}
