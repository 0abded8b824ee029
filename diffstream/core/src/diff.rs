//! Diff Engine
//!
//! Turns two full snapshots into an ordered list of path-addressed edit
//! operations. The engine is a pure function: it holds no state and leaves
//! sequence numbering to the [`ChangeEmitter`](crate::emitter::ChangeEmitter).
//!
//! # Policy
//!
//! ```text
//!   old kind != new kind          -> upsert(path, new)
//!   object vs object              -> new keys: upsert / recurse
//!                                    dropped keys: remove
//!   array vs array                -> overlap: recurse per index
//!                                    longer new: append(i, new[i]) ascending
//!                                    shorter new: remove(i) ascending
//!   string vs string              -> new = old + suffix: append(path, suffix)
//!                                    otherwise unequal: upsert(path, new)
//!   other scalars                 -> unequal: upsert(path, new)
//! ```
//!
//! Growing strings therefore cost only their delta on the wire, which is the
//! common case for a streamed model answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::{Path, PathSegment, ValueKind};

/// Kind of edit carried by a [`Change`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Insert or replace the node at the path
    Upsert,
    /// Append a string delta, or push a new array element
    Append,
    /// Delete the node at the path
    Remove,
    /// Terminal marker; the stream is over
    End,
}

impl Action {
    /// Wire name of the action
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Append => "append",
            Self::Remove => "remove",
            Self::End => "end",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incremental edit operation
///
/// Serializes directly to the wire shape
/// `{"seq_id": 3, "key": ["text"], "content": " there", "action": "append"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Position in the emitting stream (assigned by the emitter)
    pub seq_id: u64,
    /// Path of the node being edited
    #[serde(rename = "key")]
    pub path: Path,
    /// New content, or `None` for `remove` / `end`
    pub content: Option<Value>,
    /// The edit kind
    pub action: Action,
}

impl Change {
    fn new(path: &[PathSegment], content: Option<Value>, action: Action) -> Self {
        Self {
            seq_id: 0,
            path: path.to_vec(),
            content,
            action,
        }
    }

    /// The synthetic terminal change
    #[must_use]
    pub fn end(seq_id: u64) -> Self {
        Self {
            seq_id,
            path: Vec::new(),
            content: None,
            action: Action::End,
        }
    }
}

/// Compute the changes that turn `old` into `new`, rooted at `path`
///
/// Every returned change has `seq_id == 0`; callers number them.
#[must_use]
pub fn diff(old: &Value, new: &Value, path: &[PathSegment]) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut path = path.to_vec();
    diff_at(&mut changes, &mut path, old, new);
    changes
}

fn diff_at(changes: &mut Vec<Change>, path: &mut Path, old: &Value, new: &Value) {
    if ValueKind::of(old) != ValueKind::of(new) {
        changes.push(Change::new(path, Some(new.clone()), Action::Upsert));
        return;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_child) in new_map {
                path.push(PathSegment::Key(key.clone()));
                match old_map.get(key) {
                    None => {
                        changes.push(Change::new(path, Some(new_child.clone()), Action::Upsert));
                    }
                    Some(old_child) => diff_at(changes, path, old_child, new_child),
                }
                path.pop();
            }
            for key in old_map.keys().filter(|k| !new_map.contains_key(*k)) {
                path.push(PathSegment::Key(key.clone()));
                changes.push(Change::new(path, None, Action::Remove));
                path.pop();
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let overlap = old_items.len().min(new_items.len());
            for (i, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                path.push(PathSegment::Index(i));
                diff_at(changes, path, old_item, new_item);
                path.pop();
            }
            for (i, added) in new_items.iter().enumerate().skip(overlap) {
                path.push(PathSegment::Index(i));
                changes.push(Change::new(path, Some(added.clone()), Action::Append));
                path.pop();
            }
            for i in new_items.len()..old_items.len() {
                path.push(PathSegment::Index(i));
                changes.push(Change::new(path, None, Action::Remove));
                path.pop();
            }
        }
        (Value::String(old_str), Value::String(new_str)) => {
            match new_str.strip_prefix(old_str.as_str()) {
                Some("") => {}
                Some(delta) => {
                    let delta = Value::String(delta.to_string());
                    changes.push(Change::new(path, Some(delta), Action::Append));
                }
                None => changes.push(Change::new(path, Some(new.clone()), Action::Upsert)),
            }
        }
        _ => {
            if old != new {
                changes.push(Change::new(path, Some(new.clone()), Action::Upsert));
            }
        }
    }
}
