// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! JSON merge patch (RFC 7386) generation and application.
//!
//! The patcher uses [`diff`] to turn "before" and "after" snapshots of a resource into
//! the smallest merge patch, and [`MemoryStore`](super::MemoryStore) uses [`apply`] to
//! behave like the API server when it receives one.

use serde_json::{Map, Value};

/// Compute the merge patch that turns `before` into `after`.
///
/// Returns `None` when the two documents are equal, so callers can skip the write.
/// Objects are diffed key by key: removed keys become `null`, nested objects recurse,
/// and any other changed value (including arrays) is replaced wholesale.
#[must_use]
pub fn diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) => {
                        if let Some(nested) = diff(old_value, new_value) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        // A nested object replaced by a scalar or array cannot be expressed as a
        // partial update.
        _ => Some(after.clone()),
    }
}

/// Apply a merge patch to `target` in place.
pub fn apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                apply(entry, value);
            }
        }
    }
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod merge_tests;
