// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ResourceStore`] with API-server-like semantics.
//!
//! The store keeps JSON documents keyed by kind, namespace and name and mimics the
//! parts of the API server the reconcilers depend on:
//!
//! - every write bumps a global `metadata.resourceVersion`
//! - a patch carrying a stale `resourceVersion` fails with [`StoreError::Conflict`]
//! - metadata/spec patches ignore `status`, status patches only touch `status`
//! - deleting an object that holds finalizers only sets `deletionTimestamp`; the
//!   object disappears once a later patch empties its finalizers
//!
//! [`MemoryStore::writes`] counts successful writes so tests can assert that a
//! reconcile pass was a no-op.

use super::merge;
use super::{ObjectKey, ResourceStore, StoreError};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::discovery::ApiResource;
use kube::Resource;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

type StoreKey = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<StoreKey, Value>,
    resource_version: u64,
    writes: usize,
    failing_creates: HashMap<String, String>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn store_key(ar: &ApiResource, key: &ObjectKey) -> StoreKey {
    (
        format!("{}/{}", ar.group, ar.kind),
        key.namespace.clone().unwrap_or_default(),
        key.name.clone(),
    )
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn finalizers_empty(obj: &Value) -> bool {
    obj.pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty)
}

fn is_deleting(obj: &Value) -> bool {
    obj.pointer("/metadata/deletionTimestamp")
        .is_some_and(|v| !v.is_null())
}

fn labels_match(obj: &Value, labels: &BTreeMap<String, String>) -> bool {
    labels.iter().all(|(k, v)| {
        obj.pointer("/metadata/labels")
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            == Some(v.as_str())
    })
}

fn check_version(
    ar: &ApiResource,
    key: &ObjectKey,
    current: &Value,
    patch: &Value,
) -> Result<(), StoreError> {
    let wanted = patch
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str);
    let stored = current
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str);
    match wanted {
        Some(v) if Some(v) != stored => Err(StoreError::Conflict {
            kind: ar.kind.clone(),
            key: key.to_string(),
            message: format!(
                "resourceVersion {v} is stale, current is {}",
                stored.unwrap_or_default()
            ),
        }),
        _ => Ok(()),
    }
}

fn not_found(ar: &ApiResource, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: ar.kind.clone(),
        key: key.to_string(),
    }
}

fn set_metadata(obj: &mut Value, field: &str, value: Value) {
    if let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(field.to_string(), value);
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful writes (create, patch, delete) since creation.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of stored objects of the given kind.
    #[must_use]
    pub fn count(&self, ar: &ApiResource) -> usize {
        let kind = format!("{}/{}", ar.group, ar.kind);
        self.lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Make every subsequent create of `kind` fail with `message`.
    pub fn fail_creates(&self, kind: &str, message: &str) {
        self.lock()
            .failing_creates
            .insert(kind.to_string(), message.to_string());
    }

    /// Store an object as-is, status included, without counting a write.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized.
    pub fn seed<K>(&self, obj: &K) -> Result<(), StoreError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let ar = ApiResource::erase::<K>(&());
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
            kind: ar.kind.clone(),
            source,
        })?;
        value["apiVersion"] = json!(ar.api_version);
        value["kind"] = json!(ar.kind);

        let mut inner = self.lock();
        let version = inner.next_version();
        if value.get("metadata").is_none_or(Value::is_null) {
            value["metadata"] = json!({});
        }
        set_metadata(&mut value, "resourceVersion", json!(version));
        if value.pointer("/metadata/uid").is_none_or(Value::is_null) {
            set_metadata(&mut value, "uid", json!(synthetic_uid(&version)));
        }
        inner.objects.insert(store_key(&ar, &key), value);
        Ok(())
    }
}

fn synthetic_uid(version: &str) -> String {
    let n: u64 = version.parse().unwrap_or_default();
    format!("{n:08x}-5a5a-4000-8000-{n:012x}")
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().objects.get(&store_key(ar, key)).cloned())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, StoreError> {
        let kind = format!("{}/{}", ar.group, ar.kind);
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.is_none_or(|n| n == ns.as_str()))
            .filter(|(_, obj)| labels_match(obj, labels))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        obj: &Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let skey = store_key(ar, key);
        if inner.objects.contains_key(&skey) {
            return Err(StoreError::AlreadyExists {
                kind: ar.kind.clone(),
                key: key.to_string(),
            });
        }
        if let Some(message) = inner.failing_creates.get(&ar.kind) {
            return Err(StoreError::Api {
                kind: ar.kind.clone(),
                code: 500,
                message: message.clone(),
            });
        }

        let version = inner.next_version();
        let mut value = obj.clone();
        value["apiVersion"] = json!(ar.api_version);
        value["kind"] = json!(ar.kind);
        if value.get("metadata").is_none_or(Value::is_null) {
            value["metadata"] = json!({});
        }
        set_metadata(&mut value, "name", json!(key.name));
        if let Some(ns) = &key.namespace {
            set_metadata(&mut value, "namespace", json!(ns));
        }
        if value.pointer("/metadata/uid").is_none_or(Value::is_null) {
            set_metadata(&mut value, "uid", json!(synthetic_uid(&version)));
        }
        set_metadata(&mut value, "resourceVersion", json!(version));
        set_metadata(&mut value, "creationTimestamp", json!(now()));
        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("deletionTimestamp");
        }

        inner.writes += 1;
        inner.objects.insert(skey, value.clone());
        Ok(value)
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let skey = store_key(ar, key);
        let current = inner
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| not_found(ar, key))?;
        check_version(ar, key, &current, patch)?;

        let mut body = patch.clone();
        if let Some(map) = body.as_object_mut() {
            map.remove("status");
        }
        if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("resourceVersion");
        }

        let mut updated = current;
        merge::apply(&mut updated, &body);
        let version = inner.next_version();
        set_metadata(&mut updated, "resourceVersion", json!(version));
        inner.writes += 1;

        if is_deleting(&updated) && finalizers_empty(&updated) {
            inner.objects.remove(&skey);
        } else {
            inner.objects.insert(skey, updated.clone());
        }
        Ok(updated)
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let mut inner = self.lock();
        let skey = store_key(ar, key);
        let current = inner
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| not_found(ar, key))?;
        check_version(ar, key, &current, patch)?;

        let mut updated = current;
        if let Some(status) = patch.get("status") {
            let target = updated
                .as_object_mut()
                .map(|m| m.entry("status").or_insert(Value::Null));
            if let Some(target) = target {
                merge::apply(target, status);
            }
        }
        let version = inner.next_version();
        set_metadata(&mut updated, "resourceVersion", json!(version));
        inner.writes += 1;
        inner.objects.insert(skey, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let skey = store_key(ar, key);
        let mut current = inner
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| not_found(ar, key))?;

        if finalizers_empty(&current) {
            inner.objects.remove(&skey);
            inner.writes += 1;
            return Ok(());
        }

        if !is_deleting(&current) {
            let version = inner.next_version();
            set_metadata(&mut current, "deletionTimestamp", json!(now()));
            set_metadata(&mut current, "resourceVersion", json!(version));
            inner.objects.insert(skey, current);
            inner.writes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
