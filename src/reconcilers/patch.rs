// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Patch-on-exit persistence for reconciled resources.
//!
//! A [`Patcher`] snapshots a resource when a reconcile pass starts. Whatever path the
//! reconciler takes, it hands the mutated object back through [`Patcher::finish`],
//! which:
//!
//! 1. recomputes the `Ready` summary condition,
//! 2. merge-patches metadata (labels, annotations, finalizers, owner references) and
//!    spec if they changed,
//! 3. merge-patches the status subresource if it changed.
//!
//! Both writes carry the `resourceVersion` the pass started from, so a concurrent
//! writer makes the patch fail with a conflict. The conflict is returned to the
//! controller, which re-runs the reconcile against fresh state. Nothing is retried here.
//!
//! A pass that changes nothing issues no writes.

use super::status::{set_summary, Conditioned};
use crate::store::{api_resource, merge, ObjectKey, ResourceStore, StoreError};
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::Resource;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

const PERSISTED_METADATA: [&str; 4] = ["labels", "annotations", "finalizers", "ownerReferences"];

/// Snapshot-and-diff writer for one resource.
pub struct Patcher<K> {
    store: Arc<dyn ResourceStore>,
    ar: ApiResource,
    key: ObjectKey,
    before: Value,
    _kind: PhantomData<fn() -> K>,
}

fn to_json<K: Serialize>(ar: &ApiResource, obj: &K) -> Result<Value, StoreError> {
    serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
        kind: ar.kind.clone(),
        source,
    })
}

/// Metadata and spec fields written through the main resource endpoint.
fn persisted_fields(obj: &Value) -> Value {
    let mut metadata = Map::new();
    for field in PERSISTED_METADATA {
        if let Some(v) = obj.pointer(&format!("/metadata/{field}")) {
            if !v.is_null() {
                metadata.insert(field.to_string(), v.clone());
            }
        }
    }
    let mut out = Map::new();
    out.insert("metadata".to_string(), Value::Object(metadata));
    if let Some(spec) = obj.get("spec") {
        out.insert("spec".to_string(), spec.clone());
    }
    Value::Object(out)
}

fn status_fields(obj: &Value) -> Value {
    json!({ "status": obj.get("status").cloned().unwrap_or(Value::Null) })
}

fn with_version(mut patch: Value, version: Option<&str>) -> Value {
    if let (Some(version), Some(map)) = (version, patch.as_object_mut()) {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), json!(version));
        }
    }
    patch
}

fn resource_version(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl<K> Patcher<K>
where
    K: Resource<DynamicType = ()> + Serialize + Conditioned,
{
    /// Snapshot `obj` as the last persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the object cannot be serialized.
    pub fn new(store: Arc<dyn ResourceStore>, obj: &K) -> Result<Self, StoreError> {
        let ar = api_resource::<K>();
        let before = to_json(&ar, obj)?;
        Ok(Self {
            store,
            key: ObjectKey::of(obj),
            ar,
            before,
            _kind: PhantomData,
        })
    }

    /// Persist the difference between the snapshot and `obj`.
    ///
    /// Returns `true` when at least one write was issued. On success the snapshot
    /// and `obj.metadata.resourceVersion` reflect the stored object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the object changed since the snapshot,
    /// or any other store failure.
    pub async fn patch(&mut self, obj: &mut K) -> Result<bool, StoreError> {
        set_summary(obj);
        let after = to_json(&self.ar, obj)?;
        let mut wrote = false;

        if let Some(diff) = merge::diff(&persisted_fields(&self.before), &persisted_fields(&after)) {
            debug!("Patching {} {}: {}", self.ar.kind, self.key, diff);
            let patch = with_version(diff, obj.meta().resource_version.as_deref());
            let stored = self.store.patch(&self.ar, &self.key, &patch).await?;
            obj.meta_mut().resource_version = resource_version(&stored);
            wrote = true;
        }

        let released = obj.meta().deletion_timestamp.is_some()
            && obj.meta().finalizers.as_ref().is_none_or(Vec::is_empty);

        if !released {
            if let Some(diff) = merge::diff(&status_fields(&self.before), &status_fields(&after)) {
                debug!("Patching {} {} status", self.ar.kind, self.key);
                let patch = with_version(diff, obj.meta().resource_version.as_deref());
                let stored = self
                    .store
                    .patch_status(&self.ar, &self.key, &patch)
                    .await?;
                obj.meta_mut().resource_version = resource_version(&stored);
                wrote = true;
            }
        }

        self.before = to_json(&self.ar, obj)?;
        Ok(wrote)
    }

    /// Persist `obj` and merge the outcome with the reconcile result.
    ///
    /// The reconcile error takes precedence; a patch failure on top of it is logged.
    /// When the reconcile succeeded, a patch failure becomes the result.
    ///
    /// # Errors
    ///
    /// Returns the reconcile error, or the patch error if the reconcile succeeded.
    pub async fn finish(
        mut self,
        obj: &mut K,
        result: anyhow::Result<Action>,
    ) -> anyhow::Result<Action> {
        match (self.patch(obj).await, result) {
            (Ok(_), result) => result,
            (Err(patch_err), Err(err)) => {
                warn!(
                    "Failed to patch {} {} after reconcile error: {}",
                    self.ar.kind, self.key, patch_err
                );
                Err(err)
            }
            (Err(patch_err), Ok(_)) => Err(patch_err.into()),
        }
    }
}

#[cfg(test)]
#[path = "patch_tests.rs"]
mod patch_tests;
