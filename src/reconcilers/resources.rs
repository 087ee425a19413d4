// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Owner reference and create-or-patch helpers shared by the reconcilers.
//!
//! Ownership between objects is explicit data: an owner reference carries the owner's
//! kind, name and UID, and lookups are list-and-filter queries over those references.
//!
//! [`create_or_patch`] is the idempotent write used for child objects (VSphereVMs of
//! machines and load balancers): it creates the object when missing, otherwise it runs
//! the same mutation on the stored copy and writes only the resulting difference.

use crate::store::{
    api_resource, create_object, get_object, merge, patch_object, ObjectKey, ResourceStore,
    StoreError,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// What [`create_or_patch`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// The object did not exist and was created
    Created,
    /// The stored object differed and was patched
    Updated,
    /// The stored object already matched
    Unchanged,
}

/// Owner reference pointing at `owner`.
///
/// A controller reference also blocks the owner's deletion until the dependent is gone.
#[must_use]
pub fn owner_reference<K>(owner: &K, controller: bool) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: controller.then_some(true),
        block_owner_deletion: controller.then_some(true),
    }
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    if !a.uid.is_empty() && !b.uid.is_empty() {
        return a.uid == b.uid;
    }
    a.kind == b.kind && a.name == b.name
}

/// Returns `true` if `meta` carries an owner reference to the object with `uid`.
#[must_use]
pub fn is_owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
}

/// First owner reference of the given kind.
#[must_use]
pub fn owner_of_kind<'a>(meta: &'a ObjectMeta, kind: &str) -> Option<&'a OwnerReference> {
    meta.owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.kind == kind))
}

/// The controller owner reference, if any.
#[must_use]
pub fn controller_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)))
}

/// Add `owner` unless an equivalent reference is already present.
///
/// Returns `true` when the reference was added. An existing reference is never
/// rewritten, so the first owner set stays in place.
pub fn ensure_owner_reference(meta: &mut ObjectMeta, owner: OwnerReference) -> bool {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if refs.iter().any(|r| same_owner(r, &owner)) {
        return false;
    }
    refs.push(owner);
    true
}

/// Remove the owner reference with `uid`. Returns `true` if one was removed.
pub fn remove_owner_reference(meta: &mut ObjectMeta, uid: &str) -> bool {
    let Some(refs) = meta.owner_references.as_mut() else {
        return false;
    };
    let before = refs.len();
    refs.retain(|r| r.uid != uid);
    before != refs.len()
}

/// Number of owner references on an object.
#[must_use]
pub fn owner_count(meta: &ObjectMeta) -> usize {
    meta.owner_references.as_ref().map_or(0, Vec::len)
}

fn persisted(value: &Value) -> Value {
    json!({
        "metadata": {
            "labels": value.pointer("/metadata/labels").cloned().unwrap_or(Value::Null),
            "annotations": value.pointer("/metadata/annotations").cloned().unwrap_or(Value::Null),
            "ownerReferences": value
                .pointer("/metadata/ownerReferences")
                .cloned()
                .unwrap_or(Value::Null),
        },
        "spec": value.get("spec").cloned().unwrap_or(Value::Null),
    })
}

fn to_value<K: Serialize>(obj: &K) -> Result<Value, StoreError> {
    serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
        kind: std::any::type_name::<K>().to_string(),
        source,
    })
}

/// Create `desired` after applying `mutate`, or apply `mutate` to the stored object
/// and persist the difference.
///
/// Only labels, annotations, owner references and spec are compared and written.
/// The patch carries the stored `resourceVersion`.
///
/// # Errors
///
/// Returns any store failure, including [`StoreError::Conflict`] when the stored object
/// changed concurrently.
pub async fn create_or_patch<K, F>(
    store: &dyn ResourceStore,
    desired: K,
    mutate: F,
) -> Result<(K, Operation), StoreError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    F: Fn(&mut K),
{
    let key = ObjectKey::of(&desired);
    let kind = api_resource::<K>().kind;

    let Some(mut existing) = get_object::<K>(store, &key).await? else {
        let mut obj = desired;
        mutate(&mut obj);
        let created = create_object(store, &obj).await?;
        info!("Created {} {}", kind, key);
        return Ok((created, Operation::Created));
    };

    let before = persisted(&to_value(&existing)?);
    mutate(&mut existing);
    let after = persisted(&to_value(&existing)?);

    let Some(mut patch) = merge::diff(&before, &after) else {
        debug!("{} {} is up to date", kind, key);
        return Ok((existing, Operation::Unchanged));
    };
    if let Some(metadata) = patch
        .as_object_mut()
        .map(|m| m.entry("metadata").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
    {
        metadata.insert(
            "resourceVersion".to_string(),
            json!(existing.meta().resource_version),
        );
    }
    let updated = patch_object::<K>(store, &key, &patch).await?;
    info!("Updated {} {}", kind, key);
    Ok((updated, Operation::Updated))
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
