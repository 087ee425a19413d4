// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for reconciled resources.
//!
//! Every reconciled kind follows the same lifecycle:
//!
//! ```text
//! NoFinalizer -> Finalized -> DeletionRequested -> Blocked (requeue) | Released
//! ```
//!
//! The finalizer is added on the first normal reconcile pass. Once a deletion
//! timestamp is set the reconciler runs its delete path, which either reports
//! [`DeletionOutcome::Blocked`] while dependents remain, or
//! [`DeletionOutcome::Released`] once cleanup is complete. A blocked deletion is a
//! normal requeue, never an error.
//!
//! The in-memory helpers ([`add_finalizer`], [`remove_finalizer`]) mutate the object
//! the [`Patcher`](super::patch::Patcher) persists on exit. The store-backed helpers
//! ([`ensure_finalizer`], [`remove_finalizer_from`]) are for side objects such as the
//! identity secret, which are not owned by the current pass.

use crate::store::{get_object, patch_object, ObjectKey, ResourceStore, StoreError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Position of a resource in the finalizer lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// Not deleting and the finalizer is absent.
    NoFinalizer,
    /// Not deleting and the finalizer is present.
    Finalized,
    /// Deleting while the finalizer is still present; cleanup must run.
    DeletionRequested,
    /// Deleting and the finalizer is gone; nothing left to do.
    Released,
}

/// Result of a delete path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Cleanup finished; the finalizer may be removed.
    Released,
    /// Dependents remain; try again after the delay.
    Blocked(Duration),
}

/// Returns `true` if `finalizer` is present.
#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Returns `true` once a deletion timestamp is set.
#[must_use]
pub fn is_deleting(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Compute the lifecycle state of a resource for one finalizer.
#[must_use]
pub fn finalizer_state(meta: &ObjectMeta, finalizer: &str) -> FinalizerState {
    match (is_deleting(meta), has_finalizer(meta, finalizer)) {
        (false, false) => FinalizerState::NoFinalizer,
        (false, true) => FinalizerState::Finalized,
        (true, true) => FinalizerState::DeletionRequested,
        (true, false) => FinalizerState::Released,
    }
}

/// Add a finalizer in memory. Returns `true` if it was missing.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove a finalizer in memory. Returns `true` if it was present.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

/// Apply a delete path outcome to the resource and map it to a controller action.
///
/// On [`DeletionOutcome::Released`] the finalizer is removed in memory so the patch
/// on exit lets the API server complete the deletion.
pub fn complete_deletion(meta: &mut ObjectMeta, finalizer: &str, outcome: DeletionOutcome) -> Action {
    match outcome {
        DeletionOutcome::Released => {
            if remove_finalizer(meta, finalizer) {
                info!(
                    "Removed finalizer {} from {}",
                    finalizer,
                    meta.name.as_deref().unwrap_or_default()
                );
            }
            Action::await_change()
        }
        DeletionOutcome::Blocked(delay) => Action::requeue(delay),
    }
}

/// Add a finalizer to a stored object if it is missing.
///
/// Returns `true` when a write was issued.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the object does not exist, or any store failure.
pub async fn ensure_finalizer<K>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    finalizer: &str,
) -> Result<bool, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let obj: K = get_object(store, key)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            key: key.to_string(),
        })?;

    let mut meta = obj.meta().clone();
    if !add_finalizer(&mut meta, finalizer) {
        return Ok(false);
    }

    info!("Adding finalizer {} to {} {}", finalizer, K::kind(&()), key);
    let patch = json!({
        "metadata": {
            "finalizers": meta.finalizers,
            "resourceVersion": meta.resource_version,
        }
    });
    patch_object::<K>(store, key, &patch).await?;
    Ok(true)
}

/// Remove a finalizer from a stored object if present.
///
/// A missing object counts as already released. Returns `true` when a write was issued.
///
/// # Errors
///
/// Returns any store failure other than not-found.
pub async fn remove_finalizer_from<K>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    finalizer: &str,
) -> Result<bool, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let Some(obj) = get_object::<K>(store, key).await? else {
        return Ok(false);
    };

    let mut meta = obj.meta().clone();
    if !remove_finalizer(&mut meta, finalizer) {
        return Ok(false);
    }

    info!("Removing finalizer {} from {} {}", finalizer, K::kind(&()), key);
    let patch = json!({
        "metadata": {
            "finalizers": meta.finalizers,
            "resourceVersion": meta.resource_version,
        }
    });
    match patch_object::<K>(store, key, &patch).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
