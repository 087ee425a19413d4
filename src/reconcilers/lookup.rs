// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Parent and sibling lookups shared by the reconcilers.
//!
//! Relationships are resolved from explicit data only: owner references, the
//! `cluster.x-k8s.io/cluster-name` label and object references in specs. A parent
//! that is not there yet is `Ok(None)`; callers decide whether that means waiting.

use super::resources::owner_of_kind;
use crate::constants::{KIND_CLUSTER, KIND_MACHINE, KIND_VSPHERE_CLUSTER};
use crate::crd::{Cluster, Machine, VSphereCluster, VSphereMachine};
use crate::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, PAUSED_ANNOTATION};
use crate::store::{
    cluster_labels, get_object, list_objects, ObjectKey, ResourceStore, StoreError,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Value of the cluster-name label.
#[must_use]
pub fn cluster_name_label(meta: &ObjectMeta) -> Option<&str> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(CLUSTER_NAME_LABEL))
        .map(String::as_str)
}

/// Returns `true` for objects labelled as control-plane members.
#[must_use]
pub fn is_control_plane(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .is_some_and(|l| l.contains_key(CONTROL_PLANE_LABEL))
}

/// Returns `true` if the cluster or the object itself is paused.
#[must_use]
pub fn is_paused(cluster: Option<&Cluster>, meta: &ObjectMeta) -> bool {
    cluster.is_some_and(|c| c.spec.paused)
        || meta
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}

/// Cluster API cluster named `name` in `namespace`.
///
/// # Errors
///
/// Returns any store failure other than not-found.
pub async fn get_cluster(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<Option<Cluster>, StoreError> {
    get_object(store, &ObjectKey::namespaced(namespace, name)).await
}

/// Cluster owning `meta`, through its `Cluster` owner reference or else its
/// cluster-name label.
///
/// # Errors
///
/// Returns any store failure other than not-found.
pub async fn owner_cluster(
    store: &dyn ResourceStore,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>, StoreError> {
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let name = owner_of_kind(meta, KIND_CLUSTER)
        .map(|r| r.name.as_str())
        .or_else(|| cluster_name_label(meta));
    match name {
        Some(name) => get_cluster(store, namespace, name).await,
        None => Ok(None),
    }
}

/// Machine owning `meta`.
///
/// # Errors
///
/// Returns any store failure other than not-found.
pub async fn owner_machine(
    store: &dyn ResourceStore,
    meta: &ObjectMeta,
) -> Result<Option<Machine>, StoreError> {
    let Some(owner) = owner_of_kind(meta, KIND_MACHINE) else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    get_object(store, &ObjectKey::namespaced(namespace, owner.name.clone())).await
}

/// The VSphereCluster a Cluster API cluster points at.
///
/// # Errors
///
/// Returns any store failure other than not-found.
pub async fn infrastructure_cluster(
    store: &dyn ResourceStore,
    cluster: &Cluster,
) -> Result<Option<VSphereCluster>, StoreError> {
    let Some(reference) = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .filter(|r| r.kind == KIND_VSPHERE_CLUSTER)
    else {
        return Ok(None);
    };
    let namespace = reference
        .namespace
        .clone()
        .or_else(|| cluster.metadata.namespace.clone())
        .unwrap_or_default();
    get_object(store, &ObjectKey::namespaced(namespace, reference.name.clone())).await
}

/// VSphereMachines labelled with `cluster_name`, in list order.
///
/// # Errors
///
/// Returns any store failure.
pub async fn cluster_vsphere_machines(
    store: &dyn ResourceStore,
    namespace: &str,
    cluster_name: &str,
) -> Result<Vec<VSphereMachine>, StoreError> {
    list_objects(store, Some(namespace), &cluster_labels(cluster_name)).await
}

#[cfg(test)]
#[path = "lookup_tests.rs"]
mod lookup_tests;
