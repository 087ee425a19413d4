// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource store abstraction used by every reconciler.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through [`ResourceStore`],
//! an object-safe trait operating on [`ApiResource`] descriptors and JSON documents,
//! so the same reconcile code runs against:
//!
//! - [`KubeStore`]: a live API server (management or workload cluster)
//! - [`MemoryStore`]: an in-memory store with resource versions and conflict
//!   detection, used by tests and simulations
//!
//! Typed helpers ([`get_object`], [`list_objects`], [`create_object`], ...) wrap the
//! trait for any `kube::Resource` whose dynamic type is `()`, i.e. every CRD in
//! [`crate::crd`] and every `k8s-openapi` type.
//!
//! # Optimistic concurrency
//!
//! A patch whose `metadata.resourceVersion` does not match the stored object fails
//! with [`StoreError::Conflict`]. The patcher always sends the version it read, so
//! concurrent writers surface as reconcile errors and are retried by the controller.

use async_trait::async_trait;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod kube_api;
pub mod memory;
pub mod merge;

pub use kube_api::KubeStore;
pub use memory::MemoryStore;

/// Identity of an object inside one kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object.
    #[must_use]
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing resource.
    #[must_use]
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Errors returned by a [`ResourceStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the object
        kind: String,
        /// Object key
        key: String,
    },

    /// A create raced with another writer or the object was never deleted.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: String,
        /// Object key
        key: String,
    },

    /// The resource version sent with a write is stale.
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        /// Kind of the object
        kind: String,
        /// Object key
        key: String,
        /// Message reported by the store
        message: String,
    },

    /// Any other failure reported by the store.
    #[error("store error for {kind} (HTTP {code}): {message}")]
    Api {
        /// Kind of the object
        kind: String,
        /// HTTP status code, 0 when not applicable
        code: u16,
        /// Message reported by the store
        message: String,
    },

    /// An object could not be converted to or from its typed representation.
    #[error("failed to convert {kind}: {source}")]
    Serialization {
        /// Kind of the object
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`StoreError::AlreadyExists`].
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` for [`StoreError::Conflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Returns `true` if `err` wraps a [`StoreError::NotFound`].
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_not_found)
}

/// Returns `true` if `err` wraps a [`StoreError::AlreadyExists`].
#[must_use]
pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_already_exists)
}

/// A consistent, versioned object store.
///
/// Implementations must be safe to share between reconcile tasks.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object, `Ok(None)` when it does not exist.
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<Value>, StoreError>;

    /// List objects of a kind, optionally restricted to a namespace and a label subset.
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Create an object. Fails with [`StoreError::AlreadyExists`] if it exists.
    async fn create(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        obj: &Value,
    ) -> Result<Value, StoreError>;

    /// Apply a JSON merge patch to metadata and spec.
    async fn patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError>;

    /// Apply a JSON merge patch to the status subresource.
    async fn patch_status(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError>;

    /// Request deletion. Objects holding finalizers stay until the finalizers are removed.
    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Describe a statically typed resource.
#[must_use]
pub fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

fn from_value<K: DeserializeOwned>(ar: &ApiResource, value: Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Serialization {
        kind: ar.kind.clone(),
        source,
    })
}

fn to_value<K: Serialize>(ar: &ApiResource, obj: &K) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
        kind: ar.kind.clone(),
        source,
    })?;
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".into(), Value::String(ar.api_version.clone()));
        map.insert("kind".into(), Value::String(ar.kind.clone()));
    }
    Ok(value)
}

/// Fetch a typed object, `Ok(None)` when it does not exist.
///
/// # Errors
///
/// Returns an error if the store fails or the object cannot be deserialized.
pub async fn get_object<K>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
) -> Result<Option<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = api_resource::<K>();
    store
        .get(&ar, key)
        .await?
        .map(|value| from_value(&ar, value))
        .transpose()
}

/// List typed objects matching a namespace and label subset.
///
/// # Errors
///
/// Returns an error if the store fails or an object cannot be deserialized.
pub async fn list_objects<K>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = api_resource::<K>();
    store
        .list(&ar, namespace, labels)
        .await?
        .into_iter()
        .map(|value| from_value(&ar, value))
        .collect()
}

/// Create a typed object and return the stored version.
///
/// # Errors
///
/// Returns [`StoreError::AlreadyExists`] if the object exists, or any store failure.
pub async fn create_object<K>(store: &dyn ResourceStore, obj: &K) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let ar = api_resource::<K>();
    let key = ObjectKey::of(obj);
    let value = to_value(&ar, obj)?;
    let created = store.create(&ar, &key, &value).await?;
    from_value(&ar, created)
}

/// Create a typed object unless it already exists.
///
/// Returns `true` when the object was created by this call.
///
/// # Errors
///
/// Returns any store failure other than [`StoreError::AlreadyExists`].
pub async fn create_if_absent<K>(store: &dyn ResourceStore, obj: &K) -> Result<bool, StoreError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    match create_object(store, obj).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Merge-patch metadata/spec of a typed object and return the stored version.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`], [`StoreError::Conflict`] or any store failure.
pub async fn patch_object<K>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    patch: &Value,
) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = api_resource::<K>();
    let patched = store.patch(&ar, key, patch).await?;
    from_value(&ar, patched)
}

/// Merge-patch the status subresource of a typed object and return the stored version.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`], [`StoreError::Conflict`] or any store failure.
pub async fn patch_object_status<K>(
    store: &dyn ResourceStore,
    key: &ObjectKey,
    patch: &Value,
) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = api_resource::<K>();
    let patched = store.patch_status(&ar, key, patch).await?;
    from_value(&ar, patched)
}

/// Request deletion of a typed object.
///
/// Returns `false` when the object was already gone.
///
/// # Errors
///
/// Returns any store failure other than [`StoreError::NotFound`].
pub async fn delete_object<K>(store: &dyn ResourceStore, key: &ObjectKey) -> Result<bool, StoreError>
where
    K: Resource<DynamicType = ()>,
{
    let ar = api_resource::<K>();
    match store.delete(&ar, key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Label set selecting every object of one cluster.
#[must_use]
pub fn cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        crate::labels::CLUSTER_NAME_LABEL.to_string(),
        cluster_name.to_string(),
    )])
}
