// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ResourceStore`] backed by a live Kubernetes API server.

use super::{ObjectKey, ResourceStore, StoreError};
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::ApiResource,
    Api, Client,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Store that forwards every call to the API server through `kube::Api<DynamicObject>`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn map_error(ar: &ApiResource, key: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: ar.kind.clone(),
            key: key.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: ar.kind.clone(),
                key: key.to_string(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind: ar.kind.clone(),
            key: key.to_string(),
            message: ae.message,
        },
        kube::Error::Api(ae) => StoreError::Api {
            kind: ar.kind.clone(),
            code: ae.code,
            message: ae.message,
        },
        other => StoreError::Api {
            kind: ar.kind.clone(),
            code: 0,
            message: other.to_string(),
        },
    }
}

fn to_json(ar: &ApiResource, obj: &DynamicObject) -> Result<Value, StoreError> {
    serde_json::to_value(obj).map_err(|source| StoreError::Serialization {
        kind: ar.kind.clone(),
        source,
    })
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<Value>, StoreError> {
        let api = self.api(ar, key.namespace.as_deref());
        let obj = api
            .get_opt(&key.name)
            .await
            .map_err(|e| map_error(ar, &key.to_string(), e))?;
        obj.map(|o| to_json(ar, &o)).transpose()
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, StoreError> {
        let api = self.api(ar, namespace);
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| map_error(ar, namespace.unwrap_or("*"), e))?;
        list.items.iter().map(|o| to_json(ar, o)).collect()
    }

    async fn create(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        obj: &Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(ar, key.namespace.as_deref());
        let dynamic: DynamicObject =
            serde_json::from_value(obj.clone()).map_err(|source| StoreError::Serialization {
                kind: ar.kind.clone(),
                source,
            })?;
        debug!("Creating {} {}", ar.kind, key);
        let created = api
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| map_error(ar, &key.to_string(), e))?;
        to_json(ar, &created)
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(ar, key.namespace.as_deref());
        let patched = api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_error(ar, &key.to_string(), e))?;
        to_json(ar, &patched)
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let api = self.api(ar, key.namespace.as_deref());
        let patched = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_error(ar, &key.to_string(), e))?;
        to_json(ar, &patched)
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        let api = self.api(ar, key.namespace.as_deref());
        debug!("Deleting {} {}", ar.kind, key);
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error(ar, &key.to_string(), e))
    }
}

#[cfg(test)]
#[path = "kube_api_tests.rs"]
mod kube_api_tests;
