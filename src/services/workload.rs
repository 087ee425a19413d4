// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload cluster access through the `<cluster>-kubeconfig` secret.

use super::{ServiceError, WorkloadClusters};
use crate::constants::{KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX};
use crate::store::{get_object, KubeStore, ObjectKey, ResourceStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Name of the secret holding the admin kubeconfig of a cluster.
#[must_use]
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}{KUBECONFIG_SECRET_SUFFIX}")
}

/// Read the kubeconfig of a workload cluster from the management store.
///
/// # Errors
///
/// Returns [`ServiceError::Workload`] when the secret or its key is missing.
pub async fn read_kubeconfig(
    management: &dyn ResourceStore,
    cluster: &ObjectKey,
) -> Result<String, ServiceError> {
    let namespace = cluster.namespace.clone().unwrap_or_default();
    let key = ObjectKey::namespaced(namespace, kubeconfig_secret_name(&cluster.name));
    let secret: Secret = get_object(management, &key)
        .await?
        .ok_or_else(|| ServiceError::Workload {
            cluster: cluster.to_string(),
            message: format!("secret {key} not found"),
        })?;

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
        .map(|b| b.0.clone())
        .ok_or_else(|| ServiceError::Workload {
            cluster: cluster.to_string(),
            message: format!("secret {key} has no {KUBECONFIG_SECRET_KEY} key"),
        })?;
    String::from_utf8(bytes).map_err(|e| ServiceError::Workload {
        cluster: cluster.to_string(),
        message: format!("kubeconfig is not valid UTF-8: {e}"),
    })
}

/// [`WorkloadClusters`] backed by real API server connections.
///
/// Clients are cached per cluster and rebuilt when a request through them fails.
pub struct KubeWorkloadClusters {
    management: Arc<dyn ResourceStore>,
    clients: Mutex<HashMap<ObjectKey, Client>>,
}

impl KubeWorkloadClusters {
    /// Create an accessor reading kubeconfig secrets from `management`.
    #[must_use]
    pub fn new(management: Arc<dyn ResourceStore>) -> Self {
        Self {
            management,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, cluster: &ObjectKey) -> Result<Client, ServiceError> {
        if let Some(client) = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cluster)
        {
            return Ok(client.clone());
        }

        let workload_err = |message: String| ServiceError::Workload {
            cluster: cluster.to_string(),
            message,
        };
        let yaml = read_kubeconfig(self.management.as_ref(), cluster).await?;
        let kubeconfig = Kubeconfig::from_yaml(&yaml).map_err(|e| workload_err(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| workload_err(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| workload_err(e.to_string()))?;

        debug!(cluster = %cluster, "Created workload cluster client");
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cluster.clone(), client.clone());
        Ok(client)
    }

    fn forget(&self, cluster: &ObjectKey) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cluster);
    }
}

#[async_trait]
impl WorkloadClusters for KubeWorkloadClusters {
    async fn store_for(&self, cluster: &ObjectKey) -> Result<Arc<dyn ResourceStore>, ServiceError> {
        let client = self.client_for(cluster).await?;
        Ok(Arc::new(KubeStore::new(client)))
    }

    async fn is_api_online(&self, cluster: &ObjectKey) -> bool {
        let Ok(client) = self.client_for(cluster).await else {
            return false;
        };
        match client.apiserver_version().await {
            Ok(_) => true,
            Err(e) => {
                debug!(cluster = %cluster, error = %e, "Workload API server not reachable yet");
                self.forget(cluster);
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod workload_tests;
