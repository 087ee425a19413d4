// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests

#![allow(dead_code)]

use capv_engine::config::ManagerOptions;
use capv_engine::context::{Context, Services};
use capv_engine::services::Simulator;
use capv_engine::store::{get_object, MemoryStore, ObjectKey};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::client::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a test namespace
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "managed-by".to_string(),
                "capv-engine-integration-test".to_string(),
            )])),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete a test namespace
pub async fn delete_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Controllers' context wired to an in-memory store and a simulator.
pub struct Simulated {
    pub ctx: Arc<Context>,
    pub store: Arc<MemoryStore>,
    pub sim: Simulator,
}

pub fn simulated() -> Simulated {
    let sim = Simulator::new();
    let store = Arc::new(MemoryStore::new());
    let options = ManagerOptions {
        poll_interval_ms: 10,
        username: "manager".to_string(),
        password: "manager-password".to_string(),
        ..ManagerOptions::default()
    };
    let (ctx, _triggers) = Context::new(store.clone(), Services::simulated(&sim), options);
    Simulated {
        ctx: Arc::new(ctx),
        store,
        sim,
    }
}

impl Simulated {
    /// Stored copy of an object.
    pub async fn get<K>(&self, key: &ObjectKey) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        get_object(self.store.as_ref(), key).await.unwrap()
    }
}
