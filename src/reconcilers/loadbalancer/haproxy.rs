// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! VM-backed HAProxy load balancer.
//!
//! The backend is a `VSphereVM` named like the load balancer. Its bootstrap data is a
//! cloud-config that writes the rendered HAProxy configuration for the current
//! control plane members. The load balancer is ready when the VM is, and its address is
//! the first address the VM reports.

use super::config::render;
use super::{reconcile_load_balancer, LoadBalancer};
use crate::constants::{
    APISERVER_PORT, KIND_VSPHERE_VM, LB_POOL_ALGORITHM, LB_POOL_MIN_ACTIVE_MEMBERS,
    REQUEUE_DEPENDENTS_SECS,
};
use crate::context::Context;
use crate::crd::{
    Cluster, HAProxyLoadBalancer, LoadBalancerStatus, ObjectReference, VSphereVM, VSphereVMSpec,
};
use crate::labels::{CLUSTER_NAME_LABEL, HAPROXY_LOAD_BALANCER_FINALIZER};
use crate::metrics;
use crate::reconcilers::finalizers::DeletionOutcome;
use crate::reconcilers::lookup::infrastructure_cluster;
use crate::reconcilers::machine::resolve_clone_spec;
use crate::reconcilers::resources::{create_or_patch, ensure_owner_reference, owner_reference, Operation};
use crate::reconcilers::vm::BOOTSTRAP_DATA_KEY;
use crate::services::{LbPool, LoadBalancerConfig, PoolMember, VirtualServer};
use crate::store::{create_object, delete_object, get_object, patch_object, ObjectKey};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Path the rendered configuration is written to inside the VM.
pub const HAPROXY_CONFIG_PATH: &str = "/etc/haproxy/haproxy.cfg";

/// Name of the bootstrap secret of a load balancer VM.
#[must_use]
pub fn bootstrap_secret_name(lb_name: &str) -> String {
    format!("{lb_name}-bootstrap")
}

/// HAProxy configuration forwarding the API server port to `members`.
#[must_use]
pub fn haproxy_config(lb_name: &str, members: &[PoolMember]) -> LoadBalancerConfig {
    let pool = format!("{lb_name}-backend");
    LoadBalancerConfig {
        virtual_servers: vec![VirtualServer {
            name: format!("{lb_name}-frontend"),
            ip_address: "*".to_string(),
            port: APISERVER_PORT,
            pool: pool.clone(),
        }],
        pools: vec![LbPool {
            name: pool,
            algorithm: LB_POOL_ALGORITHM.to_string(),
            min_active_members: LB_POOL_MIN_ACTIVE_MEMBERS,
            members: members.to_vec(),
        }],
    }
}

#[derive(Serialize)]
struct WriteFile {
    path: String,
    permissions: String,
    content: String,
}

#[derive(Serialize)]
struct CloudUser {
    name: String,
    #[serde(rename = "ssh_authorized_keys", skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
}

#[derive(Serialize)]
struct CloudConfig {
    write_files: Vec<WriteFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<CloudUser>,
}

/// Cloud-config bootstrapping the load balancer VM.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn bootstrap_data(lb: &HAProxyLoadBalancer, members: &[PoolMember]) -> Result<String> {
    let document = CloudConfig {
        write_files: vec![WriteFile {
            path: HAPROXY_CONFIG_PATH.to_string(),
            permissions: "0644".to_string(),
            content: render(&haproxy_config(&lb.name_any(), members)),
        }],
        users: lb
            .spec
            .user
            .iter()
            .map(|u| CloudUser {
                name: u.name.clone(),
                ssh_authorized_keys: u.authorized_keys.clone(),
            })
            .collect(),
    };
    let yaml = serde_yaml::to_string(&document).context("failed to render cloud-config")?;
    Ok(format!("#cloud-config\n{yaml}"))
}

/// Create the bootstrap secret, or update its data when the members changed.
async fn sync_bootstrap_secret(ctx: &Context, lb: &HAProxyLoadBalancer, data: String) -> Result<()> {
    let namespace = lb.namespace().unwrap_or_default();
    let key = ObjectKey::namespaced(namespace.clone(), bootstrap_secret_name(&lb.name_any()));
    let value = ByteString(data.into_bytes());

    match get_object::<Secret>(ctx.store.as_ref(), &key).await? {
        Some(existing) => {
            let current = existing
                .data
                .as_ref()
                .and_then(|d| d.get(BOOTSTRAP_DATA_KEY));
            if current == Some(&value) {
                debug!("Bootstrap secret {} is up to date", key);
                return Ok(());
            }
            let patch = json!({ "data": { BOOTSTRAP_DATA_KEY: value } });
            patch_object::<Secret>(ctx.store.as_ref(), &key, &patch)
                .await
                .with_context(|| format!("failed to update bootstrap secret {key}"))?;
            info!("Updated bootstrap secret {}", key);
        }
        None => {
            let mut secret = Secret::default();
            secret.metadata.name = Some(key.name.clone());
            secret.metadata.namespace = Some(namespace);
            secret.metadata.labels = lb.metadata.labels.clone();
            secret.metadata.owner_references = Some(vec![owner_reference(lb, true)]);
            secret.data = Some(BTreeMap::from([(BOOTSTRAP_DATA_KEY.to_string(), value)]));
            create_object(ctx.store.as_ref(), &secret)
                .await
                .with_context(|| format!("failed to create bootstrap secret {key}"))?;
            info!("Created bootstrap secret {}", key);
        }
    }
    Ok(())
}

#[async_trait]
impl LoadBalancer for HAProxyLoadBalancer {
    const FINALIZER: &'static str = HAPROXY_LOAD_BALANCER_FINALIZER;

    async fn reconcile_backend(
        &mut self,
        ctx: &Context,
        cluster: &Cluster,
        members: &[PoolMember],
    ) -> Result<Action> {
        let name = self.name_any();

        // 1. Bootstrap data carrying the rendered configuration
        sync_bootstrap_secret(ctx, self, bootstrap_data(self, members)?).await?;

        // 2. The VSphereVM running HAProxy
        let vsphere_cluster = infrastructure_cluster(ctx.store.as_ref(), cluster).await?;
        let clone_spec = resolve_clone_spec(
            &self.spec.virtual_machine_configuration,
            None,
            vsphere_cluster.as_ref(),
        );
        let bootstrap_ref = ObjectReference {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            name: bootstrap_secret_name(&name),
            namespace: self.namespace(),
        };
        let cluster_name = cluster.name_any();
        let oref = owner_reference(self, true);

        let mut desired = VSphereVM::new(&name, VSphereVMSpec::default());
        desired.metadata.namespace = self.namespace();
        let (vm, operation) = create_or_patch(ctx.store.as_ref(), desired, |vm: &mut VSphereVM| {
            vm.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone());
            ensure_owner_reference(&mut vm.metadata, oref.clone());
            vm.spec.bootstrap_ref = Some(bootstrap_ref.clone());
            vm.spec.clone_spec = clone_spec.clone();
        })
        .await
        .with_context(|| format!("failed to create or patch VSphereVM for load balancer {name}"))?;
        if operation == Operation::Created {
            metrics::record_resource_created(KIND_VSPHERE_VM);
        }

        // 3. Ready and address follow the VM
        let vm_status = vm.status.unwrap_or_default();
        let status = self.lb_status_mut();
        status.ready = vm_status.ready;
        status.address = vm_status.addresses.first().cloned().unwrap_or_default();
        if status.ready {
            info!("HAProxyLoadBalancer {} is ready at {}", name, status.address);
        }
        Ok(Action::await_change())
    }

    async fn delete_backend(&mut self, ctx: &Context) -> Result<DeletionOutcome> {
        let key = ObjectKey::of(self);
        if let Some(vm) = get_object::<VSphereVM>(ctx.store.as_ref(), &key).await? {
            if vm.metadata.deletion_timestamp.is_none() {
                delete_object::<VSphereVM>(ctx.store.as_ref(), &key).await?;
                info!("Requested deletion of load balancer VM {}", key);
            }
            return Ok(DeletionOutcome::Blocked(Duration::from_secs(
                REQUEUE_DEPENDENTS_SECS,
            )));
        }
        let secret_key = ObjectKey::namespaced(
            self.namespace().unwrap_or_default(),
            bootstrap_secret_name(&self.name_any()),
        );
        delete_object::<Secret>(ctx.store.as_ref(), &secret_key).await?;
        Ok(DeletionOutcome::Released)
    }

    fn lb_status(&self) -> Option<&LoadBalancerStatus> {
        self.status.as_ref()
    }

    fn lb_status_mut(&mut self) -> &mut LoadBalancerStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

/// Reconciles an `HAProxyLoadBalancer` resource.
///
/// # Errors
///
/// Returns an error if the backend VM cannot be reconciled or the final patch fails.
pub async fn reconcile_haproxy_load_balancer(
    ctx: Arc<Context>,
    lb: HAProxyLoadBalancer,
) -> Result<Action> {
    reconcile_load_balancer(ctx, lb).await
}

#[cfg(test)]
#[path = "haproxy_tests.rs"]
mod haproxy_tests;
