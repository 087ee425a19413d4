// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VSphereCluster` reconciliation.
//!
//! The normal path runs these steps and stops at the first one that is not done:
//!
//! 1. add the cluster finalizer and bind the identity secret
//! 2. open a vCenter session (`VCenterAvailable`)
//! 3. provision the control plane load balancer, if one is referenced
//! 4. mark the cluster ready and resolve the control plane endpoint
//! 5. start the online poller until the control plane is initialized
//! 6. once the workload API answers, install the cloud provider credentials, the
//!    cloud controller manager and the CSI driver
//!
//! Deletion waits for the cluster's load balancers and VSphereMachines to be gone,
//! then releases the identity secret and the finalizer.

use super::finalizers::{add_finalizer, complete_deletion, has_finalizer, is_deleting, DeletionOutcome};
use super::identity::{
    bind_identity_secret, cluster_credentials, release_identity_secret, IdentityBinding, IdentityError,
};
use super::loadbalancer::{delete_cluster_load_balancers, reconcile_cluster_load_balancer};
use super::lookup::{cluster_name_label, cluster_vsphere_machines, is_control_plane, is_paused, owner_cluster, owner_machine};
use super::machine::preferred_ip_address;
use super::patch::Patcher;
use super::status::{mark_false, mark_true};
use super::triggers::OnlinePoll;
use crate::addons;
use crate::constants::{APISERVER_PORT, KIND_VSPHERE_CLUSTER, REQUEUE_DEPENDENTS_SECS};
use crate::context::Context;
use crate::crd::{APIEndpoint, Cluster, ConditionSeverity, VSphereCluster};
use crate::labels::CLUSTER_FINALIZER;
use crate::metrics;
use crate::services::{Credentials, WorkloadClusters};
use crate::status_reasons::{
    CONDITION_TYPE_CCM_AVAILABLE, CONDITION_TYPE_CSI_AVAILABLE, CONDITION_TYPE_VCENTER_AVAILABLE,
    REASON_CCM_PROVISIONING_FAILED, REASON_CSI_PROVISIONING_FAILED, REASON_IDENTITY_NOT_USABLE,
    REASON_VCENTER_UNREACHABLE,
};
use crate::store::{create_if_absent, get_object, ObjectKey, ResourceStore};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciles a `VSphereCluster` resource.
///
/// # Errors
///
/// Returns an error when vCenter is unreachable, the control plane endpoint cannot
/// be determined, an add-on cannot be installed, or the final patch fails.
pub async fn reconcile_vsphere_cluster(ctx: Arc<Context>, vsc: VSphereCluster) -> Result<Action> {
    let namespace = vsc.namespace().unwrap_or_default();
    let name = vsc.name_any();
    info!("Reconciling VSphereCluster: {}/{}", namespace, name);

    let cluster = owner_cluster(ctx.store.as_ref(), &vsc.metadata).await?;
    let deleting = is_deleting(&vsc.metadata);
    if cluster.is_none() && !deleting {
        info!("Waiting for Cluster Controller to set OwnerRef on VSphereCluster {}/{}", namespace, name);
        return Ok(Action::await_change());
    }
    if is_paused(cluster.as_ref(), &vsc.metadata) {
        debug!("VSphereCluster {}/{} is paused, skipping", namespace, name);
        return Ok(Action::await_change());
    }

    let mut vsc = vsc;
    let patcher = Patcher::new(ctx.store.clone(), &vsc)?;
    let result = match cluster {
        Some(cluster) if !deleting => reconcile_normal(&ctx, &cluster, &mut vsc).await,
        cluster => {
            let cluster_name = cluster
                .map(|c| c.name_any())
                .or_else(|| cluster_name_label(&vsc.metadata).map(str::to_string))
                .unwrap_or_else(|| name.clone());
            reconcile_delete(&ctx, &cluster_name, &mut vsc).await
        }
    };
    patcher.finish(&mut vsc, result).await
}

async fn reconcile_delete(ctx: &Context, cluster_name: &str, vsc: &mut VSphereCluster) -> Result<Action> {
    if !has_finalizer(&vsc.metadata, CLUSTER_FINALIZER) {
        return Ok(Action::await_change());
    }
    let namespace = vsc.namespace().unwrap_or_default();
    info!("Handling deleted VSphereCluster {}/{}", namespace, vsc.name_any());
    let blocked = DeletionOutcome::Blocked(Duration::from_secs(REQUEUE_DEPENDENTS_SECS));

    let load_balancers = delete_cluster_load_balancers(ctx.store.as_ref(), &namespace, cluster_name).await?;
    if load_balancers > 0 {
        info!("Waiting for {} load balancer(s) of cluster {} to be deleted", load_balancers, cluster_name);
        return Ok(complete_deletion(&mut vsc.metadata, CLUSTER_FINALIZER, blocked));
    }

    let machines = cluster_vsphere_machines(ctx.store.as_ref(), &namespace, cluster_name).await?;
    if !machines.is_empty() {
        info!("Waiting for {} VSphereMachine(s) of cluster {} to be deleted", machines.len(), cluster_name);
        return Ok(complete_deletion(&mut vsc.metadata, CLUSTER_FINALIZER, blocked));
    }

    release_identity_secret(ctx.store.as_ref(), vsc).await?;
    metrics::record_finalizer_removed(KIND_VSPHERE_CLUSTER);
    Ok(complete_deletion(&mut vsc.metadata, CLUSTER_FINALIZER, DeletionOutcome::Released))
}

async fn reconcile_normal(ctx: &Context, cluster: &Cluster, vsc: &mut VSphereCluster) -> Result<Action> {
    if add_finalizer(&mut vsc.metadata, CLUSTER_FINALIZER) {
        metrics::record_finalizer_added(KIND_VSPHERE_CLUSTER);
    }

    if let IdentityBinding::OwnedByOther(owner) = bind_identity_secret(ctx.store.as_ref(), vsc).await? {
        warn!("Identity secret of VSphereCluster {} is owned by {}", vsc.name_any(), owner);
        mark_false(
            vsc,
            CONDITION_TYPE_VCENTER_AVAILABLE,
            REASON_VCENTER_UNREACHABLE,
            ConditionSeverity::Error,
            &format!("identity secret is already owned by {owner}"),
        );
        return Ok(Action::await_change());
    }

    let credentials = match cluster_credentials(ctx, vsc).await {
        Ok(credentials) => credentials,
        Err(err) => {
            if let Some(identity_err) = err.downcast_ref::<IdentityError>() {
                mark_false(
                    vsc,
                    CONDITION_TYPE_VCENTER_AVAILABLE,
                    REASON_IDENTITY_NOT_USABLE,
                    ConditionSeverity::Error,
                    &identity_err.to_string(),
                );
            }
            return Err(err.context(format!("failed to resolve credentials of VSphereCluster {}", vsc.name_any())));
        }
    };
    if let Err(err) = ctx
        .session(&vsc.spec.server, &credentials, vsc.spec.thumbprint.clone())
        .await
    {
        mark_false(
            vsc,
            CONDITION_TYPE_VCENTER_AVAILABLE,
            REASON_VCENTER_UNREACHABLE,
            ConditionSeverity::Error,
            &err.to_string(),
        );
        return Err(err).with_context(|| format!("failed to reach vCenter {}", vsc.spec.server));
    }
    mark_true(vsc, CONDITION_TYPE_VCENTER_AVAILABLE);

    if !reconcile_cluster_load_balancer(ctx, cluster, vsc).await? {
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_DEPENDENTS_SECS)));
    }

    vsc.status.get_or_insert_with(Default::default).ready = true;

    let endpoint = reconcile_control_plane_endpoint(ctx, cluster, vsc).await;
    start_online_poller(ctx, cluster, vsc);
    endpoint?;

    let cluster_key = ObjectKey::of(cluster);
    if !ctx.services.workloads.is_api_online(&cluster_key).await {
        debug!("Workload API of cluster {} is not online yet", cluster_key);
        return Ok(Action::await_change());
    }

    let workload = ctx
        .services
        .workloads
        .store_for(&cluster_key)
        .await
        .with_context(|| format!("failed to connect to workload cluster {cluster_key}"))?;
    reconcile_cloud_provider(vsc, &credentials, workload.as_ref()).await?;
    reconcile_storage_provider(vsc, &credentials, workload.as_ref()).await?;
    Ok(Action::await_change())
}

/// Resolve `spec.controlPlaneEndpoint`.
///
/// The Cluster's endpoint wins, then an already recorded one, then the preferred
/// address of the first bootstrapped control plane machine.
async fn reconcile_control_plane_endpoint(ctx: &Context, cluster: &Cluster, vsc: &mut VSphereCluster) -> Result<()> {
    if !cluster.spec.control_plane_endpoint.is_zero() {
        vsc.spec
            .control_plane_endpoint
            .clone_from(&cluster.spec.control_plane_endpoint);
        return Ok(());
    }
    if !vsc.spec.control_plane_endpoint.is_zero() {
        return Ok(());
    }

    let namespace = vsc.namespace().unwrap_or_default();
    let machines = cluster_vsphere_machines(ctx.store.as_ref(), &namespace, &cluster.name_any()).await?;
    for machine in machines.iter().filter(|m| is_control_plane(&m.metadata)) {
        let Some(owner) = owner_machine(ctx.store.as_ref(), &machine.metadata).await? else {
            continue;
        };
        if owner.spec.bootstrap.data_secret_name.is_none() {
            continue;
        }
        let Some(address) = preferred_ip_address(machine)? else {
            continue;
        };
        info!(
            "Using control plane endpoint {}:{} from VSphereMachine {} for cluster {}",
            address,
            APISERVER_PORT,
            machine.name_any(),
            cluster.name_any()
        );
        vsc.spec.control_plane_endpoint = APIEndpoint {
            host: address,
            port: APISERVER_PORT,
        };
        return Ok(());
    }

    bail!(
        "unable to determine control plane endpoint for VSphereCluster {}/{}",
        namespace,
        vsc.name_any()
    )
}

/// Waits for the workload API to answer, then for the Cluster to record its
/// initialized control plane.
struct ControlPlaneOnline {
    workloads: Arc<dyn WorkloadClusters>,
    store: Arc<dyn ResourceStore>,
    cluster: ObjectKey,
}

#[async_trait]
impl OnlinePoll for ControlPlaneOnline {
    async fn ready(&self) -> bool {
        self.workloads.is_api_online(&self.cluster).await
    }

    async fn recorded(&self) -> bool {
        match get_object::<Cluster>(self.store.as_ref(), &self.cluster).await {
            Ok(Some(cluster)) => cluster
                .status
                .is_some_and(|s| s.control_plane_initialized),
            Ok(None) => true,
            Err(err) => {
                warn!("Failed to read Cluster {}: {}", self.cluster, err);
                false
            }
        }
    }
}

fn start_online_poller(ctx: &Context, cluster: &Cluster, vsc: &VSphereCluster) {
    if cluster
        .status
        .as_ref()
        .is_some_and(|s| s.control_plane_initialized)
    {
        return;
    }
    let Some(uid) = cluster.uid() else {
        return;
    };
    let poll = ControlPlaneOnline {
        workloads: ctx.services.workloads.clone(),
        store: ctx.store.clone(),
        cluster: ObjectKey::of(cluster),
    };
    ctx.triggers.start_if_absent(&uid, ObjectKey::of(vsc), poll);
}

async fn install<K>(workload: &dyn ResourceStore, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let kind = K::kind(&());
    let name = obj.meta().name.clone().unwrap_or_default();
    if create_if_absent(workload, obj)
        .await
        .with_context(|| format!("failed to create {kind} {name}"))?
    {
        info!("Created {} {} in workload cluster", kind, name);
        metrics::record_resource_created(&kind);
    }
    Ok(())
}

async fn install_cloud_provider(vsc: &VSphereCluster, credentials: &Credentials, workload: &dyn ResourceStore) -> Result<()> {
    install(workload, &addons::cloud_credentials_secret(vsc, credentials)?).await?;
    install(workload, &addons::ccm_service_account()).await?;
    install(workload, &addons::ccm_config_map(&addons::cloud_config(vsc))).await?;
    install(workload, &addons::ccm_cluster_role()).await?;
    install(workload, &addons::ccm_cluster_role_binding()).await?;
    install(workload, &addons::ccm_role_binding()).await?;
    install(workload, &addons::ccm_service()).await?;
    install(workload, &addons::ccm_daemon_set(&addons::ccm_image(vsc))).await
}

async fn install_storage_provider(vsc: &VSphereCluster, credentials: &Credentials, workload: &dyn ResourceStore) -> Result<()> {
    let images = addons::CsiImages::for_cluster(vsc);
    install(workload, &addons::csi_service_account()).await?;
    install(workload, &addons::csi_cluster_role()).await?;
    install(workload, &addons::csi_cluster_role_binding()).await?;
    install(workload, &addons::csi_config_secret(&addons::csi_config(vsc, credentials))).await?;
    install(workload, &addons::csi_driver()).await?;
    install(workload, &addons::csi_node_daemon_set(&images)).await?;
    install(workload, &addons::csi_controller_deployment(&images)).await
}

async fn reconcile_cloud_provider(vsc: &mut VSphereCluster, credentials: &Credentials, workload: &dyn ResourceStore) -> Result<()> {
    match install_cloud_provider(vsc, credentials, workload).await {
        Ok(()) => {
            mark_true(vsc, CONDITION_TYPE_CCM_AVAILABLE);
            Ok(())
        }
        Err(err) => {
            mark_false(
                vsc,
                CONDITION_TYPE_CCM_AVAILABLE,
                REASON_CCM_PROVISIONING_FAILED,
                ConditionSeverity::Warning,
                &format!("{err:#}"),
            );
            Err(err.context("failed to install cloud controller manager"))
        }
    }
}

async fn reconcile_storage_provider(vsc: &mut VSphereCluster, credentials: &Credentials, workload: &dyn ResourceStore) -> Result<()> {
    match install_storage_provider(vsc, credentials, workload).await {
        Ok(()) => {
            mark_true(vsc, CONDITION_TYPE_CSI_AVAILABLE);
            Ok(())
        }
        Err(err) => {
            mark_false(
                vsc,
                CONDITION_TYPE_CSI_AVAILABLE,
                REASON_CSI_PROVISIONING_FAILED,
                ConditionSeverity::Warning,
                &format!("{err:#}"),
            );
            Err(err.context("failed to install CSI driver"))
        }
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
