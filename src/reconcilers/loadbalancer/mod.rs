// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer sub-engine.
//!
//! A VSphereCluster may front its control plane with a load balancer named by
//! `spec.loadBalancerRef`. Every variant implements [`LoadBalancer`], a small
//! capability contract:
//!
//! - `reconcile_backend(members)`: converge the backend and record `ready` and `address`
//! - `delete_backend`: tear the backend down, reporting whether it is gone
//! - `lb_status`: the observed [`LoadBalancerStatus`]
//!
//! Variants are selected by the kind of the reference:
//!
//! | Kind | Backend |
//! |------|---------|
//! | `HAProxyLoadBalancer` | a `VSphereVM` running HAProxy ([`haproxy`]) |
//! | `NSXTLoadBalancer` | a pool and virtual server on an appliance ([`nsxt`]) |
//!
//! Each kind has its own controller driven by [`reconcile_load_balancer`]. The cluster
//! pipeline only adopts the load balancer and reads its status
//! ([`reconcile_cluster_load_balancer`]).

pub mod config;
pub mod haproxy;
pub mod nsxt;

pub use haproxy::reconcile_haproxy_load_balancer;
pub use nsxt::reconcile_nsxt_load_balancer;

use super::finalizers::{add_finalizer, complete_deletion, has_finalizer, is_deleting, DeletionOutcome};
use super::lookup::{cluster_vsphere_machines, is_control_plane, is_paused, owner_cluster};
use super::machine::preferred_ip_address;
use super::patch::Patcher;
use super::resources::{
    controller_owner, ensure_owner_reference, is_owned_by, owner_of_kind, owner_reference,
};
use super::status::{mark_false, mark_true, Conditioned};
use crate::constants::{
    APISERVER_PORT, KIND_HAPROXY_LOAD_BALANCER, KIND_NSXT_LOAD_BALANCER, KIND_VSPHERE_CLUSTER,
};
use crate::context::Context;
use crate::crd::{
    Cluster, ConditionSeverity, HAProxyLoadBalancer, LoadBalancerStatus, NSXTLoadBalancer,
    ObjectReference, VSphereCluster,
};
use crate::metrics;
use crate::services::PoolMember;
use crate::status_reasons::{
    CONDITION_TYPE_LOAD_BALANCER_AVAILABLE, REASON_DELETING, REASON_LOAD_BALANCER_PROVISIONING,
    REASON_LOAD_BALANCER_PROVISIONING_FAILED,
};
use crate::store::{
    cluster_labels, delete_object, get_object, list_objects, patch_object, ObjectKey,
    ResourceStore, StoreError,
};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Capability contract shared by every load balancer kind.
#[async_trait]
pub trait LoadBalancer:
    Resource<DynamicType = ()> + Conditioned + Serialize + DeserializeOwned + Clone + Debug + Send + Sync
{
    /// Finalizer guarding the backend of this kind.
    const FINALIZER: &'static str;

    /// Converge the backend towards `members` and record ready and address.
    async fn reconcile_backend(
        &mut self,
        ctx: &Context,
        cluster: &Cluster,
        members: &[PoolMember],
    ) -> Result<Action>;

    /// Tear the backend down.
    async fn delete_backend(&mut self, ctx: &Context) -> Result<DeletionOutcome>;

    /// Observed status.
    fn lb_status(&self) -> Option<&LoadBalancerStatus>;

    /// Mutable status, created if missing.
    fn lb_status_mut(&mut self) -> &mut LoadBalancerStatus;
}

/// Pool members for the control plane of a cluster.
///
/// Control plane VSphereMachines without a preferred address are left out. Members are
/// sorted by machine name.
///
/// # Errors
///
/// Returns an error on store failures or a malformed preferred CIDR.
pub async fn control_plane_members(
    store: &dyn ResourceStore,
    namespace: &str,
    cluster_name: &str,
) -> Result<Vec<PoolMember>> {
    let mut members = Vec::new();
    for machine in cluster_vsphere_machines(store, namespace, cluster_name).await? {
        if !is_control_plane(&machine.metadata) {
            continue;
        }
        match preferred_ip_address(&machine)? {
            Some(address) => members.push(PoolMember {
                name: machine.name_any(),
                address,
                port: APISERVER_PORT,
            }),
            None => debug!("Control plane machine {} has no address yet", machine.name_any()),
        }
    }
    members.sort();
    Ok(members)
}

/// The Cluster API cluster a load balancer serves.
///
/// Resolved through a Cluster owner or cluster-name label, else through the
/// VSphereCluster that adopted the load balancer.
async fn load_balancer_cluster(
    store: &dyn ResourceStore,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>, StoreError> {
    if let Some(cluster) = owner_cluster(store, meta).await? {
        return Ok(Some(cluster));
    }
    let Some(owner) = owner_of_kind(meta, KIND_VSPHERE_CLUSTER) else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let key = ObjectKey::namespaced(namespace, owner.name.clone());
    match get_object::<VSphereCluster>(store, &key).await? {
        Some(vsc) => owner_cluster(store, &vsc.metadata).await,
        None => Ok(None),
    }
}

/// Reconciles a load balancer resource of any kind.
///
/// # Errors
///
/// Returns an error if the backend fails or the final patch fails.
pub async fn reconcile_load_balancer<L: LoadBalancer>(ctx: Arc<Context>, lb: L) -> Result<Action> {
    let kind = L::kind(&());
    let namespace = lb.namespace().unwrap_or_default();
    let name = lb.name_any();
    info!("Reconciling {}: {}/{}", kind, namespace, name);

    let cluster = load_balancer_cluster(ctx.store.as_ref(), lb.meta()).await?;
    if is_paused(cluster.as_ref(), lb.meta()) {
        debug!("{} {}/{} belongs to a paused cluster, skipping", kind, namespace, name);
        return Ok(Action::await_change());
    }
    let deleting = is_deleting(lb.meta());
    let cluster = match cluster {
        Some(cluster) => Some(cluster),
        None if deleting => None,
        None => {
            info!(
                "Waiting for VSphereCluster controller to set OwnerRef on {} {}/{}",
                kind, namespace, name
            );
            return Ok(Action::await_change());
        }
    };

    let mut lb = lb;
    let patcher = Patcher::new(ctx.store.clone(), &lb)?;
    let result = match (&cluster, deleting) {
        (_, true) => reconcile_delete(&ctx, &mut lb).await,
        (Some(cluster), false) => reconcile_normal(&ctx, cluster, &mut lb).await,
        (None, false) => Ok(Action::await_change()),
    };
    patcher.finish(&mut lb, result).await
}

async fn reconcile_delete<L: LoadBalancer>(ctx: &Context, lb: &mut L) -> Result<Action> {
    if !has_finalizer(lb.meta(), L::FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Handling deleted {} {}", L::kind(&()), lb.name_any());
    mark_false(
        lb,
        CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
        REASON_DELETING,
        ConditionSeverity::Info,
        "",
    );
    let outcome = lb.delete_backend(ctx).await?;
    if outcome == DeletionOutcome::Released {
        metrics::record_resource_deleted(&L::kind(&()));
        metrics::record_finalizer_removed(&L::kind(&()));
    }
    Ok(complete_deletion(lb.meta_mut(), L::FINALIZER, outcome))
}

async fn reconcile_normal<L: LoadBalancer>(
    ctx: &Context,
    cluster: &Cluster,
    lb: &mut L,
) -> Result<Action> {
    if add_finalizer(lb.meta_mut(), L::FINALIZER) {
        metrics::record_finalizer_added(&L::kind(&()));
    }

    let namespace = lb.namespace().unwrap_or_default();
    let members = control_plane_members(ctx.store.as_ref(), &namespace, &cluster.name_any()).await?;
    debug!("{} {} has {} control plane members", L::kind(&()), lb.name_any(), members.len());

    match lb.reconcile_backend(ctx, cluster, &members).await {
        Ok(action) => {
            if lb.lb_status().is_some_and(|s| s.ready) {
                mark_true(lb, CONDITION_TYPE_LOAD_BALANCER_AVAILABLE);
            } else {
                mark_false(
                    lb,
                    CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
                    REASON_LOAD_BALANCER_PROVISIONING,
                    ConditionSeverity::Info,
                    "",
                );
            }
            Ok(action)
        }
        Err(err) => {
            lb.lb_status_mut().ready = false;
            mark_false(
                lb,
                CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
                REASON_LOAD_BALANCER_PROVISIONING_FAILED,
                ConditionSeverity::Warning,
                &format!("{err:#}"),
            );
            Err(err)
        }
    }
}

/// Result of adopting a referenced load balancer.
enum Adoption {
    /// The referenced object does not exist
    NotFound,
    /// Another object is the controller owner; carries `Kind/name` of that owner
    ControlledElsewhere(String),
    /// The VSphereCluster controls the load balancer
    Adopted(LoadBalancerStatus),
}

/// Fetch the load balancer a VSphereCluster references and adopt it.
///
/// The VSphereCluster becomes the controller owner unless it already owns it. A load
/// balancer controlled by anything else is left untouched.
async fn adopt<L: LoadBalancer>(
    ctx: &Context,
    vsc: &VSphereCluster,
    reference: &ObjectReference,
) -> Result<Adoption> {
    let namespace = reference
        .namespace
        .clone()
        .or_else(|| vsc.namespace())
        .unwrap_or_default();
    let key = ObjectKey::namespaced(namespace, reference.name.clone());
    let Some(mut lb) = get_object::<L>(ctx.store.as_ref(), &key).await? else {
        return Ok(Adoption::NotFound);
    };

    let uid = vsc.metadata.uid.clone().unwrap_or_default();
    if let Some(owner) = controller_owner(lb.meta()).filter(|o| o.uid != uid) {
        return Ok(Adoption::ControlledElsewhere(format!("{}/{}", owner.kind, owner.name)));
    }
    if !is_owned_by(lb.meta(), &uid) && ensure_owner_reference(lb.meta_mut(), owner_reference(vsc, true)) {
        let patch = json!({
            "metadata": {
                "ownerReferences": lb.meta().owner_references,
                "resourceVersion": lb.meta().resource_version,
            }
        });
        lb = patch_object::<L>(ctx.store.as_ref(), &key, &patch)
            .await
            .with_context(|| format!("failed to adopt {} {key}", L::kind(&())))?;
        info!("VSphereCluster {} adopted {} {}", vsc.name_any(), L::kind(&()), key);
    }
    Ok(Adoption::Adopted(lb.lb_status().cloned().unwrap_or_default()))
}

fn waiting_for_load_balancer(vsc: &mut VSphereCluster, message: &str) -> bool {
    info!("Load balancer of VSphereCluster {} is not ready: {}", vsc.name_any(), message);
    mark_false(
        vsc,
        CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
        REASON_LOAD_BALANCER_PROVISIONING,
        ConditionSeverity::Info,
        message,
    );
    false
}

/// Reconcile the load balancer referenced by a VSphereCluster.
///
/// Returns `true` when the pipeline may continue: there is no load balancer, an
/// endpoint is already known, or the load balancer is ready and its address became
/// the VSphereCluster control plane endpoint.
///
/// # Errors
///
/// Returns an error on store failures.
pub async fn reconcile_cluster_load_balancer(
    ctx: &Context,
    cluster: &Cluster,
    vsc: &mut VSphereCluster,
) -> Result<bool> {
    let Some(reference) = vsc.spec.load_balancer_ref.clone() else {
        debug!("VSphereCluster {} has no load balancer", vsc.name_any());
        return Ok(true);
    };
    if !cluster.spec.control_plane_endpoint.is_zero() || !vsc.spec.control_plane_endpoint.is_zero() {
        debug!("Control plane endpoint of {} already set, skipping load balancer", vsc.name_any());
        return Ok(true);
    }

    let adoption = match reference.kind.as_str() {
        KIND_HAPROXY_LOAD_BALANCER => adopt::<HAProxyLoadBalancer>(ctx, vsc, &reference).await?,
        KIND_NSXT_LOAD_BALANCER => adopt::<NSXTLoadBalancer>(ctx, vsc, &reference).await?,
        other => {
            mark_false(
                vsc,
                CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
                REASON_LOAD_BALANCER_PROVISIONING_FAILED,
                ConditionSeverity::Error,
                &format!("unsupported load balancer kind {other}"),
            );
            return Ok(false);
        }
    };

    let status = match adoption {
        Adoption::Adopted(status) => status,
        Adoption::NotFound => {
            return Ok(waiting_for_load_balancer(
                vsc,
                &format!("{} {} not found", reference.kind, reference.name),
            ));
        }
        Adoption::ControlledElsewhere(owner) => {
            warn!(
                "{} {} referenced by VSphereCluster {} is controlled by {}",
                reference.kind,
                reference.name,
                vsc.name_any(),
                owner
            );
            mark_false(
                vsc,
                CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
                REASON_LOAD_BALANCER_PROVISIONING_FAILED,
                ConditionSeverity::Error,
                &format!("{} {} is already controlled by {owner}", reference.kind, reference.name),
            );
            return Ok(false);
        }
    };
    if !status.ready {
        return Ok(waiting_for_load_balancer(vsc, "load balancer is not ready"));
    }
    if status.address.is_empty() {
        return Ok(waiting_for_load_balancer(vsc, "load balancer address is empty"));
    }

    vsc.spec.control_plane_endpoint.host = status.address;
    if vsc.spec.control_plane_endpoint.port == 0 {
        vsc.spec.control_plane_endpoint.port = APISERVER_PORT;
    }
    info!(
        "Control plane endpoint of {} discovered via load balancer: {}:{}",
        vsc.name_any(),
        vsc.spec.control_plane_endpoint.host,
        vsc.spec.control_plane_endpoint.port
    );
    mark_true(vsc, CONDITION_TYPE_LOAD_BALANCER_AVAILABLE);
    Ok(true)
}

async fn delete_labeled<L: LoadBalancer>(
    store: &dyn ResourceStore,
    namespace: &str,
    cluster_name: &str,
) -> Result<usize> {
    let items: Vec<L> = list_objects(store, Some(namespace), &cluster_labels(cluster_name)).await?;
    for lb in &items {
        if lb.meta().deletion_timestamp.is_none() {
            delete_object::<L>(store, &ObjectKey::of(lb)).await?;
            info!("Requested deletion of {} {}/{}", L::kind(&()), namespace, lb.name_any());
        }
    }
    Ok(items.len())
}

/// Request deletion of every load balancer of a cluster.
///
/// Returns how many load balancers still existed.
///
/// # Errors
///
/// Returns any store failure.
pub async fn delete_cluster_load_balancers(
    store: &dyn ResourceStore,
    namespace: &str,
    cluster_name: &str,
) -> Result<usize> {
    let haproxy = delete_labeled::<HAProxyLoadBalancer>(store, namespace, cluster_name).await?;
    let nsxt = delete_labeled::<NSXTLoadBalancer>(store, namespace, cluster_name).await?;
    Ok(haproxy + nsxt)
}
