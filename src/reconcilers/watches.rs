// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch mappers.
//!
//! Each function maps a changed object to the objects whose controller has to look at
//! it again. They are handed to `Controller::watches`, which calls them synchronously,
//! so anything they need beyond the changed object comes from a reflector snapshot
//! (`Controller::store().state()`).

use super::lookup::{cluster_name_label, is_control_plane};
use super::resources::owner_of_kind;
use crate::constants::{
    CLUSTER_INFO_CONFIG_MAP, KIND_HAPROXY_LOAD_BALANCER, KIND_VSPHERE_CLUSTER,
    KIND_VSPHERE_MACHINE, KUBE_PUBLIC_NAMESPACE, KUBE_SYSTEM_NAMESPACE,
    SUPERVISOR_LOAD_BALANCER_SVC_NAME,
};
use crate::crd::{
    Cluster, HAProxyLoadBalancer, Machine, VSphereCluster, VSphereDeploymentZone,
    VSphereFailureDomain, VSphereMachine,
};
use crate::labels::CLUSTER_NAME_LABEL;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::debug;

/// Reference to the owner of `meta` with the given kind, in the same namespace.
fn owner_ref<K>(meta: &ObjectMeta, kind: &str) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let owner = owner_of_kind(meta, kind)?;
    let namespace = meta.namespace.as_deref()?;
    Some(ObjectRef::new(&owner.name).within(namespace))
}

/// Returns `true` if `vsc` is the infrastructure of `cluster_name` in `namespace`.
fn serves_cluster(vsc: &VSphereCluster, namespace: &str, cluster_name: &str) -> bool {
    vsc.namespace().as_deref() == Some(namespace)
        && vsc
            .labels()
            .get(CLUSTER_NAME_LABEL)
            .map_or(vsc.name_any() == cluster_name, |l| l == cluster_name)
}

/// Control-plane Machine to the VSphereCluster still waiting for an endpoint.
///
/// Only Machines that report addresses are mapped: their VSphereMachine is the
/// endpoint candidate the cluster pipeline falls back to.
#[must_use]
pub fn machine_to_vsphere_cluster(
    machine: &Machine,
    clusters: &[Arc<VSphereCluster>],
) -> Vec<ObjectRef<VSphereCluster>> {
    if !is_control_plane(&machine.metadata) {
        return vec![];
    }
    if machine.status.as_ref().map_or(true, |s| s.addresses.is_empty()) {
        return vec![];
    }
    let namespace = machine.namespace().unwrap_or_default();
    let cluster_name = machine.spec.cluster_name.as_str();

    clusters
        .iter()
        .filter(|c| serves_cluster(c, &namespace, cluster_name))
        .filter(|c| c.spec.control_plane_endpoint.is_zero())
        .map(|c| {
            debug!(
                "Machine {}/{} may resolve the endpoint of VSphereCluster {}",
                namespace,
                machine.name_any(),
                c.name_any()
            );
            ObjectRef::from_obj(c.as_ref())
        })
        .collect()
}

/// Cluster API Cluster to its VSphereCluster infrastructure.
#[must_use]
pub fn cluster_to_vsphere_cluster(cluster: &Cluster) -> Option<ObjectRef<VSphereCluster>> {
    let reference = cluster.spec.infrastructure_ref.as_ref()?;
    if reference.kind != KIND_VSPHERE_CLUSTER {
        return None;
    }
    let namespace = reference
        .namespace
        .clone()
        .or_else(|| cluster.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

/// Cluster API Machine to its VSphereMachine infrastructure.
#[must_use]
pub fn machine_to_vsphere_machine(machine: &Machine) -> Option<ObjectRef<VSphereMachine>> {
    let reference = machine.spec.infrastructure_ref.as_ref()?;
    if reference.kind != KIND_VSPHERE_MACHINE {
        return None;
    }
    let namespace = reference
        .namespace
        .clone()
        .or_else(|| machine.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

/// Load balancer to the VSphereCluster that owns it.
#[must_use]
pub fn load_balancer_to_vsphere_cluster(meta: &ObjectMeta) -> Option<ObjectRef<VSphereCluster>> {
    owner_ref(meta, KIND_VSPHERE_CLUSTER)
}

/// VSphereCluster to the load balancer of kind `L` named by its `loadBalancerRef`.
#[must_use]
pub fn vsphere_cluster_to_load_balancer<L>(vsc: &VSphereCluster) -> Option<ObjectRef<L>>
where
    L: Resource<DynamicType = ()>,
{
    let reference = vsc.spec.load_balancer_ref.as_ref()?;
    if reference.kind != L::kind(&()) {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| vsc.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

/// Control-plane member to the load balancer of kind `L` fronting its cluster.
///
/// Used for both Machines and VSphereMachines: the cluster comes from the cluster-name
/// label, the load balancer from the matching VSphereCluster in the snapshot.
#[must_use]
pub fn control_plane_machine_to_load_balancer<L>(
    meta: &ObjectMeta,
    clusters: &[Arc<VSphereCluster>],
) -> Vec<ObjectRef<L>>
where
    L: Resource<DynamicType = ()>,
{
    if !is_control_plane(meta) {
        return vec![];
    }
    let Some(cluster_name) = cluster_name_label(meta) else {
        return vec![];
    };
    let namespace = meta.namespace.as_deref().unwrap_or_default();

    clusters
        .iter()
        .filter(|c| serves_cluster(c, namespace, cluster_name))
        .filter_map(|c| vsphere_cluster_to_load_balancer::<L>(c))
        .collect()
}

/// VSphereVM to the VSphereMachine that owns it.
#[must_use]
pub fn vm_to_vsphere_machine(meta: &ObjectMeta) -> Option<ObjectRef<VSphereMachine>> {
    owner_ref(meta, KIND_VSPHERE_MACHINE)
}

/// VSphereVM to the HAProxy load balancer that owns it.
#[must_use]
pub fn vm_to_haproxy_load_balancer(meta: &ObjectMeta) -> Option<ObjectRef<HAProxyLoadBalancer>> {
    owner_ref(meta, KIND_HAPROXY_LOAD_BALANCER)
}

/// Failure domain to every deployment zone that references it.
#[must_use]
pub fn failure_domain_to_deployment_zones(
    failure_domain: &VSphereFailureDomain,
    zones: &[Arc<VSphereDeploymentZone>],
) -> Vec<ObjectRef<VSphereDeploymentZone>> {
    let name = failure_domain.name_any();
    zones
        .iter()
        .filter(|z| z.spec.failure_domain == name)
        .map(|z| ObjectRef::new(&z.name_any()))
        .collect()
}

/// Returns `true` for the supervisor objects service discovery reads its address from.
#[must_use]
pub fn is_supervisor_address_source(meta: &ObjectMeta) -> bool {
    matches!(
        (meta.namespace.as_deref(), meta.name.as_deref()),
        (Some(KUBE_SYSTEM_NAMESPACE), Some(SUPERVISOR_LOAD_BALANCER_SVC_NAME))
            | (Some(KUBE_PUBLIC_NAMESPACE), Some(CLUSTER_INFO_CONFIG_MAP))
    )
}

/// Supervisor address change to every VSphereCluster.
#[must_use]
pub fn supervisor_address_to_vsphere_clusters(
    meta: &ObjectMeta,
    clusters: &[Arc<VSphereCluster>],
) -> Vec<ObjectRef<VSphereCluster>> {
    if !is_supervisor_address_source(meta) {
        return vec![];
    }
    clusters
        .iter()
        .map(|c| ObjectRef::from_obj(c.as_ref()))
        .collect()
}

#[cfg(test)]
#[path = "watches_tests.rs"]
mod watches_tests;
