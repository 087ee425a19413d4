// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VSphereMachine` reconciliation: the machine provisioning state machine.
//!
//! Every pass recomputes the machine's position from observed state:
//!
//! ```text
//! ErrorState
//! WaitingForClusterInfrastructure
//! WaitingForBootstrapData | WaitingForControlPlaneAvailable
//! VMReconciling            (VSphereVM created or patched)
//! WaitingForProviderID
//! WaitingForNetwork        (WaitingForStaticIPAllocation | WaitingForNetworkAddresses)
//! Ready
//! ```
//!
//! Each blocking stage is reported on the `VMProvisioned` condition with its own
//! reason. Nothing is cached between passes, so a VM that regresses is reflected back
//! into the machine status on the next pass.
//!
//! # Clone field resolution
//!
//! The VSphereVM clone fields are resolved with a three-tier fallback: the machine's
//! own value, then the cluster's cloud-provider workspace default, then the
//! VSphereCluster default (`server`, `thumbprint`). The first non-empty value wins.
//! A machine placed in a deployment zone takes server, folder and resource pool from
//! the zone and datacenter, datastore and network names from its failure domain.

use super::finalizers::{add_finalizer, complete_deletion, has_finalizer, is_deleting, DeletionOutcome};
use super::lookup::{
    cluster_name_label, get_cluster, infrastructure_cluster, is_control_plane, is_paused,
    owner_machine,
};
use super::patch::Patcher;
use super::resources::{create_or_patch, ensure_owner_reference, owner_reference, Operation};
use super::status::{find_condition, mark_false, mark_true, Conditioned};
use crate::constants::{KIND_VSPHERE_MACHINE, KIND_VSPHERE_VM, PROVIDER_ID_PREFIX, REQUEUE_DEPENDENTS_SECS};
use crate::context::Context;
use crate::crd::{
    Cluster, ConditionSeverity, Machine, MachineAddress, NetworkDeviceSpec, NetworkSpec,
    ObjectReference, VSphereCluster, VSphereDeploymentZone, VSphereFailureDomain,
    VSphereMachine, VSphereVM, VSphereVMSpec, VirtualMachineCloneSpec, ADDRESS_INTERNAL_DNS,
    ADDRESS_INTERNAL_IP,
};
use crate::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, MACHINE_FINALIZER};
use crate::metrics;
use crate::status_reasons::{
    CONDITION_TYPE_VM_PROVISIONED, REASON_CLONING, REASON_DELETING,
    REASON_WAITING_FOR_BOOTSTRAP_DATA, REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE,
    REASON_WAITING_FOR_CONTROL_PLANE_AVAILABLE, REASON_WAITING_FOR_NETWORK_ADDRESSES,
    REASON_WAITING_FOR_PROVIDER_ID, REASON_WAITING_FOR_STATIC_IP_ALLOCATION, STATUS_TRUE,
};
use crate::store::{delete_object, get_object, ObjectKey};
use anyhow::{bail, Context as _, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Placement a deployment zone and its failure domain impose on a machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZonePlacement {
    /// vCenter server of the zone
    pub server: String,
    /// Folder from the zone placement constraint
    pub folder: String,
    /// Resource pool from the zone placement constraint
    pub resource_pool: String,
    /// Datacenter of the failure domain topology
    pub datacenter: String,
    /// Datastore of the failure domain topology
    pub datastore: String,
    /// Networks of the failure domain topology, in device order
    pub networks: Vec<String>,
}

/// Returns `true` while a device has neither DHCP nor static addresses.
///
/// Such a device is waiting for an IP address manager to fill in its addresses.
#[must_use]
pub fn is_waiting_for_static_ip_allocation(network: &NetworkSpec) -> bool {
    network.devices.iter().any(|d| {
        !d.dhcp4.unwrap_or(false) && !d.dhcp6.unwrap_or(false) && d.ip_addrs.is_empty()
    })
}

fn is_uuid(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Provider ID for a BIOS UUID.
///
/// Returns `Ok(None)` while the UUID is empty.
///
/// # Errors
///
/// Returns an error if the UUID is malformed.
pub fn provider_id_from_bios_uuid(bios_uuid: &str) -> Result<Option<String>> {
    if bios_uuid.is_empty() {
        return Ok(None);
    }
    if !is_uuid(bios_uuid) {
        bail!("invalid BIOS UUID {bios_uuid:?}");
    }
    Ok(Some(format!("{PROVIDER_ID_PREFIX}{}", bios_uuid.to_lowercase())))
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| (*c).to_string())
        .unwrap_or_default()
}

fn parse_cidr(cidr: &str) -> Result<(IpAddr, u32)> {
    let (ip, prefix) = cidr
        .split_once('/')
        .with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let ip: IpAddr = ip.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let prefix: u32 = prefix.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        bail!("invalid CIDR {cidr:?}");
    }
    Ok((ip, prefix))
}

fn cidr_contains(network: IpAddr, prefix: u32, candidate: IpAddr) -> bool {
    match (network, candidate) {
        (IpAddr::V4(n), IpAddr::V4(c)) => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(n) & mask == u32::from(c) & mask
        }
        (IpAddr::V6(n), IpAddr::V6(c)) => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(n) & mask == u128::from(c) & mask
        }
        _ => false,
    }
}

/// Preferred API server address of a machine.
///
/// The first `InternalIP` inside the network's `preferredAPIServerCIDR`, or the
/// first `InternalIP` when no CIDR is configured. `Ok(None)` when the machine has
/// no matching address.
///
/// # Errors
///
/// Returns an error if the preferred CIDR cannot be parsed.
pub fn preferred_ip_address(machine: &VSphereMachine) -> Result<Option<String>> {
    let cidr = machine
        .spec
        .clone_spec
        .network
        .preferred_api_server_cidr
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(parse_cidr)
        .transpose()?;
    let internal = machine
        .status
        .iter()
        .flat_map(|s| s.addresses.iter())
        .filter(|a| a.r#type == ADDRESS_INTERNAL_IP);
    for address in internal {
        let Some((network, prefix)) = cidr else {
            return Ok(Some(address.address.clone()));
        };
        if let Ok(ip) = address.address.parse::<IpAddr>() {
            if cidr_contains(network, prefix, ip) {
                return Ok(Some(address.address.clone()));
            }
        }
    }
    Ok(None)
}

/// Resolve the clone fields of the VSphereVM backing a machine.
#[must_use]
pub fn resolve_clone_spec(
    machine: &VirtualMachineCloneSpec,
    zone: Option<&ZonePlacement>,
    cluster: Option<&VSphereCluster>,
) -> VirtualMachineCloneSpec {
    let mut own = machine.clone();
    if let Some(zone) = zone {
        own.server.clone_from(&zone.server);
        own.folder.clone_from(&zone.folder);
        own.resource_pool.clone_from(&zone.resource_pool);
        own.datacenter.clone_from(&zone.datacenter);
        own.datastore.clone_from(&zone.datastore);
        for (i, network) in zone.networks.iter().enumerate() {
            match own.network.devices.get_mut(i) {
                Some(device) => device.network_name.clone_from(network),
                None => own.network.devices.push(NetworkDeviceSpec {
                    network_name: network.clone(),
                    ..NetworkDeviceSpec::default()
                }),
            }
        }
    }

    let workspace = cluster
        .map(|c| c.spec.cloud_provider_configuration.workspace.clone())
        .unwrap_or_default();
    let cluster_server = cluster.map_or("", |c| c.spec.server.as_str());
    let cluster_thumbprint = cluster
        .and_then(|c| c.spec.thumbprint.as_deref())
        .unwrap_or_default();

    own.server = first_non_empty(&[own.server.as_str(), workspace.server.as_str(), cluster_server]);
    own.thumbprint = first_non_empty(&[own.thumbprint.as_str(), cluster_thumbprint]);
    own.datacenter = first_non_empty(&[own.datacenter.as_str(), workspace.datacenter.as_str()]);
    own.folder = first_non_empty(&[own.folder.as_str(), workspace.folder.as_str()]);
    own.datastore = first_non_empty(&[own.datastore.as_str(), workspace.datastore.as_str()]);
    own.resource_pool =
        first_non_empty(&[own.resource_pool.as_str(), workspace.resource_pool.as_str()]);
    own
}

/// Copy `desired` into `existing`, keeping addresses an IP manager already
/// allocated to devices that request none.
fn apply_clone_spec(existing: &mut VirtualMachineCloneSpec, desired: &VirtualMachineCloneSpec) {
    let allocated: Vec<Vec<String>> = existing
        .network
        .devices
        .iter()
        .map(|d| d.ip_addrs.clone())
        .collect();
    *existing = desired.clone();
    for (device, ips) in existing.network.devices.iter_mut().zip(allocated) {
        if device.ip_addrs.is_empty() && !ips.is_empty() {
            device.ip_addrs = ips;
        }
    }
}

/// Placement of the deployment zone named `failure_domain`.
///
/// Returns `Ok(None)` when the zone or its failure domain does not exist.
///
/// # Errors
///
/// Returns any store failure.
pub async fn zone_placement(ctx: &Context, failure_domain: &str) -> Result<Option<ZonePlacement>> {
    let store = ctx.store.as_ref();
    let Some(zone) =
        get_object::<VSphereDeploymentZone>(store, &ObjectKey::cluster_scoped(failure_domain))
            .await?
    else {
        debug!("Deployment zone {} not found, using machine placement", failure_domain);
        return Ok(None);
    };
    let Some(domain) = get_object::<VSphereFailureDomain>(
        store,
        &ObjectKey::cluster_scoped(zone.spec.failure_domain.clone()),
    )
    .await?
    else {
        debug!(
            "Failure domain {} of zone {} not found, using machine placement",
            zone.spec.failure_domain, failure_domain
        );
        return Ok(None);
    };
    Ok(Some(ZonePlacement {
        server: zone.spec.server,
        folder: zone.spec.placement_constraint.folder,
        resource_pool: zone.spec.placement_constraint.resource_pool,
        datacenter: domain.spec.topology.datacenter,
        datastore: domain.spec.topology.datastore.unwrap_or_default(),
        networks: domain.spec.topology.networks,
    }))
}

/// Reconciles a `VSphereMachine` resource.
///
/// Machines without an owning `Machine` or `Cluster` are left alone until the
/// Cluster API controllers link them.
///
/// # Errors
///
/// Returns an error on store failures, a malformed BIOS UUID, or when the final
/// patch fails.
pub async fn reconcile_vsphere_machine(ctx: Arc<Context>, machine: VSphereMachine) -> Result<Action> {
    let namespace = machine.namespace().unwrap_or_default();
    let name = machine.name_any();
    info!("Reconciling VSphereMachine: {}/{}", namespace, name);

    let Some(owner) = owner_machine(ctx.store.as_ref(), &machine.metadata).await? else {
        info!("Waiting for Machine controller to set OwnerRef on VSphereMachine {}/{}", namespace, name);
        return Ok(Action::await_change());
    };
    let cluster_name = cluster_name_label(&owner.metadata)
        .or_else(|| cluster_name_label(&machine.metadata))
        .unwrap_or(owner.spec.cluster_name.as_str())
        .to_string();
    let Some(cluster) = get_cluster(ctx.store.as_ref(), &namespace, &cluster_name).await? else {
        info!("Machine {}/{} is not associated with a Cluster yet", namespace, name);
        return Ok(Action::await_change());
    };
    if is_paused(Some(&cluster), &machine.metadata) {
        debug!("VSphereMachine {}/{} belongs to a paused cluster, skipping", namespace, name);
        return Ok(Action::await_change());
    }

    let mut machine = machine;
    let patcher = Patcher::new(ctx.store.clone(), &machine)?;
    let result = if is_deleting(&machine.metadata) {
        reconcile_delete(&ctx, &mut machine).await
    } else {
        reconcile_normal(&ctx, &cluster, &owner, &mut machine).await
    };
    patcher.finish(&mut machine, result).await
}

async fn reconcile_delete(ctx: &Context, machine: &mut VSphereMachine) -> Result<Action> {
    if !has_finalizer(&machine.metadata, MACHINE_FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Handling deleted VSphereMachine {}", machine.name_any());
    mark_false(
        machine,
        CONDITION_TYPE_VM_PROVISIONED,
        REASON_DELETING,
        ConditionSeverity::Info,
        "",
    );

    let key = ObjectKey::of(machine);
    let outcome = match get_object::<VSphereVM>(ctx.store.as_ref(), &key).await? {
        Some(vm) => {
            if vm.metadata.deletion_timestamp.is_none() {
                delete_object::<VSphereVM>(ctx.store.as_ref(), &key)
                    .await
                    .with_context(|| format!("failed to delete VSphereVM {key}"))?;
                info!("Requested deletion of VSphereVM {}", key);
            }
            DeletionOutcome::Blocked(Duration::from_secs(REQUEUE_DEPENDENTS_SECS))
        }
        None => {
            metrics::record_finalizer_removed(KIND_VSPHERE_MACHINE);
            DeletionOutcome::Released
        }
    };
    Ok(complete_deletion(&mut machine.metadata, MACHINE_FINALIZER, outcome))
}

fn wait(machine: &mut VSphereMachine, reason: &str, message: &str) -> Action {
    machine.status.get_or_insert_with(Default::default).ready = false;
    mark_false(
        machine,
        CONDITION_TYPE_VM_PROVISIONED,
        reason,
        ConditionSeverity::Info,
        message,
    );
    Action::await_change()
}

async fn reconcile_normal(
    ctx: &Context,
    cluster: &Cluster,
    owner: &Machine,
    machine: &mut VSphereMachine,
) -> Result<Action> {
    let namespace = machine.namespace().unwrap_or_default();
    let name = machine.name_any();

    if let Some(status) = &machine.status {
        if status.failure_reason.is_some() || status.failure_message.is_some() {
            info!("VSphereMachine {}/{} is failed, won't reconcile", namespace, name);
            return Ok(Action::await_change());
        }
    }

    if add_finalizer(&mut machine.metadata, MACHINE_FINALIZER) {
        metrics::record_finalizer_added(KIND_VSPHERE_MACHINE);
    }

    let cluster_status = cluster.status.clone().unwrap_or_default();
    if !cluster_status.infrastructure_ready {
        info!("Cluster infrastructure is not ready yet for {}/{}", namespace, name);
        return Ok(wait(machine, REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE, ""));
    }

    let Some(data_secret) = owner.spec.bootstrap.data_secret_name.clone() else {
        if !is_control_plane(&owner.metadata) && !cluster_status.control_plane_initialized {
            info!("Waiting for the control plane to be initialized before {}/{}", namespace, name);
            return Ok(wait(machine, REASON_WAITING_FOR_CONTROL_PLANE_AVAILABLE, ""));
        }
        info!("Waiting for bootstrap data to be available for {}/{}", namespace, name);
        return Ok(wait(machine, REASON_WAITING_FOR_BOOTSTRAP_DATA, ""));
    };

    let vm = reconcile_vsphere_vm_object(ctx, cluster, owner, machine, &data_secret).await?;
    let vm_status = vm.status.clone().unwrap_or_default();

    if !vm_status.ready {
        let (reason, message) = find_condition(vm.conditions(), CONDITION_TYPE_VM_PROVISIONED)
            .filter(|c| c.status != STATUS_TRUE)
            .map(|c| {
                (
                    c.reason.clone().unwrap_or_else(|| REASON_CLONING.to_string()),
                    c.message.clone().unwrap_or_default(),
                )
            })
            .unwrap_or_else(|| (REASON_CLONING.to_string(), String::new()));
        debug!("VSphereVM {}/{} is not ready yet ({})", namespace, name, reason);
        return Ok(wait(machine, &reason, &message));
    }

    if machine.spec.provider_id.as_deref().is_none_or(str::is_empty) {
        let bios_uuid = vm.spec.bios_uuid.clone().unwrap_or_default();
        match provider_id_from_bios_uuid(&bios_uuid)
            .with_context(|| format!("invalid BIOS UUID on VSphereVM {namespace}/{name}"))?
        {
            Some(provider_id) => {
                info!("Setting provider ID {} on VSphereMachine {}/{}", provider_id, namespace, name);
                machine.spec.provider_id = Some(provider_id);
            }
            None => {
                return Ok(wait(machine, REASON_WAITING_FOR_PROVIDER_ID, ""));
            }
        }
    }

    let desired_devices = vm.spec.clone_spec.network.devices.len();
    if vm_status.network.len() != desired_devices || vm_status.addresses.is_empty() {
        let reason = if is_waiting_for_static_ip_allocation(&vm.spec.clone_spec.network) {
            REASON_WAITING_FOR_STATIC_IP_ALLOCATION
        } else {
            REASON_WAITING_FOR_NETWORK_ADDRESSES
        };
        info!("Waiting for network of VSphereMachine {}/{}: {}", namespace, name, reason);
        return Ok(wait(machine, reason, ""));
    }

    let mut addresses: Vec<MachineAddress> = vm_status
        .addresses
        .iter()
        .map(|a| MachineAddress {
            r#type: ADDRESS_INTERNAL_IP.to_string(),
            address: a.clone(),
        })
        .collect();
    addresses.push(MachineAddress {
        r#type: ADDRESS_INTERNAL_DNS.to_string(),
        address: vm.name_any(),
    });

    let status = machine.status.get_or_insert_with(Default::default);
    status.network = vm_status.network;
    status.addresses = addresses;
    if !status.ready {
        info!("VSphereMachine {}/{} is ready", namespace, name);
    }
    status.ready = true;
    mark_true(machine, CONDITION_TYPE_VM_PROVISIONED);
    Ok(Action::await_change())
}

/// Create or patch the VSphereVM named like `machine`.
async fn reconcile_vsphere_vm_object(
    ctx: &Context,
    cluster: &Cluster,
    owner: &Machine,
    machine: &VSphereMachine,
    data_secret: &str,
) -> Result<VSphereVM> {
    let vsphere_cluster = infrastructure_cluster(ctx.store.as_ref(), cluster).await?;
    let failure_domain = owner
        .spec
        .failure_domain
        .clone()
        .or_else(|| machine.spec.failure_domain.clone());
    let zone = match failure_domain.as_deref() {
        Some(fd) => zone_placement(ctx, fd).await?,
        None => None,
    };
    let clone_spec = resolve_clone_spec(
        &machine.spec.clone_spec,
        zone.as_ref(),
        vsphere_cluster.as_ref(),
    );

    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.name_any())]);
    if is_control_plane(&owner.metadata) {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    let bootstrap_ref = ObjectReference {
        api_version: "v1".to_string(),
        kind: "Secret".to_string(),
        name: data_secret.to_string(),
        namespace: machine.namespace(),
    };
    let oref = owner_reference(machine, true);

    let mut desired = VSphereVM::new(&machine.name_any(), VSphereVMSpec::default());
    desired.metadata.namespace = machine.namespace();

    let (vm, operation) = create_or_patch(ctx.store.as_ref(), desired, |vm: &mut VSphereVM| {
        let vm_labels = vm.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in &labels {
            vm_labels.insert(k.clone(), v.clone());
        }
        ensure_owner_reference(&mut vm.metadata, oref.clone());
        vm.spec.bootstrap_ref = Some(bootstrap_ref.clone());
        apply_clone_spec(&mut vm.spec.clone_spec, &clone_spec);
    })
    .await
    .with_context(|| format!("failed to create or patch VSphereVM {}", machine.name_any()))?;

    if operation == Operation::Created {
        metrics::record_resource_created(KIND_VSPHERE_VM);
    }
    Ok(vm)
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod machine_tests;
