// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VSphereVM` reconciliation.
//!
//! A `VSphereVM` is driven through the [`VmDriver`](crate::services::VmDriver): the
//! normal path clones or updates the VM and copies the observed BIOS UUID and network
//! state back, the delete path destroys the VM and releases [`VM_FINALIZER`] only once
//! the driver reports it gone.

use super::finalizers::{add_finalizer, complete_deletion, has_finalizer, is_deleting, DeletionOutcome};
use super::identity::{credentials_for_cluster, secret_value};
use super::lookup::{is_paused, owner_cluster};
use super::patch::Patcher;
use super::status::{mark_false, mark_true};
use crate::constants::{KIND_VSPHERE_VM, REQUEUE_DEPENDENTS_SECS, REQUEUE_SYNC_PERIOD_SECS};
use crate::context::Context;
use crate::crd::{
    Cluster, ConditionSeverity, ObjectReference, VSphereVM, VirtualMachineCloneSpec,
};
use crate::labels::VM_FINALIZER;
use crate::metrics;
use crate::services::{DestroyState, PowerState, Session, VmHandle, VmRequest};
use crate::status_reasons::{
    CONDITION_TYPE_VM_PROVISIONED, REASON_CLONING, REASON_DELETING, REASON_POWERING_ON,
    REASON_TASK_FAILURE, REASON_WAITING_FOR_BOOTSTRAP_DATA,
};
use crate::store::{get_object, ObjectKey};
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Secret key holding rendered bootstrap data.
pub const BOOTSTRAP_DATA_KEY: &str = "value";

fn requeue_dependents() -> Action {
    Action::requeue(Duration::from_secs(REQUEUE_DEPENDENTS_SECS))
}

/// Reconciles a `VSphereVM` resource.
///
/// Paused clusters are skipped without touching the object. Every other pass ends by
/// persisting the object through a [`Patcher`].
///
/// # Errors
///
/// Returns an error if a session cannot be opened, the VM driver fails, or the final
/// patch fails.
pub async fn reconcile_vsphere_vm(ctx: Arc<Context>, vm: VSphereVM) -> Result<Action> {
    let namespace = vm.namespace().unwrap_or_default();
    let name = vm.name_any();
    info!("Reconciling VSphereVM: {}/{}", namespace, name);

    let cluster = owner_cluster(ctx.store.as_ref(), &vm.metadata).await?;
    if is_paused(cluster.as_ref(), &vm.metadata) {
        debug!("VSphereVM {}/{} belongs to a paused cluster, skipping", namespace, name);
        return Ok(Action::await_change());
    }

    let mut vm = vm;
    let patcher = Patcher::new(ctx.store.clone(), &vm)?;
    let result = if is_deleting(&vm.metadata) {
        reconcile_delete(&ctx, cluster.as_ref(), &mut vm).await
    } else {
        reconcile_normal(&ctx, cluster.as_ref(), &mut vm).await
    };
    patcher.finish(&mut vm, result).await
}

async fn open_session(
    ctx: &Context,
    cluster: Option<&Cluster>,
    clone_spec: &VirtualMachineCloneSpec,
) -> Result<Session> {
    let credentials = credentials_for_cluster(ctx, cluster).await?;
    let thumbprint = (!clone_spec.thumbprint.is_empty()).then(|| clone_spec.thumbprint.clone());
    ctx.session(&clone_spec.server, &credentials, thumbprint)
        .await
        .with_context(|| format!("failed to create vSphere session to {}", clone_spec.server))
}

fn handle_for(session: &Session, vm: &VSphereVM) -> VmHandle {
    VmHandle {
        server: session.server.clone(),
        namespace: vm.namespace().unwrap_or_default(),
        name: vm.name_any(),
    }
}

async fn reconcile_delete(
    ctx: &Context,
    cluster: Option<&Cluster>,
    vm: &mut VSphereVM,
) -> Result<Action> {
    if !has_finalizer(&vm.metadata, VM_FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Handling deleted VSphereVM {}", vm.name_any());

    let session = open_session(ctx, cluster, &vm.spec.clone_spec).await?;
    let handle = handle_for(&session, vm);
    let state = ctx
        .services
        .vms
        .destroy(&session, &handle)
        .await
        .with_context(|| format!("failed to destroy VM {}", handle.name))?;

    match state {
        DestroyState::Pending => {
            debug!("VM {} is still being destroyed", handle.name);
            mark_false(
                vm,
                CONDITION_TYPE_VM_PROVISIONED,
                REASON_DELETING,
                ConditionSeverity::Info,
                "",
            );
            Ok(complete_deletion(
                &mut vm.metadata,
                VM_FINALIZER,
                DeletionOutcome::Blocked(Duration::from_secs(REQUEUE_DEPENDENTS_SECS)),
            ))
        }
        DestroyState::NotFound => {
            metrics::record_resource_deleted(KIND_VSPHERE_VM);
            metrics::record_finalizer_removed(KIND_VSPHERE_VM);
            Ok(complete_deletion(
                &mut vm.metadata,
                VM_FINALIZER,
                DeletionOutcome::Released,
            ))
        }
    }
}

/// Rendered bootstrap data of a VM, `Ok(None)` while the secret does not exist.
async fn bootstrap_data(
    ctx: &Context,
    namespace: &str,
    reference: &ObjectReference,
) -> Result<Option<String>> {
    let namespace = reference.namespace.as_deref().unwrap_or(namespace);
    let key = ObjectKey::namespaced(namespace, reference.name.clone());
    let Some(secret) = get_object::<Secret>(ctx.store.as_ref(), &key).await? else {
        return Ok(None);
    };
    secret_value(&secret, BOOTSTRAP_DATA_KEY)
        .map(Some)
        .with_context(|| format!("bootstrap secret {key} has no {BOOTSTRAP_DATA_KEY} key"))
}

async fn reconcile_normal(
    ctx: &Context,
    cluster: Option<&Cluster>,
    vm: &mut VSphereVM,
) -> Result<Action> {
    let namespace = vm.namespace().unwrap_or_default();
    let name = vm.name_any();

    if let Some(status) = &vm.status {
        if status.failure_reason.is_some() || status.failure_message.is_some() {
            info!("VSphereVM {}/{} is failed, won't reconcile", namespace, name);
            return Ok(Action::await_change());
        }
    }

    if add_finalizer(&mut vm.metadata, VM_FINALIZER) {
        metrics::record_finalizer_added(KIND_VSPHERE_VM);
    }

    let session = open_session(ctx, cluster, &vm.spec.clone_spec).await?;

    let bootstrap = match &vm.spec.bootstrap_ref {
        Some(reference) => match bootstrap_data(ctx, &namespace, reference).await? {
            Some(data) => Some(data),
            None => {
                mark_false(
                    vm,
                    CONDITION_TYPE_VM_PROVISIONED,
                    REASON_WAITING_FOR_BOOTSTRAP_DATA,
                    ConditionSeverity::Info,
                    &format!("bootstrap secret {} not found", reference.name),
                );
                return Ok(requeue_dependents());
            }
        },
        None => None,
    };

    let request = VmRequest {
        namespace: namespace.clone(),
        name: name.clone(),
        clone_spec: vm.spec.clone_spec.clone(),
        bootstrap_data: bootstrap,
    };
    let handle = ctx
        .services
        .vms
        .create_or_update(&session, &request)
        .await
        .context("failed to reconcile VM")?;

    let observed = ctx
        .services
        .vms
        .get(&session, &handle)
        .await
        .context("failed to read VM state")?;
    let status = vm.status.get_or_insert_with(Default::default);
    let Some(state) = observed else {
        status.ready = false;
        mark_false(
            vm,
            CONDITION_TYPE_VM_PROVISIONED,
            REASON_CLONING,
            ConditionSeverity::Info,
            "",
        );
        return Ok(requeue_dependents());
    };

    if let Some(failure) = &state.failure {
        warn!("VM {}/{} reported a task failure: {}", namespace, name, failure);
        status.ready = false;
        mark_false(
            vm,
            CONDITION_TYPE_VM_PROVISIONED,
            REASON_TASK_FAILURE,
            ConditionSeverity::Warning,
            failure,
        );
        return Ok(requeue_dependents());
    }

    if !state.ready {
        status.ready = false;
        let reason = if state.bios_uuid.is_some() && state.power_state != PowerState::PoweredOn {
            REASON_POWERING_ON
        } else {
            REASON_CLONING
        };
        info!(
            "VM {}/{} is not ready yet (power state {:?})",
            namespace, name, state.power_state
        );
        mark_false(
            vm,
            CONDITION_TYPE_VM_PROVISIONED,
            reason,
            ConditionSeverity::Info,
            "",
        );
        return Ok(requeue_dependents());
    }

    if vm.spec.bios_uuid.as_deref().is_none_or(str::is_empty) {
        vm.spec.bios_uuid.clone_from(&state.bios_uuid);
    }

    let addresses: Vec<String> = if state.network.is_empty() {
        state.addresses.clone()
    } else {
        state
            .network
            .iter()
            .flat_map(|n| n.ip_addrs.iter().cloned())
            .collect()
    };
    let status = vm.status.get_or_insert_with(Default::default);
    status.network = state.network;
    status.addresses = addresses;
    if !status.ready {
        info!("VSphereVM {}/{} is ready", namespace, name);
    }
    status.ready = true;
    mark_true(vm, CONDITION_TYPE_VM_PROVISIONED);

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SYNC_PERIOD_SECS)))
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod vm_tests;
