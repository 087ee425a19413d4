// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VSphereClusterIdentity` reconciliation.
//!
//! An identity binds the secret named by `spec.secretName` in the manager namespace:
//! it adds itself as an owner and places [`IDENTITY_SECRET_FINALIZER`] on the secret.
//! A secret that already has another owner is refused. The identity turns `ready` once
//! the secret is bound; clusters only use ready identities.
//!
//! Deleting the identity releases and deletes its secret.

use super::finalizers::{
    add_finalizer, complete_deletion, has_finalizer, is_deleting, remove_finalizer_from,
    DeletionOutcome,
};
use super::patch::Patcher;
use super::resources::{is_owned_by, owner_reference};
use super::status::{mark_false, mark_true};
use crate::constants::KIND_VSPHERE_CLUSTER_IDENTITY;
use crate::context::Context;
use crate::crd::{ConditionSeverity, VSphereClusterIdentity};
use crate::labels::{CLUSTER_IDENTITY_FINALIZER, IDENTITY_SECRET_FINALIZER};
use crate::metrics;
use crate::status_reasons::{
    CONDITION_TYPE_CREDENTIALS_AVAILABLE, REASON_SECRET_ALREADY_IN_USE,
    REASON_SECRET_NOT_AVAILABLE, REASON_SECRET_OWNER_REFERENCE_FAILED,
};
use crate::store::{delete_object, get_object, patch_object, ObjectKey};
use anyhow::{anyhow, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciles a `VSphereClusterIdentity` resource.
///
/// # Errors
///
/// Returns an error if the secret is missing, owned by someone else or cannot be
/// patched, or if the final patch fails.
pub async fn reconcile_vsphere_cluster_identity(
    ctx: Arc<Context>,
    identity: VSphereClusterIdentity,
) -> Result<Action> {
    info!("Reconciling VSphereClusterIdentity: {}", identity.name_any());

    let mut identity = identity;
    let patcher = Patcher::new(ctx.store.clone(), &identity)?;
    let result = if is_deleting(&identity.metadata) {
        reconcile_delete(&ctx, &mut identity).await
    } else {
        reconcile_normal(&ctx, &mut identity).await
    };
    patcher.finish(&mut identity, result).await
}

fn secret_key(ctx: &Context, identity: &VSphereClusterIdentity) -> ObjectKey {
    ObjectKey::namespaced(
        ctx.options.controller_namespace.clone(),
        identity.spec.secret_name.clone(),
    )
}

fn set_ready(identity: &mut VSphereClusterIdentity, ready: bool) {
    identity.status.get_or_insert_with(Default::default).ready = ready;
}

fn not_available(
    identity: &mut VSphereClusterIdentity,
    reason: &str,
    severity: ConditionSeverity,
    message: &str,
) {
    set_ready(identity, false);
    mark_false(identity, CONDITION_TYPE_CREDENTIALS_AVAILABLE, reason, severity, message);
}

async fn reconcile_normal(ctx: &Context, identity: &mut VSphereClusterIdentity) -> Result<Action> {
    if add_finalizer(&mut identity.metadata, CLUSTER_IDENTITY_FINALIZER) {
        metrics::record_finalizer_added(KIND_VSPHERE_CLUSTER_IDENTITY);
    }

    let key = secret_key(ctx, identity);
    let Some(secret) = get_object::<Secret>(ctx.store.as_ref(), &key).await? else {
        let message = format!("secret {key} not found");
        not_available(identity, REASON_SECRET_NOT_AVAILABLE, ConditionSeverity::Warning, &message);
        return Err(anyhow!(message));
    };

    let uid = identity.metadata.uid.clone().unwrap_or_default();
    if !is_owned_by(&secret.metadata, &uid) {
        if secret.owner_references().iter().any(|r| r.uid != uid) {
            let message = format!("secret {key} is in use by another cluster or identity");
            warn!("VSphereClusterIdentity {}: {}", identity.name_any(), message);
            not_available(identity, REASON_SECRET_ALREADY_IN_USE, ConditionSeverity::Error, &message);
            return Err(anyhow!(message));
        }

        let mut meta = secret.metadata.clone();
        meta.owner_references = Some(vec![owner_reference(&*identity, false)]);
        add_finalizer(&mut meta, IDENTITY_SECRET_FINALIZER);
        let patch = json!({
            "metadata": {
                "ownerReferences": meta.owner_references,
                "finalizers": meta.finalizers,
                "resourceVersion": meta.resource_version,
            }
        });
        if let Err(err) = patch_object::<Secret>(ctx.store.as_ref(), &key, &patch).await {
            not_available(
                identity,
                REASON_SECRET_OWNER_REFERENCE_FAILED,
                ConditionSeverity::Warning,
                &err.to_string(),
            );
            return Err(anyhow::Error::from(err).context(format!("failed to bind secret {key}")));
        }
        info!("Bound secret {} to VSphereClusterIdentity {}", key, identity.name_any());
    }

    set_ready(identity, true);
    mark_true(identity, CONDITION_TYPE_CREDENTIALS_AVAILABLE);
    Ok(Action::await_change())
}

async fn reconcile_delete(ctx: &Context, identity: &mut VSphereClusterIdentity) -> Result<Action> {
    if !has_finalizer(&identity.metadata, CLUSTER_IDENTITY_FINALIZER) {
        return Ok(Action::await_change());
    }

    let key = secret_key(ctx, identity);
    debug!("Releasing secret {} of VSphereClusterIdentity {}", key, identity.name_any());
    remove_finalizer_from::<Secret>(ctx.store.as_ref(), &key, IDENTITY_SECRET_FINALIZER).await?;
    if delete_object::<Secret>(ctx.store.as_ref(), &key).await? {
        info!("Deleted secret {} of VSphereClusterIdentity {}", key, identity.name_any());
    }

    metrics::record_resource_deleted(KIND_VSPHERE_CLUSTER_IDENTITY);
    metrics::record_finalizer_removed(KIND_VSPHERE_CLUSTER_IDENTITY);
    Ok(complete_deletion(
        &mut identity.metadata,
        CLUSTER_IDENTITY_FINALIZER,
        DeletionOutcome::Released,
    ))
}

#[cfg(test)]
#[path = "clusteridentity_tests.rs"]
mod clusteridentity_tests;
