// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VSphereDeploymentZone` reconciliation.
//!
//! A deployment zone is verified against its `VSphereFailureDomain` with the
//! [`placement`](super::placement) checks. Each zone adds itself as an owner of the
//! failure domain; the failure domain is deleted once the last zone referencing it is
//! gone. A zone is never released while active Machines are placed in it.

use super::finalizers::{
    add_finalizer, complete_deletion, has_finalizer, is_deleting, DeletionOutcome,
};
use super::identity::cluster_credentials;
use super::patch::Patcher;
use super::placement::{verify_failure_domain, verify_placement};
use super::resources::{is_owned_by, owner_reference};
use super::status::{mark_false, mark_true};
use crate::constants::{
    KIND_VSPHERE_DEPLOYMENT_ZONE, KIND_VSPHERE_FAILURE_DOMAIN, REQUEUE_DEPENDENTS_SECS,
};
use crate::context::Context;
use crate::crd::{
    ConditionSeverity, Machine, VSphereCluster, VSphereDeploymentZone, VSphereFailureDomain,
};
use crate::labels::DEPLOYMENT_ZONE_FINALIZER;
use crate::metrics;
use crate::services::{Credentials, Session};
use crate::status_reasons::{
    CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED, CONDITION_TYPE_PLACEMENT_CONSTRAINT_MET,
    CONDITION_TYPE_VCENTER_AVAILABLE, REASON_VCENTER_UNREACHABLE,
};
use crate::store::{delete_object, get_object, list_objects, patch_object, ObjectKey};
use anyhow::{Context as _, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconciles a `VSphereDeploymentZone` resource.
///
/// Zones whose failure domain does not exist are left alone until it appears, unless
/// they are being deleted.
///
/// # Errors
///
/// Returns an error if the vCenter is unreachable, a placement or failure domain check
/// fails, or the store fails.
pub async fn reconcile_deployment_zone(
    ctx: Arc<Context>,
    zone: VSphereDeploymentZone,
) -> Result<Action> {
    let name = zone.name_any();
    info!("Reconciling VSphereDeploymentZone: {}", name);

    let failure_domain: Option<VSphereFailureDomain> = get_object(
        ctx.store.as_ref(),
        &ObjectKey::cluster_scoped(zone.spec.failure_domain.clone()),
    )
    .await?;

    let deleting = is_deleting(&zone.metadata);
    if failure_domain.is_none() && !deleting {
        debug!(
            "Failure domain {} of VSphereDeploymentZone {} not found, skipping",
            zone.spec.failure_domain, name
        );
        return Ok(Action::await_change());
    }

    let mut zone = zone;
    let patcher = Patcher::new(ctx.store.clone(), &zone)?;
    let result = match failure_domain {
        Some(failure_domain) if !deleting => {
            reconcile_normal(&ctx, &mut zone, &failure_domain).await
        }
        failure_domain => reconcile_delete(&ctx, &mut zone, failure_domain).await,
    };
    patcher.finish(&mut zone, result).await
}

fn set_ready(zone: &mut VSphereDeploymentZone, ready: bool) {
    zone.status.get_or_insert_with(Default::default).ready = Some(ready);
}

/// Credentials and thumbprint for the zone's vCenter.
///
/// The first VSphereCluster on the same server with an identity reference supplies
/// them; otherwise the manager credentials are used.
async fn zone_credentials(
    ctx: &Context,
    zone: &VSphereDeploymentZone,
) -> Result<(Credentials, Option<String>)> {
    let clusters: Vec<VSphereCluster> =
        list_objects(ctx.store.as_ref(), None, &BTreeMap::new()).await?;
    let Some(cluster) = clusters
        .into_iter()
        .find(|c| c.spec.server == zone.spec.server && c.spec.identity_ref.is_some())
    else {
        return Ok((ctx.options.credentials(), None));
    };

    debug!(
        "Using identity of VSphereCluster {}/{} for VSphereDeploymentZone {}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any(),
        zone.name_any()
    );
    let credentials = cluster_credentials(ctx, &cluster).await?;
    Ok((credentials, cluster.spec.thumbprint.clone()))
}

async fn zone_session(ctx: &Context, zone: &VSphereDeploymentZone) -> Result<Session> {
    let (credentials, thumbprint) = zone_credentials(ctx, zone).await?;
    ctx.session(&zone.spec.server, &credentials, thumbprint)
        .await
        .with_context(|| format!("unable to create session for vCenter {}", zone.spec.server))
}

async fn reconcile_normal(
    ctx: &Context,
    zone: &mut VSphereDeploymentZone,
    failure_domain: &VSphereFailureDomain,
) -> Result<Action> {
    let name = zone.name_any();

    if add_finalizer(&mut zone.metadata, DEPLOYMENT_ZONE_FINALIZER) {
        metrics::record_finalizer_added(KIND_VSPHERE_DEPLOYMENT_ZONE);
    }

    let session = match zone_session(ctx, zone).await {
        Ok(session) => session,
        Err(e) => {
            mark_false(
                zone,
                CONDITION_TYPE_VCENTER_AVAILABLE,
                REASON_VCENTER_UNREACHABLE,
                ConditionSeverity::Error,
                &format!("{e:#}"),
            );
            set_ready(zone, false);
            return Err(e);
        }
    };
    mark_true(zone, CONDITION_TYPE_VCENTER_AVAILABLE);

    let inventory = ctx.services.inventory.as_ref();
    let topology = &failure_domain.spec.topology;

    if let Err(e) =
        verify_placement(inventory, &session, &zone.spec.placement_constraint, topology).await
    {
        mark_false(
            zone,
            CONDITION_TYPE_PLACEMENT_CONSTRAINT_MET,
            e.reason(),
            ConditionSeverity::Error,
            &e.to_string(),
        );
        set_ready(zone, false);
        return Err(anyhow::Error::new(e)
            .context(format!("placement constraint of VSphereDeploymentZone {name} is not met")));
    }
    mark_true(zone, CONDITION_TYPE_PLACEMENT_CONSTRAINT_MET);

    for domain in [&failure_domain.spec.region, &failure_domain.spec.zone] {
        if let Err(e) = verify_failure_domain(inventory, &session, domain, topology).await {
            mark_false(
                zone,
                CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED,
                e.reason(),
                ConditionSeverity::Error,
                &e.to_string(),
            );
            set_ready(zone, false);
            return Err(anyhow::Error::new(e).context(format!(
                "failure domain {} of VSphereDeploymentZone {name} is invalid",
                failure_domain.name_any()
            )));
        }
    }
    mark_true(zone, CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED);

    own_failure_domain(ctx, zone, failure_domain).await?;

    set_ready(zone, true);
    info!("VSphereDeploymentZone {} is ready", name);
    Ok(Action::await_change())
}

/// Add the zone to the failure domain's owners.
///
/// The patch carries the `resourceVersion` the owner list was read at, so a concurrent
/// owner change fails with a conflict instead of being overwritten.
async fn own_failure_domain(
    ctx: &Context,
    zone: &VSphereDeploymentZone,
    failure_domain: &VSphereFailureDomain,
) -> Result<()> {
    let zone_uid = zone.uid().unwrap_or_default();
    if is_owned_by(&failure_domain.metadata, &zone_uid) {
        return Ok(());
    }

    let name = zone.name_any();
    let mut owners = failure_domain.owner_references().to_vec();
    owners.push(owner_reference(zone, false));
    patch_object::<VSphereFailureDomain>(
        ctx.store.as_ref(),
        &ObjectKey::of(failure_domain),
        &json!({
            "metadata": {
                "ownerReferences": owners,
                "resourceVersion": failure_domain.metadata.resource_version,
            }
        }),
    )
    .await
    .with_context(|| {
        format!(
            "unable to add VSphereDeploymentZone {name} as owner of failure domain {}",
            failure_domain.name_any()
        )
    })?;
    debug!("Added VSphereDeploymentZone {} as owner of failure domain {}", name, failure_domain.name_any());
    Ok(())
}

/// Active Machines placed in the zone, in name order.
async fn machines_in_zone(ctx: &Context, zone: &str) -> Result<Vec<String>> {
    let machines: Vec<Machine> = list_objects(ctx.store.as_ref(), None, &BTreeMap::new()).await?;
    Ok(machines
        .into_iter()
        .filter(|m| !is_deleting(&m.metadata))
        .filter(|m| m.spec.failure_domain.as_deref() == Some(zone))
        .map(|m| format!("{}/{}", m.namespace().unwrap_or_default(), m.name_any()))
        .collect())
}

/// Drop the zone from the failure domain's owners, deleting the failure domain once no
/// owner is left.
async fn release_failure_domain(
    ctx: &Context,
    zone: &VSphereDeploymentZone,
    failure_domain: &VSphereFailureDomain,
) -> Result<()> {
    let key = ObjectKey::of(failure_domain);
    let zone_name = zone.name_any();
    let owners: Vec<_> = failure_domain
        .owner_references()
        .iter()
        .filter(|o| !(o.kind == KIND_VSPHERE_DEPLOYMENT_ZONE && o.name == zone_name))
        .cloned()
        .collect();

    if owners.is_empty() {
        info!("Deleting failure domain {}", key);
        match delete_object::<VSphereFailureDomain>(ctx.store.as_ref(), &key).await {
            Ok(true) => metrics::record_resource_deleted(KIND_VSPHERE_FAILURE_DOMAIN),
            Ok(false) => debug!("Failure domain {} already gone", key),
            Err(e) => {
                warn!("Failed to delete failure domain {}: {}", key, e);
                metrics::record_error(KIND_VSPHERE_FAILURE_DOMAIN, "delete");
            }
        }
        return Ok(());
    }

    if owners.len() != failure_domain.owner_references().len() {
        patch_object::<VSphereFailureDomain>(
            ctx.store.as_ref(),
            &key,
            &json!({
                "metadata": {
                    "ownerReferences": owners,
                    "resourceVersion": failure_domain.metadata.resource_version,
                }
            }),
        )
        .await
        .with_context(|| format!("unable to remove VSphereDeploymentZone {zone_name} from {key}"))?;
    }
    Ok(())
}

async fn reconcile_delete(
    ctx: &Context,
    zone: &mut VSphereDeploymentZone,
    failure_domain: Option<VSphereFailureDomain>,
) -> Result<Action> {
    let name = zone.name_any();
    if !has_finalizer(&zone.metadata, DEPLOYMENT_ZONE_FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Deleting VSphereDeploymentZone {}", name);

    let machines = machines_in_zone(ctx, &name).await?;
    if !machines.is_empty() {
        warn!(
            "VSphereDeploymentZone {} is currently in use by machines: {}",
            name,
            machines.join(", ")
        );
        return Ok(complete_deletion(
            &mut zone.metadata,
            DEPLOYMENT_ZONE_FINALIZER,
            DeletionOutcome::Blocked(Duration::from_secs(REQUEUE_DEPENDENTS_SECS)),
        ));
    }

    if let Some(failure_domain) = failure_domain {
        release_failure_domain(ctx, zone, &failure_domain).await?;
    }

    metrics::record_finalizer_removed(KIND_VSPHERE_DEPLOYMENT_ZONE);
    Ok(complete_deletion(
        &mut zone.metadata,
        DEPLOYMENT_ZONE_FINALIZER,
        DeletionOutcome::Released,
    ))
}

#[cfg(test)]
#[path = "deploymentzone_tests.rs"]
mod deploymentzone_tests;
