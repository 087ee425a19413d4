// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Appliance-backed NSX-T load balancer.
//!
//! Every change runs inside one appliance transaction: read the configuration,
//! replace this load balancer's pool and virtual server, post the result against the
//! version that was read, and commit. The virtual IP is allocated from
//! `spec.virtualIpPoolId` the first time and recovered from the existing virtual
//! servers afterwards.

use super::config::{differs, with_load_balancer, without_load_balancer};
use super::{reconcile_load_balancer, LoadBalancer};
use crate::constants::{
    APISERVER_PORT, KIND_NSXT_LOAD_BALANCER, LB_NAME_UID_CHARS, LB_POOL_ALGORITHM,
    LB_POOL_MIN_ACTIVE_MEMBERS, REQUEUE_SYNC_PERIOD_SECS,
};
use crate::context::Context;
use crate::crd::{Cluster, LoadBalancerStatus, NSXTLoadBalancer};
use crate::labels::NSXT_LOAD_BALANCER_FINALIZER;
use crate::metrics;
use crate::reconcilers::finalizers::DeletionOutcome;
use crate::services::{
    ApplianceClient, IpAction, LbPool, PoolMember, VersionedConfig, VirtualServer,
};
use crate::store::{patch_object_status, ObjectKey};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Appliance-side name of a load balancer: `<namespace>-<name>-<uid prefix>`.
#[must_use]
pub fn load_balancer_name(lb: &NSXTLoadBalancer) -> String {
    let uid: String = lb
        .uid()
        .unwrap_or_default()
        .chars()
        .take(LB_NAME_UID_CHARS)
        .collect();
    format!(
        "{}-{}-{}",
        lb.namespace().unwrap_or_default(),
        lb.name_any(),
        uid
    )
}

#[must_use]
pub fn virtual_server_name(lb_name: &str, port: i32) -> String {
    format!("{lb_name}-port-{port}")
}

#[must_use]
pub fn pool_name(lb_name: &str) -> String {
    format!("{lb_name}-pool")
}

/// Virtual IP already assigned to the virtual servers of `lb_name`.
///
/// # Errors
///
/// Returns an error when the virtual servers disagree on the address.
pub fn existing_vip(config: &VersionedConfig, lb_name: &str) -> Result<Option<String>> {
    let prefix = format!("{lb_name}-");
    let vips: BTreeSet<&str> = config
        .config
        .virtual_servers
        .iter()
        .filter(|vs| vs.name.starts_with(&prefix))
        .map(|vs| vs.ip_address.as_str())
        .collect();
    match vips.len() {
        0 => Ok(None),
        1 => Ok(vips.into_iter().next().map(str::to_string)),
        n => bail!("load balancer {lb_name} has more than one VIP ({n} found)"),
    }
}

fn client(ctx: &Context, lb: &NSXTLoadBalancer) -> Result<Arc<dyn ApplianceClient>> {
    ctx.services
        .appliances
        .client_for(&lb.spec.server, lb.spec.insecure)
        .with_context(|| format!("failed to create appliance client for {}", lb.spec.server))
}

/// Push `members` to the appliance and return the virtual IP.
///
/// A VIP allocated during this call is handed back to its pool if a later step fails.
async fn sync(
    client: &dyn ApplianceClient,
    lb: &NSXTLoadBalancer,
    members: &[PoolMember],
) -> Result<String> {
    let lb_name = load_balancer_name(lb);
    let transaction = client.start_transaction().await?;
    let current = client.get_config(&transaction).await?;

    let (vip, allocated) = match existing_vip(&current, &lb_name)? {
        Some(vip) => (vip, false),
        None => {
            let vip = client
                .allocate_or_release(&lb.spec.virtual_ip_pool_id, None, IpAction::Allocate)
                .await
                .with_context(|| {
                    format!("failed to allocate a VIP from pool {}", lb.spec.virtual_ip_pool_id)
                })?;
            info!("Allocated VIP {} for load balancer {}", vip, lb_name);
            (vip, true)
        }
    };

    let result = apply(client, &transaction, &current, &lb_name, &vip, members).await;
    if let Err(err) = &result {
        if allocated {
            warn!("Releasing VIP {} after failed update of {}: {:#}", vip, lb_name, err);
            if let Err(release_err) = client
                .allocate_or_release(
                    &lb.spec.virtual_ip_pool_id,
                    Some(vip.clone()),
                    IpAction::Release,
                )
                .await
            {
                warn!("Failed to release VIP {}: {}", vip, release_err);
            }
        }
    }
    result.map(|()| vip)
}

async fn apply(
    client: &dyn ApplianceClient,
    transaction: &str,
    current: &VersionedConfig,
    lb_name: &str,
    vip: &str,
    members: &[PoolMember],
) -> Result<()> {
    let pool = LbPool {
        name: pool_name(lb_name),
        algorithm: LB_POOL_ALGORITHM.to_string(),
        min_active_members: LB_POOL_MIN_ACTIVE_MEMBERS,
        members: members.to_vec(),
    };
    let virtual_server = VirtualServer {
        name: virtual_server_name(lb_name, APISERVER_PORT),
        ip_address: vip.to_string(),
        port: APISERVER_PORT,
        pool: pool.name.clone(),
    };
    let desired = with_load_balancer(&current.config, pool, virtual_server);

    if differs(&current.config, &desired) {
        let version = client
            .post_config(transaction, &desired, current.version)
            .await
            .with_context(|| format!("failed to update appliance configuration for {lb_name}"))?;
        info!("Posted configuration version {} for load balancer {}", version, lb_name);
    } else {
        debug!("Appliance configuration of {} is up to date", lb_name);
    }
    client
        .commit(transaction)
        .await
        .with_context(|| format!("failed to commit appliance transaction {transaction}"))?;
    Ok(())
}

/// Clear the VIP recorded in the load balancer status and return it.
///
/// The cleared status is stored before the address goes back to its pool, so a
/// deletion pass that is retried never releases the same address twice.
async fn forget_vip(ctx: &Context, lb: &mut NSXTLoadBalancer) -> Result<Option<String>> {
    let address = lb.lb_status().map(|s| s.address.clone()).unwrap_or_default();
    if address.is_empty() {
        return Ok(None);
    }

    let stored: NSXTLoadBalancer = patch_object_status(
        ctx.store.as_ref(),
        &ObjectKey::of(&*lb),
        &json!({
            "metadata": { "resourceVersion": lb.metadata.resource_version },
            "status": { "address": "", "ready": false },
        }),
    )
    .await
    .with_context(|| format!("failed to clear VIP {address} of {}", lb.name_any()))?;
    lb.metadata.resource_version = stored.metadata.resource_version;
    let status = lb.lb_status_mut();
    status.address.clear();
    status.ready = false;
    Ok(Some(address))
}

#[async_trait]
impl LoadBalancer for NSXTLoadBalancer {
    const FINALIZER: &'static str = NSXT_LOAD_BALANCER_FINALIZER;

    async fn reconcile_backend(
        &mut self,
        ctx: &Context,
        _cluster: &Cluster,
        members: &[PoolMember],
    ) -> Result<Action> {
        let client = client(ctx, self)?;
        let vip = sync(client.as_ref(), self, members).await?;

        let status = self.lb_status_mut();
        status.address = vip;
        status.ready = true;
        Ok(Action::requeue(Duration::from_secs(REQUEUE_SYNC_PERIOD_SECS)))
    }

    async fn delete_backend(&mut self, ctx: &Context) -> Result<DeletionOutcome> {
        let client = client(ctx, self)?;
        let lb_name = load_balancer_name(self);

        let transaction = client.start_transaction().await?;
        let current = client.get_config(&transaction).await?;
        let desired = without_load_balancer(
            &current.config,
            &pool_name(&lb_name),
            &virtual_server_name(&lb_name, APISERVER_PORT),
        );
        if differs(&current.config, &desired) {
            client
                .post_config(&transaction, &desired, current.version)
                .await
                .with_context(|| format!("failed to remove {lb_name} from the appliance"))?;
        }
        client.commit(&transaction).await?;

        if let Some(address) = forget_vip(ctx, self).await? {
            match client
                .allocate_or_release(&self.spec.virtual_ip_pool_id, Some(address.clone()), IpAction::Release)
                .await
            {
                Ok(_) => info!("Released VIP {} of load balancer {}", address, lb_name),
                Err(err) => {
                    warn!("Failed to release VIP {} of load balancer {}: {}", address, lb_name, err);
                    metrics::record_error(KIND_NSXT_LOAD_BALANCER, "release_vip");
                }
            }
        }
        Ok(DeletionOutcome::Released)
    }

    fn lb_status(&self) -> Option<&LoadBalancerStatus> {
        self.status.as_ref()
    }

    fn lb_status_mut(&mut self) -> &mut LoadBalancerStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

/// Reconciles an `NSXTLoadBalancer` resource.
///
/// # Errors
///
/// Returns an error if the appliance rejects the configuration or the final patch fails.
pub async fn reconcile_nsxt_load_balancer(ctx: Arc<Context>, lb: NSXTLoadBalancer) -> Result<Action> {
    reconcile_load_balancer(ctx, lb).await
}

#[cfg(test)]
#[path = "nsxt_tests.rs"]
mod nsxt_tests;
