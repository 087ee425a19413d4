// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Publishes the management API server address inside workload clusters.
//!
//! The address is the ingress of the `kube-system/kube-apiserver-lb-svc` load
//! balancer service (the VIP) or, when that has none, the host of the server URL in
//! the `kube-public/cluster-info` kubeconfig (the FIP). It is written to the
//! workload cluster as the headless service `default/supervisor` and its endpoints.
//! A failed discovery never clears endpoints that were published earlier.

use super::lookup::owner_cluster;
use super::patch::Patcher;
use super::status::{mark_false, mark_true};
use crate::constants::{
    CLUSTER_INFO_CONFIG_MAP, CLUSTER_INFO_KUBECONFIG_KEY, KUBE_PUBLIC_NAMESPACE,
    KUBE_SYSTEM_NAMESPACE, REQUEUE_SERVICE_DISCOVERY_SECS, SUPERVISOR_API_SERVER_PORT,
    SUPERVISOR_LOAD_BALANCER_SVC_NAME, SUPERVISOR_SERVICE_NAME, SUPERVISOR_SERVICE_NAMESPACE,
};
use crate::context::Context;
use crate::crd::{ConditionSeverity, VSphereCluster};
use crate::labels::{K8S_MANAGED_BY, MANAGED_BY_CAPV};
use crate::reconcilers::finalizers::is_deleting;
use crate::status_reasons::{
    CONDITION_TYPE_SERVICE_DISCOVERY_READY, REASON_SUPERVISOR_HEADLESS_SERVICE_SETUP_FAILED,
};
use crate::store::{create_if_absent, create_object, get_object, patch_object, ObjectKey, ResourceStore};
use anyhow::{anyhow, bail, Context as _, Result};
use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::config::Kubeconfig;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn supervisor_meta() -> ObjectMeta {
    ObjectMeta {
        name: Some(SUPERVISOR_SERVICE_NAME.to_string()),
        namespace: Some(SUPERVISOR_SERVICE_NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([(
            K8S_MANAGED_BY.to_string(),
            MANAGED_BY_CAPV.to_string(),
        )])),
        ..Default::default()
    }
}

/// Headless service without a selector forwarding to the supervisor API server.
#[must_use]
pub fn supervisor_headless_service() -> Service {
    Service {
        metadata: supervisor_meta(),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                port: SUPERVISOR_API_SERVER_PORT,
                target_port: Some(IntOrString::Int(SUPERVISOR_API_SERVER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Endpoint subsets pointing at `host`, as an IP address or else a hostname.
#[must_use]
pub fn supervisor_endpoint_subsets(host: &str) -> Vec<EndpointSubset> {
    let address = match host.parse::<IpAddr>() {
        Ok(ip) => EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        },
        Err(_) => EndpointAddress {
            hostname: Some(host.to_string()),
            ..Default::default()
        },
    };
    vec![EndpointSubset {
        addresses: Some(vec![address]),
        ports: Some(vec![EndpointPort {
            port: SUPERVISOR_API_SERVER_PORT,
            ..Default::default()
        }]),
        ..Default::default()
    }]
}

/// Virtual IP of the supervisor load balancer service: the first ingress IP, else
/// its hostname.
///
/// # Errors
///
/// Returns an error when the service is missing or has no ingress.
pub async fn supervisor_vip(store: &dyn ResourceStore) -> Result<String> {
    let key = ObjectKey::namespaced(KUBE_SYSTEM_NAMESPACE, SUPERVISOR_LOAD_BALANCER_SVC_NAME);
    let service: Service = get_object(store, &key)
        .await?
        .ok_or_else(|| anyhow!("supervisor load balancer service {key} not found"))?;
    let ingress = service
        .status
        .and_then(|s| s.load_balancer)
        .and_then(|lb| lb.ingress)
        .and_then(|ingress| ingress.into_iter().next())
        .ok_or_else(|| anyhow!("no VIP found in the supervisor load balancer service {key}"))?;
    match ingress.ip.filter(|ip| !ip.is_empty()) {
        Some(ip) => Ok(ip),
        None => Ok(ingress.hostname.unwrap_or_default()),
    }
}

/// Server URL of the default cluster of a kubeconfig: the unnamed cluster if there is
/// one, else the cluster of the current context.
fn default_cluster_server(kubeconfig: &Kubeconfig) -> Option<String> {
    let server_of = |name: &str| {
        kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.cluster.as_ref())
            .and_then(|c| c.server.clone())
    };
    if kubeconfig.clusters.iter().any(|c| c.name.is_empty()) {
        return server_of("");
    }
    let current = kubeconfig.current_context.as_deref()?;
    let context = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == current)
        .and_then(|c| c.context.as_ref())?;
    server_of(&context.cluster)
}

/// Host of the server URL in a `cluster-info` kubeconfig.
///
/// # Errors
///
/// Returns an error when the kubeconfig cannot be parsed or has no usable host.
pub fn host_from_cluster_info(kubeconfig: &str) -> Result<String> {
    let kubeconfig =
        Kubeconfig::from_yaml(kubeconfig).context("couldn't parse the cluster-info kubeconfig")?;
    let server = default_cluster_server(&kubeconfig)
        .ok_or_else(|| anyhow!("unable to get cluster from the cluster-info kubeconfig"))?;
    let url = url::Url::parse(&server)
        .with_context(|| format!("unable to parse supervisor url from {server}"))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.trim_start_matches('[').trim_end_matches(']').to_string()),
        _ => bail!("unable to get supervisor host from url {server}"),
    }
}

/// Floating IP from the `kube-public/cluster-info` config map.
///
/// # Errors
///
/// Returns an error when the config map, its kubeconfig or the server host is missing.
pub async fn supervisor_fip(store: &dyn ResourceStore) -> Result<String> {
    let key = ObjectKey::namespaced(KUBE_PUBLIC_NAMESPACE, CLUSTER_INFO_CONFIG_MAP);
    let config_map: ConfigMap = get_object(store, &key)
        .await?
        .ok_or_else(|| anyhow!("config map {key} not found"))?;
    let kubeconfig = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(CLUSTER_INFO_KUBECONFIG_KEY))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("no {CLUSTER_INFO_KUBECONFIG_KEY} key in config map {key}"))?;
    host_from_cluster_info(kubeconfig)
}

/// Supervisor API server address, VIP first and FIP as fallback.
///
/// # Errors
///
/// Returns an error when neither source yields an address.
pub async fn supervisor_address(store: &dyn ResourceStore) -> Result<String> {
    match supervisor_vip(store).await {
        Ok(vip) if !vip.is_empty() => Ok(vip),
        vip => {
            if let Err(err) = vip {
                debug!("Unable to discover supervisor VIP, falling back to FIP: {:#}", err);
            }
            supervisor_fip(store)
                .await
                .context("unable to discover supervisor apiserver address")
        }
    }
}

/// Create the headless service and write its endpoints if they differ.
async fn publish(workload: &dyn ResourceStore, host: &str) -> Result<()> {
    if create_if_absent(workload, &supervisor_headless_service())
        .await
        .context("cannot create supervisor headless service")?
    {
        info!("Created headless service {}/{}", SUPERVISOR_SERVICE_NAMESPACE, SUPERVISOR_SERVICE_NAME);
    }

    let subsets = supervisor_endpoint_subsets(host);
    let key = ObjectKey::namespaced(SUPERVISOR_SERVICE_NAMESPACE, SUPERVISOR_SERVICE_NAME);
    match get_object::<Endpoints>(workload, &key).await? {
        None => {
            let endpoints = Endpoints {
                metadata: supervisor_meta(),
                subsets: Some(subsets),
            };
            create_object(workload, &endpoints)
                .await
                .with_context(|| format!("cannot create endpoints {key}"))?;
            info!("Created endpoints {} -> {}", key, host);
        }
        Some(current) if current.subsets.as_ref() != Some(&subsets) => {
            patch_object::<Endpoints>(workload, &key, &json!({ "subsets": subsets }))
                .await
                .with_context(|| format!("cannot update endpoints {key}"))?;
            info!("Updated endpoints {} -> {}", key, host);
        }
        Some(_) => debug!("No update required for endpoints {}", key),
    }
    Ok(())
}

/// Reconciles service discovery for a `VSphereCluster`.
///
/// Clusters whose owner or workload API is not available yet are retried after
/// two minutes.
///
/// # Errors
///
/// Returns an error if the workload objects cannot be written or the final patch fails.
pub async fn reconcile_service_discovery(ctx: Arc<Context>, vsc: VSphereCluster) -> Result<Action> {
    let namespace = vsc.namespace().unwrap_or_default();
    let name = vsc.name_any();
    debug!("Reconciling service discovery for VSphereCluster: {}/{}", namespace, name);

    if is_deleting(&vsc.metadata) {
        return Ok(Action::await_change());
    }
    let not_ready = Action::requeue(Duration::from_secs(REQUEUE_SERVICE_DISCOVERY_SECS));
    let Some(cluster) = owner_cluster(ctx.store.as_ref(), &vsc.metadata).await? else {
        info!("Unable to get Cluster from VSphereCluster {}/{}", namespace, name);
        return Ok(not_ready);
    };
    let cluster_key = ObjectKey::of(&cluster);
    if !ctx.services.workloads.is_api_online(&cluster_key).await {
        info!("The control plane of cluster {} is not ready yet", cluster_key);
        return Ok(not_ready);
    }
    let workload = ctx.services.workloads.store_for(&cluster_key).await?;

    let mut vsc = vsc;
    let patcher = Patcher::new(ctx.store.clone(), &vsc)?;
    let result = match supervisor_address(ctx.store.as_ref()).await {
        Err(err) => {
            warn!("Service discovery for {}/{} failed: {:#}", namespace, name, err);
            mark_false(
                &mut vsc,
                CONDITION_TYPE_SERVICE_DISCOVERY_READY,
                REASON_SUPERVISOR_HEADLESS_SERVICE_SETUP_FAILED,
                ConditionSeverity::Warning,
                &format!("{err:#}"),
            );
            Ok(Action::await_change())
        }
        Ok(host) => {
            info!("Discovered supervisor apiserver address {}:{}", host, SUPERVISOR_API_SERVER_PORT);
            match publish(workload.as_ref(), &host).await {
                Ok(()) => {
                    mark_true(&mut vsc, CONDITION_TYPE_SERVICE_DISCOVERY_READY);
                    Ok(Action::await_change())
                }
                Err(err) => {
                    mark_false(
                        &mut vsc,
                        CONDITION_TYPE_SERVICE_DISCOVERY_READY,
                        REASON_SUPERVISOR_HEADLESS_SERVICE_SETUP_FAILED,
                        ConditionSeverity::Warning,
                        &format!("{err:#}"),
                    );
                    Err(err.context(format!(
                        "failed to configure supervisor headless service for {namespace}/{name}"
                    )))
                }
            }
        }
    };
    patcher.finish(&mut vsc, result).await
}

#[cfg(test)]
#[path = "servicediscovery_tests.rs"]
mod servicediscovery_tests;
