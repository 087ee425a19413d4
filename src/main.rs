// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use capv_engine::{
    config::{Backend, ManagerOptions},
    constants::{KUBE_PUBLIC_NAMESPACE, KUBE_SYSTEM_NAMESPACE, TOKIO_WORKER_THREADS},
    context::{Context, Services},
    crd::{
        Cluster, HAProxyLoadBalancer, Machine, NSXTLoadBalancer, VSphereCluster,
        VSphereClusterIdentity, VSphereDeploymentZone, VSphereFailureDomain, VSphereMachine,
        VSphereVM,
    },
    metrics,
    reconcilers::{
        reconcile_deployment_zone, reconcile_haproxy_load_balancer, reconcile_nsxt_load_balancer,
        reconcile_service_discovery, reconcile_vsphere_cluster, reconcile_vsphere_cluster_identity,
        reconcile_vsphere_machine, reconcile_vsphere_vm,
        watches::{
            cluster_to_vsphere_cluster, control_plane_machine_to_load_balancer,
            failure_domain_to_deployment_zones, load_balancer_to_vsphere_cluster,
            machine_to_vsphere_cluster, machine_to_vsphere_machine,
            supervisor_address_to_vsphere_clusters, vm_to_haproxy_load_balancer,
            vm_to_vsphere_machine, vsphere_cluster_to_load_balancer,
        },
    },
    services::{HttpApplianceProvider, KubeWorkloadClusters, Simulator},
    store::{KubeStore, ObjectKey, ResourceStore},
};
use futures::channel::mpsc::UnboundedReceiver;
use futures::{Future, Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::{self, ObjectRef, Store},
        watcher::{self, Config},
        Controller, WatchStreamExt,
    },
    Api, Client, Resource, ResourceExt,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let options = ManagerOptions::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("capv-engine")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(options))
}

async fn async_main(options: ManagerOptions) -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting vSphere infrastructure controllers");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
    let services = build_services(&options, store.clone())?;

    let (ctx, triggers) = Context::new(store, services, options.clone());
    let ctx = Arc::new(ctx);
    let namespace = options.watch_namespace.clone();
    let concurrency = options.max_concurrent_reconciles;

    info!(
        namespace = namespace.as_deref().unwrap_or("<all>"),
        concurrency,
        simulate = options.simulate,
        "Starting all controllers"
    );

    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        result = run_vsphere_cluster_controller(client.clone(), namespace.clone(), ctx.clone(), triggers) => {
            error!("CRITICAL: VSphereCluster controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VSphereCluster controller exited unexpectedly without error")
        }
        result = run_service_discovery_controller(client.clone(), namespace.clone(), ctx.clone()) => {
            error!("CRITICAL: ServiceDiscovery controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ServiceDiscovery controller exited unexpectedly without error")
        }
        result = run_vsphere_machine_controller(client.clone(), namespace.clone(), ctx.clone()) => {
            error!("CRITICAL: VSphereMachine controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VSphereMachine controller exited unexpectedly without error")
        }
        result = run_vsphere_vm_controller(client.clone(), namespace.clone(), ctx.clone()) => {
            error!("CRITICAL: VSphereVM controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VSphereVM controller exited unexpectedly without error")
        }
        result = run_haproxy_load_balancer_controller(client.clone(), namespace.clone(), ctx.clone()) => {
            error!("CRITICAL: HAProxyLoadBalancer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HAProxyLoadBalancer controller exited unexpectedly without error")
        }
        result = run_nsxt_load_balancer_controller(client.clone(), namespace.clone(), ctx.clone()) => {
            error!("CRITICAL: NSXTLoadBalancer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("NSXTLoadBalancer controller exited unexpectedly without error")
        }
        result = run_deployment_zone_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: VSphereDeploymentZone controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VSphereDeploymentZone controller exited unexpectedly without error")
        }
        result = run_cluster_identity_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: VSphereClusterIdentity controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VSphereClusterIdentity controller exited unexpectedly without error")
        }
        result = run_metrics_server(options.metrics_addr.clone()) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping controllers");
            Ok(())
        }
    }
}

/// Wire the backend capabilities selected by the flags.
fn build_services(options: &ManagerOptions, store: Arc<dyn ResourceStore>) -> Result<Services> {
    let sim = Simulator::with_auto_provision();
    let mut services = Services::simulated(&sim);
    match options.backend()? {
        Backend::Simulator => {
            info!("Running with the in-memory vSphere simulator");
        }
        Backend::SimulatorWithLiveEndpoints => {
            info!("Running with the vSphere simulator, live appliances and workload clusters");
            services.appliances = Arc::new(HttpApplianceProvider::new(options.credentials()));
            services.workloads = Arc::new(KubeWorkloadClusters::new(store));
        }
    }
    Ok(services)
}

/// Api for a namespaced kind, scoped to the watch namespace when one is set.
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn controller_config(ctx: &Context) -> controller::Config {
    controller::Config::default().concurrency(ctx.options.max_concurrent_reconciles)
}

/// Run the `VSphereCluster` controller
async fn run_vsphere_cluster_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
    triggers: UnboundedReceiver<ObjectKey>,
) -> Result<()> {
    info!("Starting VSphereCluster controller");

    let ns = namespace.as_deref();
    let controller = Controller::new(scoped_api::<VSphereCluster>(&client, ns), Config::default());
    let clusters = controller.store();

    controller
        .with_config(controller_config(&ctx))
        .watches(scoped_api::<Cluster>(&client, ns), Config::default(), |cluster| {
            cluster_to_vsphere_cluster(&cluster)
        })
        .watches(
            scoped_api::<Machine>(&client, ns),
            Config::default(),
            move |machine| machine_to_vsphere_cluster(&machine, &clusters.state()),
        )
        .watches(
            scoped_api::<HAProxyLoadBalancer>(&client, ns),
            Config::default(),
            |lb| load_balancer_to_vsphere_cluster(&lb.metadata),
        )
        .watches(
            scoped_api::<NSXTLoadBalancer>(&client, ns),
            Config::default(),
            |lb| load_balancer_to_vsphere_cluster(&lb.metadata),
        )
        .reconcile_on(triggers.map(|key| trigger_ref(&key)))
        .run(reconcile_vsphere_cluster_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the supervisor service discovery controller
async fn run_service_discovery_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting ServiceDiscovery controller");

    let controller = Controller::new(
        scoped_api::<VSphereCluster>(&client, namespace.as_deref()),
        Config::default(),
    );
    let from_services = controller.store();
    let from_config_maps = controller.store();

    controller
        .with_config(controller_config(&ctx))
        .watches(
            Api::<Service>::namespaced(client.clone(), KUBE_SYSTEM_NAMESPACE),
            Config::default(),
            move |svc| supervisor_address_to_vsphere_clusters(&svc.metadata, &from_services.state()),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), KUBE_PUBLIC_NAMESPACE),
            Config::default(),
            move |cm| supervisor_address_to_vsphere_clusters(&cm.metadata, &from_config_maps.state()),
        )
        .run(reconcile_service_discovery_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `VSphereMachine` controller
async fn run_vsphere_machine_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting VSphereMachine controller");

    let ns = namespace.as_deref();
    Controller::new(scoped_api::<VSphereMachine>(&client, ns), Config::default())
        .with_config(controller_config(&ctx))
        .watches(scoped_api::<Machine>(&client, ns), Config::default(), |machine| {
            machine_to_vsphere_machine(&machine)
        })
        .watches(scoped_api::<VSphereVM>(&client, ns), Config::default(), |vm| {
            vm_to_vsphere_machine(&vm.metadata)
        })
        .run(reconcile_vsphere_machine_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `VSphereVM` controller
async fn run_vsphere_vm_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting VSphereVM controller");

    Controller::new(
        scoped_api::<VSphereVM>(&client, namespace.as_deref()),
        Config::default(),
    )
    .with_config(controller_config(&ctx))
    .run(reconcile_vsphere_vm_wrapper, error_policy, ctx)
    .for_each(|_| futures::future::ready(()))
    .await;

    Ok(())
}

/// VSphereCluster reflector for the load balancer controllers.
///
/// The stream has to be driven for the store to fill; the controllers consume it with
/// `watches_stream`, so a VSphereCluster change also wakes the load balancer it names.
fn vsphere_cluster_reflector(
    client: &Client,
    namespace: Option<&str>,
) -> (
    Store<VSphereCluster>,
    impl Stream<Item = Result<VSphereCluster, watcher::Error>> + Send + 'static,
) {
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(
        writer,
        watcher::watcher(scoped_api::<VSphereCluster>(client, namespace), Config::default()),
    )
    .touched_objects()
    .default_backoff();
    (store, stream)
}

/// Run the `HAProxyLoadBalancer` controller
async fn run_haproxy_load_balancer_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting HAProxyLoadBalancer controller");

    let ns = namespace.as_deref();
    let (clusters, cluster_stream) = vsphere_cluster_reflector(&client, ns);
    let for_machines = clusters.clone();

    Controller::new(scoped_api::<HAProxyLoadBalancer>(&client, ns), Config::default())
        .with_config(controller_config(&ctx))
        .watches(scoped_api::<VSphereVM>(&client, ns), Config::default(), |vm| {
            vm_to_haproxy_load_balancer(&vm.metadata)
        })
        .watches_stream(cluster_stream, |vsc| {
            vsphere_cluster_to_load_balancer::<HAProxyLoadBalancer>(&vsc)
        })
        .watches(
            scoped_api::<Machine>(&client, ns),
            Config::default(),
            move |machine| {
                control_plane_machine_to_load_balancer(&machine.metadata, &for_machines.state())
            },
        )
        .watches(
            scoped_api::<VSphereMachine>(&client, ns),
            Config::default(),
            move |machine| control_plane_machine_to_load_balancer(&machine.metadata, &clusters.state()),
        )
        .run(reconcile_haproxy_load_balancer_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `NSXTLoadBalancer` controller
async fn run_nsxt_load_balancer_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting NSXTLoadBalancer controller");

    let ns = namespace.as_deref();
    let (clusters, cluster_stream) = vsphere_cluster_reflector(&client, ns);
    let for_machines = clusters.clone();

    Controller::new(scoped_api::<NSXTLoadBalancer>(&client, ns), Config::default())
        .with_config(controller_config(&ctx))
        .watches_stream(cluster_stream, |vsc| {
            vsphere_cluster_to_load_balancer::<NSXTLoadBalancer>(&vsc)
        })
        .watches(
            scoped_api::<Machine>(&client, ns),
            Config::default(),
            move |machine| {
                control_plane_machine_to_load_balancer(&machine.metadata, &for_machines.state())
            },
        )
        .watches(
            scoped_api::<VSphereMachine>(&client, ns),
            Config::default(),
            move |machine| control_plane_machine_to_load_balancer(&machine.metadata, &clusters.state()),
        )
        .run(reconcile_nsxt_load_balancer_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `VSphereDeploymentZone` controller
///
/// Deployment zones and failure domains are cluster-scoped, so the watch namespace does
/// not apply.
async fn run_deployment_zone_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting VSphereDeploymentZone controller");

    let controller = Controller::new(
        Api::<VSphereDeploymentZone>::all(client.clone()),
        Config::default(),
    );
    let zones = controller.store();

    controller
        .with_config(controller_config(&ctx))
        .watches(
            Api::<VSphereFailureDomain>::all(client.clone()),
            Config::default(),
            move |fd| failure_domain_to_deployment_zones(&fd, &zones.state()),
        )
        .run(reconcile_deployment_zone_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `VSphereClusterIdentity` controller
///
/// Identities are cluster-scoped, so the watch namespace does not apply.
async fn run_cluster_identity_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting VSphereClusterIdentity controller");

    Controller::new(Api::<VSphereClusterIdentity>::all(client), Config::default())
        .with_config(controller_config(&ctx))
        .run(reconcile_cluster_identity_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Serve the Prometheus registry on `/metrics`.
async fn run_metrics_server(addr: String) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> (StatusCode, String) {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Resolves on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Online-poller trigger to the `VSphereCluster` it wakes.
fn trigger_ref(key: &ObjectKey) -> ObjectRef<VSphereCluster> {
    let reference = ObjectRef::new(&key.name);
    match &key.namespace {
        Some(ns) => reference.within(ns),
        None => reference,
    }
}

/// Key used for per-object error backoff, unique across kinds.
fn backoff_key<K>(obj: &K) -> String
where
    K: Resource<DynamicType = ()>,
{
    format!("{}/{}", K::kind(&()), ObjectKey::of(obj))
}

/// Run one reconcile, recording duration and outcome.
async fn observe<K, F>(obj: &K, ctx: &Context, reconcile: F) -> Result<Action, ReconcileError>
where
    K: Resource<DynamicType = ()>,
    F: Future<Output = Result<Action>>,
{
    let kind = K::kind(&());
    let start = Instant::now();

    match reconcile.await {
        Ok(action) => {
            debug!("Successfully reconciled {}: {}", kind, obj.name_any());
            metrics::record_reconciliation_success(&kind, start.elapsed());
            ctx.backoff.reset(&backoff_key(obj));
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile {} {}: {:#}", kind, ObjectKey::of(obj), e);
            metrics::record_reconciliation_error(&kind, start.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `VSphereCluster`
async fn reconcile_vsphere_cluster_wrapper(
    vsc: Arc<VSphereCluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*vsc, &ctx, reconcile_vsphere_cluster(ctx.clone(), (*vsc).clone())).await
}

/// Reconcile wrapper for supervisor service discovery
async fn reconcile_service_discovery_wrapper(
    vsc: Arc<VSphereCluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*vsc, &ctx, reconcile_service_discovery(ctx.clone(), (*vsc).clone())).await
}

/// Reconcile wrapper for `VSphereMachine`
async fn reconcile_vsphere_machine_wrapper(
    machine: Arc<VSphereMachine>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*machine, &ctx, reconcile_vsphere_machine(ctx.clone(), (*machine).clone())).await
}

/// Reconcile wrapper for `VSphereVM`
async fn reconcile_vsphere_vm_wrapper(
    vm: Arc<VSphereVM>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*vm, &ctx, reconcile_vsphere_vm(ctx.clone(), (*vm).clone())).await
}

/// Reconcile wrapper for `HAProxyLoadBalancer`
async fn reconcile_haproxy_load_balancer_wrapper(
    lb: Arc<HAProxyLoadBalancer>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*lb, &ctx, reconcile_haproxy_load_balancer(ctx.clone(), (*lb).clone())).await
}

/// Reconcile wrapper for `NSXTLoadBalancer`
async fn reconcile_nsxt_load_balancer_wrapper(
    lb: Arc<NSXTLoadBalancer>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*lb, &ctx, reconcile_nsxt_load_balancer(ctx.clone(), (*lb).clone())).await
}

/// Reconcile wrapper for `VSphereDeploymentZone`
async fn reconcile_deployment_zone_wrapper(
    zone: Arc<VSphereDeploymentZone>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*zone, &ctx, reconcile_deployment_zone(ctx.clone(), (*zone).clone())).await
}

/// Reconcile wrapper for `VSphereClusterIdentity`
async fn reconcile_cluster_identity_wrapper(
    identity: Arc<VSphereClusterIdentity>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    observe(&*identity, &ctx, reconcile_vsphere_cluster_identity(ctx.clone(), (*identity).clone())).await
}

/// Error policy shared by every controller: exponential per-object backoff.
fn error_policy<K>(obj: Arc<K>, err: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let key = backoff_key(&*obj);
    let delay = ctx.backoff.next_delay(&key);
    warn!("Requeueing {} in {:?} after error: {}", key, delay, err);
    metrics::record_reconciliation_requeue(&K::kind(&()), "error");
    Action::requeue(delay)
}
