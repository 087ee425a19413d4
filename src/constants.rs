// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the vSphere reconciliation engine.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all infrastructure CRDs owned by this engine
pub const API_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// API version for all infrastructure CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// API group of the Cluster API core resources (`Cluster`, `Machine`)
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Kind name for `VSphereCluster` resource
pub const KIND_VSPHERE_CLUSTER: &str = "VSphereCluster";

/// Kind name for `VSphereMachine` resource
pub const KIND_VSPHERE_MACHINE: &str = "VSphereMachine";

/// Kind name for `VSphereVM` resource
pub const KIND_VSPHERE_VM: &str = "VSphereVM";

/// Kind name for `HAProxyLoadBalancer` resource
pub const KIND_HAPROXY_LOAD_BALANCER: &str = "HAProxyLoadBalancer";

/// Kind name for `NSXTLoadBalancer` resource
pub const KIND_NSXT_LOAD_BALANCER: &str = "NSXTLoadBalancer";

/// Kind name for `VSphereDeploymentZone` resource
pub const KIND_VSPHERE_DEPLOYMENT_ZONE: &str = "VSphereDeploymentZone";

/// Kind name for `VSphereFailureDomain` resource
pub const KIND_VSPHERE_FAILURE_DOMAIN: &str = "VSphereFailureDomain";

/// Kind name for `VSphereClusterIdentity` resource
pub const KIND_VSPHERE_CLUSTER_IDENTITY: &str = "VSphereClusterIdentity";

/// Kind name for the Cluster API `Cluster` resource
pub const KIND_CLUSTER: &str = "Cluster";

/// Kind name for the Cluster API `Machine` resource
pub const KIND_MACHINE: &str = "Machine";

// ============================================================================
// Network Constants
// ============================================================================

/// Default Kubernetes API server port used for control-plane endpoints
pub const APISERVER_PORT: i32 = 6443;

/// Prefix of every provider ID derived from a VM BIOS UUID
pub const PROVIDER_ID_PREFIX: &str = "vsphere://";

// ============================================================================
// Timing Constants
// ============================================================================

/// Requeue delay while dependents or backing resources are still converging
pub const REQUEUE_DEPENDENTS_SECS: u64 = 10;

/// Requeue delay for service discovery while the workload cluster is not ready
pub const REQUEUE_SERVICE_DISCOVERY_SECS: u64 = 120;

/// Periodic resync for resources that finished converging (10 minutes)
pub const REQUEUE_SYNC_PERIOD_SECS: u64 = 600;

/// Default interval between online-poller checks (1 second)
pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 1000;

/// Default vCenter session keep-alive interval (5 minutes)
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 300;

/// Initial backoff applied by `error_policy` after the first failure
pub const ERROR_BACKOFF_INITIAL_SECS: u64 = 5;

/// Upper bound for the per-object reconcile error backoff (5 minutes)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

// ============================================================================
// Controller Constants
// ============================================================================

/// Default number of reconciles allowed to run in parallel per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 10;

/// Number of tokio worker threads used by the manager runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default metrics bind address
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

// ============================================================================
// Workload Cluster Constants
// ============================================================================

/// Suffix of the secret that holds a workload cluster kubeconfig
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";

/// Data key of the kubeconfig inside the kubeconfig secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Namespace for system add-ons in the workload cluster
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace holding the public bootstrap config map
pub const KUBE_PUBLIC_NAMESPACE: &str = "kube-public";

/// Namespace the manager runs in, holding the secrets of cluster-scoped identities
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "capv-system";

/// Name of the secret holding vCenter credentials for the cloud provider
pub const CLOUD_PROVIDER_CREDENTIALS_SECRET: &str = "cloud-provider-vsphere-credentials";

/// Name of the config map holding the rendered cloud provider configuration
pub const CLOUD_PROVIDER_CONFIG_MAP: &str = "vsphere-cloud-config";

/// Data key of the cloud provider configuration inside its config map
pub const CLOUD_PROVIDER_CONFIG_KEY: &str = "vsphere.conf";

/// Default cloud controller manager image
pub const DEFAULT_CCM_IMAGE: &str = "gcr.io/cloud-provider-vsphere/cpi/release/manager:v1.2.1";

/// Default CSI driver image
pub const DEFAULT_CSI_DRIVER_IMAGE: &str =
    "gcr.io/cloud-provider-vsphere/csi/release/driver:v2.1.0";

/// Default CSI syncer image
pub const DEFAULT_CSI_SYNCER_IMAGE: &str =
    "gcr.io/cloud-provider-vsphere/csi/release/syncer:v2.1.0";

/// Default CSI node driver registrar image
pub const DEFAULT_CSI_REGISTRAR_IMAGE: &str =
    "quay.io/k8scsi/csi-node-driver-registrar:v2.0.1";

/// Default CSI attacher image
pub const DEFAULT_CSI_ATTACHER_IMAGE: &str = "quay.io/k8scsi/csi-attacher:v3.0.0";

/// Default CSI provisioner image
pub const DEFAULT_CSI_PROVISIONER_IMAGE: &str = "quay.io/k8scsi/csi-provisioner:v2.0.0";

/// Default CSI liveness sidecar image
pub const DEFAULT_CSI_LIVENESS_IMAGE: &str = "quay.io/k8scsi/livenessprobe:v2.1.0";

/// Registered name of the vSphere CSI driver
pub const CSI_DRIVER_NAME: &str = "csi.vsphere.vmware.com";

/// Namespace of the vSphere CSI driver components
pub const CSI_NAMESPACE: &str = "kube-system";

/// Name of the CSI controller workload
pub const CSI_CONTROLLER_NAME: &str = "vsphere-csi-controller";

/// Name of the CSI node daemonset
pub const CSI_NODE_NAME: &str = "vsphere-csi-node";

/// Name of the secret holding the CSI driver configuration
pub const CSI_CONFIG_SECRET: &str = "csi-vsphere-config";

/// Name of the cloud controller manager workloads
pub const CCM_NAME: &str = "vsphere-cloud-controller-manager";

// ============================================================================
// Service Discovery Constants
// ============================================================================

/// Name of the headless supervisor service published in workload clusters
pub const SUPERVISOR_SERVICE_NAME: &str = "supervisor";

/// Namespace of the headless supervisor service
pub const SUPERVISOR_SERVICE_NAMESPACE: &str = "default";

/// Port published on the headless supervisor service
pub const SUPERVISOR_API_SERVER_PORT: i32 = 6443;

/// Name of the management cluster API server load balancer service
pub const SUPERVISOR_LOAD_BALANCER_SVC_NAME: &str = "kube-apiserver-lb-svc";

/// Name of the bootstrap config map carrying the management cluster kubeconfig
pub const CLUSTER_INFO_CONFIG_MAP: &str = "cluster-info";

/// Data key of the kubeconfig inside the `cluster-info` config map
pub const CLUSTER_INFO_KUBECONFIG_KEY: &str = "kubeconfig";

// ============================================================================
// Load Balancer Constants
// ============================================================================

/// Load balancing algorithm used for appliance backend pools
pub const LB_POOL_ALGORITHM: &str = "ROUND_ROBIN";

/// Minimum active members required before an appliance pool is healthy
pub const LB_POOL_MIN_ACTIVE_MEMBERS: u32 = 1;

/// Number of UID characters used when deriving appliance object names
pub const LB_NAME_UID_CHARS: usize = 5;
