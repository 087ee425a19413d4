// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for vSphere cluster infrastructure.
//!
//! This module defines the Kubernetes resources the engine reconciles, plus the
//! subset of the Cluster API core resources (`Cluster`, `Machine`) it consumes.
//!
//! # Resource Types
//!
//! ## Cluster API core (read, never created)
//!
//! - [`Cluster`] - Desired cluster topology and control-plane endpoint
//! - [`Machine`] - A single node, carrying the bootstrap data reference
//!
//! ## Infrastructure
//!
//! - [`VSphereCluster`] - vCenter endpoint, credentials and cloud provider configuration
//! - [`VSphereMachine`] - VM shape of a `Machine`
//! - [`VSphereVM`] - A single virtual machine driven through the VM driver
//! - [`HAProxyLoadBalancer`] - VM-backed control-plane load balancer
//! - [`NSXTLoadBalancer`] - Appliance-backed control-plane load balancer
//!
//! ## Placement
//!
//! - [`VSphereDeploymentZone`] - Placement constraint bound to a failure domain
//! - [`VSphereFailureDomain`] - Region/zone tags and topology
//!
//! ## Credentials
//!
//! - [`VSphereClusterIdentity`] - Cluster-scoped vCenter credentials shared by selected namespaces
//!
//! # Example: Declaring a cluster
//!
//! ```yaml
//! apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
//! kind: VSphereCluster
//! metadata:
//!   name: workload-1
//!   namespace: default
//! spec:
//!   server: vcenter.example.com
//!   identityRef:
//!     kind: Secret
//!     name: workload-1-credentials
//!   loadBalancerRef:
//!     apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
//!     kind: HAProxyLoadBalancer
//!     name: workload-1-lb
//! ```

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Shared types
// ============================================================================

/// Severity of a `False` condition.
///
/// Variants are ordered from least to most severe so the summary reduction can
/// pick the worst one with a plain comparison.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum ConditionSeverity {
    /// Expected, transient state (waiting on another resource).
    Info,
    /// Degraded but likely recoverable without intervention.
    Warning,
    /// Requires operator intervention.
    Error,
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Ready`, `VCenterAvailable`, `VMProvisioned`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Severity of a `False` condition. Empty for `True` conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Host and port of a Kubernetes API server.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APIEndpoint {
    /// Hostname or IP address
    #[serde(default)]
    pub host: String,

    /// TCP port
    #[serde(default)]
    pub port: i32,
}

impl APIEndpoint {
    /// Returns `true` when neither host nor port has been assigned.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// Reference to another object, optionally in another namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default)]
    pub api_version: String,

    /// Kind of the referent
    #[serde(default)]
    pub kind: String,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent. Defaults to the referrer's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Kind of credential source referenced by a cluster.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum IdentityKind {
    /// A namespaced Secret in the cluster's namespace
    Secret,
    /// A cluster-scoped identity object (credentials resolved externally)
    VSphereClusterIdentity,
}

/// Reference to the credentials a cluster uses for vCenter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereIdentityReference {
    /// Kind of the identity source
    pub kind: IdentityKind,

    /// Name of the identity source
    pub name: String,
}

/// Address reported for a machine.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address type: `InternalIP`, `ExternalIP`, `InternalDNS`, ...
    pub r#type: String,

    /// The address value
    pub address: String,
}

/// Machine address type for addresses reachable inside the cluster network.
pub const ADDRESS_INTERNAL_IP: &str = "InternalIP";

/// Machine address type for addresses reachable from outside the cluster network.
pub const ADDRESS_EXTERNAL_IP: &str = "ExternalIP";

/// Machine address type for the VM hostname.
pub const ADDRESS_INTERNAL_DNS: &str = "InternalDNS";

// ============================================================================
// Network types
// ============================================================================

/// Desired networking of a VM.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Network devices, in attach order
    #[serde(default)]
    pub devices: Vec<NetworkDeviceSpec>,

    /// Routes shared by all devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<NetworkRouteSpec>,

    /// CIDR used to select the address advertised as the API server endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "preferredAPIServerCidr")]
    pub preferred_api_server_cidr: Option<String>,
}

/// A single network device.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDeviceSpec {
    /// Name of the backend network the device attaches to
    pub network_name: String,

    /// Obtain an IPv4 address through DHCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp4: Option<bool>,

    /// Obtain an IPv6 address through DHCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp6: Option<bool>,

    /// IPv4 gateway for static configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway4: Option<String>,

    /// IPv6 gateway for static configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway6: Option<String>,

    /// Static addresses in CIDR notation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addrs: Vec<String>,

    /// MAC address, assigned by the backend when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,

    /// DNS servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
}

/// A static route.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRouteSpec {
    /// Destination network
    pub to: String,
    /// Next hop
    pub via: String,
    /// Route metric
    #[serde(default)]
    pub metric: i32,
}

/// Realized state of a network device.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Whether the device is connected
    #[serde(default)]
    pub connected: bool,

    /// Addresses observed on the device
    #[serde(default)]
    pub ip_addrs: Vec<String>,

    /// MAC address of the device
    #[serde(default)]
    pub mac_addr: String,

    /// Backend network name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_name: String,
}

// ============================================================================
// VM clone specification
// ============================================================================

/// Fields describing where and how a VM is cloned.
///
/// Placement fields (`server`, `datacenter`, `folder`, `datastore`, `resourcePool`)
/// left empty are filled from the cluster's workspace defaults at VM creation.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineCloneSpec {
    /// Name or inventory path of the template to clone
    #[serde(default)]
    pub template: String,

    /// vCenter server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,

    /// Certificate thumbprint of the vCenter server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbprint: String,

    /// Datacenter in which the VM is created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,

    /// Folder in which the VM is created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub folder: String,

    /// Datastore holding the VM disks
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore: String,

    /// Resource pool the VM runs in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_pool: String,

    /// Desired networking
    #[serde(default)]
    pub network: NetworkSpec,

    /// Number of virtual CPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "numCPUs")]
    pub num_cpus: Option<i32>,

    /// Memory in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "memoryMiB")]
    pub memory_mib: Option<i64>,

    /// Boot disk size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "diskGiB")]
    pub disk_gib: Option<i32>,
}

// ============================================================================
// Cluster API core resources
// ============================================================================

/// Bootstrap data of a machine.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the rendered bootstrap data, set once the bootstrap provider is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

/// Desired cluster topology as declared by Cluster API.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    doc = "Cluster is the Cluster API cluster owning a VSphereCluster. The engine only reads it."
)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pauses reconciliation of the cluster and its infrastructure
    #[serde(default)]
    pub paused: bool,

    /// Externally reachable API server endpoint
    #[serde(default)]
    pub control_plane_endpoint: APIEndpoint,

    /// Infrastructure cluster backing this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Observed state of a Cluster API cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// The infrastructure cluster reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// The first control-plane machine finished initialization
    #[serde(default)]
    pub control_plane_initialized: bool,
}

/// A Cluster API machine.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    doc = "Machine is the Cluster API machine owning a VSphereMachine. The engine only reads it."
)]
#[kube(status = "MachineStatus")]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Bootstrap data reference
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Infrastructure machine backing this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Deployment zone the machine is placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

/// Observed state of a Cluster API machine.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses copied from the infrastructure machine
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,
}

// ============================================================================
// VSphereCluster
// ============================================================================

/// Global cloud provider settings.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CPIGlobalConfig {
    /// Skip TLS verification towards vCenter
    #[serde(default)]
    pub insecure: bool,

    /// Name of the credentials secret in the workload cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Namespace of the credentials secret in the workload cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,

    /// Thumbprint of the vCenter certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

/// Cloud provider settings for a single vCenter.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CPIVCenterConfig {
    /// Comma separated list of datacenters visible to the cloud provider
    #[serde(default)]
    pub datacenters: String,

    /// Certificate thumbprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

/// Default placement used for VMs that leave placement fields empty.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CPIWorkspaceConfig {
    /// vCenter server
    #[serde(default)]
    pub server: String,
    /// Datacenter
    #[serde(default)]
    pub datacenter: String,
    /// Folder
    #[serde(default)]
    pub folder: String,
    /// Default datastore
    #[serde(default)]
    pub datastore: String,
    /// Resource pool
    #[serde(default)]
    pub resource_pool: String,
}

/// Images used for the in-cluster add-ons.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CPIProviderConfig {
    /// Cloud controller manager image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_image: Option<String>,

    /// CSI driver image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_driver_image: Option<String>,

    /// CSI syncer image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_syncer_image: Option<String>,
}

/// Configuration rendered for the cloud provider add-on of the workload cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderConfiguration {
    /// Global settings
    #[serde(default)]
    pub global: CPIGlobalConfig,

    /// Per-vCenter settings, keyed by server address
    #[serde(default)]
    pub virtual_center: BTreeMap<String, CPIVCenterConfig>,

    /// Default placement
    #[serde(default)]
    pub workspace: CPIWorkspaceConfig,

    /// Add-on images
    #[serde(default)]
    pub provider_config: CPIProviderConfig,
}

/// Desired state of a vSphere infrastructure cluster.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereCluster",
    namespaced,
    doc = "VSphereCluster binds a Cluster API cluster to a vCenter, its credentials and its control-plane load balancer."
)]
#[kube(status = "VSphereClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterSpec {
    /// vCenter server address
    #[serde(default)]
    pub server: String,

    /// Certificate thumbprint of the vCenter server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,

    /// Credential source. Manager credentials are used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<VSphereIdentityReference>,

    /// API server endpoint, assigned by the engine once discovered
    #[serde(default)]
    pub control_plane_endpoint: APIEndpoint,

    /// Cloud provider configuration installed into the workload cluster
    #[serde(default)]
    pub cloud_provider_configuration: CloudProviderConfiguration,

    /// Control-plane load balancer (`HAProxyLoadBalancer` or `NSXTLoadBalancer`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_ref: Option<ObjectReference>,
}

/// Observed state of a vSphere infrastructure cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterStatus {
    /// The infrastructure is ready for machines
    #[serde(default)]
    pub ready: bool,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// VSphereMachine
// ============================================================================

/// Desired state of a vSphere machine.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereMachine",
    namespaced,
    doc = "VSphereMachine describes the VM backing a Cluster API machine."
)]
#[kube(status = "VSphereMachineStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    /// Provider ID, set once from the VM BIOS UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "providerID")]
    pub provider_id: Option<String>,

    /// Deployment zone of the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// Clone specification of the backing VM
    #[serde(flatten)]
    pub clone_spec: VirtualMachineCloneSpec,
}

/// Observed state of a vSphere machine.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineStatus {
    /// The backing VM is ready
    #[serde(default)]
    pub ready: bool,

    /// Node addresses, replaced on every reconcile
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,

    /// Realized network devices
    #[serde(default)]
    pub network: Vec<NetworkStatus>,

    /// Terminal failure reason; reconciliation stops once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message; reconciliation stops once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// VSphereVM
// ============================================================================

/// Desired state of a single VM.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereVM",
    namespaced,
    doc = "VSphereVM is a virtual machine created and destroyed through the VM driver."
)]
#[kube(status = "VSphereVMStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereVMSpec {
    /// Bootstrap data secret of the VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_ref: Option<ObjectReference>,

    /// BIOS UUID of the VM, set once the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "biosUUID")]
    pub bios_uuid: Option<String>,

    /// Clone specification
    #[serde(flatten)]
    pub clone_spec: VirtualMachineCloneSpec,
}

/// Observed state of a VM.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereVMStatus {
    /// The VM is powered on and reports its network
    #[serde(default)]
    pub ready: bool,

    /// Flattened list of every IP address across devices
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Realized network devices
    #[serde(default)]
    pub network: Vec<NetworkStatus>,

    /// Terminal failure reason; reconciliation stops once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message; reconciliation stops once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// Load balancers
// ============================================================================

/// SSH user injected into the load balancer VM.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SSHUser {
    /// User name
    pub name: String,
    /// Authorized public keys
    #[serde(default)]
    pub authorized_keys: Vec<String>,
}

/// Desired state of a VM-backed HAProxy load balancer.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "HAProxyLoadBalancer",
    namespaced,
    doc = "HAProxyLoadBalancer fronts the control plane of a cluster with an HAProxy VM."
)]
#[kube(status = "LoadBalancerStatus")]
#[serde(rename_all = "camelCase")]
pub struct HAProxyLoadBalancerSpec {
    /// Clone specification of the load balancer VM
    pub virtual_machine_configuration: VirtualMachineCloneSpec,

    /// SSH user for the load balancer VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SSHUser>,
}

/// Desired state of an appliance-backed NSX-T load balancer.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "NSXTLoadBalancer",
    namespaced,
    doc = "NSXTLoadBalancer fronts the control plane of a cluster with a virtual server on an NSX-T appliance."
)]
#[kube(status = "LoadBalancerStatus")]
#[serde(rename_all = "camelCase")]
pub struct NSXTLoadBalancerSpec {
    /// Appliance load balancer service the virtual server attaches to
    #[serde(rename = "loadBalancerServiceID")]
    pub load_balancer_service_id: String,

    /// IP pool virtual IPs are allocated from
    #[serde(rename = "virtualIPPoolID")]
    pub virtual_ip_pool_id: String,

    /// Appliance control API address
    pub server: String,

    /// Skip TLS verification towards the appliance
    #[serde(default)]
    pub insecure: bool,
}

/// Observed state shared by every load balancer kind.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    /// The load balancer accepts traffic
    #[serde(default)]
    pub ready: bool,

    /// Address traffic is accepted on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ============================================================================
// Placement
// ============================================================================

/// Where machines of a deployment zone are placed.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConstraint {
    /// Resource pool machines are placed in
    #[serde(default)]
    pub resource_pool: String,

    /// Folder machines are placed in
    #[serde(default)]
    pub folder: String,
}

/// Desired state of a deployment zone.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereDeploymentZone",
    doc = "VSphereDeploymentZone binds a placement constraint to a failure domain on a vCenter."
)]
#[kube(status = "VSphereDeploymentZoneStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereDeploymentZoneSpec {
    /// vCenter server
    pub server: String,

    /// Name of the `VSphereFailureDomain` this zone belongs to
    pub failure_domain: String,

    /// Whether control-plane machines may be placed in this zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<bool>,

    /// Placement inside the failure domain
    #[serde(default)]
    pub placement_constraint: PlacementConstraint,
}

/// Observed state of a deployment zone.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereDeploymentZoneStatus {
    /// Unset until the first verification pass completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Backend object a failure domain tag is attached to.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub enum FailureDomainType {
    /// Tag attached to the datacenter
    #[default]
    Datacenter,
    /// Tag attached to the compute cluster
    ComputeCluster,
    /// Tag attached to every host of a host group
    HostGroup,
}

/// A region or zone declaration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Tag name
    pub name: String,

    /// Object type the tag is attached to
    pub r#type: FailureDomainType,

    /// Tag category
    pub tag_category: String,

    /// Create and attach the tag instead of verifying it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_configure: Option<bool>,
}

/// VM and host group pairing of a host-group failure domain.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainHosts {
    /// VM group machines are added to
    pub vm_group_name: String,
    /// Host group the VM group is pinned to
    pub host_group_name: String,
}

/// Backend objects a failure domain resolves to.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Datacenter
    pub datacenter: String,

    /// Compute cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_cluster: Option<String>,

    /// Host group pairing, required for `HostGroup` zones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<FailureDomainHosts>,

    /// Networks available in the failure domain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,

    /// Datastore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<String>,
}

/// Desired state of a failure domain.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereFailureDomain",
    doc = "VSphereFailureDomain declares region and zone tags and the topology they resolve to."
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereFailureDomainSpec {
    /// Region declaration
    pub region: FailureDomainSpec,

    /// Zone declaration
    pub zone: FailureDomainSpec,

    /// Topology
    pub topology: Topology,
}

/// Namespaces allowed to use a cluster identity.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedNamespaces {
    /// Namespaces whose labels match are allowed. An empty selector matches every namespace.
    #[serde(default)]
    pub selector: LabelSelector,
}

/// Desired state of a cluster identity.
///
/// # Example
///
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
/// kind: VSphereClusterIdentity
/// metadata:
///   name: shared
/// spec:
///   secretName: vcenter-shared
///   allowedNamespaces:
///     selector:
///       matchLabels:
///         vsphere-tenant: "true"
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereClusterIdentity",
    doc = "VSphereClusterIdentity shares vCenter credentials from the manager namespace with selected namespaces."
)]
#[kube(status = "VSphereClusterIdentityStatus")]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterIdentitySpec {
    /// Secret in the manager namespace holding `username` and `password`
    #[serde(default)]
    pub secret_name: String,

    /// Namespaces allowed to reference this identity. Unset allows none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

/// Observed state of a cluster identity.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterIdentityStatus {
    /// The secret is bound to this identity
    #[serde(default)]
    pub ready: bool,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
