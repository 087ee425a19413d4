// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend capabilities consumed by the reconcilers.
//!
//! Each external system sits behind a small async trait so reconcilers can be driven by
//! real backends in production and by [`simulator::Simulator`] in tests:
//!
//! - [`SessionProvider`]: reusable, keep-alive sessions to a vCenter
//! - [`VmDriver`]: idempotent create-or-update, observe and destroy of virtual machines
//! - [`Inventory`]: read-only placement queries plus tag attachment for auto-configured
//!   failure domains
//! - [`ApplianceProvider`] / [`ApplianceClient`]: transactional configuration of a load
//!   balancer appliance and its virtual IP pools
//! - [`WorkloadClusters`]: access to the API server of a provisioned cluster

use crate::crd::{NetworkStatus, VirtualMachineCloneSpec};
use crate::store::{ObjectKey, ResourceStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub mod appliance;
pub mod simulator;
pub mod workload;

pub use appliance::{HttpApplianceClient, HttpApplianceProvider};
pub use simulator::Simulator;
pub use workload::KubeWorkloadClusters;

/// Errors returned by backend capabilities.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A session to the virtualization endpoint could not be established.
    #[error("unable to create session to {server}: {message}")]
    Session {
        /// vCenter address
        server: String,
        /// Failure description
        message: String,
    },

    /// The VM driver reported a failure.
    #[error("VM driver error for {name}: {message}")]
    Driver {
        /// VM name
        name: String,
        /// Failure description
        message: String,
    },

    /// An inventory query failed.
    #[error("inventory error: {0}")]
    Inventory(String),

    /// The appliance rejected a request.
    #[error("appliance error (HTTP {status}): {message}")]
    Appliance {
        /// HTTP status, 0 when not applicable
        status: u16,
        /// Failure description
        message: String,
    },

    /// The appliance configuration changed since it was read.
    #[error("appliance configuration version {expected} is stale, current is {current}")]
    VersionConflict {
        /// Version the write was based on
        expected: u64,
        /// Version currently active
        current: u64,
    },

    /// The workload cluster API is not reachable.
    #[error("workload cluster {cluster} unavailable: {message}")]
    Workload {
        /// Cluster key
        cluster: String,
        /// Failure description
        message: String,
    },

    /// Transport failure talking to an HTTP backend.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Resource store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Username and password for a backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Build credentials from a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated vCenter session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// vCenter address
    pub server: String,
    /// User the session was opened for
    pub username: String,
    /// Opaque session identifier
    pub id: String,
}

/// Source of vCenter sessions, cached per server and user.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Return a live session for `server`, reusing a cached one when possible.
    async fn get_or_create(
        &self,
        server: &str,
        credentials: &Credentials,
        thumbprint: Option<String>,
    ) -> Result<Session, ServiceError>;
}

/// Desired state of a virtual machine.
#[derive(Clone, Debug, PartialEq)]
pub struct VmRequest {
    /// Namespace of the owning VSphereVM
    pub namespace: String,
    /// VM name
    pub name: String,
    /// Clone parameters
    pub clone_spec: VirtualMachineCloneSpec,
    /// Bootstrap data passed to the guest, if any
    pub bootstrap_data: Option<String>,
}

/// Identity of a VM known to the driver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VmHandle {
    /// vCenter address
    pub server: String,
    /// Namespace of the owning VSphereVM
    pub namespace: String,
    /// VM name
    pub name: String,
}

/// Power state reported by the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    /// Running
    PoweredOn,
    /// Stopped
    #[default]
    PoweredOff,
    /// Suspended
    Suspended,
}

/// Observed state of a VM.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VmState {
    /// The VM is powered on and its guest reported networking
    pub ready: bool,
    /// Guest IP addresses
    pub addresses: Vec<String>,
    /// BIOS UUID, stable once the clone completes
    pub bios_uuid: Option<String>,
    /// Current power state
    pub power_state: PowerState,
    /// Per-device network status
    pub network: Vec<NetworkStatus>,
    /// Terminal failure reported by the driver
    pub failure: Option<String>,
}

/// Result of a destroy call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyState {
    /// Power-off or removal is still in progress
    Pending,
    /// The VM no longer exists
    NotFound,
}

/// Lifecycle driver for virtual machines.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmDriver: Send + Sync {
    /// Create the VM if missing, otherwise reconcile it towards `request`.
    async fn create_or_update(
        &self,
        session: &Session,
        request: &VmRequest,
    ) -> Result<VmHandle, ServiceError>;

    /// Observe a VM, `Ok(None)` when it does not exist.
    async fn get(&self, session: &Session, handle: &VmHandle)
        -> Result<Option<VmState>, ServiceError>;

    /// Power off and remove a VM.
    async fn destroy(&self, session: &Session, handle: &VmHandle)
        -> Result<DestroyState, ServiceError>;
}

/// A vSphere inventory object that can carry tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InventoryObject {
    /// A datacenter
    Datacenter(String),
    /// A compute cluster inside a datacenter
    ComputeCluster {
        /// Datacenter name
        datacenter: String,
        /// Compute cluster name
        name: String,
    },
    /// An ESXi host inside a datacenter
    Host {
        /// Datacenter name
        datacenter: String,
        /// Host name
        name: String,
    },
}

impl fmt::Display for InventoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datacenter(name) => write!(f, "datacenter {name}"),
            Self::ComputeCluster { datacenter, name } => {
                write!(f, "compute cluster {datacenter}/{name}")
            }
            Self::Host { datacenter, name } => write!(f, "host {datacenter}/{name}"),
        }
    }
}

/// A tag attached to an inventory object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    /// Tag name
    pub name: String,
    /// Category the tag belongs to
    pub category: String,
}

/// Placement queries against the vSphere inventory.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Compute cluster owning a resource pool, `Ok(None)` when the pool does not exist.
    ///
    /// Nested pools resolve to the compute cluster at the root of their hierarchy.
    async fn resource_pool_owner(
        &self,
        session: &Session,
        datacenter: &str,
        resource_pool: &str,
    ) -> Result<Option<String>, ServiceError>;

    /// Returns `true` if the VM folder exists.
    async fn folder_exists(
        &self,
        session: &Session,
        datacenter: &str,
        folder: &str,
    ) -> Result<bool, ServiceError>;

    /// Tags attached to an inventory object. Fails if the object does not exist.
    async fn tags(&self, session: &Session, object: &InventoryObject)
        -> Result<Vec<Tag>, ServiceError>;

    /// Hosts that are members of a host group of a compute cluster.
    async fn hosts_in_group(
        &self,
        session: &Session,
        datacenter: &str,
        compute_cluster: &str,
        host_group: &str,
    ) -> Result<Vec<String>, ServiceError>;

    /// Create the category and tag if needed and attach the tag to `object`.
    async fn attach_tag(
        &self,
        session: &Session,
        object: &InventoryObject,
        tag: &Tag,
    ) -> Result<(), ServiceError>;
}

/// Backend member of a load balancer pool.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    /// Display name, the machine name
    pub name: String,
    /// Member IP address
    pub address: String,
    /// Member port
    pub port: i32,
}

/// A backend pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbPool {
    /// Pool name
    pub name: String,
    /// Balancing algorithm
    pub algorithm: String,
    /// Minimum number of active members
    pub min_active_members: u32,
    /// Members, sorted by name
    pub members: Vec<PoolMember>,
}

/// A virtual server forwarding a VIP port to a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServer {
    /// Virtual server name
    pub name: String,
    /// Virtual IP
    pub ip_address: String,
    /// Listening port
    pub port: i32,
    /// Name of the backing pool
    pub pool: String,
}

/// Complete load balancer configuration of an appliance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    /// Virtual servers
    #[serde(default)]
    pub virtual_servers: Vec<VirtualServer>,
    /// Pools
    #[serde(default)]
    pub pools: Vec<LbPool>,
}

/// Configuration together with the version it was read at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedConfig {
    /// Configuration version
    pub version: u64,
    /// Configuration
    #[serde(flatten)]
    pub config: LoadBalancerConfig,
}

/// IP pool operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpAction {
    /// Take an address from the pool
    Allocate,
    /// Return an address to the pool
    Release,
}

/// Control API of a load balancer appliance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplianceClient: Send + Sync {
    /// Open a configuration transaction.
    async fn start_transaction(&self) -> Result<String, ServiceError>;

    /// Read the configuration visible inside a transaction.
    async fn get_config(&self, transaction: &str) -> Result<VersionedConfig, ServiceError>;

    /// Replace the configuration if it is still at `expected_version`.
    ///
    /// Returns the new version.
    async fn post_config(
        &self,
        transaction: &str,
        config: &LoadBalancerConfig,
        expected_version: u64,
    ) -> Result<u64, ServiceError>;

    /// Commit a transaction, activating the posted configuration.
    async fn commit(&self, transaction: &str) -> Result<(), ServiceError>;

    /// Allocate an address from a pool or release one back.
    ///
    /// Returns the allocated or released address.
    async fn allocate_or_release(
        &self,
        pool: &str,
        address: Option<String>,
        action: IpAction,
    ) -> Result<String, ServiceError>;
}

/// Factory of appliance clients, one per appliance endpoint.
#[cfg_attr(test, automock)]
pub trait ApplianceProvider: Send + Sync {
    /// Client for the appliance at `server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    fn client_for(&self, server: &str, insecure: bool)
        -> Result<Arc<dyn ApplianceClient>, ServiceError>;
}

/// Access to provisioned workload clusters.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClusters: Send + Sync {
    /// Store bound to the API server of the cluster identified by `cluster`.
    async fn store_for(&self, cluster: &ObjectKey) -> Result<Arc<dyn ResourceStore>, ServiceError>;

    /// Returns `true` once the workload API server answers requests.
    async fn is_api_online(&self, cluster: &ObjectKey) -> bool;
}
