// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory vSphere, appliance and workload-cluster backend.
//!
//! [`Simulator`] implements every capability trait in [`crate::services`] on top of a
//! single mutex-protected state. It backs the unit and integration tests and the
//! `--simulate` mode of the manager. The setters (`add_*`, `set_*`, `complete_vm`, ...)
//! shape the simulated world; the getters let tests assert on side effects.
//!
//! Virtual machines either stay un-provisioned until [`Simulator::complete_vm`] is
//! called, or, with [`Simulator::with_auto_provision`], come up immediately with a BIOS
//! UUID and one address per network device.

use super::{
    ApplianceClient, ApplianceProvider, Credentials, DestroyState, Inventory, InventoryObject,
    IpAction, LoadBalancerConfig, PowerState, ServiceError, Session, SessionProvider, Tag,
    VersionedConfig, VmDriver, VmHandle, VmRequest, VmState, WorkloadClusters,
};
use crate::crd::NetworkStatus;
use crate::store::{MemoryStore, ObjectKey, ResourceStore};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct SimVm {
    request: VmRequest,
    state: VmState,
}

struct IpPool {
    prefix: String,
    next: u32,
    allocated: BTreeSet<String>,
}

#[derive(Default)]
struct Appliance {
    active: VersionedConfig,
    staged: HashMap<String, Option<VersionedConfig>>,
    next_transaction: u64,
    posts: usize,
    commits: usize,
    releases: usize,
    fail_posts: Option<String>,
    pools: HashMap<String, IpPool>,
}

#[derive(Default)]
struct Inner {
    auto_provision: bool,
    sessions: HashMap<(String, String), Session>,
    sessions_created: usize,
    unreachable: HashSet<String>,
    vms: HashMap<VmHandle, SimVm>,
    vm_counter: u32,
    destroy_passes: u32,
    resource_pools: HashMap<(String, String), String>,
    folders: HashSet<(String, String)>,
    objects: HashSet<InventoryObject>,
    tags: HashMap<InventoryObject, Vec<Tag>>,
    host_groups: HashMap<(String, String, String), Vec<String>>,
    appliance: Appliance,
    workloads: HashMap<ObjectKey, (Arc<MemoryStore>, bool)>,
}

/// Shared in-memory backend. Clones share state.
#[derive(Clone, Default)]
pub struct Simulator {
    inner: Arc<Mutex<Inner>>,
}

fn strip_prefix_len(cidr: &str) -> String {
    cidr.split('/').next().unwrap_or(cidr).to_string()
}

fn synthetic_uuid(n: u32) -> String {
    format!("4216{n:04x}-0000-4000-8000-{n:012x}")
}

fn provisioned_state(request: &VmRequest, n: u32) -> VmState {
    let mut addresses = Vec::new();
    let mut network = Vec::new();
    for (i, device) in request.clone_spec.network.devices.iter().enumerate() {
        let ips: Vec<String> = if device.ip_addrs.is_empty() {
            vec![format!("10.{}.{}.{}", 100 + i, n / 250, n % 250 + 2)]
        } else {
            device.ip_addrs.iter().map(|a| strip_prefix_len(a)).collect()
        };
        addresses.extend(ips.iter().cloned());
        network.push(NetworkStatus {
            connected: true,
            ip_addrs: ips,
            mac_addr: format!("00:50:56:00:{:02x}:{:02x}", n % 256, i),
            network_name: device.network_name.clone(),
        });
    }
    VmState {
        ready: true,
        addresses,
        bios_uuid: Some(synthetic_uuid(n)),
        power_state: PowerState::PoweredOn,
        network,
        failure: None,
    }
}

impl Simulator {
    /// Empty backend; VMs wait for [`Simulator::complete_vm`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose VMs are provisioned as soon as they are created.
    #[must_use]
    pub fn with_auto_provision() -> Self {
        let sim = Self::default();
        sim.lock().auto_provision = true;
        sim
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Sessions

    /// Make sessions to `server` fail (or succeed again).
    pub fn set_unreachable(&self, server: &str, unreachable: bool) {
        let mut inner = self.lock();
        if unreachable {
            inner.unreachable.insert(server.to_string());
        } else {
            inner.unreachable.remove(server);
        }
    }

    /// Number of sessions created so far (cache misses).
    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    // Virtual machines

    /// Number of existing VMs.
    #[must_use]
    pub fn vm_count(&self) -> usize {
        self.lock().vms.len()
    }

    /// The last request applied to a VM.
    #[must_use]
    pub fn vm_request(&self, namespace: &str, name: &str) -> Option<VmRequest> {
        self.lock()
            .vms
            .iter()
            .find(|(h, _)| h.namespace == namespace && h.name == name)
            .map(|(_, vm)| vm.request.clone())
    }

    /// Finish provisioning a VM with the given BIOS UUID and addresses.
    ///
    /// Addresses are spread over the requested devices, the last device taking any
    /// remainder.
    pub fn complete_vm(&self, namespace: &str, name: &str, bios_uuid: &str, addresses: &[&str]) {
        let mut inner = self.lock();
        if let Some((_, vm)) = inner
            .vms
            .iter_mut()
            .find(|(h, _)| h.namespace == namespace && h.name == name)
        {
            let devices = vm.request.clone_spec.network.devices.len().max(1);
            let mut network: Vec<NetworkStatus> = vm
                .request
                .clone_spec
                .network
                .devices
                .iter()
                .map(|d| NetworkStatus {
                    connected: true,
                    network_name: d.network_name.clone(),
                    ..Default::default()
                })
                .collect();
            if network.is_empty() {
                network.push(NetworkStatus {
                    connected: true,
                    ..Default::default()
                });
            }
            for (i, address) in addresses.iter().enumerate() {
                network[i.min(devices - 1)].ip_addrs.push((*address).to_string());
            }
            vm.state = VmState {
                ready: true,
                addresses: addresses.iter().map(|a| (*a).to_string()).collect(),
                bios_uuid: Some(bios_uuid.to_string()),
                power_state: PowerState::PoweredOn,
                network,
                failure: None,
            };
        }
    }

    /// Overwrite the observed state of a VM.
    pub fn set_vm_state(&self, namespace: &str, name: &str, state: VmState) {
        let mut inner = self.lock();
        if let Some((_, vm)) = inner
            .vms
            .iter_mut()
            .find(|(h, _)| h.namespace == namespace && h.name == name)
        {
            vm.state = state;
        }
    }

    /// Number of destroy calls that report [`DestroyState::Pending`] before a VM is gone.
    pub fn set_destroy_passes(&self, passes: u32) {
        self.lock().destroy_passes = passes;
    }

    // Inventory

    /// Declare a resource pool and the compute cluster that owns it.
    pub fn add_resource_pool(&self, datacenter: &str, pool: &str, compute_cluster: &str) {
        self.lock().resource_pools.insert(
            (datacenter.to_string(), pool.to_string()),
            compute_cluster.to_string(),
        );
    }

    /// Declare a VM folder.
    pub fn add_folder(&self, datacenter: &str, folder: &str) {
        self.lock()
            .folders
            .insert((datacenter.to_string(), folder.to_string()));
    }

    /// Declare an inventory object that can carry tags.
    pub fn add_object(&self, object: InventoryObject) {
        self.lock().objects.insert(object);
    }

    /// Attach a tag to an object, declaring the object if needed.
    pub fn add_tag(&self, object: InventoryObject, category: &str, tag: &str) {
        let mut inner = self.lock();
        inner.objects.insert(object.clone());
        inner.tags.entry(object).or_default().push(Tag {
            name: tag.to_string(),
            category: category.to_string(),
        });
    }

    /// Declare a host group of a compute cluster.
    pub fn add_host_group(&self, datacenter: &str, compute_cluster: &str, group: &str, hosts: &[&str]) {
        self.lock().host_groups.insert(
            (
                datacenter.to_string(),
                compute_cluster.to_string(),
                group.to_string(),
            ),
            hosts.iter().map(|h| (*h).to_string()).collect(),
        );
    }

    /// Tags currently attached to an object.
    #[must_use]
    pub fn tags_of(&self, object: &InventoryObject) -> Vec<Tag> {
        self.lock().tags.get(object).cloned().unwrap_or_default()
    }

    // Appliance

    /// Declare a virtual IP pool handing out `<prefix><n>` addresses.
    pub fn add_ip_pool(&self, pool: &str, prefix: &str) {
        self.lock().appliance.pools.insert(
            pool.to_string(),
            IpPool {
                prefix: prefix.to_string(),
                next: 100,
                allocated: BTreeSet::new(),
            },
        );
    }

    /// Addresses currently allocated from a pool.
    #[must_use]
    pub fn allocated_ips(&self, pool: &str) -> Vec<String> {
        self.lock()
            .appliance
            .pools
            .get(pool)
            .map(|p| p.allocated.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Active appliance configuration.
    #[must_use]
    pub fn appliance_config(&self) -> VersionedConfig {
        self.lock().appliance.active.clone()
    }

    /// Number of accepted configuration posts.
    #[must_use]
    pub fn appliance_posts(&self) -> usize {
        self.lock().appliance.posts
    }

    /// Number of IP release requests, whether or not the address was allocated.
    #[must_use]
    pub fn ip_releases(&self) -> usize {
        self.lock().appliance.releases
    }

    /// Make configuration posts fail with `message`, or succeed again with `None`.
    pub fn fail_config_posts(&self, message: Option<&str>) {
        self.lock().appliance.fail_posts = message.map(str::to_string);
    }

    // Workload clusters

    /// Register a workload cluster and return its API store.
    pub fn add_workload_cluster(&self, cluster: &ObjectKey) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        self.lock()
            .workloads
            .insert(cluster.clone(), (store.clone(), false));
        store
    }

    /// Mark a workload API server reachable or not.
    pub fn set_api_online(&self, cluster: &ObjectKey, online: bool) {
        if let Some(entry) = self.lock().workloads.get_mut(cluster) {
            entry.1 = online;
        }
    }
}

fn driver_error(handle: &VmHandle, message: &str) -> ServiceError {
    ServiceError::Driver {
        name: handle.name.clone(),
        message: message.to_string(),
    }
}

#[async_trait]
impl SessionProvider for Simulator {
    async fn get_or_create(
        &self,
        server: &str,
        credentials: &Credentials,
        _thumbprint: Option<String>,
    ) -> Result<Session, ServiceError> {
        let mut inner = self.lock();
        if inner.unreachable.contains(server) {
            return Err(ServiceError::Session {
                server: server.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let key = (server.to_string(), credentials.username.clone());
        if let Some(session) = inner.sessions.get(&key) {
            return Ok(session.clone());
        }
        inner.sessions_created += 1;
        let session = Session {
            server: server.to_string(),
            username: credentials.username.clone(),
            id: format!("session-{}", inner.sessions_created),
        };
        inner.sessions.insert(key, session.clone());
        debug!("Created simulated session {} to {}", session.id, server);
        Ok(session)
    }
}

#[async_trait]
impl VmDriver for Simulator {
    async fn create_or_update(
        &self,
        session: &Session,
        request: &VmRequest,
    ) -> Result<VmHandle, ServiceError> {
        let handle = VmHandle {
            server: session.server.clone(),
            namespace: request.namespace.clone(),
            name: request.name.clone(),
        };
        let mut inner = self.lock();
        if let Some(vm) = inner.vms.get_mut(&handle) {
            vm.request = request.clone();
            return Ok(handle);
        }
        if request.clone_spec.template.is_empty() {
            return Err(driver_error(&handle, "no template specified"));
        }
        inner.vm_counter += 1;
        let state = if inner.auto_provision {
            provisioned_state(request, inner.vm_counter)
        } else {
            VmState::default()
        };
        debug!("Cloning simulated VM {}/{}", handle.namespace, handle.name);
        inner.vms.insert(
            handle.clone(),
            SimVm {
                request: request.clone(),
                state,
            },
        );
        Ok(handle)
    }

    async fn get(&self, _session: &Session, handle: &VmHandle) -> Result<Option<VmState>, ServiceError> {
        Ok(self.lock().vms.get(handle).map(|vm| vm.state.clone()))
    }

    async fn destroy(&self, _session: &Session, handle: &VmHandle) -> Result<DestroyState, ServiceError> {
        let mut inner = self.lock();
        if !inner.vms.contains_key(handle) {
            return Ok(DestroyState::NotFound);
        }
        if inner.destroy_passes > 0 {
            inner.destroy_passes -= 1;
            if let Some(vm) = inner.vms.get_mut(handle) {
                vm.state.power_state = PowerState::PoweredOff;
                vm.state.ready = false;
            }
            return Ok(DestroyState::Pending);
        }
        inner.vms.remove(handle);
        Ok(DestroyState::NotFound)
    }
}

#[async_trait]
impl Inventory for Simulator {
    async fn resource_pool_owner(
        &self,
        _session: &Session,
        datacenter: &str,
        resource_pool: &str,
    ) -> Result<Option<String>, ServiceError> {
        Ok(self
            .lock()
            .resource_pools
            .get(&(datacenter.to_string(), resource_pool.to_string()))
            .cloned())
    }

    async fn folder_exists(
        &self,
        _session: &Session,
        datacenter: &str,
        folder: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .lock()
            .folders
            .contains(&(datacenter.to_string(), folder.to_string())))
    }

    async fn tags(&self, _session: &Session, object: &InventoryObject) -> Result<Vec<Tag>, ServiceError> {
        let inner = self.lock();
        if !inner.objects.contains(object) {
            return Err(ServiceError::Inventory(format!("{object} not found")));
        }
        Ok(inner.tags.get(object).cloned().unwrap_or_default())
    }

    async fn hosts_in_group(
        &self,
        _session: &Session,
        datacenter: &str,
        compute_cluster: &str,
        host_group: &str,
    ) -> Result<Vec<String>, ServiceError> {
        self.lock()
            .host_groups
            .get(&(
                datacenter.to_string(),
                compute_cluster.to_string(),
                host_group.to_string(),
            ))
            .cloned()
            .ok_or_else(|| {
                ServiceError::Inventory(format!(
                    "host group {host_group} not found in {datacenter}/{compute_cluster}"
                ))
            })
    }

    async fn attach_tag(
        &self,
        _session: &Session,
        object: &InventoryObject,
        tag: &Tag,
    ) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        if !inner.objects.contains(object) {
            return Err(ServiceError::Inventory(format!("{object} not found")));
        }
        let tags = inner.tags.entry(object.clone()).or_default();
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
        Ok(())
    }
}

fn unknown_transaction(transaction: &str) -> ServiceError {
    ServiceError::Appliance {
        status: 404,
        message: format!("transaction {transaction} not found"),
    }
}

#[async_trait]
impl ApplianceClient for Simulator {
    async fn start_transaction(&self) -> Result<String, ServiceError> {
        let mut inner = self.lock();
        inner.appliance.next_transaction += 1;
        let id = format!("tx-{}", inner.appliance.next_transaction);
        inner.appliance.staged.insert(id.clone(), None);
        Ok(id)
    }

    async fn get_config(&self, transaction: &str) -> Result<VersionedConfig, ServiceError> {
        let inner = self.lock();
        match inner.appliance.staged.get(transaction) {
            Some(Some(staged)) => Ok(staged.clone()),
            Some(None) => Ok(inner.appliance.active.clone()),
            None => Err(unknown_transaction(transaction)),
        }
    }

    async fn post_config(
        &self,
        transaction: &str,
        config: &LoadBalancerConfig,
        expected_version: u64,
    ) -> Result<u64, ServiceError> {
        let mut inner = self.lock();
        let appliance = &mut inner.appliance;
        if let Some(message) = &appliance.fail_posts {
            return Err(ServiceError::Appliance {
                status: 500,
                message: message.clone(),
            });
        }
        if !appliance.staged.contains_key(transaction) {
            return Err(unknown_transaction(transaction));
        }
        if expected_version != appliance.active.version {
            return Err(ServiceError::VersionConflict {
                expected: expected_version,
                current: appliance.active.version,
            });
        }
        let version = expected_version + 1;
        appliance.staged.insert(
            transaction.to_string(),
            Some(VersionedConfig {
                version,
                config: config.clone(),
            }),
        );
        appliance.posts += 1;
        Ok(version)
    }

    async fn commit(&self, transaction: &str) -> Result<(), ServiceError> {
        let mut inner = self.lock();
        let appliance = &mut inner.appliance;
        match appliance.staged.remove(transaction) {
            Some(Some(staged)) => {
                appliance.active = staged;
                appliance.commits += 1;
                Ok(())
            }
            Some(None) => Ok(()),
            None => Err(unknown_transaction(transaction)),
        }
    }

    async fn allocate_or_release(
        &self,
        pool: &str,
        address: Option<String>,
        action: IpAction,
    ) -> Result<String, ServiceError> {
        let mut inner = self.lock();
        if action == IpAction::Release {
            inner.appliance.releases += 1;
        }
        let ip_pool = inner
            .appliance
            .pools
            .get_mut(pool)
            .ok_or_else(|| ServiceError::Appliance {
                status: 404,
                message: format!("IP pool {pool} not found"),
            })?;
        match action {
            IpAction::Allocate => {
                let ip = format!("{}{}", ip_pool.prefix, ip_pool.next);
                ip_pool.next += 1;
                ip_pool.allocated.insert(ip.clone());
                Ok(ip)
            }
            IpAction::Release => {
                let ip = address.unwrap_or_default();
                ip_pool.allocated.remove(&ip);
                Ok(ip)
            }
        }
    }
}

impl ApplianceProvider for Simulator {
    fn client_for(&self, _server: &str, _insecure: bool) -> Result<Arc<dyn ApplianceClient>, ServiceError> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl WorkloadClusters for Simulator {
    async fn store_for(&self, cluster: &ObjectKey) -> Result<Arc<dyn ResourceStore>, ServiceError> {
        let store: Arc<dyn ResourceStore> = self
            .lock()
            .workloads
            .get(cluster)
            .map(|(store, _)| store.clone())
            .ok_or_else(|| ServiceError::Workload {
                cluster: cluster.to_string(),
                message: "no kubeconfig available".to_string(),
            })?;
        Ok(store)
    }

    async fn is_api_online(&self, cluster: &ObjectKey) -> bool {
        self.lock()
            .workloads
            .get(cluster)
            .is_some_and(|(_, online)| *online)
    }
}

#[cfg(test)]
#[path = "simulator_tests.rs"]
mod simulator_tests;
