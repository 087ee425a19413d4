// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for vSphere infrastructure resources.
//!
//! Each reconciler takes the object handed to it by its controller, compares the
//! declared state with the backend through the [`Context`](crate::context::Context)
//! capabilities, and persists the outcome through a [`patch::Patcher`].
//!
//! # Reconciliation Architecture
//!
//! Every reconciler follows the same shape:
//!
//! 1. **Parents** - Resolve the owning Cluster API objects; skip paused clusters
//! 2. **Snapshot** - Open a [`patch::Patcher`] on the object as received
//! 3. **Reconcile** - Run the delete path or the normal path, setting conditions
//! 4. **Persist** - Patch metadata, spec and status in one pass on exit
//!
//! # Available Reconcilers
//!
//! ## Clusters
//!
//! - [`reconcile_vsphere_cluster`] - vCenter session, load balancer, control-plane
//!   endpoint, online-poller and workload add-ons
//! - [`reconcile_service_discovery`] - Publishes the supervisor address into the workload
//!   cluster
//!
//! - [`reconcile_vsphere_cluster_identity`] - Binds the secret of a cluster-scoped
//!   identity
//!
//! ## Machines
//!
//! - [`reconcile_vsphere_machine`] - Drives a `VSphereVM` for each Cluster API machine
//! - [`reconcile_vsphere_vm`] - Clones, powers on and destroys virtual machines
//!
//! ## Load Balancers
//!
//! - [`reconcile_haproxy_load_balancer`] - HAProxy appliance VM and configuration
//! - [`reconcile_nsxt_load_balancer`] - NSX-T virtual server, pool and VIP
//!
//! ## Placement
//!
//! - [`reconcile_deployment_zone`] - Verifies deployment zones against their failure
//!   domain

pub mod cluster;
pub mod clusteridentity;
pub mod deploymentzone;
pub mod finalizers;
pub mod identity;
pub mod loadbalancer;
pub mod lookup;
pub mod machine;
pub mod patch;
pub mod placement;
pub mod resources;
pub mod retry;
pub mod servicediscovery;
pub mod status;
pub mod triggers;
pub mod vm;
pub mod watches;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cluster::reconcile_vsphere_cluster;
pub use clusteridentity::reconcile_vsphere_cluster_identity;
pub use deploymentzone::reconcile_deployment_zone;
pub use loadbalancer::{reconcile_haproxy_load_balancer, reconcile_nsxt_load_balancer};
pub use machine::reconcile_vsphere_machine;
pub use servicediscovery::reconcile_service_discovery;
pub use vm::reconcile_vsphere_vm;
