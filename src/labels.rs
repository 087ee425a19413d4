// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! This module defines the Cluster API labels the engine reads and the finalizers
//! it places on the resources it manages, to ensure consistency across controllers.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Value for `app.kubernetes.io/managed-by` on every object this engine creates
pub const MANAGED_BY_CAPV: &str = "capv-engine";

// ============================================================================
// Cluster API Labels
// ============================================================================

/// Label carrying the owning cluster name on machines, VMs and load balancers
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label present on control-plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation that pauses reconciliation of an individual resource
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer held by a `VSphereCluster` until its machines and load balancers are gone
pub const CLUSTER_FINALIZER: &str = "vspherecluster.infrastructure.cluster.x-k8s.io";

/// Finalizer held by a `VSphereMachine` until its VM is destroyed
pub const MACHINE_FINALIZER: &str = "vspheremachine.infrastructure.cluster.x-k8s.io";

/// Finalizer held by a `VSphereVM` until the backend reports the VM gone
pub const VM_FINALIZER: &str = "vspherevm.infrastructure.cluster.x-k8s.io";

/// Finalizer held by an `HAProxyLoadBalancer` until its backing VM is deleted
pub const HAPROXY_LOAD_BALANCER_FINALIZER: &str =
    "haproxyloadbalancer.infrastructure.cluster.x-k8s.io";

/// Finalizer held by an `NSXTLoadBalancer` until its appliance objects are removed
pub const NSXT_LOAD_BALANCER_FINALIZER: &str = "nsxtloadbalancer.infrastructure.cluster.x-k8s.io";

/// Finalizer held by a `VSphereDeploymentZone` until no machine is placed in it
pub const DEPLOYMENT_ZONE_FINALIZER: &str = "vspheredeploymentzone.infrastructure.cluster.x-k8s.io";

/// Finalizer placed on an identity secret while a cluster or identity is bound to it
pub const IDENTITY_SECRET_FINALIZER: &str = "vspherecluster/infrastructure.cluster.x-k8s.io";

/// Finalizer held by a `VSphereClusterIdentity` until its secret is released
pub const CLUSTER_IDENTITY_FINALIZER: &str = "vsphereclusteridentity/infrastructure.cluster.x-k8s.io";
