// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition types and reasons for infrastructure resources.
//!
//! Condition types name a single observable aspect of a resource (for example whether
//! the vCenter endpoint is reachable). Reasons are programmatic CamelCase identifiers
//! explaining why a condition currently has its status.
//!
//! # Condition Hierarchy
//!
//! Every resource carries one encompassing `type: Ready` condition computed by the
//! patcher from the resource's other conditions. A `False` sub-condition always
//! surfaces in `Ready` with its reason, so an operator can see which stage blocks.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   ready: false
//!   conditions:
//!     - type: Ready
//!       status: "False"
//!       severity: Warning
//!       reason: LoadBalancerProvisioningFailed
//!       message: "load balancer address not yet available"
//!     - type: VCenterAvailable
//!       status: "True"
//!     - type: LoadBalancerAvailable
//!       status: "False"
//!       severity: Warning
//!       reason: LoadBalancerProvisioningFailed
//!       message: "load balancer address not yet available"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Summary condition present on every managed resource.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// A session to the vCenter endpoint could be established.
pub const CONDITION_TYPE_VCENTER_AVAILABLE: &str = "VCenterAvailable";

/// The cluster's load balancer reports ready with an address.
pub const CONDITION_TYPE_LOAD_BALANCER_AVAILABLE: &str = "LoadBalancerAvailable";

/// The cloud controller manager add-on is installed in the workload cluster.
pub const CONDITION_TYPE_CCM_AVAILABLE: &str = "CCMAvailable";

/// The CSI storage add-on is installed in the workload cluster.
pub const CONDITION_TYPE_CSI_AVAILABLE: &str = "CSIAvailable";

/// The backing VM of a machine or load balancer is provisioned.
pub const CONDITION_TYPE_VM_PROVISIONED: &str = "VMProvisioned";

/// The deployment zone's placement constraint resolves to backend objects.
pub const CONDITION_TYPE_PLACEMENT_CONSTRAINT_MET: &str = "PlacementConstraintMet";

/// The failure domain's region and zone declarations match the backend inventory.
pub const CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED: &str = "VSphereFailureDomainValidated";

/// The secret of a cluster identity is bound and usable.
pub const CONDITION_TYPE_CREDENTIALS_AVAILABLE: &str = "CredentialsAvailable";

/// The supervisor headless service is published in the workload cluster.
pub const CONDITION_TYPE_SERVICE_DISCOVERY_READY: &str = "ServiceDiscoveryReady";

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition status `True`
pub const STATUS_TRUE: &str = "True";

/// Condition status `False`
pub const STATUS_FALSE: &str = "False";

/// Condition status `Unknown`
pub const STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// vCenter Reasons
// ============================================================================

/// The vCenter endpoint refused or failed the session request.
///
/// **Usage:**
/// - `VCenterAvailable` condition with severity `Error`
/// - Also used when the identity secret is already owned by another cluster
pub const REASON_VCENTER_UNREACHABLE: &str = "VCenterUnreachable";

// ============================================================================
// Identity Reasons
// ============================================================================

/// The secret named by a cluster identity does not exist in the manager namespace.
pub const REASON_SECRET_NOT_AVAILABLE: &str = "SecretNotAvailable";

/// The secret named by a cluster identity is owned by another cluster or identity.
pub const REASON_SECRET_ALREADY_IN_USE: &str = "SecretAlreadyInUse";

/// Writing the owner reference onto the identity secret failed.
pub const REASON_SECRET_OWNER_REFERENCE_FAILED: &str = "SecretOwnerReferenceFailed";

/// The cluster identity is not ready or does not allow the cluster's namespace.
///
/// **Usage:**
/// - `VCenterAvailable` condition of a `VSphereCluster` with severity `Error`
pub const REASON_IDENTITY_NOT_USABLE: &str = "IdentityNotUsable";

// ============================================================================
// Load Balancer Reasons
// ============================================================================

/// The load balancer exists but has not reported an address yet.
pub const REASON_LOAD_BALANCER_PROVISIONING: &str = "LoadBalancerProvisioning";

/// The load balancer could not be found or failed to become ready.
pub const REASON_LOAD_BALANCER_PROVISIONING_FAILED: &str = "LoadBalancerProvisioningFailed";

// ============================================================================
// Add-on Reasons
// ============================================================================

/// Installing the cloud controller manager failed.
pub const REASON_CCM_PROVISIONING_FAILED: &str = "CCMProvisioningFailed";

/// Installing the CSI storage driver failed.
pub const REASON_CSI_PROVISIONING_FAILED: &str = "CSIProvisioningFailed";

// ============================================================================
// Machine Reasons
// ============================================================================

/// The owning cluster's infrastructure is not ready.
pub const REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";

/// The machine has no bootstrap data secret yet.
pub const REASON_WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";

/// A worker machine waits for the first control-plane machine to initialize.
pub const REASON_WAITING_FOR_CONTROL_PLANE_AVAILABLE: &str = "WaitingForControlPlaneAvailable";

/// A DHCP-less device waits for an externally allocated static address.
pub const REASON_WAITING_FOR_STATIC_IP_ALLOCATION: &str = "WaitingForStaticIPAllocation";

/// The VM is up but has not reported network addresses for every device.
pub const REASON_WAITING_FOR_NETWORK_ADDRESSES: &str = "WaitingForNetworkAddresses";

/// The VM has not exposed a BIOS UUID yet.
pub const REASON_WAITING_FOR_PROVIDER_ID: &str = "WaitingForProviderID";

/// The VM is being cloned from its template.
pub const REASON_CLONING: &str = "Cloning";

/// The VM is powering on.
pub const REASON_POWERING_ON: &str = "PoweringOn";

/// A backend task for the VM failed.
pub const REASON_TASK_FAILURE: &str = "TaskFailure";

/// The VM is being deleted.
pub const REASON_DELETING: &str = "Deleting";

/// Deleting the VM failed.
pub const REASON_DELETION_FAILED: &str = "DeletionFailed";

// ============================================================================
// Deployment Zone Reasons
// ============================================================================

/// The placement resource pool does not exist under the declared compute cluster.
pub const REASON_RESOURCE_POOL_NOT_FOUND: &str = "ResourcePoolNotFound";

/// The placement folder does not exist.
pub const REASON_FOLDER_NOT_FOUND: &str = "FolderNotFound";

/// A region or zone tag declaration does not match the inventory.
pub const REASON_FAILURE_DOMAIN_FAILED: &str = "FailureDomainValidationFailed";

/// Region or zone tags could not be created for an auto-configured failure domain.
pub const REASON_FAILURE_DOMAIN_AUTO_CONFIGURE_FAILED: &str = "AutoConfigureFailed";

// ============================================================================
// Service Discovery Reasons
// ============================================================================

/// The supervisor headless service or its endpoints could not be published.
pub const REASON_SUPERVISOR_HEADLESS_SERVICE_SETUP_FAILED: &str =
    "SupervisorHeadlessServiceSetupFailed";
