// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment zone verification against the vSphere inventory.
//!
//! Two independent checks back the deployment zone conditions:
//!
//! - [`verify_placement`]: the placement constraint's resource pool belongs to the
//!   topology's compute cluster and its folder exists (`PlacementConstraintMet`).
//! - [`verify_failure_domain`]: the region or zone tag is attached to the object the
//!   failure domain type points at (`VSphereFailureDomainValidated`). With
//!   `autoConfigure` the tag is attached instead of verified.
//!
//! Both functions only read through the [`Inventory`] capability (plus tag attachment
//! for auto-configured domains) and never touch the resource store.

use crate::crd::{FailureDomainSpec, FailureDomainType, PlacementConstraint, Topology};
use crate::services::{Inventory, InventoryObject, ServiceError, Session, Tag};
use crate::status_reasons::{
    REASON_FAILURE_DOMAIN_AUTO_CONFIGURE_FAILED, REASON_FAILURE_DOMAIN_FAILED,
    REASON_FOLDER_NOT_FOUND, REASON_RESOURCE_POOL_NOT_FOUND,
};
use thiserror::Error;
use tracing::{debug, info};

/// An unmet placement constraint.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The resource pool is missing, unreadable or owned by another compute cluster
    #[error("resource pool {resource_pool} is misconfigured: {detail}")]
    ResourcePoolNotFound {
        /// Configured resource pool
        resource_pool: String,
        /// What was wrong with it
        detail: String,
    },

    /// The folder is missing or unreadable
    #[error("folder {folder} is misconfigured: {detail}")]
    FolderNotFound {
        /// Configured folder
        folder: String,
        /// What was wrong with it
        detail: String,
    },
}

impl PlacementError {
    /// Condition reason for this failure.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ResourcePoolNotFound { .. } => REASON_RESOURCE_POOL_NOT_FOUND,
            Self::FolderNotFound { .. } => REASON_FOLDER_NOT_FOUND,
        }
    }
}

/// An unverifiable region or zone.
#[derive(Debug, Error)]
pub enum FailureDomainError {
    /// The failure domain type needs a compute cluster the topology does not name
    #[error("topology has no compute cluster for {0:?} failure domain")]
    MissingComputeCluster(FailureDomainType),

    /// A host group failure domain without a host group in its topology
    #[error("topology has no host group for HostGroup failure domain")]
    MissingHostGroup,

    /// The host group resolved to no hosts
    #[error("host group {0} has no hosts")]
    EmptyHostGroup(String),

    /// The tag is not attached to a target object
    #[error("tag {category}/{tag} is not attached to {object}")]
    TagNotAttached {
        /// Tag name
        tag: String,
        /// Tag category
        category: String,
        /// Object missing the tag
        object: InventoryObject,
    },

    /// Attaching an auto-configured tag failed
    #[error("unable to attach tag {category}/{tag} to {object}: {source}")]
    AutoConfigure {
        /// Tag name
        tag: String,
        /// Tag category
        category: String,
        /// Target object
        object: InventoryObject,
        /// Inventory error
        source: ServiceError,
    },

    /// Inventory lookup failed
    #[error(transparent)]
    Inventory(#[from] ServiceError),
}

impl FailureDomainError {
    /// Condition reason for this failure.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AutoConfigure { .. } => REASON_FAILURE_DOMAIN_AUTO_CONFIGURE_FAILED,
            _ => REASON_FAILURE_DOMAIN_FAILED,
        }
    }
}

/// Check the resource pool and folder of a placement constraint.
///
/// Empty fields are not checked. The resource pool must be owned by the topology's
/// compute cluster when the topology names one.
///
/// # Errors
///
/// Returns the first unmet constraint.
pub async fn verify_placement(
    inventory: &dyn Inventory,
    session: &Session,
    constraint: &PlacementConstraint,
    topology: &Topology,
) -> Result<(), PlacementError> {
    let datacenter = topology.datacenter.as_str();

    if !constraint.resource_pool.is_empty() {
        let resource_pool = constraint.resource_pool.clone();
        let owner = inventory
            .resource_pool_owner(session, datacenter, &resource_pool)
            .await
            .map_err(|e| PlacementError::ResourcePoolNotFound {
                resource_pool: resource_pool.clone(),
                detail: e.to_string(),
            })?;
        match (owner, topology.compute_cluster.as_deref()) {
            (None, _) => {
                return Err(PlacementError::ResourcePoolNotFound {
                    resource_pool,
                    detail: format!("not found in datacenter {datacenter}"),
                });
            }
            (Some(owner), Some(expected)) if owner != expected => {
                return Err(PlacementError::ResourcePoolNotFound {
                    resource_pool,
                    detail: format!("owned by compute cluster {owner}, expected {expected}"),
                });
            }
            (Some(owner), _) => {
                debug!("Resource pool {} belongs to compute cluster {}", resource_pool, owner);
            }
        }
    }

    if !constraint.folder.is_empty() {
        let folder = constraint.folder.clone();
        let exists = inventory
            .folder_exists(session, datacenter, &folder)
            .await
            .map_err(|e| PlacementError::FolderNotFound {
                folder: folder.clone(),
                detail: e.to_string(),
            })?;
        if !exists {
            return Err(PlacementError::FolderNotFound {
                folder,
                detail: format!("not found in datacenter {datacenter}"),
            });
        }
    }

    Ok(())
}

/// Inventory objects the tag of `domain` belongs on.
///
/// # Errors
///
/// Returns an error if the topology lacks what the domain type needs or the host group
/// lookup fails.
pub async fn tag_targets(
    inventory: &dyn Inventory,
    session: &Session,
    domain: &FailureDomainSpec,
    topology: &Topology,
) -> Result<Vec<InventoryObject>, FailureDomainError> {
    let datacenter = topology.datacenter.clone();
    let compute_cluster = || {
        topology
            .compute_cluster
            .clone()
            .ok_or_else(|| FailureDomainError::MissingComputeCluster(domain.r#type.clone()))
    };

    match domain.r#type {
        FailureDomainType::Datacenter => Ok(vec![InventoryObject::Datacenter(datacenter)]),
        FailureDomainType::ComputeCluster => Ok(vec![InventoryObject::ComputeCluster {
            datacenter,
            name: compute_cluster()?,
        }]),
        FailureDomainType::HostGroup => {
            let cluster = compute_cluster()?;
            let group = topology
                .hosts
                .as_ref()
                .map(|h| h.host_group_name.clone())
                .filter(|g| !g.is_empty())
                .ok_or(FailureDomainError::MissingHostGroup)?;
            let hosts = inventory
                .hosts_in_group(session, &datacenter, &cluster, &group)
                .await?;
            if hosts.is_empty() {
                return Err(FailureDomainError::EmptyHostGroup(group));
            }
            Ok(hosts
                .into_iter()
                .map(|name| InventoryObject::Host {
                    datacenter: datacenter.clone(),
                    name,
                })
                .collect())
        }
    }
}

/// Verify or, with `autoConfigure`, attach the tag of a region or zone.
///
/// # Errors
///
/// Returns the first target missing the tag, or the first attachment failure.
pub async fn verify_failure_domain(
    inventory: &dyn Inventory,
    session: &Session,
    domain: &FailureDomainSpec,
    topology: &Topology,
) -> Result<(), FailureDomainError> {
    let tag = Tag {
        name: domain.name.clone(),
        category: domain.tag_category.clone(),
    };
    let targets = tag_targets(inventory, session, domain, topology).await?;

    if domain.auto_configure.unwrap_or(false) {
        for object in targets {
            inventory
                .attach_tag(session, &object, &tag)
                .await
                .map_err(|source| FailureDomainError::AutoConfigure {
                    tag: tag.name.clone(),
                    category: tag.category.clone(),
                    object: object.clone(),
                    source,
                })?;
            info!("Attached tag {}/{} to {}", tag.category, tag.name, object);
        }
        return Ok(());
    }

    for object in targets {
        let attached = inventory.tags(session, &object).await?;
        if !attached.contains(&tag) {
            return Err(FailureDomainError::TagNotAttached {
                tag: tag.name.clone(),
                category: tag.category.clone(),
                object,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod placement_tests;
