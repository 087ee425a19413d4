// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! vCenter credentials of a cluster and the lifecycle of its identity secret.
//!
//! A `VSphereCluster` whose `identityRef` names a `Secret` takes ownership of that
//! secret on its first pass: a controller owner reference plus
//! [`IDENTITY_SECRET_FINALIZER`]. A secret already owned by another cluster is
//! never taken over. When the cluster is deleted the finalizer is released and the
//! secret deleted.
//!
//! An `identityRef` of kind `VSphereClusterIdentity` names a cluster-scoped identity
//! whose secret lives in the manager namespace. It is usable only once the identity is
//! ready and its `allowedNamespaces` selector matches the labels of the cluster's
//! namespace.

use super::finalizers::{add_finalizer, remove_finalizer_from};
use super::lookup::infrastructure_cluster;
use super::resources::{ensure_owner_reference, owner_reference};
use crate::context::Context;
use crate::crd::{Cluster, IdentityKind, VSphereCluster, VSphereClusterIdentity};
use crate::labels::IDENTITY_SECRET_FINALIZER;
use crate::services::Credentials;
use crate::store::{delete_object, get_object, patch_object, ObjectKey, ResourceStore};
use anyhow::{anyhow, Context as _, Result};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

/// Secret key holding the vCenter user name.
pub const USERNAME_KEY: &str = "username";

/// Secret key holding the vCenter password.
pub const PASSWORD_KEY: &str = "password";

/// Kinds whose owner reference on a secret marks it as claimed.
const IDENTITY_OWNER_KINDS: [&str; 2] = ["VSphereCluster", "VSphereClusterIdentity"];

/// Outcome of binding the identity secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityBinding {
    /// The cluster does not reference a secret
    NotSecret,
    /// The secret is owned by this cluster
    Bound,
    /// Another cluster or identity owns the secret
    OwnedByOther(String),
}

/// Why a cluster identity cannot supply credentials.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The referenced identity does not exist
    #[error("VSphereClusterIdentity {0} not found")]
    NotFound(String),

    /// The identity has not bound its secret yet
    #[error("VSphereClusterIdentity {0} isn't ready to be used yet")]
    NotReady(String),

    /// The identity's namespace selector rejects the cluster's namespace
    #[error("namespace {namespace} is not allowed to use VSphereClusterIdentity {identity}")]
    NamespaceNotAllowed {
        /// Identity name
        identity: String,
        /// Namespace of the referencing cluster
        namespace: String,
    },
}

/// Key of the identity secret referenced by `cluster`, if it references one.
#[must_use]
pub fn identity_secret_key(cluster: &VSphereCluster) -> Option<ObjectKey> {
    let identity = cluster.spec.identity_ref.as_ref()?;
    (identity.kind == IdentityKind::Secret).then(|| {
        ObjectKey::namespaced(cluster.namespace().unwrap_or_default(), identity.name.clone())
    })
}

/// String value of a secret entry, from `data` or else `stringData`.
pub(crate) fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).ok();
    }
    secret.string_data.as_ref().and_then(|d| d.get(key)).cloned()
}

/// Read `username`/`password` from a secret.
///
/// # Errors
///
/// Returns an error when the secret or one of its keys is missing.
pub async fn credentials_from_secret(
    store: &dyn ResourceStore,
    key: &ObjectKey,
) -> Result<Credentials> {
    let secret: Secret = get_object(store, key)
        .await?
        .ok_or_else(|| anyhow!("identity secret {key} not found"))?;
    let username = secret_value(&secret, USERNAME_KEY)
        .ok_or_else(|| anyhow!("identity secret {key} has no {USERNAME_KEY} key"))?;
    let password = secret_value(&secret, PASSWORD_KEY)
        .ok_or_else(|| anyhow!("identity secret {key} has no {PASSWORD_KEY} key"))?;
    Ok(Credentials::new(username, password))
}

/// Returns `true` if `identity` may be used from `namespace`.
///
/// An identity without `allowedNamespaces` allows none; an empty selector allows all.
///
/// # Errors
///
/// Returns an error on store failures or an unparsable selector.
pub async fn namespace_allowed(
    store: &dyn ResourceStore,
    identity: &VSphereClusterIdentity,
    namespace: &str,
) -> Result<bool> {
    let Some(allowed) = identity.spec.allowed_namespaces.as_ref() else {
        return Ok(false);
    };
    let selector = Selector::try_from(allowed.selector.clone()).map_err(|e| {
        anyhow!(
            "invalid allowedNamespaces selector on VSphereClusterIdentity {}: {e}",
            identity.name_any()
        )
    })?;
    let labels = get_object::<Namespace>(store, &ObjectKey::cluster_scoped(namespace))
        .await?
        .map(|ns| ns.labels().clone())
        .unwrap_or_default();
    Ok(selector.matches(&labels))
}

/// Credentials of the cluster-scoped identity `name`, as seen from `namespace`.
///
/// # Errors
///
/// Returns an [`IdentityError`] when the identity is missing, not ready or does not
/// allow `namespace`, and any error reading its secret from the manager namespace.
pub async fn cluster_identity_credentials(
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Credentials> {
    let store = ctx.store.as_ref();
    let identity: VSphereClusterIdentity = get_object(store, &ObjectKey::cluster_scoped(name))
        .await?
        .ok_or_else(|| IdentityError::NotFound(name.to_string()))?;
    if !identity.status.as_ref().is_some_and(|s| s.ready) {
        return Err(IdentityError::NotReady(name.to_string()).into());
    }
    if !namespace_allowed(store, &identity, namespace).await? {
        return Err(IdentityError::NamespaceNotAllowed {
            identity: name.to_string(),
            namespace: namespace.to_string(),
        }
        .into());
    }

    let key = ObjectKey::namespaced(
        ctx.options.controller_namespace.clone(),
        identity.spec.secret_name.clone(),
    );
    debug!("Using secret {} of VSphereClusterIdentity {}", key, name);
    credentials_from_secret(store, &key).await
}

/// Credentials `cluster` uses for vCenter.
///
/// Secret identities are read from the secret, cluster identities through
/// [`cluster_identity_credentials`]; clusters without an identity use the manager
/// credentials.
///
/// # Errors
///
/// Returns an error if a referenced secret or identity cannot be used.
pub async fn cluster_credentials(ctx: &Context, cluster: &VSphereCluster) -> Result<Credentials> {
    let Some(identity) = cluster.spec.identity_ref.as_ref() else {
        return Ok(ctx.options.credentials());
    };
    match identity.kind {
        IdentityKind::Secret => {
            let key = ObjectKey::namespaced(
                cluster.namespace().unwrap_or_default(),
                identity.name.clone(),
            );
            credentials_from_secret(ctx.store.as_ref(), &key).await
        }
        IdentityKind::VSphereClusterIdentity => {
            let namespace = cluster.namespace().unwrap_or_default();
            cluster_identity_credentials(ctx, &identity.name, &namespace).await
        }
    }
}

/// Credentials for objects belonging to `cluster`, resolved through its
/// VSphereCluster. Objects without a resolvable cluster use the manager credentials.
///
/// # Errors
///
/// Returns an error if the store fails or a referenced secret cannot be read.
pub async fn credentials_for_cluster(
    ctx: &Context,
    cluster: Option<&Cluster>,
) -> Result<Credentials> {
    let infra = match cluster {
        Some(cluster) => infrastructure_cluster(ctx.store.as_ref(), cluster).await?,
        None => None,
    };
    match infra {
        Some(vsphere_cluster) => cluster_credentials(ctx, &vsphere_cluster).await,
        None => Ok(ctx.options.credentials()),
    }
}

/// Take ownership of the identity secret of `cluster`.
///
/// # Errors
///
/// Returns an error if the secret is missing or cannot be patched.
pub async fn bind_identity_secret(
    store: &dyn ResourceStore,
    cluster: &VSphereCluster,
) -> Result<IdentityBinding> {
    let Some(key) = identity_secret_key(cluster) else {
        return Ok(IdentityBinding::NotSecret);
    };
    let secret: Secret = get_object(store, &key)
        .await?
        .ok_or_else(|| anyhow!("identity secret {key} not found"))?;

    let cluster_uid = cluster.metadata.uid.clone().unwrap_or_default();
    if let Some(other) = secret
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|r| IDENTITY_OWNER_KINDS.contains(&r.kind.as_str()) && r.uid != cluster_uid)
    {
        return Ok(IdentityBinding::OwnedByOther(format!("{} {}", other.kind, other.name)));
    }

    let mut meta = secret.metadata.clone();
    let owner_added = ensure_owner_reference(&mut meta, owner_reference(cluster, true));
    let finalizer_added = add_finalizer(&mut meta, IDENTITY_SECRET_FINALIZER);
    if !owner_added && !finalizer_added {
        debug!("Identity secret {} already bound", key);
        return Ok(IdentityBinding::Bound);
    }

    info!("Binding identity secret {} to VSphereCluster {}", key, cluster.name_any());
    let patch = json!({
        "metadata": {
            "ownerReferences": meta.owner_references,
            "finalizers": meta.finalizers,
            "resourceVersion": meta.resource_version,
        }
    });
    patch_object::<Secret>(store, &key, &patch)
        .await
        .with_context(|| format!("failed to bind identity secret {key}"))?;
    Ok(IdentityBinding::Bound)
}

/// Release and delete the identity secret of a deleted cluster.
///
/// A missing secret is fine.
///
/// # Errors
///
/// Returns an error if the finalizer cannot be removed or the delete fails.
pub async fn release_identity_secret(
    store: &dyn ResourceStore,
    cluster: &VSphereCluster,
) -> Result<()> {
    let Some(key) = identity_secret_key(cluster) else {
        return Ok(());
    };
    remove_finalizer_from::<Secret>(store, &key, IDENTITY_SECRET_FINALIZER).await?;
    if delete_object::<Secret>(store, &key).await? {
        info!("Deleted identity secret {}", key);
    }
    Ok(())
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod identity_tests;
