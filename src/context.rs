// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every controller receives an `Arc<Context>` holding:
//! - the management cluster [`ResourceStore`]
//! - the backend capabilities ([`Services`])
//! - the online-poller [`TriggerRegistry`]
//! - the per-object [`ErrorBackoff`] used by `error_policy`
//! - the manager options

use crate::config::ManagerOptions;
use crate::reconcilers::retry::ErrorBackoff;
use crate::reconcilers::triggers::TriggerRegistry;
use crate::services::{
    ApplianceProvider, Credentials, Inventory, ServiceError, Session, SessionProvider, Simulator,
    VmDriver, WorkloadClusters,
};
use crate::store::{ObjectKey, ResourceStore};
use futures::channel::mpsc::UnboundedReceiver;
use std::sync::Arc;

/// Backend capabilities used by the reconcilers.
#[derive(Clone)]
pub struct Services {
    /// vCenter sessions
    pub sessions: Arc<dyn SessionProvider>,
    /// Virtual machine lifecycle
    pub vms: Arc<dyn VmDriver>,
    /// Placement and tag queries
    pub inventory: Arc<dyn Inventory>,
    /// Load balancer appliances
    pub appliances: Arc<dyn ApplianceProvider>,
    /// Workload cluster API servers
    pub workloads: Arc<dyn WorkloadClusters>,
}

impl Services {
    /// Route every capability to one simulator.
    #[must_use]
    pub fn simulated(sim: &Simulator) -> Self {
        Self {
            sessions: Arc::new(sim.clone()),
            vms: Arc::new(sim.clone()),
            inventory: Arc::new(sim.clone()),
            appliances: Arc::new(sim.clone()),
            workloads: Arc::new(sim.clone()),
        }
    }
}

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Management cluster objects
    pub store: Arc<dyn ResourceStore>,

    /// Backend capabilities
    pub services: Services,

    /// Online-poller registry, keyed by cluster UID, emitting VSphereCluster keys
    pub triggers: TriggerRegistry<ObjectKey>,

    /// Consecutive failure tracking for the error policy
    pub backoff: Arc<ErrorBackoff>,

    /// Manager configuration
    pub options: ManagerOptions,
}

impl Context {
    /// Build a context and return the receiving end of the trigger channel.
    ///
    /// The receiver must be handed to the VSphereCluster controller's `reconcile_on`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        services: Services,
        options: ManagerOptions,
    ) -> (Self, UnboundedReceiver<ObjectKey>) {
        let (triggers, receiver) = TriggerRegistry::new(options.poll_interval());
        (
            Self {
                store,
                services,
                triggers,
                backoff: Arc::new(ErrorBackoff::new()),
                options,
            },
            receiver,
        )
    }

    /// Open or reuse a vCenter session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be established.
    pub async fn session(
        &self,
        server: &str,
        credentials: &Credentials,
        thumbprint: Option<String>,
    ) -> Result<Session, ServiceError> {
        self.services
            .sessions
            .get_or_create(server, credentials, thumbprint)
            .await
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
