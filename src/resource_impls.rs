// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`Conditioned`] implementations for every resource carrying status conditions.

use crate::crd::{
    Condition, HAProxyLoadBalancer, NSXTLoadBalancer, VSphereCluster, VSphereClusterIdentity,
    VSphereDeploymentZone, VSphereMachine, VSphereVM,
};
use crate::reconcilers::status::Conditioned;

/// Implement [`Conditioned`] for a resource whose status has a `conditions` field.
macro_rules! impl_conditioned {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Conditioned for $kind {
                fn conditions(&self) -> &[Condition] {
                    self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
                }

                fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                    &mut self.status.get_or_insert_with(Default::default).conditions
                }
            }
        )+
    };
}

impl_conditioned!(
    VSphereCluster,
    VSphereMachine,
    VSphereVM,
    HAProxyLoadBalancer,
    NSXTLoadBalancer,
    VSphereDeploymentZone,
    VSphereClusterIdentity,
);

#[cfg(test)]
#[path = "resource_impls_tests.rs"]
mod resource_impls_tests;
