// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module
//!
//! Reasons and condition types are matched programmatically, so they must stay
//! CamelCase and distinct.

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;
    use std::collections::HashSet;

    const CONDITION_TYPES: &[&str] = &[
        CONDITION_TYPE_READY,
        CONDITION_TYPE_VCENTER_AVAILABLE,
        CONDITION_TYPE_LOAD_BALANCER_AVAILABLE,
        CONDITION_TYPE_CCM_AVAILABLE,
        CONDITION_TYPE_CSI_AVAILABLE,
        CONDITION_TYPE_VM_PROVISIONED,
        CONDITION_TYPE_PLACEMENT_CONSTRAINT_MET,
        CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED,
        CONDITION_TYPE_SERVICE_DISCOVERY_READY,
    ];

    const REASONS: &[&str] = &[
        REASON_VCENTER_UNREACHABLE,
        REASON_LOAD_BALANCER_PROVISIONING,
        REASON_LOAD_BALANCER_PROVISIONING_FAILED,
        REASON_CCM_PROVISIONING_FAILED,
        REASON_CSI_PROVISIONING_FAILED,
        REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE,
        REASON_WAITING_FOR_BOOTSTRAP_DATA,
        REASON_WAITING_FOR_CONTROL_PLANE_AVAILABLE,
        REASON_WAITING_FOR_STATIC_IP_ALLOCATION,
        REASON_WAITING_FOR_NETWORK_ADDRESSES,
        REASON_WAITING_FOR_PROVIDER_ID,
        REASON_CLONING,
        REASON_POWERING_ON,
        REASON_TASK_FAILURE,
        REASON_DELETING,
        REASON_DELETION_FAILED,
        REASON_RESOURCE_POOL_NOT_FOUND,
        REASON_FOLDER_NOT_FOUND,
        REASON_FAILURE_DOMAIN_FAILED,
        REASON_FAILURE_DOMAIN_AUTO_CONFIGURE_FAILED,
        REASON_SUPERVISOR_HEADLESS_SERVICE_SETUP_FAILED,
    ];

    fn is_camel_case(value: &str) -> bool {
        value.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && value.chars().all(|c| c.is_ascii_alphanumeric())
    }

    #[test]
    fn test_condition_types_are_camel_case_and_unique() {
        for value in CONDITION_TYPES {
            assert!(is_camel_case(value), "{value} is not CamelCase");
        }
        let unique: HashSet<_> = CONDITION_TYPES.iter().collect();
        assert_eq!(unique.len(), CONDITION_TYPES.len());
    }

    #[test]
    fn test_reasons_are_camel_case_and_unique() {
        for value in REASONS {
            assert!(is_camel_case(value), "{value} is not CamelCase");
        }
        let unique: HashSet<_> = REASONS.iter().collect();
        assert_eq!(unique.len(), REASONS.len());
    }

    #[test]
    fn test_status_values() {
        assert_eq!(STATUS_TRUE, "True");
        assert_eq!(STATUS_FALSE, "False");
        assert_eq!(STATUS_UNKNOWN, "Unknown");
    }

    #[test]
    fn test_placement_reasons() {
        assert_eq!(REASON_RESOURCE_POOL_NOT_FOUND, "ResourcePoolNotFound");
        assert_eq!(REASON_FOLDER_NOT_FOUND, "FolderNotFound");
        assert_eq!(CONDITION_TYPE_FAILURE_DOMAIN_VALIDATED, "VSphereFailureDomainValidated");
    }
}
