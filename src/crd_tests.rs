// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{API_GROUP, API_VERSION, CLUSTER_API_GROUP};
    use crate::crd::*;
    use kube::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn test_infrastructure_kinds_share_group_and_version() {
        for crd in [
            VSphereCluster::crd(),
            VSphereMachine::crd(),
            VSphereVM::crd(),
            HAProxyLoadBalancer::crd(),
            NSXTLoadBalancer::crd(),
            VSphereDeploymentZone::crd(),
            VSphereFailureDomain::crd(),
            VSphereClusterIdentity::crd(),
        ] {
            assert_eq!(crd.spec.group, API_GROUP);
            assert_eq!(crd.spec.versions[0].name, API_VERSION);
        }
        assert_eq!(Cluster::crd().spec.group, CLUSTER_API_GROUP);
        assert_eq!(Machine::crd().spec.group, CLUSTER_API_GROUP);
    }

    #[test]
    fn test_placement_kinds_are_cluster_scoped() {
        assert_eq!(VSphereDeploymentZone::crd().spec.scope, "Cluster");
        assert_eq!(VSphereFailureDomain::crd().spec.scope, "Cluster");
        assert_eq!(VSphereClusterIdentity::crd().spec.scope, "Cluster");
        assert_eq!(VSphereCluster::crd().spec.scope, "Namespaced");
        assert_eq!(VSphereMachine::crd().spec.scope, "Namespaced");
    }

    #[test]
    fn test_deployment_zone_spec_from_camel_case() {
        let spec: VSphereDeploymentZoneSpec = serde_json::from_value(json!({
            "server": "vcenter.example.com",
            "failureDomain": "fd-west",
            "controlPlane": true,
            "placementConstraint": {"resourcePool": "DC0_C0_RP1", "folder": "vm"}
        }))
        .unwrap();

        assert_eq!(spec.failure_domain, "fd-west");
        assert_eq!(spec.control_plane, Some(true));
        assert_eq!(spec.placement_constraint.resource_pool, "DC0_C0_RP1");
    }

    #[test]
    fn test_failure_domain_spec_from_camel_case() {
        let spec: VSphereFailureDomainSpec = serde_json::from_value(json!({
            "region": {"name": "k8s-region-west", "type": "Datacenter", "tagCategory": "k8s-region"},
            "zone": {
                "name": "k8s-zone-west-1",
                "type": "HostGroup",
                "tagCategory": "k8s-zone",
                "autoConfigure": true
            },
            "topology": {
                "datacenter": "DC0",
                "computeCluster": "DC0_C0",
                "hosts": {"vmGroupName": "vms", "hostGroupName": "hosts"}
            }
        }))
        .unwrap();

        assert_eq!(spec.region.r#type, FailureDomainType::Datacenter);
        assert_eq!(spec.zone.r#type, FailureDomainType::HostGroup);
        assert_eq!(spec.zone.auto_configure, Some(true));
        assert_eq!(spec.topology.compute_cluster.as_deref(), Some("DC0_C0"));
        assert_eq!(spec.topology.hosts.unwrap().host_group_name, "hosts");
    }

    #[test]
    fn test_cluster_identity_spec_from_camel_case() {
        let spec: VSphereClusterIdentitySpec = serde_json::from_value(json!({
            "secretName": "vcenter-shared",
            "allowedNamespaces": {"selector": {"matchLabels": {"tenant": "a"}}}
        }))
        .unwrap();

        assert_eq!(spec.secret_name, "vcenter-shared");
        let selector = spec.allowed_namespaces.unwrap().selector;
        assert_eq!(selector.match_labels.unwrap().get("tenant").map(String::as_str), Some("a"));

        let spec: VSphereClusterIdentitySpec =
            serde_json::from_value(json!({"secretName": "vcenter-shared"})).unwrap();
        assert!(spec.allowed_namespaces.is_none());
    }

    #[test]
    fn test_identity_reference_kinds() {
        let reference: VSphereIdentityReference =
            serde_json::from_value(json!({"kind": "Secret", "name": "creds"})).unwrap();
        assert_eq!(reference.kind, IdentityKind::Secret);

        let reference: VSphereIdentityReference =
            serde_json::from_value(json!({"kind": "VSphereClusterIdentity", "name": "global"}))
                .unwrap();
        assert_eq!(reference.kind, IdentityKind::VSphereClusterIdentity);
    }

    #[test]
    fn test_true_condition_omits_empty_fields() {
        let condition = Condition {
            r#type: "Ready".to_string(),
            status: "True".to_string(),
            ..Condition::default()
        };
        assert_eq!(
            serde_json::to_value(&condition).unwrap(),
            json!({"type": "Ready", "status": "True"})
        );
    }

    #[test]
    fn test_condition_severity_orders_by_impact() {
        assert!(ConditionSeverity::Info < ConditionSeverity::Warning);
        assert!(ConditionSeverity::Warning < ConditionSeverity::Error);
    }

    #[test]
    fn test_api_endpoint_is_zero() {
        assert!(APIEndpoint::default().is_zero());
        assert!(!APIEndpoint {
            host: "10.0.0.1".to_string(),
            port: 6443,
        }
        .is_zero());
    }
}
