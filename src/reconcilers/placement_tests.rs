// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `placement.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::FailureDomainHosts;
    use crate::services::{MockInventory, Simulator};

    fn session() -> Session {
        Session {
            server: "vcenter.example.com".to_string(),
            username: "manager".to_string(),
            id: "session-1".to_string(),
        }
    }

    fn topology() -> Topology {
        Topology {
            datacenter: "DC0".to_string(),
            compute_cluster: Some("DC0_C0".to_string()),
            ..Topology::default()
        }
    }

    fn constraint(resource_pool: &str, folder: &str) -> PlacementConstraint {
        PlacementConstraint {
            resource_pool: resource_pool.to_string(),
            folder: folder.to_string(),
        }
    }

    fn domain(name: &str, category: &str, r#type: FailureDomainType) -> FailureDomainSpec {
        FailureDomainSpec {
            name: name.to_string(),
            r#type,
            tag_category: category.to_string(),
            auto_configure: None,
        }
    }

    fn inventory() -> Simulator {
        let sim = Simulator::new();
        sim.add_resource_pool("DC0", "DC0_C0_RP1", "DC0_C0");
        sim.add_resource_pool("DC0", "DC0_C1_RP1", "DC0_C1");
        sim.add_folder("DC0", "vm");
        sim
    }

    fn compute_cluster() -> InventoryObject {
        InventoryObject::ComputeCluster {
            datacenter: "DC0".to_string(),
            name: "DC0_C0".to_string(),
        }
    }

    fn host(name: &str) -> InventoryObject {
        InventoryObject::Host {
            datacenter: "DC0".to_string(),
            name: name.to_string(),
        }
    }

    fn host_group_topology() -> Topology {
        Topology {
            hosts: Some(FailureDomainHosts {
                vm_group_name: "vm-group".to_string(),
                host_group_name: "group-one".to_string(),
            }),
            ..topology()
        }
    }

    #[tokio::test]
    async fn test_resource_pool_of_topology_cluster_is_accepted() {
        let sim = inventory();
        verify_placement(&sim, &session(), &constraint("DC0_C0_RP1", "vm"), &topology())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resource_pool_of_other_cluster_is_rejected() {
        let sim = inventory();
        let err = verify_placement(&sim, &session(), &constraint("DC0_C1_RP1", "vm"), &topology())
            .await
            .unwrap_err();

        assert_eq!(err.reason(), REASON_RESOURCE_POOL_NOT_FOUND);
        assert!(err.to_string().contains("resource pool DC0_C1_RP1 is misconfigured"));
        assert!(err.to_string().contains("expected DC0_C0"));
    }

    #[tokio::test]
    async fn test_missing_resource_pool_is_rejected() {
        let sim = inventory();
        let err = verify_placement(&sim, &session(), &constraint("nope", ""), &topology())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), REASON_RESOURCE_POOL_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_any_owner_accepted_without_topology_cluster() {
        let sim = inventory();
        let topology = Topology {
            compute_cluster: None,
            ..topology()
        };
        verify_placement(&sim, &session(), &constraint("DC0_C1_RP1", ""), &topology)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_folder_is_rejected() {
        let sim = inventory();
        let err = verify_placement(&sim, &session(), &constraint("DC0_C0_RP1", "missing"), &topology())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), REASON_FOLDER_NOT_FOUND);
        assert!(err.to_string().contains("folder missing"));
    }

    #[tokio::test]
    async fn test_empty_constraint_checks_nothing() {
        let mock = MockInventory::new();
        verify_placement(&mock, &session(), &constraint("", ""), &topology())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inventory_error_maps_to_resource_pool_reason() {
        let mut mock = MockInventory::new();
        mock.expect_resource_pool_owner()
            .returning(|_, _, _| Err(ServiceError::Inventory("finder failed".to_string())));

        let err = verify_placement(&mock, &session(), &constraint("DC0_C0_RP1", ""), &topology())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), REASON_RESOURCE_POOL_NOT_FOUND);
        assert!(err.to_string().contains("finder failed"));
    }

    #[tokio::test]
    async fn test_datacenter_region_tag() {
        let sim = inventory();
        let region = domain("k8s-region-west", "k8s-region", FailureDomainType::Datacenter);

        sim.add_object(InventoryObject::Datacenter("DC0".to_string()));
        let err = verify_failure_domain(&sim, &session(), &region, &topology())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureDomainError::TagNotAttached { .. }));
        assert_eq!(err.reason(), REASON_FAILURE_DOMAIN_FAILED);

        sim.add_tag(InventoryObject::Datacenter("DC0".to_string()), "k8s-region", "k8s-region-west");
        verify_failure_domain(&sim, &session(), &region, &topology())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tag_in_wrong_category_is_rejected() {
        let sim = inventory();
        sim.add_tag(compute_cluster(), "diff-k8s-region", "k8s-region-west-2");
        let zone = domain("k8s-region-west-2", "k8s-region", FailureDomainType::ComputeCluster);

        assert!(verify_failure_domain(&sim, &session(), &zone, &topology())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_compute_cluster_zone_tag() {
        let sim = inventory();
        sim.add_tag(compute_cluster(), "k8s-zone", "k8s-zone-west-1");
        let zone = domain("k8s-zone-west-1", "k8s-zone", FailureDomainType::ComputeCluster);

        verify_failure_domain(&sim, &session(), &zone, &topology())
            .await
            .unwrap();

        let no_cluster = Topology {
            compute_cluster: None,
            ..topology()
        };
        let err = verify_failure_domain(&sim, &session(), &zone, &no_cluster)
            .await
            .unwrap_err();
        assert!(matches!(err, FailureDomainError::MissingComputeCluster(_)));
    }

    #[tokio::test]
    async fn test_unknown_object_is_an_inventory_error() {
        let sim = inventory();
        let zone = domain("k8s-zone-west-1", "k8s-zone", FailureDomainType::ComputeCluster);

        let err = verify_failure_domain(&sim, &session(), &zone, &topology())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureDomainError::Inventory(_)));
    }

    #[tokio::test]
    async fn test_host_group_needs_every_host_tagged() {
        let sim = inventory();
        sim.add_host_group("DC0", "DC0_C0", "group-one", &["DC0_C0_H0", "DC0_C0_H1"]);
        sim.add_object(host("DC0_C0_H0"));
        sim.add_object(host("DC0_C0_H1"));
        let zone = domain("k8s-region-west-2", "k8s-region", FailureDomainType::HostGroup);

        assert!(verify_failure_domain(&sim, &session(), &zone, &host_group_topology())
            .await
            .is_err());

        sim.add_tag(host("DC0_C0_H0"), "k8s-region", "k8s-region-west-2");
        let err = verify_failure_domain(&sim, &session(), &zone, &host_group_topology())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("DC0_C0_H1"));

        sim.add_tag(host("DC0_C0_H1"), "k8s-region", "k8s-region-west-2");
        verify_failure_domain(&sim, &session(), &zone, &host_group_topology())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_host_group_requires_group_in_topology() {
        let sim = inventory();
        let zone = domain("zone", "k8s-zone", FailureDomainType::HostGroup);

        let err = verify_failure_domain(&sim, &session(), &zone, &topology())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureDomainError::MissingHostGroup));

        sim.add_host_group("DC0", "DC0_C0", "group-one", &[]);
        let err = verify_failure_domain(&sim, &session(), &zone, &host_group_topology())
            .await
            .unwrap_err();
        assert!(matches!(err, FailureDomainError::EmptyHostGroup(_)));
    }

    #[tokio::test]
    async fn test_auto_configure_attaches_tags() {
        let sim = inventory();
        sim.add_object(compute_cluster());
        sim.add_host_group("DC0", "DC0_C0", "group-one", &["DC0_C0_H0", "DC0_C0_H1"]);
        sim.add_object(host("DC0_C0_H0"));
        sim.add_object(host("DC0_C0_H1"));

        let mut zone = domain("k8s-us-east-1", "k8s-zone", FailureDomainType::ComputeCluster);
        zone.auto_configure = Some(true);
        verify_failure_domain(&sim, &session(), &zone, &topology())
            .await
            .unwrap();
        assert_eq!(
            sim.tags_of(&compute_cluster()),
            vec![Tag {
                name: "k8s-us-east-1".to_string(),
                category: "k8s-zone".to_string(),
            }]
        );

        let mut hosts = domain("k8s-us-east-1a", "k8s-zone", FailureDomainType::HostGroup);
        hosts.auto_configure = Some(true);
        verify_failure_domain(&sim, &session(), &hosts, &host_group_topology())
            .await
            .unwrap();
        assert_eq!(sim.tags_of(&host("DC0_C0_H0")).len(), 1);
        assert_eq!(sim.tags_of(&host("DC0_C0_H1")).len(), 1);

        // Verification passes once attached.
        hosts.auto_configure = None;
        verify_failure_domain(&sim, &session(), &hosts, &host_group_topology())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auto_configure_failure_has_its_own_reason() {
        let sim = inventory();
        let mut region = domain("k8s-region-west", "k8s-region", FailureDomainType::Datacenter);
        region.auto_configure = Some(true);

        let err = verify_failure_domain(&sim, &session(), &region, &topology())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), REASON_FAILURE_DOMAIN_AUTO_CONFIGURE_FAILED);
    }
}
