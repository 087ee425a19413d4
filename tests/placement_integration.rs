// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment zone lifecycle against the in-memory store and the simulator.
//!
//! Run with: cargo test --test placement_integration

mod common;

use capv_engine::crd::{
    Bootstrap, FailureDomainHosts, FailureDomainSpec, FailureDomainType, Machine, MachineSpec,
    PlacementConstraint, Topology, VSphereDeploymentZone, VSphereDeploymentZoneSpec,
    VSphereFailureDomain, VSphereFailureDomainSpec,
};
use capv_engine::labels::DEPLOYMENT_ZONE_FINALIZER;
use capv_engine::reconcilers::reconcile_deployment_zone;
use capv_engine::services::{InventoryObject, Tag};
use capv_engine::store::{delete_object, ObjectKey};
use common::{simulated, Simulated};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::time::Duration;

const SERVER: &str = "vcenter.example.com";
const ZONE: &str = "zone-west";
const FAILURE_DOMAIN: &str = "fd-west";
const HOSTS: [&str; 2] = ["esx-0", "esx-1"];

fn host(name: &str) -> InventoryObject {
    InventoryObject::Host {
        datacenter: "DC0".to_string(),
        name: name.to_string(),
    }
}

/// Datacenter region and host group zone, both configured by the controller.
fn failure_domain() -> VSphereFailureDomain {
    let mut fd = VSphereFailureDomain::new(
        FAILURE_DOMAIN,
        VSphereFailureDomainSpec {
            region: FailureDomainSpec {
                name: "k8s-region-west".to_string(),
                r#type: FailureDomainType::Datacenter,
                tag_category: "k8s-region".to_string(),
                auto_configure: Some(true),
            },
            zone: FailureDomainSpec {
                name: "k8s-zone-west-1".to_string(),
                r#type: FailureDomainType::HostGroup,
                tag_category: "k8s-zone".to_string(),
                auto_configure: Some(true),
            },
            topology: Topology {
                datacenter: "DC0".to_string(),
                compute_cluster: Some("DC0_C0".to_string()),
                hosts: Some(FailureDomainHosts {
                    vm_group_name: "west-vms".to_string(),
                    host_group_name: "west-hosts".to_string(),
                }),
                ..Topology::default()
            },
        },
    );
    fd.metadata.uid = Some("uid-fd-west".to_string());
    fd
}

fn zone() -> VSphereDeploymentZone {
    let mut zone = VSphereDeploymentZone::new(
        ZONE,
        VSphereDeploymentZoneSpec {
            server: SERVER.to_string(),
            failure_domain: FAILURE_DOMAIN.to_string(),
            control_plane: Some(true),
            placement_constraint: PlacementConstraint {
                resource_pool: "DC0_C0_RP1".to_string(),
                folder: "vm".to_string(),
            },
        },
    );
    zone.metadata.uid = Some("uid-zone-west".to_string());
    zone
}

fn machine_in_zone(name: &str) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: "workload-1".to_string(),
            bootstrap: Bootstrap::default(),
            infrastructure_ref: None,
            failure_domain: Some(ZONE.to_string()),
        },
    );
    machine.metadata.namespace = Some("default".to_string());
    machine
}

fn seeded() -> Simulated {
    let env = simulated();
    env.sim.add_resource_pool("DC0", "DC0_C0_RP1", "DC0_C0");
    env.sim.add_folder("DC0", "vm");
    env.sim.add_object(InventoryObject::Datacenter("DC0".to_string()));
    env.sim.add_host_group("DC0", "DC0_C0", "west-hosts", &HOSTS);
    for name in HOSTS {
        env.sim.add_object(host(name));
    }
    env.store.seed(&failure_domain()).unwrap();
    env.store.seed(&zone()).unwrap();
    env
}

async fn reconcile(env: &Simulated) -> anyhow::Result<Action> {
    let zone: VSphereDeploymentZone = env
        .get(&ObjectKey::cluster_scoped(ZONE))
        .await
        .expect("zone exists");
    reconcile_deployment_zone(env.ctx.clone(), zone).await
}

#[tokio::test]
async fn test_zone_lifecycle_with_auto_configured_host_group() {
    let env = seeded();

    let action = reconcile(&env).await.unwrap();
    assert_eq!(action, Action::await_change());

    let zone_tag = Tag {
        name: "k8s-zone-west-1".to_string(),
        category: "k8s-zone".to_string(),
    };
    for name in HOSTS {
        assert!(env.sim.tags_of(&host(name)).contains(&zone_tag));
    }
    let region_tags = env
        .sim
        .tags_of(&InventoryObject::Datacenter("DC0".to_string()));
    assert_eq!(region_tags.len(), 1);
    assert_eq!(region_tags[0].name, "k8s-region-west");

    let stored: VSphereDeploymentZone = env.get(&ObjectKey::cluster_scoped(ZONE)).await.unwrap();
    assert_eq!(stored.status.as_ref().and_then(|s| s.ready), Some(true));
    assert!(stored.finalizers().iter().any(|f| f == DEPLOYMENT_ZONE_FINALIZER));

    let fd: VSphereFailureDomain = env
        .get(&ObjectKey::cluster_scoped(FAILURE_DOMAIN))
        .await
        .unwrap();
    assert_eq!(fd.owner_references().len(), 1);
    assert_eq!(fd.owner_references()[0].name, ZONE);

    // A machine placed in the zone holds its deletion
    env.store.seed(&machine_in_zone("md-0")).unwrap();
    delete_object::<VSphereDeploymentZone>(env.store.as_ref(), &ObjectKey::cluster_scoped(ZONE))
        .await
        .unwrap();

    let action = reconcile(&env).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    assert!(env
        .get::<VSphereDeploymentZone>(&ObjectKey::cluster_scoped(ZONE))
        .await
        .is_some());

    delete_object::<Machine>(env.store.as_ref(), &ObjectKey::namespaced("default", "md-0"))
        .await
        .unwrap();

    let action = reconcile(&env).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(env
        .get::<VSphereDeploymentZone>(&ObjectKey::cluster_scoped(ZONE))
        .await
        .is_none());
    assert!(env
        .get::<VSphereFailureDomain>(&ObjectKey::cluster_scoped(FAILURE_DOMAIN))
        .await
        .is_none());
}

#[tokio::test]
async fn test_missing_host_in_group_fails_auto_configure() {
    let env = simulated();
    env.sim.add_resource_pool("DC0", "DC0_C0_RP1", "DC0_C0");
    env.sim.add_folder("DC0", "vm");
    env.sim.add_object(InventoryObject::Datacenter("DC0".to_string()));
    env.sim.add_host_group("DC0", "DC0_C0", "west-hosts", &HOSTS);
    env.sim.add_object(host(HOSTS[0]));
    env.store.seed(&failure_domain()).unwrap();
    env.store.seed(&zone()).unwrap();

    assert!(reconcile(&env).await.is_err());

    let stored: VSphereDeploymentZone = env.get(&ObjectKey::cluster_scoped(ZONE)).await.unwrap();
    assert_eq!(stored.status.as_ref().and_then(|s| s.ready), Some(false));
}
