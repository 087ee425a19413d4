// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `machine.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{
        CPIWorkspaceConfig, CloudProviderConfiguration, NetworkStatus, PlacementConstraint,
        Topology, VSphereDeploymentZoneSpec, VSphereFailureDomainSpec, VSphereVMStatus,
    };
    use crate::reconcilers::finalizers::has_finalizer;
    use crate::reconcilers::fixtures::{
        cluster, dhcp_device, harness, machine, vsphere_cluster, vsphere_machine, Harness, NS,
        SERVER, TEMPLATE,
    };
    use crate::reconcilers::resources::controller_owner;
    use crate::reconcilers::status::{create_condition, is_true};
    use crate::status_reasons::{REASON_POWERING_ON, STATUS_FALSE};
    use crate::store::ObjectKey;

    const UUID: &str = "4216AAAA-0000-4000-8000-000000000001";

    fn seeded() -> Harness {
        let h = harness();
        h.seed(&cluster("c1"));
        h.seed(&vsphere_cluster("c1"));
        h
    }

    fn seed_machine(h: &Harness, name: &str, control_plane: bool) {
        h.seed(&machine(name, "c1", control_plane));
        h.seed(&vsphere_machine(name, "c1", control_plane));
    }

    async fn reconcile(h: &Harness, name: &str) -> Result<Action> {
        let m: VSphereMachine = h.fetch(name).await;
        reconcile_vsphere_machine(Arc::new(h.ctx.clone()), m).await
    }

    fn reason(m: &VSphereMachine) -> Option<String> {
        find_condition(m.conditions(), CONDITION_TYPE_VM_PROVISIONED).and_then(|c| c.reason.clone())
    }

    fn ready_vm(name: &str, bios_uuid: &str, addresses: &[&str]) -> VSphereVM {
        let mut vm = VSphereVM::new(
            name,
            VSphereVMSpec {
                bios_uuid: Some(bios_uuid.to_string()),
                clone_spec: VirtualMachineCloneSpec {
                    template: TEMPLATE.to_string(),
                    network: NetworkSpec {
                        devices: vec![dhcp_device("VM Network")],
                        ..NetworkSpec::default()
                    },
                    ..VirtualMachineCloneSpec::default()
                },
                ..VSphereVMSpec::default()
            },
        );
        vm.metadata.namespace = Some(NS.to_string());
        vm.status = Some(VSphereVMStatus {
            ready: true,
            addresses: addresses.iter().map(|a| (*a).to_string()).collect(),
            network: vec![NetworkStatus {
                connected: true,
                ip_addrs: addresses.iter().map(|a| (*a).to_string()).collect(),
                mac_addr: "00:50:56:00:00:01".to_string(),
                network_name: "VM Network".to_string(),
            }],
            ..VSphereVMStatus::default()
        });
        vm
    }

    #[test]
    fn test_clone_fields_fall_back_to_workspace_then_cluster() {
        let mut vsc = vsphere_cluster("c1");
        vsc.spec.thumbprint = Some("AA:BB".to_string());
        vsc.spec.cloud_provider_configuration = CloudProviderConfiguration {
            workspace: CPIWorkspaceConfig {
                server: String::new(),
                datacenter: "ws-dc".to_string(),
                folder: "ws-folder".to_string(),
                datastore: "ws-ds".to_string(),
                resource_pool: "ws-rp".to_string(),
            },
            ..CloudProviderConfiguration::default()
        };
        let own = VirtualMachineCloneSpec {
            template: TEMPLATE.to_string(),
            folder: "machine-folder".to_string(),
            ..VirtualMachineCloneSpec::default()
        };

        let resolved = resolve_clone_spec(&own, None, Some(&vsc));
        assert_eq!(resolved.server, SERVER);
        assert_eq!(resolved.thumbprint, "AA:BB");
        assert_eq!(resolved.datacenter, "ws-dc");
        assert_eq!(resolved.folder, "machine-folder");
        assert_eq!(resolved.datastore, "ws-ds");
        assert_eq!(resolved.resource_pool, "ws-rp");
        assert_eq!(resolved.template, TEMPLATE);

        // resolution is stable
        assert_eq!(resolve_clone_spec(&own, None, Some(&vsc)), resolved);

        let bare = resolve_clone_spec(&own, None, None);
        assert!(bare.server.is_empty());
        assert_eq!(bare.folder, "machine-folder");
    }

    #[test]
    fn test_zone_placement_overrides_machine_fields() {
        let own = VirtualMachineCloneSpec {
            server: "other.example.com".to_string(),
            datacenter: "dc-own".to_string(),
            network: NetworkSpec {
                devices: vec![dhcp_device("own-net")],
                ..NetworkSpec::default()
            },
            ..VirtualMachineCloneSpec::default()
        };
        let zone = ZonePlacement {
            server: "zone.example.com".to_string(),
            folder: "zone-folder".to_string(),
            resource_pool: "zone-rp".to_string(),
            datacenter: "zone-dc".to_string(),
            datastore: "zone-ds".to_string(),
            networks: vec!["net-a".to_string(), "net-b".to_string()],
        };

        let resolved = resolve_clone_spec(&own, Some(&zone), None);
        assert_eq!(resolved.server, "zone.example.com");
        assert_eq!(resolved.datacenter, "zone-dc");
        assert_eq!(resolved.datastore, "zone-ds");
        assert_eq!(resolved.folder, "zone-folder");
        assert_eq!(resolved.resource_pool, "zone-rp");
        let names: Vec<&str> = resolved
            .network
            .devices
            .iter()
            .map(|d| d.network_name.as_str())
            .collect();
        assert_eq!(names, vec!["net-a", "net-b"]);
        assert_eq!(resolved.network.devices[0].dhcp4, Some(true));
    }

    #[test]
    fn test_provider_id_from_bios_uuid() {
        assert_eq!(provider_id_from_bios_uuid("").unwrap(), None);
        assert_eq!(
            provider_id_from_bios_uuid(UUID).unwrap().as_deref(),
            Some("vsphere://4216aaaa-0000-4000-8000-000000000001")
        );
        assert!(provider_id_from_bios_uuid("abcde").is_err());
        assert!(provider_id_from_bios_uuid("4216aaaa-0000-4000-8000-00000000000g").is_err());
    }

    #[test]
    fn test_static_ip_allocation_detection() {
        let mut network = NetworkSpec {
            devices: vec![dhcp_device("VM Network")],
            ..NetworkSpec::default()
        };
        assert!(!is_waiting_for_static_ip_allocation(&network));

        network.devices.push(NetworkDeviceSpec {
            network_name: "static".to_string(),
            ..NetworkDeviceSpec::default()
        });
        assert!(is_waiting_for_static_ip_allocation(&network));

        network.devices[1].ip_addrs = vec!["192.168.1.10/24".to_string()];
        assert!(!is_waiting_for_static_ip_allocation(&network));
    }

    #[tokio::test]
    async fn test_missing_owner_machine_is_left_alone() {
        let h = seeded();
        h.seed(&vsphere_machine("cp-0", "c1", true));

        let action = reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_waits_for_cluster_infrastructure() {
        let h = harness();
        let mut c = cluster("c1");
        c.status.as_mut().unwrap().infrastructure_ready = false;
        h.seed(&c);
        seed_machine(&h, "cp-0", true);

        let action = reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(action, Action::await_change());
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert!(has_finalizer(&stored.metadata, MACHINE_FINALIZER));
        assert_eq!(reason(&stored).as_deref(), Some(REASON_WAITING_FOR_CLUSTER_INFRASTRUCTURE));
        assert!(h.get::<VSphereVM>("cp-0").await.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_gate_depends_on_role() {
        let h = seeded();
        for (name, cp) in [("cp-0", true), ("w-0", false)] {
            let mut m = machine(name, "c1", cp);
            m.spec.bootstrap.data_secret_name = None;
            h.seed(&m);
            h.seed(&vsphere_machine(name, "c1", cp));
        }

        reconcile(&h, "cp-0").await.unwrap();
        reconcile(&h, "w-0").await.unwrap();

        let cp: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&cp).as_deref(), Some(REASON_WAITING_FOR_BOOTSTRAP_DATA));
        let worker: VSphereMachine = h.fetch("w-0").await;
        assert_eq!(
            reason(&worker).as_deref(),
            Some(REASON_WAITING_FOR_CONTROL_PLANE_AVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_creates_vsphere_vm_with_resolved_placement() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);

        let action = reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(action, Action::await_change());

        let vm: VSphereVM = h.fetch("cp-0").await;
        assert_eq!(vm.spec.clone_spec.server, SERVER);
        assert_eq!(vm.spec.clone_spec.template, TEMPLATE);
        assert_eq!(
            vm.spec.bootstrap_ref.as_ref().map(|r| r.name.as_str()),
            Some("cp-0-bootstrap")
        );
        assert_eq!(
            controller_owner(&vm.metadata).map(|o| o.uid.as_str()),
            Some("uid-vspheremachine-cp-0")
        );
        let labels = vm.metadata.labels.clone().unwrap_or_default();
        assert_eq!(labels.get(CLUSTER_NAME_LABEL).map(String::as_str), Some("c1"));
        assert!(labels.contains_key(CONTROL_PLANE_LABEL));

        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&stored).as_deref(), Some(REASON_CLONING));
        assert!(!stored.status.unwrap_or_default().ready);
    }

    #[tokio::test]
    async fn test_vm_reason_is_mirrored_while_not_ready() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        let mut vm = ready_vm("cp-0", UUID, &[]);
        let status = vm.status.as_mut().unwrap();
        status.ready = false;
        status.conditions = vec![create_condition(
            CONDITION_TYPE_VM_PROVISIONED,
            STATUS_FALSE,
            Some(ConditionSeverity::Info),
            REASON_POWERING_ON,
            "",
        )];
        h.seed(&vm);

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&stored).as_deref(), Some(REASON_POWERING_ON));
    }

    #[tokio::test]
    async fn test_ready_vm_sets_provider_id_and_addresses() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        h.seed(&ready_vm("cp-0", UUID, &["10.0.0.5"]));

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(
            stored.spec.provider_id.as_deref(),
            Some("vsphere://4216aaaa-0000-4000-8000-000000000001")
        );
        let status = stored.status.clone().unwrap();
        assert!(status.ready);
        assert_eq!(
            status.addresses,
            vec![
                MachineAddress {
                    r#type: ADDRESS_INTERNAL_IP.to_string(),
                    address: "10.0.0.5".to_string(),
                },
                MachineAddress {
                    r#type: ADDRESS_INTERNAL_DNS.to_string(),
                    address: "cp-0".to_string(),
                },
            ]
        );
        assert_eq!(status.network.len(), 1);
        assert!(is_true(&stored, CONDITION_TYPE_VM_PROVISIONED));

        let writes = h.store.writes();
        reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(h.store.writes(), writes);
    }

    #[tokio::test]
    async fn test_existing_provider_id_is_kept() {
        let h = seeded();
        h.seed(&machine("cp-0", "c1", true));
        let mut m = vsphere_machine("cp-0", "c1", true);
        m.spec.provider_id = Some("vsphere://preset".to_string());
        h.seed(&m);
        h.seed(&ready_vm("cp-0", UUID, &["10.0.0.5"]));

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(stored.spec.provider_id.as_deref(), Some("vsphere://preset"));
    }

    #[tokio::test]
    async fn test_missing_bios_uuid_waits_for_provider_id() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        h.seed(&ready_vm("cp-0", "", &["10.0.0.5"]));

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&stored).as_deref(), Some(REASON_WAITING_FOR_PROVIDER_ID));
        assert!(stored.spec.provider_id.is_none());
    }

    #[tokio::test]
    async fn test_invalid_bios_uuid_is_an_error() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        h.seed(&ready_vm("cp-0", "abcde", &["10.0.0.5"]));

        assert!(reconcile(&h, "cp-0").await.is_err());
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert!(stored.spec.provider_id.is_none());
    }

    #[tokio::test]
    async fn test_static_device_without_addresses_waits_for_allocation() {
        let h = seeded();
        h.seed(&machine("cp-0", "c1", true));
        let mut m = vsphere_machine("cp-0", "c1", true);
        m.spec.clone_spec.network.devices = vec![NetworkDeviceSpec {
            network_name: "VM Network".to_string(),
            ..NetworkDeviceSpec::default()
        }];
        h.seed(&m);
        h.seed(&ready_vm("cp-0", UUID, &[]));

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(
            reason(&stored).as_deref(),
            Some(REASON_WAITING_FOR_STATIC_IP_ALLOCATION)
        );
    }

    #[tokio::test]
    async fn test_dhcp_device_without_addresses_waits_for_network() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        h.seed(&ready_vm("cp-0", UUID, &[]));

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&stored).as_deref(), Some(REASON_WAITING_FOR_NETWORK_ADDRESSES));
        assert!(!stored.status.unwrap_or_default().ready);
    }

    #[tokio::test]
    async fn test_allocated_static_addresses_are_preserved() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        let mut vm = ready_vm("cp-0", UUID, &["192.168.1.10"]);
        vm.spec.clone_spec.network.devices[0].ip_addrs = vec!["192.168.1.10/24".to_string()];
        h.seed(&vm);

        reconcile(&h, "cp-0").await.unwrap();
        let stored: VSphereVM = h.fetch("cp-0").await;
        assert_eq!(
            stored.spec.clone_spec.network.devices[0].ip_addrs,
            vec!["192.168.1.10/24".to_string()]
        );
    }

    #[tokio::test]
    async fn test_machine_in_zone_uses_zone_placement() {
        let h = seeded();
        let mut zone = VSphereDeploymentZone::new(
            "zone-a",
            VSphereDeploymentZoneSpec {
                server: "zone.example.com".to_string(),
                failure_domain: "fd-a".to_string(),
                control_plane: Some(true),
                placement_constraint: PlacementConstraint {
                    resource_pool: "rp-a".to_string(),
                    folder: "folder-a".to_string(),
                },
            },
        );
        zone.metadata.uid = Some("uid-zone-a".to_string());
        h.seed(&zone);
        h.seed(&VSphereFailureDomain::new(
            "fd-a",
            VSphereFailureDomainSpec {
                topology: Topology {
                    datacenter: "dc-a".to_string(),
                    datastore: Some("ds-a".to_string()),
                    networks: vec!["net-a".to_string()],
                    ..Topology::default()
                },
                ..VSphereFailureDomainSpec::default()
            },
        ));
        let mut m = machine("cp-0", "c1", true);
        m.spec.failure_domain = Some("zone-a".to_string());
        h.seed(&m);
        h.seed(&vsphere_machine("cp-0", "c1", true));

        reconcile(&h, "cp-0").await.unwrap();
        let vm: VSphereVM = h.fetch("cp-0").await;
        let spec = vm.spec.clone_spec;
        assert_eq!(spec.server, "zone.example.com");
        assert_eq!(spec.datacenter, "dc-a");
        assert_eq!(spec.datastore, "ds-a");
        assert_eq!(spec.folder, "folder-a");
        assert_eq!(spec.resource_pool, "rp-a");
        assert_eq!(spec.network.devices[0].network_name, "net-a");
    }

    #[tokio::test]
    async fn test_unknown_zone_keeps_machine_placement() {
        let h = seeded();
        assert!(zone_placement(&h.ctx, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_vm_before_releasing_machine() {
        let h = seeded();
        seed_machine(&h, "cp-0", true);
        reconcile(&h, "cp-0").await.unwrap();
        assert!(h.get::<VSphereVM>("cp-0").await.is_some());

        delete_object::<VSphereMachine>(h.store.as_ref(), &ObjectKey::namespaced(NS, "cp-0"))
            .await
            .unwrap();

        let action = reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(h.get::<VSphereVM>("cp-0").await.is_none());
        let stored: VSphereMachine = h.fetch("cp-0").await;
        assert_eq!(reason(&stored).as_deref(), Some(REASON_DELETING));

        let action = reconcile(&h, "cp-0").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.get::<VSphereMachine>("cp-0").await.is_none());
    }

    #[test]
    fn test_preferred_ip_honors_cidr() {
        let mut m = vsphere_machine("cp-0", "c1", true);
        assert_eq!(preferred_ip_address(&m).unwrap(), None);

        m.status = Some(crate::crd::VSphereMachineStatus {
            addresses: vec![
                MachineAddress {
                    r#type: ADDRESS_INTERNAL_DNS.to_string(),
                    address: "cp-0".to_string(),
                },
                MachineAddress {
                    r#type: ADDRESS_INTERNAL_IP.to_string(),
                    address: "10.0.0.5".to_string(),
                },
                MachineAddress {
                    r#type: ADDRESS_INTERNAL_IP.to_string(),
                    address: "192.168.10.7".to_string(),
                },
            ],
            ..Default::default()
        });
        assert_eq!(preferred_ip_address(&m).unwrap().as_deref(), Some("10.0.0.5"));

        m.spec.clone_spec.network.preferred_api_server_cidr = Some("192.168.0.0/16".to_string());
        assert_eq!(preferred_ip_address(&m).unwrap().as_deref(), Some("192.168.10.7"));

        m.spec.clone_spec.network.preferred_api_server_cidr = Some("172.16.0.0/12".to_string());
        assert_eq!(preferred_ip_address(&m).unwrap(), None);

        m.spec.clone_spec.network.preferred_api_server_cidr = Some("not-a-cidr".to_string());
        assert!(preferred_ip_address(&m).is_err());
    }
}
