// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared builders for reconciler unit tests.

use super::resources::owner_reference;
use crate::config::ManagerOptions;
use crate::constants::{KIND_VSPHERE_CLUSTER, KIND_VSPHERE_MACHINE};
use crate::context::{Context, Services};
use crate::crd::{
    AllowedNamespaces, Bootstrap, Cluster, ClusterSpec, ClusterStatus, HAProxyLoadBalancer,
    HAProxyLoadBalancerSpec, Machine, MachineAddress, MachineSpec, NSXTLoadBalancer,
    NSXTLoadBalancerSpec, NetworkDeviceSpec, NetworkSpec, ObjectReference, VSphereCluster,
    VSphereClusterIdentity, VSphereClusterIdentitySpec, VSphereClusterIdentityStatus,
    VSphereClusterSpec, VSphereMachine, VSphereMachineSpec, VSphereMachineStatus,
    VirtualMachineCloneSpec, ADDRESS_INTERNAL_IP,
};
use crate::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};
use crate::services::Simulator;
use crate::store::{get_object, MemoryStore, ObjectKey};
use futures::channel::mpsc::UnboundedReceiver;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NS: &str = "default";
pub const SERVER: &str = "vcenter.example.com";
pub const TEMPLATE: &str = "ubuntu-2204-kube-v1.31";

/// A context wired to an in-memory store and a simulator.
pub struct Harness {
    pub ctx: Context,
    pub store: Arc<MemoryStore>,
    pub sim: Simulator,
    pub triggers: UnboundedReceiver<ObjectKey>,
}

pub fn harness() -> Harness {
    harness_with(Simulator::new())
}

pub fn harness_with(sim: Simulator) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let options = ManagerOptions {
        poll_interval_ms: 10,
        username: "manager".to_string(),
        password: "manager-password".to_string(),
        ..ManagerOptions::default()
    };
    let (ctx, triggers) = Context::new(store.clone(), Services::simulated(&sim), options);
    Harness {
        ctx,
        store,
        sim,
        triggers,
    }
}

impl Harness {
    /// Seed an object, status included.
    pub fn seed<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        self.store.seed(obj).unwrap();
    }

    /// Stored copy of a namespaced object in [`NS`].
    pub async fn get<K>(&self, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        get_object(self.store.as_ref(), &ObjectKey::namespaced(NS, name))
            .await
            .unwrap()
    }

    /// Stored copy of a namespaced object in [`NS`] that must exist.
    pub async fn fetch<K>(&self, name: &str) -> K
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.get(name).await.unwrap()
    }

    /// Stored copy of a cluster-scoped object.
    pub async fn get_global<K>(&self, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        get_object(self.store.as_ref(), &ObjectKey::cluster_scoped(name))
            .await
            .unwrap()
    }
}

fn labels(cluster: &str, control_plane: bool) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    labels
}

/// Cluster API cluster with ready infrastructure and an uninitialized control plane.
pub fn cluster(name: &str) -> Cluster {
    let mut c = Cluster::new(
        name,
        ClusterSpec {
            infrastructure_ref: Some(ObjectReference {
                api_version: crate::constants::API_GROUP_VERSION.to_string(),
                kind: KIND_VSPHERE_CLUSTER.to_string(),
                name: name.to_string(),
                namespace: None,
            }),
            ..ClusterSpec::default()
        },
    );
    c.metadata.namespace = Some(NS.to_string());
    c.metadata.uid = Some(format!("uid-cluster-{name}"));
    c.status = Some(ClusterStatus {
        infrastructure_ready: true,
        control_plane_initialized: false,
    });
    c
}

/// VSphereCluster owned by the Cluster of the same name.
pub fn vsphere_cluster(name: &str) -> VSphereCluster {
    let mut c = VSphereCluster::new(
        name,
        VSphereClusterSpec {
            server: SERVER.to_string(),
            ..VSphereClusterSpec::default()
        },
    );
    c.metadata.namespace = Some(NS.to_string());
    c.metadata.uid = Some(format!("uid-vspherecluster-{name}"));
    c.metadata.labels = Some(labels(name, false));
    c.metadata.owner_references = Some(vec![owner_reference(&cluster(name), false)]);
    c
}

/// Machine with bootstrap data.
pub fn machine(name: &str, cluster: &str, control_plane: bool) -> Machine {
    let mut m = Machine::new(
        name,
        MachineSpec {
            cluster_name: cluster.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: Some(format!("{name}-bootstrap")),
            },
            infrastructure_ref: Some(ObjectReference {
                api_version: crate::constants::API_GROUP_VERSION.to_string(),
                kind: KIND_VSPHERE_MACHINE.to_string(),
                name: name.to_string(),
                namespace: None,
            }),
            failure_domain: None,
        },
    );
    m.metadata.namespace = Some(NS.to_string());
    m.metadata.uid = Some(format!("uid-machine-{name}"));
    m.metadata.labels = Some(labels(cluster, control_plane));
    m
}

/// DHCP network device.
pub fn dhcp_device(network: &str) -> NetworkDeviceSpec {
    NetworkDeviceSpec {
        network_name: network.to_string(),
        dhcp4: Some(true),
        ..NetworkDeviceSpec::default()
    }
}

/// VSphereMachine owned by the Machine of the same name.
pub fn vsphere_machine(name: &str, cluster: &str, control_plane: bool) -> VSphereMachine {
    let mut m = VSphereMachine::new(
        name,
        VSphereMachineSpec {
            clone_spec: VirtualMachineCloneSpec {
                template: TEMPLATE.to_string(),
                network: NetworkSpec {
                    devices: vec![dhcp_device("VM Network")],
                    ..NetworkSpec::default()
                },
                ..VirtualMachineCloneSpec::default()
            },
            ..VSphereMachineSpec::default()
        },
    );
    m.metadata.namespace = Some(NS.to_string());
    m.metadata.uid = Some(format!("uid-vspheremachine-{name}"));
    m.metadata.labels = Some(labels(cluster, control_plane));
    m.metadata.owner_references = Some(vec![owner_reference(
        &machine(name, cluster, control_plane),
        true,
    )]);
    m
}

/// Secret with string entries stored as bytes.
pub fn secret(name: &str, entries: &[(&str, &str)]) -> Secret {
    let mut s = Secret::default();
    s.metadata.name = Some(name.to_string());
    s.metadata.namespace = Some(NS.to_string());
    s.data = Some(
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
            .collect(),
    );
    s
}

/// `machine` reporting `ip` as its internal address.
pub fn with_address(mut machine: VSphereMachine, ip: &str) -> VSphereMachine {
    machine.status = Some(VSphereMachineStatus {
        ready: true,
        addresses: vec![MachineAddress {
            r#type: ADDRESS_INTERNAL_IP.to_string(),
            address: ip.to_string(),
        }],
        ..VSphereMachineStatus::default()
    });
    machine
}

/// Reference from a VSphereCluster to a load balancer.
pub fn load_balancer_ref(kind: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: crate::constants::API_GROUP_VERSION.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

/// HAProxy load balancer labelled with `cluster`.
pub fn haproxy_lb(name: &str, cluster: &str) -> HAProxyLoadBalancer {
    let mut lb = HAProxyLoadBalancer::new(
        name,
        HAProxyLoadBalancerSpec {
            virtual_machine_configuration: VirtualMachineCloneSpec {
                template: "haproxy-template".to_string(),
                ..VirtualMachineCloneSpec::default()
            },
            user: None,
        },
    );
    lb.metadata.namespace = Some(NS.to_string());
    lb.metadata.uid = Some(format!("uid-haproxy-{name}"));
    lb.metadata.labels = Some(labels(cluster, false));
    lb
}

/// NSX-T load balancer labelled with `cluster`, allocating from `vip-pool`.
pub fn nsxt_lb(name: &str, cluster: &str) -> NSXTLoadBalancer {
    let mut lb = NSXTLoadBalancer::new(
        name,
        NSXTLoadBalancerSpec {
            load_balancer_service_id: "lb-service".to_string(),
            virtual_ip_pool_id: "vip-pool".to_string(),
            server: "https://nsx.example.com".to_string(),
            insecure: false,
        },
    );
    lb.metadata.namespace = Some(NS.to_string());
    lb.metadata.uid = Some("abcdef12-3456".to_string());
    lb.metadata.labels = Some(labels(cluster, false));
    lb
}

/// Namespace carrying `labels`.
pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    let mut ns = Namespace::default();
    ns.metadata.name = Some(name.to_string());
    ns.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    ns
}

/// Ready cluster identity using `secret_name`, allowing namespaces matching `selector`.
///
/// `None` leaves `allowedNamespaces` unset.
pub fn cluster_identity(
    name: &str,
    secret_name: &str,
    selector: Option<&[(&str, &str)]>,
) -> VSphereClusterIdentity {
    let mut identity = VSphereClusterIdentity::new(
        name,
        VSphereClusterIdentitySpec {
            secret_name: secret_name.to_string(),
            allowed_namespaces: selector.map(|labels| AllowedNamespaces {
                selector: LabelSelector {
                    match_labels: Some(
                        labels
                            .iter()
                            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                            .collect(),
                    ),
                    match_expressions: None,
                },
            }),
        },
    );
    identity.metadata.uid = Some(format!("uid-identity-{name}"));
    identity.status = Some(VSphereClusterIdentityStatus {
        ready: true,
        conditions: vec![],
    });
    identity
}
