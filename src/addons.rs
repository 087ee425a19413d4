// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload cluster add-on resource builders
//!
//! This module builds the objects installed into a workload cluster once its API
//! server answers: the cloud provider credentials secret, the vSphere cloud controller
//! manager (CCM) and the vSphere CSI driver. All functions are pure and easily testable;
//! installation lives in the cluster reconciler.

use crate::constants::{
    CCM_NAME, CLOUD_PROVIDER_CONFIG_KEY, CLOUD_PROVIDER_CONFIG_MAP,
    CLOUD_PROVIDER_CREDENTIALS_SECRET, CSI_CONFIG_SECRET, CSI_CONTROLLER_NAME, CSI_DRIVER_NAME,
    CSI_NAMESPACE, CSI_NODE_NAME, DEFAULT_CCM_IMAGE, DEFAULT_CSI_ATTACHER_IMAGE,
    DEFAULT_CSI_DRIVER_IMAGE, DEFAULT_CSI_LIVENESS_IMAGE, DEFAULT_CSI_PROVISIONER_IMAGE,
    DEFAULT_CSI_REGISTRAR_IMAGE, DEFAULT_CSI_SYNCER_IMAGE, KUBE_SYSTEM_NAMESPACE,
};
use crate::crd::VSphereCluster;
use crate::labels::{K8S_MANAGED_BY, K8S_NAME, MANAGED_BY_CAPV};
use crate::services::Credentials;
use anyhow::{bail, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, SecurityContext, Service, ServiceAccount,
    ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSIDriverSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Data key of the CSI configuration inside its secret
pub const CSI_CONFIG_KEY: &str = "csi-vsphere.conf";

const CLOUD_CONFIG_DIR: &str = "/etc/cloud";
const CSI_CONFIG_DIR: &str = "/etc/cloud/csi";
const CSI_SOCKET_DIR: &str = "/csi";
const KUBELET_DIR: &str = "/var/lib/kubelet";
const CONTROL_PLANE_NODE_ROLE: &str = "node-role.kubernetes.io/control-plane";
const CCM_CLUSTER_ROLE: &str = "system:cloud-controller-manager";
const AUTH_READER_ROLE: &str = "extension-apiserver-authentication-reader";
const CCM_SERVICE_PORT: i32 = 443;
const CCM_SECURE_PORT: i32 = 43001;

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_NAME.to_string(), app.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_CAPV.to_string()),
    ])
}

fn metadata(name: &str, namespace: Option<&str>, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels(app)),
        ..Default::default()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

fn service_account_subject(name: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
        ..Default::default()
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

// ============================================================================
// Cloud provider configuration
// ============================================================================

/// Name and namespace of the cloud provider credentials secret.
#[must_use]
pub fn credentials_secret_location(vsc: &VSphereCluster) -> (String, String) {
    let global = &vsc.spec.cloud_provider_configuration.global;
    (
        global
            .secret_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| CLOUD_PROVIDER_CREDENTIALS_SECRET.to_string()),
        global
            .secret_namespace
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| KUBE_SYSTEM_NAMESPACE.to_string()),
    )
}

/// Render the cloud provider INI configuration read by the CCM.
///
/// Credentials are not inlined; the CCM reads them from the secret named in the
/// `[Global]` section.
#[must_use]
pub fn cloud_config(vsc: &VSphereCluster) -> String {
    let config = &vsc.spec.cloud_provider_configuration;
    let (secret_name, secret_namespace) = credentials_secret_location(vsc);
    let mut out = String::new();

    let _ = writeln!(out, "[Global]");
    let _ = writeln!(out, "secret-name = \"{secret_name}\"");
    let _ = writeln!(out, "secret-namespace = \"{secret_namespace}\"");
    if config.global.insecure {
        let _ = writeln!(out, "insecure-flag = \"1\"");
    }
    if let Some(thumbprint) = config.global.thumbprint.as_deref().filter(|t| !t.is_empty()) {
        let _ = writeln!(out, "thumbprint = \"{thumbprint}\"");
    }

    for (server, vcenter) in &config.virtual_center {
        let _ = writeln!(out, "\n[VirtualCenter \"{server}\"]");
        let _ = writeln!(out, "datacenters = \"{}\"", vcenter.datacenters);
        if let Some(thumbprint) = vcenter.thumbprint.as_deref().filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "thumbprint = \"{thumbprint}\"");
        }
    }

    let ws = &config.workspace;
    if !ws.server.is_empty() {
        let _ = writeln!(out, "\n[Workspace]");
        let _ = writeln!(out, "server = \"{}\"", ws.server);
        let _ = writeln!(out, "datacenter = \"{}\"", ws.datacenter);
        let _ = writeln!(out, "folder = \"{}\"", ws.folder);
        let _ = writeln!(out, "default-datastore = \"{}\"", ws.datastore);
        let _ = writeln!(out, "resourcepool-path = \"{}\"", ws.resource_pool);
    }
    out
}

/// Render the CSI driver INI configuration.
///
/// The CSI driver does not read credentials from a secret reference, so they are
/// inlined per vCenter.
#[must_use]
pub fn csi_config(vsc: &VSphereCluster, credentials: &Credentials) -> String {
    let config = &vsc.spec.cloud_provider_configuration;
    let mut out = String::new();

    let _ = writeln!(out, "[Global]");
    let _ = writeln!(
        out,
        "cluster-id = \"{}/{}\"",
        vsc.namespace().unwrap_or_default(),
        vsc.name_any()
    );
    for (server, vcenter) in &config.virtual_center {
        let _ = writeln!(out, "\n[VirtualCenter \"{server}\"]");
        let _ = writeln!(out, "user = \"{}\"", credentials.username);
        let _ = writeln!(out, "password = \"{}\"", credentials.password);
        let _ = writeln!(out, "datacenters = \"{}\"", vcenter.datacenters);
        if config.global.insecure {
            let _ = writeln!(out, "insecure-flag = \"1\"");
        }
    }
    out
}

/// Secret with `<server>.username` and `<server>.password` for every configured vCenter.
///
/// # Errors
///
/// Returns an error when no vCenter is configured.
pub fn cloud_credentials_secret(vsc: &VSphereCluster, credentials: &Credentials) -> Result<Secret> {
    let vcenters = &vsc.spec.cloud_provider_configuration.virtual_center;
    if vcenters.is_empty() {
        bail!(
            "no vCenters defined for VSphereCluster {}/{}",
            vsc.namespace().unwrap_or_default(),
            vsc.name_any()
        );
    }

    let mut data = BTreeMap::new();
    for server in vcenters.keys() {
        data.insert(format!("{server}.username"), bytes(&credentials.username));
        data.insert(format!("{server}.password"), bytes(&credentials.password));
    }
    let (name, namespace) = credentials_secret_location(vsc);
    Ok(Secret {
        metadata: metadata(&name, Some(&namespace), CCM_NAME),
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}

// ============================================================================
// Cloud controller manager
// ============================================================================

#[must_use]
pub fn ccm_service_account() -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(CCM_NAME, Some(KUBE_SYSTEM_NAMESPACE), CCM_NAME),
        ..Default::default()
    }
}

/// Config map holding the rendered [`cloud_config`].
#[must_use]
pub fn ccm_config_map(cloud_config: &str) -> ConfigMap {
    ConfigMap {
        metadata: metadata(CLOUD_PROVIDER_CONFIG_MAP, Some(KUBE_SYSTEM_NAMESPACE), CCM_NAME),
        data: Some(BTreeMap::from([(
            CLOUD_PROVIDER_CONFIG_KEY.to_string(),
            cloud_config.to_string(),
        )])),
        ..Default::default()
    }
}

/// CCM image, the configured override or the default.
#[must_use]
pub fn ccm_image(vsc: &VSphereCluster) -> String {
    vsc.spec
        .cloud_provider_configuration
        .provider_config
        .controller_image
        .clone()
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| DEFAULT_CCM_IMAGE.to_string())
}

/// CCM daemonset running on control plane nodes.
#[must_use]
pub fn ccm_daemon_set(image: &str) -> DaemonSet {
    let labels = labels(CCM_NAME);
    DaemonSet {
        metadata: metadata(CCM_NAME, Some(KUBE_SYSTEM_NAMESPACE), CCM_NAME),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(CCM_NAME.to_string()),
                    host_network: Some(true),
                    node_selector: Some(BTreeMap::from([(
                        CONTROL_PLANE_NODE_ROLE.to_string(),
                        String::new(),
                    )])),
                    tolerations: Some(vec![
                        Toleration {
                            key: Some("node.cloudprovider.kubernetes.io/uninitialized".to_string()),
                            value: Some("true".to_string()),
                            effect: Some("NoSchedule".to_string()),
                            ..Default::default()
                        },
                        Toleration {
                            key: Some(CONTROL_PLANE_NODE_ROLE.to_string()),
                            effect: Some("NoSchedule".to_string()),
                            ..Default::default()
                        },
                    ]),
                    containers: vec![Container {
                        name: CCM_NAME.to_string(),
                        image: Some(image.to_string()),
                        args: Some(vec![
                            "--v=2".to_string(),
                            "--cloud-provider=vsphere".to_string(),
                            format!("--cloud-config={CLOUD_CONFIG_DIR}/{CLOUD_PROVIDER_CONFIG_KEY}"),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "vsphere-config-volume".to_string(),
                            mount_path: CLOUD_CONFIG_DIR.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "vsphere-config-volume".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: CLOUD_PROVIDER_CONFIG_MAP.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn ccm_service() -> Service {
    Service {
        metadata: metadata(CCM_NAME, Some(KUBE_SYSTEM_NAMESPACE), CCM_NAME),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(labels(CCM_NAME)),
            ports: Some(vec![ServicePort {
                port: CCM_SERVICE_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(CCM_SECURE_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn ccm_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: metadata(CCM_CLUSTER_ROLE, None, CCM_NAME),
        rules: Some(vec![
            rule(&[""], &["events"], &["create", "patch", "update"]),
            rule(&[""], &["nodes"], &["*"]),
            rule(&[""], &["nodes/status"], &["patch"]),
            rule(&[""], &["services"], &["list", "patch", "update", "watch"]),
            rule(&[""], &["services/status"], &["patch"]),
            rule(&[""], &["serviceaccounts"], &["create", "get", "list", "watch", "update"]),
            rule(&[""], &["persistentvolumes"], &["get", "list", "watch", "update"]),
            rule(&[""], &["endpoints"], &["create", "get", "list", "watch", "update"]),
            rule(&[""], &["secrets"], &["get", "list", "watch"]),
            rule(&["coordination.k8s.io"], &["leases"], &["get", "watch", "list", "update", "create"]),
        ]),
        ..Default::default()
    }
}

#[must_use]
pub fn ccm_cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(CCM_CLUSTER_ROLE, None, CCM_NAME),
        role_ref: role_ref("ClusterRole", CCM_CLUSTER_ROLE),
        subjects: Some(vec![service_account_subject(CCM_NAME)]),
    }
}

/// Lets the CCM read the API server authentication config map.
#[must_use]
pub fn ccm_role_binding() -> RoleBinding {
    RoleBinding {
        metadata: metadata(
            &format!("{CCM_NAME}:{AUTH_READER_ROLE}"),
            Some(KUBE_SYSTEM_NAMESPACE),
            CCM_NAME,
        ),
        role_ref: role_ref("Role", AUTH_READER_ROLE),
        subjects: Some(vec![service_account_subject(CCM_NAME)]),
    }
}

// ============================================================================
// CSI driver
// ============================================================================

/// Images used by the CSI driver components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsiImages {
    pub driver: String,
    pub syncer: String,
    pub registrar: String,
    pub attacher: String,
    pub provisioner: String,
    pub liveness: String,
}

impl CsiImages {
    /// Defaults with the driver and syncer overrides of `vsc` applied.
    #[must_use]
    pub fn for_cluster(vsc: &VSphereCluster) -> Self {
        let provider = &vsc.spec.cloud_provider_configuration.provider_config;
        let pick = |configured: &Option<String>, default: &str| {
            configured
                .clone()
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            driver: pick(&provider.storage_driver_image, DEFAULT_CSI_DRIVER_IMAGE),
            syncer: pick(&provider.storage_syncer_image, DEFAULT_CSI_SYNCER_IMAGE),
            registrar: DEFAULT_CSI_REGISTRAR_IMAGE.to_string(),
            attacher: DEFAULT_CSI_ATTACHER_IMAGE.to_string(),
            provisioner: DEFAULT_CSI_PROVISIONER_IMAGE.to_string(),
            liveness: DEFAULT_CSI_LIVENESS_IMAGE.to_string(),
        }
    }
}

#[must_use]
pub fn csi_service_account() -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(CSI_CONTROLLER_NAME, Some(CSI_NAMESPACE), CSI_CONTROLLER_NAME),
        ..Default::default()
    }
}

#[must_use]
pub fn csi_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: metadata(&format!("{CSI_CONTROLLER_NAME}-role"), None, CSI_CONTROLLER_NAME),
        rules: Some(vec![
            rule(&[""], &["nodes", "persistentvolumeclaims", "pods"], &["get", "list", "watch"]),
            rule(&[""], &["persistentvolumes"], &["get", "list", "watch", "create", "update", "delete", "patch"]),
            rule(&[""], &["events"], &["get", "list", "watch", "create", "update", "patch"]),
            rule(&["storage.k8s.io"], &["storageclasses", "csinodes"], &["get", "list", "watch"]),
            rule(&["storage.k8s.io"], &["volumeattachments"], &["get", "list", "watch", "update", "patch"]),
            rule(&["coordination.k8s.io"], &["leases"], &["get", "watch", "list", "delete", "update", "create"]),
        ]),
        ..Default::default()
    }
}

#[must_use]
pub fn csi_cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(&format!("{CSI_CONTROLLER_NAME}-binding"), None, CSI_CONTROLLER_NAME),
        role_ref: role_ref("ClusterRole", &format!("{CSI_CONTROLLER_NAME}-role")),
        subjects: Some(vec![service_account_subject(CSI_CONTROLLER_NAME)]),
    }
}

/// Secret holding the rendered [`csi_config`].
#[must_use]
pub fn csi_config_secret(csi_config: &str) -> Secret {
    Secret {
        metadata: metadata(CSI_CONFIG_SECRET, Some(CSI_NAMESPACE), CSI_CONTROLLER_NAME),
        data: Some(BTreeMap::from([(CSI_CONFIG_KEY.to_string(), bytes(csi_config))])),
        ..Default::default()
    }
}

#[must_use]
pub fn csi_driver() -> CSIDriver {
    CSIDriver {
        metadata: ObjectMeta {
            name: Some(CSI_DRIVER_NAME.to_string()),
            labels: Some(labels(CSI_CONTROLLER_NAME)),
            ..Default::default()
        },
        spec: CSIDriverSpec {
            attach_required: Some(true),
            pod_info_on_mount: Some(false),
            ..Default::default()
        },
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn host_path_volume(name: &str, path: &str, kind: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some(kind.to_string()),
        }),
        ..Default::default()
    }
}

fn config_secret_volume() -> Volume {
    Volume {
        name: "vsphere-config-volume".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(CSI_CONFIG_SECRET.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn csi_env(endpoint: &str) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "CSI_ENDPOINT".to_string(),
            value: Some(endpoint.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "VSPHERE_CSI_CONFIG".to_string(),
            value: Some(format!("{CSI_CONFIG_DIR}/{CSI_CONFIG_KEY}")),
            ..Default::default()
        },
    ]
}

fn sidecar(name: &str, image: &str, args: &[&str], mounts: Vec<VolumeMount>) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        args: Some(strings(args)),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

/// Node plugin daemonset registering the driver with every kubelet.
#[must_use]
pub fn csi_node_daemon_set(images: &CsiImages) -> DaemonSet {
    let labels = labels(CSI_NODE_NAME);
    let registration = format!("{KUBELET_DIR}/plugins/{CSI_DRIVER_NAME}");
    let driver = Container {
        name: "vsphere-csi-node".to_string(),
        image: Some(images.driver.clone()),
        env: Some(csi_env(&format!("unix://{CSI_SOCKET_DIR}/csi.sock"))),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            allow_privilege_escalation: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            mount("vsphere-config-volume", CSI_CONFIG_DIR),
            mount("plugin-dir", CSI_SOCKET_DIR),
            VolumeMount {
                mount_propagation: Some("Bidirectional".to_string()),
                ..mount("pods-mount-dir", KUBELET_DIR)
            },
            mount("device-dir", "/dev"),
        ]),
        ..Default::default()
    };

    DaemonSet {
        metadata: metadata(CSI_NODE_NAME, Some(CSI_NAMESPACE), CSI_NODE_NAME),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    dns_policy: Some("Default".to_string()),
                    containers: vec![
                        sidecar(
                            "node-driver-registrar",
                            &images.registrar,
                            &[
                                "--v=5",
                                &format!("--csi-address={CSI_SOCKET_DIR}/csi.sock"),
                                &format!("--kubelet-registration-path={registration}/csi.sock"),
                            ],
                            vec![mount("plugin-dir", CSI_SOCKET_DIR), mount("registration-dir", "/registration")],
                        ),
                        driver,
                        sidecar(
                            "liveness",
                            &images.liveness,
                            &[&format!("--csi-address={CSI_SOCKET_DIR}/csi.sock")],
                            vec![mount("plugin-dir", CSI_SOCKET_DIR)],
                        ),
                    ],
                    volumes: Some(vec![
                        config_secret_volume(),
                        host_path_volume("registration-dir", &format!("{KUBELET_DIR}/plugins_registry"), "Directory"),
                        host_path_volume("plugin-dir", &registration, "DirectoryOrCreate"),
                        host_path_volume("pods-mount-dir", KUBELET_DIR, "Directory"),
                        host_path_volume("device-dir", "/dev", "Directory"),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Controller deployment running the driver with its attacher, provisioner and syncer.
#[must_use]
pub fn csi_controller_deployment(images: &CsiImages) -> Deployment {
    let labels = labels(CSI_CONTROLLER_NAME);
    let csi_address = format!("--csi-address={CSI_SOCKET_DIR}/csi.sock");
    let socket_mount = || vec![mount("socket-dir", CSI_SOCKET_DIR)];

    let driver = Container {
        name: CSI_CONTROLLER_NAME.to_string(),
        image: Some(images.driver.clone()),
        env: Some(csi_env(&format!("unix://{CSI_SOCKET_DIR}/csi.sock"))),
        volume_mounts: Some(vec![
            mount("vsphere-config-volume", CSI_CONFIG_DIR),
            mount("socket-dir", CSI_SOCKET_DIR),
        ]),
        ..Default::default()
    };
    let syncer = Container {
        name: "vsphere-syncer".to_string(),
        image: Some(images.syncer.clone()),
        args: Some(vec!["--leader-election".to_string()]),
        env: Some(csi_env(&format!("unix://{CSI_SOCKET_DIR}/csi.sock"))),
        volume_mounts: Some(vec![mount("vsphere-config-volume", CSI_CONFIG_DIR)]),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(CSI_CONTROLLER_NAME, Some(CSI_NAMESPACE), CSI_CONTROLLER_NAME),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(CSI_CONTROLLER_NAME.to_string()),
                    node_selector: Some(BTreeMap::from([(
                        CONTROL_PLANE_NODE_ROLE.to_string(),
                        String::new(),
                    )])),
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    containers: vec![
                        sidecar(
                            "csi-attacher",
                            &images.attacher,
                            &["--v=4", "--timeout=300s", &csi_address, "--leader-election"],
                            socket_mount(),
                        ),
                        driver,
                        sidecar(
                            "liveness",
                            &images.liveness,
                            &[&csi_address],
                            socket_mount(),
                        ),
                        syncer,
                        sidecar(
                            "csi-provisioner",
                            &images.provisioner,
                            &["--v=4", "--timeout=300s", &csi_address, "--leader-election", "--default-fstype=ext4"],
                            socket_mount(),
                        ),
                    ],
                    volumes: Some(vec![
                        config_secret_volume(),
                        Volume {
                            name: "socket-dir".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "addons_tests.rs"]
mod addons_tests;
