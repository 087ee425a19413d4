// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `addons.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{CPIVCenterConfig, CPIWorkspaceConfig, VSphereClusterSpec};

    fn cluster_with_vcenter() -> VSphereCluster {
        let mut vsc = VSphereCluster::new("c1", VSphereClusterSpec::default());
        vsc.metadata.namespace = Some("default".to_string());
        let config = &mut vsc.spec.cloud_provider_configuration;
        config.global.insecure = true;
        config.virtual_center.insert(
            "vcenter.example.com".to_string(),
            CPIVCenterConfig {
                datacenters: "dc0".to_string(),
                thumbprint: Some("AA:BB".to_string()),
            },
        );
        config.workspace = CPIWorkspaceConfig {
            server: "vcenter.example.com".to_string(),
            datacenter: "dc0".to_string(),
            folder: "vms".to_string(),
            datastore: "ds0".to_string(),
            resource_pool: "rp0".to_string(),
        };
        vsc
    }

    fn creds() -> Credentials {
        Credentials::new("cloud-user", "cloud-pass")
    }

    fn text(secret: &Secret, key: &str) -> String {
        let data = secret.data.clone().unwrap_or_default();
        String::from_utf8(data[key].0.clone()).unwrap()
    }

    #[test]
    fn test_cloud_config_sections() {
        let config = cloud_config(&cluster_with_vcenter());

        assert!(config.starts_with("[Global]\n"));
        assert!(config.contains("secret-name = \"cloud-provider-vsphere-credentials\"\n"));
        assert!(config.contains("secret-namespace = \"kube-system\"\n"));
        assert!(config.contains("insecure-flag = \"1\"\n"));
        assert!(config.contains("[VirtualCenter \"vcenter.example.com\"]\ndatacenters = \"dc0\"\nthumbprint = \"AA:BB\"\n"));
        assert!(config.contains("[Workspace]\n"));
        assert!(config.contains("resourcepool-path = \"rp0\"\n"));
        assert!(!config.contains("password"));
    }

    #[test]
    fn test_cloud_config_without_workspace() {
        let mut vsc = cluster_with_vcenter();
        vsc.spec.cloud_provider_configuration.workspace = CPIWorkspaceConfig::default();
        vsc.spec.cloud_provider_configuration.global.insecure = false;

        let config = cloud_config(&vsc);
        assert!(!config.contains("[Workspace]"));
        assert!(!config.contains("insecure-flag"));
    }

    #[test]
    fn test_credentials_secret_uses_configured_location() {
        let mut vsc = cluster_with_vcenter();
        vsc.spec.cloud_provider_configuration.global.secret_name = Some("creds".to_string());
        vsc.spec.cloud_provider_configuration.global.secret_namespace = Some("infra".to_string());

        let secret = cloud_credentials_secret(&vsc, &creds()).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("creds"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("infra"));
        assert_eq!(text(&secret, "vcenter.example.com.username"), "cloud-user");
        assert_eq!(text(&secret, "vcenter.example.com.password"), "cloud-pass");
        assert!(cloud_config(&vsc).contains("secret-name = \"creds\""));
    }

    #[test]
    fn test_credentials_secret_requires_a_vcenter() {
        let vsc = VSphereCluster::new("c1", VSphereClusterSpec::default());
        let err = cloud_credentials_secret(&vsc, &creds()).unwrap_err();
        assert!(err.to_string().contains("no vCenters defined"));
    }

    #[test]
    fn test_csi_config_inlines_credentials() {
        let config = csi_config(&cluster_with_vcenter(), &creds());
        assert!(config.contains("cluster-id = \"default/c1\""));
        assert!(config.contains("user = \"cloud-user\""));
        assert!(config.contains("password = \"cloud-pass\""));

        let secret = csi_config_secret(&config);
        assert_eq!(secret.metadata.name.as_deref(), Some(CSI_CONFIG_SECRET));
        assert_eq!(text(&secret, CSI_CONFIG_KEY), config);
    }

    #[test]
    fn test_ccm_image_override() {
        let mut vsc = cluster_with_vcenter();
        assert_eq!(ccm_image(&vsc), DEFAULT_CCM_IMAGE);

        vsc.spec.cloud_provider_configuration.provider_config.controller_image =
            Some("registry.local/ccm:v2".to_string());
        assert_eq!(ccm_image(&vsc), "registry.local/ccm:v2");
    }

    #[test]
    fn test_ccm_daemon_set_reads_cloud_config() {
        let ds = ccm_daemon_set("ccm:v1");
        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.host_network, Some(true));
        assert_eq!(pod.service_account_name.as_deref(), Some(CCM_NAME));

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("ccm:v1"));
        let args = container.args.clone().unwrap();
        assert!(args.contains(&"--cloud-provider=vsphere".to_string()));
        assert!(args.contains(&"--cloud-config=/etc/cloud/vsphere.conf".to_string()));

        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume.config_map.as_ref().map(|c| c.name.as_str()),
            Some(CLOUD_PROVIDER_CONFIG_MAP)
        );
    }

    #[test]
    fn test_ccm_config_map_key() {
        let cm = ccm_config_map("[Global]\n");
        assert_eq!(cm.metadata.namespace.as_deref(), Some(KUBE_SYSTEM_NAMESPACE));
        assert_eq!(cm.data.unwrap()[CLOUD_PROVIDER_CONFIG_KEY], "[Global]\n");
    }

    #[test]
    fn test_ccm_bindings_target_service_account() {
        let binding = ccm_cluster_role_binding();
        assert_eq!(binding.role_ref.name, ccm_cluster_role().metadata.name.unwrap());
        assert_eq!(binding.subjects.unwrap()[0].name, CCM_NAME);

        let reader = ccm_role_binding();
        assert_eq!(reader.role_ref.kind, "Role");
        assert_eq!(reader.metadata.namespace.as_deref(), Some(KUBE_SYSTEM_NAMESPACE));
    }

    #[test]
    fn test_csi_images_apply_overrides() {
        let mut vsc = cluster_with_vcenter();
        let defaults = CsiImages::for_cluster(&vsc);
        assert_eq!(defaults.driver, DEFAULT_CSI_DRIVER_IMAGE);
        assert_eq!(defaults.syncer, DEFAULT_CSI_SYNCER_IMAGE);

        vsc.spec.cloud_provider_configuration.provider_config.storage_driver_image =
            Some("driver:v9".to_string());
        vsc.spec.cloud_provider_configuration.provider_config.storage_syncer_image =
            Some(String::new());
        let images = CsiImages::for_cluster(&vsc);
        assert_eq!(images.driver, "driver:v9");
        assert_eq!(images.syncer, DEFAULT_CSI_SYNCER_IMAGE);
    }

    #[test]
    fn test_csi_workloads_use_driver_image() {
        let images = CsiImages::for_cluster(&cluster_with_vcenter());

        let controller = csi_controller_deployment(&images);
        let pod = controller.spec.unwrap().template.spec.unwrap();
        let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["csi-attacher", CSI_CONTROLLER_NAME, "liveness", "vsphere-syncer", "csi-provisioner"]
        );
        assert_eq!(pod.containers[1].image.as_deref(), Some(images.driver.as_str()));

        let node = csi_node_daemon_set(&images);
        let pod = node.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 3);
        assert_eq!(
            pod.containers[1]
                .security_context
                .as_ref()
                .and_then(|s| s.privileged),
            Some(true)
        );

        assert_eq!(csi_driver().spec.attach_required, Some(true));
    }
}
