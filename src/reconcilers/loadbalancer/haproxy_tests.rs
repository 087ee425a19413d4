// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `haproxy.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{SSHUser, VSphereVMStatus};
    use crate::reconcilers::finalizers::has_finalizer;
    use crate::reconcilers::fixtures::{
        cluster, harness, haproxy_lb, vsphere_cluster, vsphere_machine, with_address, Harness,
        SERVER,
    };
    use crate::reconcilers::resources::controller_owner;
    use crate::reconcilers::status::{find_condition, is_true, Conditioned};
    use crate::status_reasons::{CONDITION_TYPE_LOAD_BALANCER_AVAILABLE, REASON_LOAD_BALANCER_PROVISIONING};
    use crate::store::delete_object;

    fn member(name: &str, address: &str) -> PoolMember {
        PoolMember {
            name: name.to_string(),
            address: address.to_string(),
            port: 6443,
        }
    }

    fn seeded() -> Harness {
        let h = harness();
        h.seed(&cluster("c1"));
        h.seed(&vsphere_cluster("c1"));
        h.seed(&with_address(vsphere_machine("cp-0", "c1", true), "10.0.0.5"));
        h
    }

    async fn reconcile(h: &Harness) -> Result<Action> {
        let lb: HAProxyLoadBalancer = h.fetch("lb").await;
        reconcile_haproxy_load_balancer(Arc::new(h.ctx.clone()), lb).await
    }

    async fn bootstrap_text(h: &Harness) -> String {
        let secret: Secret = h.fetch("lb-bootstrap").await;
        let data = secret.data.unwrap_or_default();
        String::from_utf8(data[BOOTSTRAP_DATA_KEY].0.clone()).unwrap()
    }

    #[test]
    fn test_bootstrap_data_is_cloud_config_with_rendered_haproxy() {
        let mut lb = haproxy_lb("lb", "c1");
        lb.spec.user = Some(SSHUser {
            name: "capv".to_string(),
            authorized_keys: vec!["ssh-ed25519 AAAA".to_string()],
        });

        let data = bootstrap_data(&lb, &[member("cp-0", "10.0.0.5")]).unwrap();
        assert!(data.starts_with("#cloud-config\n"));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&data).unwrap();
        let file = &parsed["write_files"][0];
        assert_eq!(file["path"].as_str(), Some(HAPROXY_CONFIG_PATH));
        let content = file["content"].as_str().unwrap();
        assert!(content.contains("frontend lb-frontend\n    bind *:6443\n"));
        assert!(content.contains("server cp-0 10.0.0.5:6443 check"));
        assert_eq!(parsed["users"][0]["name"].as_str(), Some("capv"));
        assert_eq!(
            parsed["users"][0]["ssh_authorized_keys"][0].as_str(),
            Some("ssh-ed25519 AAAA")
        );
    }

    #[test]
    fn test_bootstrap_data_without_user_has_no_users() {
        let data = bootstrap_data(&haproxy_lb("lb", "c1"), &[]).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&data).unwrap();
        assert!(parsed.get("users").is_none());
    }

    #[tokio::test]
    async fn test_waits_for_owner_cluster() {
        let h = harness();
        h.seed(&haproxy_lb("lb", "missing"));

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_creates_bootstrap_secret_and_vm() {
        let h = seeded();
        h.seed(&haproxy_lb("lb", "c1"));

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());

        assert!(bootstrap_text(&h).await.contains("server cp-0 10.0.0.5:6443 check"));

        let vm: VSphereVM = h.fetch("lb").await;
        assert_eq!(vm.spec.clone_spec.server, SERVER);
        assert_eq!(vm.spec.clone_spec.template, "haproxy-template");
        assert_eq!(
            vm.spec.bootstrap_ref.as_ref().map(|r| r.name.as_str()),
            Some("lb-bootstrap")
        );
        assert_eq!(
            controller_owner(&vm.metadata).map(|r| r.uid.as_str()),
            Some("uid-haproxy-lb")
        );
        assert_eq!(
            vm.metadata.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)).map(String::as_str),
            Some("c1")
        );

        let lb: HAProxyLoadBalancer = h.fetch("lb").await;
        assert!(has_finalizer(&lb.metadata, HAPROXY_LOAD_BALANCER_FINALIZER));
        assert!(!lb.status.as_ref().unwrap().ready);
        let condition = find_condition(lb.conditions(), CONDITION_TYPE_LOAD_BALANCER_AVAILABLE).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(REASON_LOAD_BALANCER_PROVISIONING));
    }

    #[tokio::test]
    async fn test_ready_vm_makes_load_balancer_ready() {
        let h = seeded();
        h.seed(&haproxy_lb("lb", "c1"));
        let mut vm = VSphereVM::new("lb", VSphereVMSpec::default());
        vm.metadata.namespace = Some(crate::reconcilers::fixtures::NS.to_string());
        vm.status = Some(VSphereVMStatus {
            ready: true,
            addresses: vec!["10.0.0.50".to_string(), "10.0.0.51".to_string()],
            ..VSphereVMStatus::default()
        });
        h.seed(&vm);

        reconcile(&h).await.unwrap();

        let lb: HAProxyLoadBalancer = h.fetch("lb").await;
        let status = lb.status.clone().unwrap();
        assert!(status.ready);
        assert_eq!(status.address, "10.0.0.50");
        assert!(is_true(&lb, CONDITION_TYPE_LOAD_BALANCER_AVAILABLE));
    }

    #[tokio::test]
    async fn test_new_control_plane_member_updates_bootstrap_secret() {
        let h = seeded();
        h.seed(&haproxy_lb("lb", "c1"));
        reconcile(&h).await.unwrap();

        h.seed(&with_address(vsphere_machine("cp-1", "c1", true), "10.0.0.6"));
        h.seed(&with_address(vsphere_machine("worker-0", "c1", false), "10.0.0.9"));
        reconcile(&h).await.unwrap();

        let text = bootstrap_text(&h).await;
        assert!(text.contains("server cp-0 10.0.0.5:6443 check"));
        assert!(text.contains("server cp-1 10.0.0.6:6443 check"));
        assert!(!text.contains("worker-0"));
    }

    #[tokio::test]
    async fn test_unchanged_members_leave_secret_alone() {
        let h = seeded();
        h.seed(&haproxy_lb("lb", "c1"));
        reconcile(&h).await.unwrap();
        let before: Secret = h.fetch("lb-bootstrap").await;

        reconcile(&h).await.unwrap();
        let after: Secret = h.fetch("lb-bootstrap").await;
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_delete_removes_vm_then_secret() {
        let h = seeded();
        h.seed(&haproxy_lb("lb", "c1"));
        reconcile(&h).await.unwrap();

        let key = ObjectKey::namespaced(crate::reconcilers::fixtures::NS, "lb");
        delete_object::<HAProxyLoadBalancer>(h.store.as_ref(), &key)
            .await
            .unwrap();

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(h.get::<VSphereVM>("lb").await.is_none());
        assert!(h.get::<HAProxyLoadBalancer>("lb").await.is_some());

        reconcile(&h).await.unwrap();
        assert!(h.get::<Secret>("lb-bootstrap").await.is_none());
        assert!(h.get::<HAProxyLoadBalancer>("lb").await.is_none());
    }
}
