// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cluster.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::constants::{
        CCM_NAME, CLOUD_PROVIDER_CREDENTIALS_SECRET, CSI_CONTROLLER_NAME, KIND_NSXT_LOAD_BALANCER,
        KUBE_SYSTEM_NAMESPACE,
    };
    use crate::crd::{CPIVCenterConfig, ClusterStatus, IdentityKind, VSphereIdentityReference};
    use crate::labels::IDENTITY_SECRET_FINALIZER;
    use crate::reconcilers::finalizers::has_finalizer;
    use crate::reconcilers::fixtures::{
        cluster, cluster_identity, harness, load_balancer_ref, machine, namespace, nsxt_lb, secret,
        vsphere_cluster, vsphere_machine, with_address, Harness, NS, SERVER,
    };
    use crate::reconcilers::resources::owner_reference;
    use crate::reconcilers::status::{find_condition, is_true, Conditioned};
    use crate::status_reasons::CONDITION_TYPE_LOAD_BALANCER_AVAILABLE;
    use crate::store::{delete_object, MemoryStore};
    use futures::StreamExt;
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
    use k8s_openapi::api::core::v1::Secret;

    fn with_vcenter(mut vsc: VSphereCluster) -> VSphereCluster {
        vsc.spec.cloud_provider_configuration.virtual_center.insert(
            SERVER.to_string(),
            CPIVCenterConfig {
                datacenters: "dc0".to_string(),
                thumbprint: None,
            },
        );
        vsc
    }

    fn with_cluster_endpoint(mut c: Cluster, host: &str) -> Cluster {
        c.spec.control_plane_endpoint = APIEndpoint {
            host: host.to_string(),
            port: 6443,
        };
        c
    }

    async fn reconcile(h: &Harness) -> Result<Action> {
        let vsc: VSphereCluster = h.fetch("c1").await;
        reconcile_vsphere_cluster(Arc::new(h.ctx.clone()), vsc).await
    }

    fn reason(vsc: &VSphereCluster, condition_type: &str) -> Option<String> {
        find_condition(vsc.conditions(), condition_type).and_then(|c| c.reason.clone())
    }

    fn online(h: &Harness) -> Arc<MemoryStore> {
        let key = ObjectKey::namespaced(NS, "c1");
        let workload = h.sim.add_workload_cluster(&key);
        h.sim.set_api_online(&key, true);
        workload
    }

    #[tokio::test]
    async fn test_waits_for_owner_cluster() {
        let h = harness();
        h.seed(&vsphere_cluster("c1"));

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let h = harness();
        let mut c = cluster("c1");
        c.spec.paused = true;
        h.seed(&c);
        h.seed(&vsphere_cluster("c1"));

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_identity_secret_owned_by_another_cluster() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.spec.identity_ref = Some(VSphereIdentityReference {
            kind: IdentityKind::Secret,
            name: "creds".to_string(),
        });
        h.seed(&vsc);
        let mut s = secret("creds", &[("username", "u"), ("password", "p")]);
        s.metadata.owner_references = Some(vec![owner_reference(&vsphere_cluster("other"), true)]);
        h.seed(&s);

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());

        let vsc: VSphereCluster = h.fetch("c1").await;
        let condition = find_condition(vsc.conditions(), CONDITION_TYPE_VCENTER_AVAILABLE).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(REASON_VCENTER_UNREACHABLE));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
        assert!(condition.message.as_deref().unwrap_or_default().contains("VSphereCluster other"));
        assert_eq!(h.sim.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_cluster_identity_not_allowed_in_namespace() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.spec.identity_ref = Some(VSphereIdentityReference {
            kind: IdentityKind::VSphereClusterIdentity,
            name: "global".to_string(),
        });
        h.seed(&vsc);
        h.seed(&namespace(NS, &[("tenant", "b")]));
        h.seed(&cluster_identity("global", "shared", Some(&[("tenant", "a")])));

        reconcile(&h).await.unwrap_err();

        let vsc: VSphereCluster = h.fetch("c1").await;
        let condition = find_condition(vsc.conditions(), CONDITION_TYPE_VCENTER_AVAILABLE).unwrap();
        assert_eq!(condition.reason.as_deref(), Some(REASON_IDENTITY_NOT_USABLE));
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
        assert_eq!(h.sim.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_vcenter_is_reported() {
        let h = harness();
        h.sim.set_unreachable(SERVER, true);
        h.seed(&cluster("c1"));
        h.seed(&vsphere_cluster("c1"));

        reconcile(&h).await.unwrap_err();

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert!(has_finalizer(&vsc.metadata, CLUSTER_FINALIZER));
        assert_eq!(
            reason(&vsc, CONDITION_TYPE_VCENTER_AVAILABLE).as_deref(),
            Some(REASON_VCENTER_UNREACHABLE)
        );
        assert!(!vsc.status.unwrap().ready);
    }

    #[tokio::test]
    async fn test_waits_for_load_balancer() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.spec.load_balancer_ref = Some(load_balancer_ref(KIND_NSXT_LOAD_BALANCER, "lb"));
        h.seed(&vsc);

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert!(is_true(&vsc, CONDITION_TYPE_VCENTER_AVAILABLE));
        assert!(!vsc.status.as_ref().unwrap().ready);
        assert!(reason(&vsc, CONDITION_TYPE_LOAD_BALANCER_AVAILABLE).is_some());
        assert_eq!(h.ctx.triggers.active(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_is_copied_from_cluster() {
        let h = harness();
        h.seed(&with_cluster_endpoint(cluster("c1"), "10.0.0.1"));
        h.seed(&vsphere_cluster("c1"));

        reconcile(&h).await.unwrap();

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert_eq!(vsc.spec.control_plane_endpoint.host, "10.0.0.1");
        assert!(vsc.status.unwrap().ready);
    }

    #[tokio::test]
    async fn test_recorded_endpoint_is_kept() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.spec.control_plane_endpoint = APIEndpoint {
            host: "10.0.0.2".to_string(),
            port: 443,
        };
        h.seed(&vsc);
        h.seed(&machine("cp-0", "c1", true));
        h.seed(&with_address(vsphere_machine("cp-0", "c1", true), "10.0.0.5"));

        reconcile(&h).await.unwrap();

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert_eq!(vsc.spec.control_plane_endpoint.host, "10.0.0.2");
        assert_eq!(vsc.spec.control_plane_endpoint.port, 443);
    }

    #[tokio::test]
    async fn test_endpoint_from_first_bootstrapped_control_plane_machine() {
        let h = harness();
        h.seed(&cluster("c1"));
        h.seed(&vsphere_cluster("c1"));
        let mut pending = machine("cp-0", "c1", true);
        pending.spec.bootstrap.data_secret_name = None;
        h.seed(&pending);
        h.seed(&with_address(vsphere_machine("cp-0", "c1", true), "10.0.0.4"));
        h.seed(&machine("cp-1", "c1", true));
        h.seed(&with_address(vsphere_machine("cp-1", "c1", true), "10.0.0.5"));
        h.seed(&machine("a-worker", "c1", false));
        h.seed(&with_address(vsphere_machine("a-worker", "c1", false), "10.0.0.9"));

        reconcile(&h).await.unwrap();

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert_eq!(vsc.spec.control_plane_endpoint.host, "10.0.0.5");
        assert_eq!(vsc.spec.control_plane_endpoint.port, 6443);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_an_error_but_poller_starts() {
        let h = harness();
        h.seed(&cluster("c1"));
        h.seed(&vsphere_cluster("c1"));

        let err = reconcile(&h).await.unwrap_err();
        assert!(err.to_string().contains("unable to determine control plane endpoint"));

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert!(vsc.status.unwrap().ready);
        assert_eq!(h.ctx.triggers.active(), 1);
    }

    #[tokio::test]
    async fn test_poller_is_started_once() {
        let h = harness();
        h.seed(&with_cluster_endpoint(cluster("c1"), "10.0.0.1"));
        h.seed(&vsphere_cluster("c1"));

        reconcile(&h).await.unwrap();
        reconcile(&h).await.unwrap();
        assert_eq!(h.ctx.triggers.active(), 1);
    }

    #[tokio::test]
    async fn test_no_poller_once_control_plane_is_initialized() {
        let h = harness();
        let mut c = with_cluster_endpoint(cluster("c1"), "10.0.0.1");
        c.status = Some(ClusterStatus {
            infrastructure_ready: true,
            control_plane_initialized: true,
        });
        h.seed(&c);
        h.seed(&vsphere_cluster("c1"));

        reconcile(&h).await.unwrap();
        assert_eq!(h.ctx.triggers.active(), 0);
    }

    #[tokio::test]
    async fn test_poller_triggers_cluster_when_api_comes_online() {
        let mut h = harness();
        h.seed(&with_cluster_endpoint(cluster("c1"), "10.0.0.1"));
        h.seed(&vsphere_cluster("c1"));
        let key = ObjectKey::namespaced(NS, "c1");
        h.sim.add_workload_cluster(&key);

        reconcile(&h).await.unwrap();
        h.sim.set_api_online(&key, true);

        let event = tokio::time::timeout(Duration::from_secs(5), h.triggers.next())
            .await
            .unwrap();
        assert_eq!(event, Some(key));
    }

    #[tokio::test]
    async fn test_addons_installed_once_api_is_online() {
        let h = harness();
        h.seed(&with_cluster_endpoint(cluster("c1"), "10.0.0.1"));
        h.seed(&with_vcenter(vsphere_cluster("c1")));
        let workload = online(&h);

        reconcile(&h).await.unwrap();

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert!(is_true(&vsc, CONDITION_TYPE_CCM_AVAILABLE));
        assert!(is_true(&vsc, CONDITION_TYPE_CSI_AVAILABLE));

        let credentials: Secret = get_object(
            workload.as_ref(),
            &ObjectKey::namespaced(KUBE_SYSTEM_NAMESPACE, CLOUD_PROVIDER_CREDENTIALS_SECRET),
        )
        .await
        .unwrap()
        .unwrap();
        let data = credentials.data.unwrap();
        assert_eq!(data[&format!("{SERVER}.username")].0, b"manager".to_vec());

        let ccm: Option<DaemonSet> =
            get_object(workload.as_ref(), &ObjectKey::namespaced(KUBE_SYSTEM_NAMESPACE, CCM_NAME))
                .await
                .unwrap();
        assert!(ccm.is_some());
        let csi: Option<Deployment> = get_object(
            workload.as_ref(),
            &ObjectKey::namespaced(KUBE_SYSTEM_NAMESPACE, CSI_CONTROLLER_NAME),
        )
        .await
        .unwrap();
        assert!(csi.is_some());

        let writes = workload.writes();
        reconcile(&h).await.unwrap();
        assert_eq!(workload.writes(), writes);
    }

    #[tokio::test]
    async fn test_missing_vcenter_fails_cloud_provider() {
        let h = harness();
        h.seed(&with_cluster_endpoint(cluster("c1"), "10.0.0.1"));
        h.seed(&vsphere_cluster("c1"));
        online(&h);

        let err = reconcile(&h).await.unwrap_err();
        assert!(format!("{err:#}").contains("no vCenters defined"));

        let vsc: VSphereCluster = h.fetch("c1").await;
        assert_eq!(
            reason(&vsc, CONDITION_TYPE_CCM_AVAILABLE).as_deref(),
            Some(REASON_CCM_PROVISIONING_FAILED)
        );
        assert!(find_condition(vsc.conditions(), CONDITION_TYPE_CSI_AVAILABLE).is_none());
    }

    #[tokio::test]
    async fn test_delete_waits_for_load_balancers_and_machines() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        h.seed(&vsc);
        h.seed(&nsxt_lb("lb", "c1"));
        h.seed(&vsphere_machine("cp-0", "c1", true));

        delete_object::<VSphereCluster>(h.store.as_ref(), &ObjectKey::namespaced(NS, "c1"))
            .await
            .unwrap();

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(h.get::<crate::crd::NSXTLoadBalancer>("lb").await.is_none());

        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(h.get::<VSphereCluster>("c1").await.is_some());

        delete_object::<crate::crd::VSphereMachine>(h.store.as_ref(), &ObjectKey::namespaced(NS, "cp-0"))
            .await
            .unwrap();
        let action = reconcile(&h).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.get::<VSphereCluster>("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_releases_identity_secret() {
        let h = harness();
        h.seed(&cluster("c1"));
        let mut vsc = vsphere_cluster("c1");
        vsc.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        vsc.spec.identity_ref = Some(VSphereIdentityReference {
            kind: IdentityKind::Secret,
            name: "creds".to_string(),
        });
        h.seed(&vsc);
        let mut s = secret("creds", &[("username", "u"), ("password", "p")]);
        s.metadata.finalizers = Some(vec![IDENTITY_SECRET_FINALIZER.to_string()]);
        h.seed(&s);

        delete_object::<VSphereCluster>(h.store.as_ref(), &ObjectKey::namespaced(NS, "c1"))
            .await
            .unwrap();
        reconcile(&h).await.unwrap();

        assert!(h.get::<Secret>("creds").await.is_none());
        assert!(h.get::<VSphereCluster>("c1").await.is_none());
    }
}
