// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `resources.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{VSphereCluster, VSphereClusterSpec, VSphereVM, VSphereVMSpec};
    use crate::store::MemoryStore;

    fn cluster(uid: &str) -> VSphereCluster {
        let mut c = VSphereCluster::new("c1", VSphereClusterSpec::default());
        c.metadata.namespace = Some("default".to_string());
        c.metadata.uid = Some(uid.to_string());
        c
    }

    fn vm(name: &str) -> VSphereVM {
        let mut vm = VSphereVM::new(name, VSphereVMSpec::default());
        vm.metadata.namespace = Some("default".to_string());
        vm
    }

    #[test]
    fn test_owner_reference_fields() {
        let oref = owner_reference(&cluster("uid-1"), true);
        assert_eq!(oref.kind, "VSphereCluster");
        assert_eq!(oref.api_version, "infrastructure.cluster.x-k8s.io/v1beta1");
        assert_eq!(oref.name, "c1");
        assert_eq!(oref.uid, "uid-1");
        assert_eq!(oref.controller, Some(true));

        let plain = owner_reference(&cluster("uid-1"), false);
        assert_eq!(plain.controller, None);
        assert_eq!(plain.block_owner_deletion, None);
    }

    #[test]
    fn test_ensure_owner_reference_is_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(ensure_owner_reference(&mut meta, owner_reference(&cluster("uid-1"), true)));
        assert!(!ensure_owner_reference(&mut meta, owner_reference(&cluster("uid-1"), true)));
        assert!(ensure_owner_reference(&mut meta, owner_reference(&cluster("uid-2"), false)));
        assert_eq!(owner_count(&meta), 2);
        assert!(is_owned_by(&meta, "uid-2"));
        assert_eq!(controller_owner(&meta).map(|r| r.uid.as_str()), Some("uid-1"));
        assert_eq!(
            owner_of_kind(&meta, "VSphereCluster").map(|r| r.uid.as_str()),
            Some("uid-1")
        );

        assert!(remove_owner_reference(&mut meta, "uid-1"));
        assert!(!remove_owner_reference(&mut meta, "uid-1"));
        assert_eq!(owner_count(&meta), 1);
    }

    #[tokio::test]
    async fn test_create_or_patch_creates_then_is_unchanged() {
        let store = MemoryStore::new();
        let set_template = |v: &mut VSphereVM| {
            if v.spec.clone_spec.template.is_empty() {
                v.spec.clone_spec.template = "ubuntu".to_string();
            }
        };

        let (created, op) = create_or_patch(&store, vm("vm1"), set_template).await.unwrap();
        assert_eq!(op, Operation::Created);
        assert_eq!(created.spec.clone_spec.template, "ubuntu");

        let writes = store.writes();
        let (_, op) = create_or_patch(&store, vm("vm1"), set_template).await.unwrap();
        assert_eq!(op, Operation::Unchanged);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_create_or_patch_updates_changed_spec() {
        let store = MemoryStore::new();
        create_or_patch(&store, vm("vm1"), |_| {}).await.unwrap();

        let (updated, op) = create_or_patch(&store, vm("vm1"), |v: &mut VSphereVM| {
            v.spec.clone_spec.datacenter = "dc0".to_string();
            ensure_owner_reference(&mut v.metadata, owner_reference(&cluster("uid-1"), true));
        })
        .await
        .unwrap();
        assert_eq!(op, Operation::Updated);
        assert_eq!(updated.spec.clone_spec.datacenter, "dc0");
        assert!(is_owned_by(&updated.metadata, "uid-1"));
    }
}
