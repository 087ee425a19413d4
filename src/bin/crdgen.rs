// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Generates the vSphere infrastructure CRDs from the Rust types in src/crd.rs so the
//! manifests under deploy/crds/ never drift from the code.
//!
//! Usage:
//!   cargo run --bin crdgen
//!
//! `Cluster` and `Machine` belong to Cluster API core and are not generated here.

use capv_engine::crd::{
    HAProxyLoadBalancer, NSXTLoadBalancer, VSphereCluster, VSphereClusterIdentity,
    VSphereDeploymentZone, VSphereFailureDomain, VSphereMachine, VSphereVM,
};
use kube::CustomResourceExt;
use serde_json::Value;
use std::fs;
use std::path::Path;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

/// Label Cluster API uses to find the infrastructure CRDs of a contract version.
const CONTRACT_LABEL: &str = "cluster.x-k8s.io/v1beta1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = Path::new("deploy/crds");

    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd.rs...");

    generate_crd::<VSphereCluster>("vsphereclusters.crd.yaml", output_dir)?;
    generate_crd::<VSphereMachine>("vspheremachines.crd.yaml", output_dir)?;
    generate_crd::<VSphereVM>("vspherevms.crd.yaml", output_dir)?;
    generate_crd::<HAProxyLoadBalancer>("haproxyloadbalancers.crd.yaml", output_dir)?;
    generate_crd::<NSXTLoadBalancer>("nsxtloadbalancers.crd.yaml", output_dir)?;
    generate_crd::<VSphereDeploymentZone>("vspheredeploymentzones.crd.yaml", output_dir)?;
    generate_crd::<VSphereFailureDomain>("vspherefailuredomains.crd.yaml", output_dir)?;
    generate_crd::<VSphereClusterIdentity>("vsphereclusteridentities.crd.yaml", output_dir)?;

    println!("✓ Successfully generated CRD YAML files in deploy/crds/");
    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f deploy/crds/");

    Ok(())
}

fn generate_crd<T>(filename: &str, output_dir: &Path) -> Result<(), Box<dyn std::error::Error>>
where
    T: CustomResourceExt,
{
    let crd = T::crd();

    let mut crd_json: Value = serde_json::to_value(&crd)?;

    // Cluster API discovers infrastructure providers through the contract label
    if let Some(metadata) = crd_json["metadata"].as_object_mut() {
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        labels[CONTRACT_LABEL] = Value::String("v1beta1".to_string());
    }

    let yaml = serde_yaml::to_string(&crd_json)?;

    let content = format!("{COPYRIGHT_HEADER}{yaml}");

    let output_path = output_dir.join(filename);
    fs::write(&output_path, content)?;

    println!("  ✓ Generated {filename}");

    Ok(())
}
