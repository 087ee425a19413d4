// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # capv-engine - vSphere infrastructure reconciliation for Cluster API
//!
//! capv-engine reconciles the vSphere infrastructure side of Cluster API clusters:
//! vCenter sessions and credentials, control-plane load balancers, virtual machines,
//! deployment zones, and the add-ons a new workload cluster needs before it can run.
//!
//! ## Overview
//!
//! This library provides:
//!
//! - Custom Resource Definitions (CRDs) for the vSphere infrastructure kinds
//! - Reconciliation logic for each kind, persisted through a diffing patcher
//! - An online-poller that wakes a cluster when its workload API server comes up
//! - Backend capabilities (sessions, VMs, inventory, appliances, workload clusters)
//!   behind async traits, with an in-memory simulator
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`context`] - Shared context handed to every controller
//! - [`store`] - Resource store abstraction over the Kubernetes API
//! - [`services`] - Backend capabilities and the simulator
//! - [`addons`] - Cloud provider and storage add-ons for workload clusters
//!
//! ## Example
//!
//! ```rust,no_run
//! use capv_engine::crd::{VSphereCluster, VSphereClusterSpec};
//!
//! let cluster = VSphereCluster::new(
//!     "workload-1",
//!     VSphereClusterSpec {
//!         server: "vcenter.example.com".to_string(),
//!         ..VSphereClusterSpec::default()
//!     },
//! );
//! ```

pub mod addons;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod resource_impls;
pub mod services;
pub mod status_reasons;
pub mod store;

#[cfg(test)]
mod crd_tests;
#[cfg(test)]
mod status_reasons_tests;
