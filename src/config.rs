// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration of the manager.

use crate::constants::{
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MAX_CONCURRENT_RECONCILES,
    DEFAULT_METRICS_ADDR, DEFAULT_POLL_INTERVAL_MILLIS,
};
use crate::services::Credentials;
use anyhow::{bail, Result};
use clap::Parser;
use std::time::Duration;

/// Where the manager's capabilities come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Everything, vCenter included, is the in-memory simulator
    Simulator,
    /// Simulated vCenter; appliances over HTTP and workload clusters from kubeconfig secrets
    SimulatorWithLiveEndpoints,
}

/// vSphere infrastructure controllers for Cluster API.
#[derive(Parser, Debug, Clone)]
#[command(name = "capv-engine", version, about, long_about = None)]
pub struct ManagerOptions {
    /// Maximum number of objects reconciled concurrently per controller
    #[arg(
        long,
        env = "CAPV_MAX_CONCURRENT_RECONCILES",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES
    )]
    pub max_concurrent_reconciles: u16,

    /// Interval between workload API server reachability checks, in milliseconds
    #[arg(long, env = "CAPV_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MILLIS)]
    pub poll_interval_ms: u64,

    /// Keep vCenter sessions alive between reconciles
    #[arg(long, env = "CAPV_ENABLE_KEEP_ALIVE")]
    pub enable_keep_alive: bool,

    /// Idle time after which a kept-alive session is refreshed, in seconds
    #[arg(long, env = "CAPV_KEEP_ALIVE_DURATION_SECS", default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    pub keep_alive_duration_secs: u64,

    /// vCenter user used when a cluster has no identity reference
    #[arg(long, env = "VSPHERE_USERNAME", default_value = "")]
    pub username: String,

    /// vCenter password used when a cluster has no identity reference
    #[arg(long, env = "VSPHERE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Only watch objects in this namespace
    #[arg(long, env = "CAPV_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace the manager runs in; secrets of cluster identities are read from here
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_CONTROLLER_NAMESPACE)]
    pub controller_namespace: String,

    /// Address the metrics endpoint listens on
    #[arg(long, env = "CAPV_METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: String,

    /// Drive VMs, sessions and inventory with the in-memory simulator
    #[arg(long, env = "CAPV_SIMULATE")]
    pub simulate: bool,

    /// With `--simulate`, talk to real load balancer appliances and workload clusters
    #[arg(long, env = "CAPV_LIVE_ENDPOINTS")]
    pub live_endpoints: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MILLIS,
            enable_keep_alive: false,
            keep_alive_duration_secs: DEFAULT_KEEP_ALIVE_SECS,
            username: String::new(),
            password: String::new(),
            watch_namespace: None,
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
            simulate: false,
            live_endpoints: false,
        }
    }
}

impl ManagerOptions {
    /// Manager-wide vCenter credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Online-poller interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Backend selected by the flags.
    ///
    /// There is no live vCenter driver, so `--simulate` is required.
    ///
    /// # Errors
    ///
    /// Returns an error when `--simulate` is not set.
    pub fn backend(&self) -> Result<Backend> {
        if !self.simulate {
            bail!("no live vCenter driver is available; start the manager with --simulate");
        }
        Ok(if self.live_endpoints {
            Backend::SimulatorWithLiveEndpoints
        } else {
            Backend::Simulator
        })
    }

    /// Session keep-alive duration, `None` when keep-alive is disabled.
    #[must_use]
    pub fn keep_alive(&self) -> Option<Duration> {
        self.enable_keep_alive
            .then(|| Duration::from_secs(self.keep_alive_duration_secs))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
