// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rendering and merging of appliance load balancer configuration.
//!
//! An appliance holds the configuration of every load balancer it serves. A
//! reconciler only ever replaces its own pool and virtual server, and compares
//! configurations through their rendered HAProxy-style text so that ordering and
//! version fields never cause a spurious write.
//!
//! ```text
//! frontend default-c1-ab12c-port-6443
//!     bind 10.10.0.100:6443
//!     default_backend default-c1-ab12c-pool
//!
//! backend default-c1-ab12c-pool
//!     balance roundrobin
//!     min-active-members 1
//!     server cp-0 10.0.0.5:6443 check
//! ```

use crate::services::{LbPool, LoadBalancerConfig, PoolMember, VirtualServer};
use std::fmt::Write as _;

/// Render a configuration as HAProxy-style text.
///
/// Frontends and backends are emitted in name order, pool members in name then
/// address order.
#[must_use]
pub fn render(config: &LoadBalancerConfig) -> String {
    let mut out = String::new();

    let mut servers: Vec<&VirtualServer> = config.virtual_servers.iter().collect();
    servers.sort_by(|a, b| a.name.cmp(&b.name));
    for vs in servers {
        let _ = writeln!(out, "frontend {}", vs.name);
        let _ = writeln!(out, "    bind {}:{}", vs.ip_address, vs.port);
        let _ = writeln!(out, "    default_backend {}", vs.pool);
        out.push('\n');
    }

    let mut pools: Vec<&LbPool> = config.pools.iter().collect();
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    for pool in pools {
        let _ = writeln!(out, "backend {}", pool.name);
        let _ = writeln!(
            out,
            "    balance {}",
            pool.algorithm.to_lowercase().replace('_', "")
        );
        let _ = writeln!(out, "    min-active-members {}", pool.min_active_members);
        let mut members: Vec<&PoolMember> = pool.members.iter().collect();
        members.sort();
        for member in members {
            let _ = writeln!(
                out,
                "    server {} {}:{} check",
                member.name, member.address, member.port
            );
        }
        out.push('\n');
    }
    out
}

/// Returns `true` when two configurations render differently.
#[must_use]
pub fn differs(a: &LoadBalancerConfig, b: &LoadBalancerConfig) -> bool {
    render(a) != render(b)
}

/// `current` with the pool and virtual server of the same names replaced.
///
/// Every other entry is kept as-is.
#[must_use]
pub fn with_load_balancer(
    current: &LoadBalancerConfig,
    pool: LbPool,
    virtual_server: VirtualServer,
) -> LoadBalancerConfig {
    let mut desired = without_load_balancer(current, &pool.name, &virtual_server.name);
    desired.pools.push(pool);
    desired.virtual_servers.push(virtual_server);
    desired
}

/// `current` without the named pool and virtual server.
#[must_use]
pub fn without_load_balancer(
    current: &LoadBalancerConfig,
    pool_name: &str,
    virtual_server_name: &str,
) -> LoadBalancerConfig {
    LoadBalancerConfig {
        virtual_servers: current
            .virtual_servers
            .iter()
            .filter(|vs| vs.name != virtual_server_name)
            .cloned()
            .collect(),
        pools: current
            .pools
            .iter()
            .filter(|p| p.name != pool_name)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
