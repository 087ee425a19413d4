// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn member(name: &str, address: &str) -> PoolMember {
        PoolMember {
            name: name.to_string(),
            address: address.to_string(),
            port: 6443,
        }
    }

    fn pool(name: &str, members: Vec<PoolMember>) -> LbPool {
        LbPool {
            name: name.to_string(),
            algorithm: "ROUND_ROBIN".to_string(),
            min_active_members: 1,
            members,
        }
    }

    fn vs(name: &str, ip: &str, pool: &str) -> VirtualServer {
        VirtualServer {
            name: name.to_string(),
            ip_address: ip.to_string(),
            port: 6443,
            pool: pool.to_string(),
        }
    }

    #[test]
    fn test_render_is_haproxy_style() {
        let config = LoadBalancerConfig {
            virtual_servers: vec![vs("lb-port-6443", "10.10.0.100", "lb-pool")],
            pools: vec![pool("lb-pool", vec![member("cp-1", "10.0.0.6"), member("cp-0", "10.0.0.5")])],
        };
        let expected = "\
frontend lb-port-6443
    bind 10.10.0.100:6443
    default_backend lb-pool

backend lb-pool
    balance roundrobin
    min-active-members 1
    server cp-0 10.0.0.5:6443 check
    server cp-1 10.0.0.6:6443 check

";
        assert_eq!(render(&config), expected);
    }

    #[test]
    fn test_ordering_does_not_count_as_a_difference() {
        let a = LoadBalancerConfig {
            virtual_servers: vec![vs("a-port-6443", "1.1.1.1", "a-pool"), vs("b-port-6443", "2.2.2.2", "b-pool")],
            pools: vec![pool("a-pool", vec![member("x", "10.0.0.1"), member("y", "10.0.0.2")])],
        };
        let mut b = a.clone();
        b.virtual_servers.reverse();
        b.pools[0].members.reverse();
        assert!(!differs(&a, &b));

        b.pools[0].members.pop();
        assert!(differs(&a, &b));
    }

    #[test]
    fn test_replacing_one_load_balancer_keeps_the_others() {
        let current = LoadBalancerConfig {
            virtual_servers: vec![
                vs("mine-port-6443", "1.1.1.1", "mine-pool"),
                vs("other-port-6443", "2.2.2.2", "other-pool"),
            ],
            pools: vec![pool("mine-pool", vec![]), pool("other-pool", vec![member("o", "10.1.0.1")])],
        };

        let desired = with_load_balancer(
            &current,
            pool("mine-pool", vec![member("cp-0", "10.0.0.5")]),
            vs("mine-port-6443", "1.1.1.1", "mine-pool"),
        );
        assert_eq!(desired.pools.len(), 2);
        assert_eq!(desired.virtual_servers.len(), 2);
        assert!(desired.pools.contains(&current.pools[1]));
        assert!(desired.virtual_servers.contains(&current.virtual_servers[1]));
        assert!(differs(&current, &desired));

        let removed = without_load_balancer(&desired, "mine-pool", "mine-port-6443");
        assert_eq!(removed.pools, vec![current.pools[1].clone()]);
        assert_eq!(removed.virtual_servers, vec![current.virtual_servers[1].clone()]);
    }
}
