// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_defaults_match_parsed_empty_command_line() {
        let parsed = ManagerOptions::try_parse_from(["capv-engine"]).unwrap();
        let defaults = ManagerOptions::default();
        assert_eq!(parsed.max_concurrent_reconciles, defaults.max_concurrent_reconciles);
        assert_eq!(parsed.poll_interval_ms, defaults.poll_interval_ms);
        assert_eq!(parsed.metrics_addr, defaults.metrics_addr);
        assert_eq!(parsed.controller_namespace, defaults.controller_namespace);
        assert!(!parsed.simulate);
    }

    #[test]
    fn test_flags_are_parsed() {
        let parsed = ManagerOptions::try_parse_from([
            "capv-engine",
            "--max-concurrent-reconciles",
            "3",
            "--poll-interval-ms",
            "250",
            "--enable-keep-alive",
            "--keep-alive-duration-secs",
            "60",
            "--username",
            "admin",
            "--password",
            "secret",
            "--watch-namespace",
            "capi",
            "--simulate",
        ])
        .unwrap();

        assert_eq!(parsed.max_concurrent_reconciles, 3);
        assert_eq!(parsed.poll_interval(), Duration::from_millis(250));
        assert_eq!(parsed.keep_alive(), Some(Duration::from_secs(60)));
        assert_eq!(parsed.credentials(), Credentials::new("admin", "secret"));
        assert_eq!(parsed.watch_namespace.as_deref(), Some("capi"));
        assert!(parsed.simulate);
    }

    #[test]
    fn test_keep_alive_disabled_by_default() {
        assert_eq!(ManagerOptions::default().keep_alive(), None);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let options = ManagerOptions {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(options.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_backend_requires_simulate() {
        let err = ManagerOptions::default().backend().unwrap_err();
        assert!(err.to_string().contains("--simulate"));

        let live_only = ManagerOptions::try_parse_from(["capv-engine", "--live-endpoints"]).unwrap();
        assert!(live_only.backend().is_err());
    }

    #[test]
    fn test_backend_selection() {
        let simulated = ManagerOptions::try_parse_from(["capv-engine", "--simulate"]).unwrap();
        assert_eq!(simulated.backend().unwrap(), Backend::Simulator);

        let live = ManagerOptions::try_parse_from(["capv-engine", "--simulate", "--live-endpoints"])
            .unwrap();
        assert_eq!(live.backend().unwrap(), Backend::SimulatorWithLiveEndpoints);
    }
}
