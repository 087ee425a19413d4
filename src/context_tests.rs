// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `context.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_simulated_context_shares_one_backend() {
        let sim = Simulator::new();
        let (ctx, _rx) = Context::new(
            Arc::new(MemoryStore::new()),
            Services::simulated(&sim),
            ManagerOptions::default(),
        );

        let creds = Credentials::new("admin", "secret");
        ctx.session("vc1", &creds, None).await.unwrap();
        ctx.session("vc1", &creds, None).await.unwrap();
        assert_eq!(sim.sessions_created(), 1);
        assert_eq!(ctx.triggers.active(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_surfaces_session_error() {
        let sim = Simulator::new();
        sim.set_unreachable("vc2", true);
        let (ctx, _rx) = Context::new(
            Arc::new(MemoryStore::new()),
            Services::simulated(&sim),
            ManagerOptions::default(),
        );
        let err = ctx
            .session("vc2", &Credentials::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Session { .. }));
    }
}
