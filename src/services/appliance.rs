// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP client for the load balancer appliance control API.
//!
//! Endpoints (relative to `https://<server>`):
//!
//! | Operation | Request |
//! |-----------|---------|
//! | start transaction | `POST /api/v1/transactions` → `{"id": "..."}` |
//! | read configuration | `GET /api/v1/transactions/{id}/configuration` → [`VersionedConfig`] |
//! | write configuration | `PUT /api/v1/transactions/{id}/configuration?version=N` → `{"version": N+1}` |
//! | commit | `PUT /api/v1/transactions/{id}` |
//! | IP pool | `POST /api/v1/pools/ip-pools/{pool}?action=ALLOCATE\|RELEASE` → `{"allocationId": "..."}` |
//!
//! A `409` on a configuration write is reported as [`ServiceError::VersionConflict`].
//! Every request is a single attempt. A transient failure (429, 5xx) surfaces as
//! [`ServiceError::Appliance`] and the reconcile is requeued with backoff.

use super::{
    ApplianceClient, ApplianceProvider, Credentials, IpAction, LoadBalancerConfig, ServiceError,
    VersionedConfig,
};
use crate::reconcilers::retry::is_retryable_http_status;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

const USER_AGENT: &str = concat!("capv-engine/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct TransactionResponse {
    id: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictResponse {
    #[serde(default)]
    current_version: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allocation_id: Option<String>,
}

/// Build the API base URL from a server address.
///
/// Converts `"nsx.example.com"` to `https://nsx.example.com` and keeps explicit schemes.
pub(crate) fn build_base_url(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        server.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", server.trim_end_matches('/'))
    }
}

/// [`ApplianceClient`] speaking the appliance REST API.
pub struct HttpApplianceClient {
    http: HttpClient,
    base_url: String,
    credentials: Credentials,
}

impl HttpApplianceClient {
    /// Create a client for `server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(server: &str, credentials: Credentials, insecure: bool) -> Result<Self, ServiceError> {
        let http = HttpClient::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self {
            http,
            base_url: build_base_url(server),
            credentials,
        })
    }

    async fn request<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R, ServiceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let text = self.send(method, &url, body).await?;
        let body = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| ServiceError::Appliance {
            status: 0,
            message: format!("invalid response from {url}: {e}"),
        })
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<String, ServiceError> {
        debug!(method = %method, url = %url, "Appliance API request");
        let mut request = self
            .http
            .request(method.clone(), url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }
        if status == StatusCode::CONFLICT {
            let current = serde_json::from_str::<ConflictResponse>(&text)
                .map(|c| c.current_version)
                .unwrap_or_default();
            return Err(ServiceError::VersionConflict {
                expected: 0,
                current,
            });
        }
        if is_retryable_http_status(status) {
            warn!(method = %method, url = %url, status = %status, "Appliance API unavailable, reconcile will be retried");
        } else {
            error!(method = %method, url = %url, status = %status, error = %text, "Appliance API request failed");
        }
        Err(ServiceError::Appliance {
            status: status.as_u16(),
            message: text,
        })
    }
}

#[async_trait]
impl ApplianceClient for HttpApplianceClient {
    async fn start_transaction(&self) -> Result<String, ServiceError> {
        let tx: TransactionResponse = self
            .request(Method::POST, "/api/v1/transactions", Some(&json!({})))
            .await?;
        Ok(tx.id)
    }

    async fn get_config(&self, transaction: &str) -> Result<VersionedConfig, ServiceError> {
        self.request::<Value, _>(
            Method::GET,
            &format!("/api/v1/transactions/{transaction}/configuration"),
            None,
        )
        .await
    }

    async fn post_config(
        &self,
        transaction: &str,
        config: &LoadBalancerConfig,
        expected_version: u64,
    ) -> Result<u64, ServiceError> {
        let path =
            format!("/api/v1/transactions/{transaction}/configuration?version={expected_version}");
        match self
            .request::<_, VersionResponse>(Method::PUT, &path, Some(config))
            .await
        {
            Ok(v) => Ok(v.version),
            Err(ServiceError::VersionConflict { current, .. }) => Err(ServiceError::VersionConflict {
                expected: expected_version,
                current,
            }),
            Err(e) => Err(e),
        }
    }

    async fn commit(&self, transaction: &str) -> Result<(), ServiceError> {
        let _: Value = self
            .request(
                Method::PUT,
                &format!("/api/v1/transactions/{transaction}"),
                Some(&json!({})),
            )
            .await?;
        Ok(())
    }

    async fn allocate_or_release(
        &self,
        pool: &str,
        address: Option<String>,
        action: IpAction,
    ) -> Result<String, ServiceError> {
        let action_param = match action {
            IpAction::Allocate => "ALLOCATE",
            IpAction::Release => "RELEASE",
        };
        let path = format!("/api/v1/pools/ip-pools/{pool}?action={action_param}");
        let requested = address.clone();
        let response: Option<AllocationBody> = self
            .request(
                Method::POST,
                &path,
                Some(&AllocationBody {
                    allocation_id: address,
                }),
            )
            .await?;
        response
            .and_then(|r| r.allocation_id)
            .or(requested)
            .ok_or_else(|| ServiceError::Appliance {
                status: 0,
                message: format!("pool {pool} returned no allocation"),
            })
    }
}

/// Builds [`HttpApplianceClient`]s with the manager's appliance credentials.
pub struct HttpApplianceProvider {
    credentials: Credentials,
}

impl HttpApplianceProvider {
    /// Create a provider authenticating with `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl ApplianceProvider for HttpApplianceProvider {
    fn client_for(&self, server: &str, insecure: bool) -> Result<Arc<dyn ApplianceClient>, ServiceError> {
        Ok(Arc::new(HttpApplianceClient::new(
            server,
            self.credentials.clone(),
            insecure,
        )?))
    }
}

#[cfg(test)]
#[path = "appliance_tests.rs"]
mod appliance_tests;
