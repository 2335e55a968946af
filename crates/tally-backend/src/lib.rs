// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP adapters for the Tally message engine.
//!
//! [`HttpChatBackend`] implements [`ChatBackend`] for the chat-automation
//! backend's REST API, adding self-healing on top of [`BackendClient`]:
//! when the backend reports the target is no longer listened to, the
//! adapter re-registers it and retries the original call once.
//! [`HttpAccountingHandler`] implements [`DownstreamHandler`] for the
//! smart-accounting service.

pub mod client;
pub mod format;
pub mod handler;
pub mod types;

use async_trait::async_trait;
use tally_config::model::BackendConfig;
use tally_core::{
    AdapterType, ChatBackend, HealthStatus, PluginAdapter, RawEntry, TallyError,
};
use tracing::{info, warn};

pub use crate::client::BackendClient;
pub use crate::handler::HttpAccountingHandler;

/// Chat backend speaking the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: BackendClient,
}

impl HttpChatBackend {
    /// Creates a backend adapter from configuration.
    pub fn new(config: &BackendConfig) -> Result<Self, TallyError> {
        let client = BackendClient::new(config)?;
        info!(base_url = config.base_url, "chat backend initialized");
        Ok(Self { client })
    }

    /// Creates a backend with an existing client (for testing).
    #[cfg(test)]
    fn with_client(client: BackendClient) -> Self {
        Self { client }
    }

    /// Re-registers `target` after a not-listening error.
    async fn heal(&self, target: &str, cause: &TallyError) -> Result<(), TallyError> {
        warn!(chat_target = target, error = %cause, "target dropped from listen list, re-adding");
        self.client.listen_add(target).await
    }
}

#[async_trait]
impl PluginAdapter for HttpChatBackend {
    fn name(&self) -> &str {
        "chat-backend-http"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, TallyError> {
        match self.client.health().await {
            Ok(status) if status.is_success() => Ok(HealthStatus::Healthy),
            Ok(status) => Ok(HealthStatus::Degraded(format!("backend returned {status}"))),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), TallyError> {
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn ensure_listening(&self, target: &str) -> Result<(), TallyError> {
        self.client.listen_add(target).await
    }

    async fn fetch_snapshot(&self, target: &str) -> Result<Vec<RawEntry>, TallyError> {
        match self.client.get_all_messages(target).await {
            Err(e) if e.is_not_listening() => {
                self.heal(target, &e).await?;
                self.client.get_all_messages(target).await
            }
            result => result,
        }
    }

    async fn send_reply(&self, target: &str, text: &str) -> Result<(), TallyError> {
        match self.client.send_message(target, text).await {
            Err(e) if e.is_not_listening() => {
                self.heal(target, &e).await?;
                self.client.send_message(target, text).await
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(uri: &str) -> HttpChatBackend {
        let config = BackendConfig {
            backoff_base_ms: 1,
            ..Default::default()
        };
        HttpChatBackend::with_client(BackendClient::new(&config).unwrap().with_base_url(uri.into()))
    }

    #[tokio::test]
    async fn fetch_heals_not_listening_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat-window/get-all-messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 3001, "message": "not in listen list", "data": null
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/message/listen/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "message": "ok", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/chat-window/get-all-messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "message": "ok",
                "data": {"messages": [{"id": "9", "type": "friend", "content": "rent 800", "sender": "z"}]}
            })))
            .mount(&server)
            .await;

        let entries = backend(&server.uri()).fetch_snapshot("t").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn send_surfaces_second_not_listening() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat-window/message/send"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/message/listen/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "message": "ok", "data": null
            })))
            .mount(&server)
            .await;

        let err = backend(&server.uri()).send_reply("t", "done").await.unwrap_err();
        assert!(err.is_not_listening());
    }

    #[tokio::test]
    async fn health_reports_unreachable_backend() {
        let status = backend("http://127.0.0.1:1").health_check().await.unwrap();
        assert!(matches!(status, HealthStatus::Unhealthy(_)));
    }
}
