// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the chat-automation backend.
//!
//! Provides [`BackendClient`] which handles request construction,
//! authentication, result-code classification and transient error retry.
//! It does not self-heal; see [`HttpChatBackend`](crate::HttpChatBackend).

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tally_config::model::BackendConfig;
use tally_core::{BackendErrorKind, RawEntry, TallyError};
use tracing::{debug, warn};

use crate::types::{
    ApiEnvelope, ListenRequest, MessagesData, SendRequest, CODE_ALREADY_LISTENING,
    CODE_NOT_LISTENING, CODE_OK, NOT_FOUND_TEXTS, NOT_LISTENING_TEXTS,
};

const LISTEN_ADD_PATH: &str = "/api/message/listen/add";
const GET_MESSAGES_PATH: &str = "/api/chat-window/get-all-messages";
const SEND_MESSAGE_PATH: &str = "/api/chat-window/message/send";
const HEALTH_PATH: &str = "/api/health";

/// HTTP client for backend communication.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    send_timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl BackendClient {
    /// Creates a client from the backend section of the configuration.
    pub fn new(config: &BackendConfig) -> Result<Self, TallyError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(
                "X-API-Key",
                HeaderValue::from_str(key).map_err(|e| {
                    TallyError::Config(format!("invalid backend API key header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TallyError::Backend {
                message: format!("failed to build HTTP client: {e}"),
                kind: BackendErrorKind::Rejected,
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    /// Overrides the base URL (for testing with wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Adds `who` to the backend's listen list. "Already listening" is success.
    pub async fn listen_add(&self, who: &str) -> Result<(), TallyError> {
        let url = format!("{}{LISTEN_ADD_PATH}", self.base_url);
        let url = url.as_str();
        self.with_retry("listen_add", || async move {
            let response = self
                .client
                .post(url)
                .json(&ListenRequest::text_only(who))
                .send()
                .await
                .map_err(transport_error)?;
            match read_envelope::<serde_json::Value>(response).await {
                Ok(_) => Ok(()),
                Err(Rejection::Code(CODE_ALREADY_LISTENING, _)) => {
                    debug!(who, "target already in listen list");
                    Ok(())
                }
                Err(rejection) => Err(rejection.into_error()),
            }
        })
        .await
    }

    /// Fetches the full visible message window for `who`.
    pub async fn get_all_messages(&self, who: &str) -> Result<Vec<RawEntry>, TallyError> {
        let url = Url::parse_with_params(
            &format!("{}{GET_MESSAGES_PATH}", self.base_url),
            &[("who", who)],
        )
        .map_err(|e| TallyError::Config(format!("invalid backend URL: {e}")))?;
        let url = &url;

        self.with_retry("get_all_messages", || async move {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(transport_error)?;
            let data = read_envelope::<MessagesData>(response)
                .await
                .map_err(Rejection::into_error)?;
            Ok(data.unwrap_or_default().messages)
        })
        .await
    }

    /// Sends `message` into the `who` conversation.
    pub async fn send_message(&self, who: &str, message: &str) -> Result<(), TallyError> {
        let url = format!("{}{SEND_MESSAGE_PATH}", self.base_url);
        let url = url.as_str();
        self.with_retry("send_message", || async move {
            let response = self
                .client
                .post(url)
                .timeout(self.send_timeout)
                .json(&SendRequest { who, message })
                .send()
                .await
                .map_err(transport_error)?;
            read_envelope::<serde_json::Value>(response)
                .await
                .map_err(Rejection::into_error)?;
            Ok(())
        })
        .await
    }

    /// Checks the backend health endpoint once, without retry.
    pub async fn health(&self) -> Result<StatusCode, TallyError> {
        let response = self
            .client
            .get(format!("{}{HEALTH_PATH}", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status())
    }

    /// Runs `op` up to `max_attempts` times while it fails transiently.
    ///
    /// Attempt `n` (1-based) is followed by a wait of `n * backoff_base`.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, TallyError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TallyError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_base * attempt;
                    warn!(op = op_name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient backend error, will retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Why a response was not a success.
enum Rejection {
    /// Non-success HTTP status.
    Status(StatusCode, String),
    /// HTTP success with a non-zero result code.
    Code(i64, String),
    /// Body was not a backend envelope.
    Malformed(String),
}

impl Rejection {
    fn into_error(self) -> TallyError {
        match self {
            Rejection::Status(status, body) => {
                let kind = if mentions_not_found(&body) {
                    BackendErrorKind::NotFound
                } else if status == StatusCode::NOT_FOUND {
                    BackendErrorKind::NotListening
                } else if is_transient_status(status) {
                    BackendErrorKind::Transient
                } else {
                    BackendErrorKind::Rejected
                };
                TallyError::backend(kind, format!("backend returned {status}: {body}"))
            }
            Rejection::Code(code, message) => {
                // The backend reuses 3001 for unknown contacts; the text decides.
                let kind = if mentions_not_found(&message) {
                    BackendErrorKind::NotFound
                } else if code == CODE_NOT_LISTENING || mentions_not_listening(&message) {
                    BackendErrorKind::NotListening
                } else {
                    BackendErrorKind::Rejected
                };
                TallyError::backend(kind, format!("backend code {code}: {message}"))
            }
            Rejection::Malformed(detail) => TallyError::backend(
                BackendErrorKind::Rejected,
                format!("malformed backend response: {detail}"),
            ),
        }
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, Rejection> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    debug!(status = %status, "backend response received");

    if !status.is_success() {
        return Err(Rejection::Status(status, body));
    }
    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&body).map_err(|e| Rejection::Malformed(e.to_string()))?;
    if envelope.code != CODE_OK {
        return Err(Rejection::Code(envelope.code, envelope.message));
    }
    if mentions_not_listening(&envelope.message) {
        return Err(Rejection::Code(CODE_NOT_LISTENING, envelope.message));
    }
    Ok(envelope.data)
}

fn transport_error(e: reqwest::Error) -> TallyError {
    let kind = if e.is_timeout() || e.is_connect() || e.is_request() {
        BackendErrorKind::Transient
    } else {
        BackendErrorKind::Rejected
    };
    TallyError::Backend {
        message: format!("HTTP request failed: {e}"),
        kind,
        source: Some(Box::new(e)),
    }
}

fn mentions_not_listening(message: &str) -> bool {
    NOT_LISTENING_TEXTS.iter().any(|t| message.contains(t))
}

fn mentions_not_found(message: &str) -> bool {
    NOT_FOUND_TEXTS.iter().any(|t| message.contains(t))
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> BackendClient {
        let config = BackendConfig {
            api_key: Some("secret".into()),
            max_attempts: 3,
            backoff_base_ms: 1,
            ..Default::default()
        };
        BackendClient::new(&config)
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    fn ok(data: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0, "message": "success", "data": data
        }))
    }

    #[tokio::test]
    async fn fetch_sends_key_and_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .and(query_param("who", "家庭群"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ok(serde_json::json!({"messages": [
                {"id": "1", "type": "friend", "content": "coffee 12", "sender": "ann"}
            ]})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let entries = client.get_all_messages("家庭群").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "coffee 12");
    }

    #[tokio::test]
    async fn fetch_retries_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .respond_with(ok(serde_json::json!({"messages": []})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert!(client.get_all_messages("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.get_all_messages("t").await.unwrap_err();
        assert!(err.is_transient(), "got: {err}");
    }

    #[tokio::test]
    async fn not_listening_is_classified_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 3001, "message": "家庭群 未在监听列表中", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.get_all_messages("家庭群").await.unwrap_err();
        assert!(err.is_not_listening(), "got: {err}");
    }

    #[tokio::test]
    async fn http_404_means_not_listening() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.send_message("t", "hi").await.unwrap_err();
        assert!(err.is_not_listening());
    }

    #[tokio::test]
    async fn listen_add_accepts_already_listening() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LISTEN_ADD_PATH))
            .and(body_json(serde_json::json!({
                "who": "t", "savepic": false, "savefile": false, "savevoice": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 3002, "message": "already exists", "data": null
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        client.listen_add("t").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_contact_is_not_found_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LISTEN_ADD_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "code": 3001, "message": "添加监听失败: 找不到联系人: nobody", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(GET_MESSAGES_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "detail": "Chat window not found for nobody"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.listen_add("nobody").await.unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
        let err = client.get_all_messages("nobody").await.unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
        assert!(!err.is_not_listening());
    }

    #[tokio::test]
    async fn rejected_code_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 2001, "message": "window closed", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.send_message("t", "hi").await.unwrap_err();
        assert_eq!(err.backend_kind(), Some(BackendErrorKind::Rejected));
        assert!(err.to_string().contains("window closed"), "got: {err}");
    }
}
