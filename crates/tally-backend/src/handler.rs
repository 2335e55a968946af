// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`DownstreamHandler`] backed by the smart-accounting HTTP service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tally_config::model::HandlerConfig;
use tally_core::{
    AdapterType, DownstreamHandler, HandlerOutcome, HealthStatus, PluginAdapter, TallyError,
};
use tracing::{debug, info, warn};

use crate::format::{correlation_id, is_unrelated, success_reply};
use crate::types::AccountingRequest;

const DIRECT_ACCOUNTING_PATH: &str = "/api/ai/smart-accounting/direct";
const HEALTH_PATH: &str = "/api/health";

/// Classifies chat messages by posting them to the accounting service.
#[derive(Debug, Clone)]
pub struct HttpAccountingHandler {
    client: reqwest::Client,
    server_url: String,
    token: String,
    account_book_id: String,
    unrelated_markers: Vec<String>,
}

impl HttpAccountingHandler {
    /// Creates a handler from the handler section of the configuration.
    ///
    /// Fails when the server URL, token or account book is not configured.
    pub fn new(config: &HandlerConfig) -> Result<Self, TallyError> {
        let required = |value: &Option<String>, key: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| TallyError::Config(format!("handler.{key} is required")))
        };
        let server_url = required(&config.server_url, "server_url")?;
        let token = required(&config.token, "token")?;
        let account_book_id = required(&config.account_book_id, "account_book_id")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TallyError::Handler {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            token,
            account_book_id,
            unrelated_markers: config.unrelated_markers.clone(),
        })
    }

    /// Overrides the server URL (for testing with wiremock).
    #[cfg(test)]
    pub fn with_server_url(mut self, url: String) -> Self {
        self.server_url = url;
        self
    }

    /// Turns a parsed response body into an outcome.
    fn interpret(&self, status: StatusCode, body: Value) -> HandlerOutcome {
        let mut outcome = HandlerOutcome {
            correlation_id: correlation_id(&body),
            ..Default::default()
        };

        if status == StatusCode::BAD_REQUEST {
            let info = text(&body, "info");
            let error = text(&body, "error");
            if is_unrelated(&info, &self.unrelated_markers)
                || is_unrelated(&error, &self.unrelated_markers)
            {
                outcome.accepted = true;
                outcome.unrelated = true;
            } else {
                let reason = first_non_empty(&[error.as_str(), info.as_str(), "bad request"]);
                outcome.reply_text = format!("❌ 记账失败: {reason}");
            }
        } else if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            outcome.reply_text = status_message(status, &text(&body, "message"));
        } else if let Some(result) = body.get("smartAccountingResult") {
            if result.get("isRelevant") == Some(&Value::Bool(false)) {
                outcome.accepted = true;
                outcome.unrelated = true;
            } else if let Some(error) = result.get("error") {
                let error = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
                outcome.reply_text = format!("❌ 记账失败: {error}");
            } else {
                outcome.accepted = true;
                outcome.reply_text = success_reply(&body);
            }
        } else if body.get("success") == Some(&Value::Bool(true))
            || body.get("code").and_then(Value::as_i64) == Some(0)
            || status == StatusCode::CREATED
        {
            outcome.accepted = true;
            outcome.reply_text = success_reply(&body);
        } else {
            let message = text(&body, "message");
            let reason = first_non_empty(&[message.as_str(), "unknown error"]);
            outcome.reply_text = format!("❌ 记账失败: {reason}");
        }

        if !outcome.unrelated
            && (is_unrelated(&outcome.reply_text, &self.unrelated_markers)
                || is_unrelated(&text(&body, "message"), &self.unrelated_markers))
        {
            outcome.unrelated = true;
        }
        outcome.response = Some(body);
        outcome
    }
}

#[async_trait]
impl PluginAdapter for HttpAccountingHandler {
    fn name(&self) -> &str {
        "accounting-http"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Handler
    }

    async fn health_check(&self) -> Result<HealthStatus, TallyError> {
        let url = format!("{}{HEALTH_PATH}", self.server_url);
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "accounting service returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!(
                "accounting service unreachable: {e}"
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), TallyError> {
        Ok(())
    }
}

#[async_trait]
impl DownstreamHandler for HttpAccountingHandler {
    async fn classify(&self, content: &str, sender: &str) -> Result<HandlerOutcome, TallyError> {
        let url = format!("{}{DIRECT_ACCOUNTING_PATH}", self.server_url);
        let request = AccountingRequest {
            description: content,
            account_book_id: &self.account_book_id,
            user_name: Some(sender).filter(|s| !s.is_empty()),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| TallyError::Handler {
                message: format!("accounting request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        debug!(status = %status, "accounting response received");

        let body = match serde_json::from_str::<Value>(&raw) {
            Ok(body) => body,
            Err(_) if status.is_success() => {
                warn!(status = %status, "accounting response is not JSON");
                return Ok(HandlerOutcome {
                    reply_text: format!("❌ 记账失败: unreadable response ({status})"),
                    ..Default::default()
                });
            }
            Err(_) => Value::String(raw),
        };

        let outcome = self.interpret(status, body);
        info!(
            status = %status,
            accepted = outcome.accepted,
            unrelated = outcome.unrelated,
            correlation_id = outcome.correlation_id.as_deref().unwrap_or(""),
            "message classified"
        );
        Ok(outcome)
    }
}

fn text(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|c| !c.is_empty())
        .unwrap_or_default()
}

fn status_message(status: StatusCode, detail: &str) -> String {
    let base = match status {
        StatusCode::UNAUTHORIZED => "🔐 记账服务认证失败，请检查token是否有效".to_string(),
        StatusCode::NOT_FOUND => "🔍 记账服务API不存在，请检查server_url配置".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "⏱️ 访问过于频繁，请稍后再试".to_string(),
        StatusCode::PAYMENT_REQUIRED => "💳 token使用达到限制，请检查账户余额".to_string(),
        _ => format!("⚠️ 记账服务返回错误: HTTP {}", status.as_u16()),
    };
    if detail.is_empty() {
        base
    } else {
        format!("{base} - {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::AccountingStatus;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_handler(server_url: &str) -> HttpAccountingHandler {
        let config = HandlerConfig {
            server_url: Some("http://unused".into()),
            token: Some("tok".into()),
            account_book_id: Some("book-1".into()),
            ..Default::default()
        };
        HttpAccountingHandler::new(&config)
            .unwrap()
            .with_server_url(server_url.to_string())
    }

    #[test]
    fn missing_settings_are_config_errors() {
        let err = HttpAccountingHandler::new(&HandlerConfig::default()).unwrap_err();
        assert!(matches!(err, TallyError::Config(msg) if msg.contains("server_url")));
    }

    #[tokio::test]
    async fn accepted_booking_builds_reply_and_correlation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DIRECT_ACCOUNTING_PATH))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({
                "description": "打车 30", "accountBookId": "book-1", "userName": "alice"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "smartAccountingResult": {"id": "rec-1", "amount": 30, "note": "打车", "categoryName": "交通"}
            })))
            .mount(&server)
            .await;

        let handler = test_handler(&server.uri());
        let outcome = handler.classify("打车 30", "alice").await.unwrap();
        assert!(outcome.accepted);
        assert!(outcome.should_reply());
        assert_eq!(outcome.correlation_id.as_deref(), Some("rec-1"));
        assert_eq!(outcome.accounting_status(), AccountingStatus::Success);
        assert!(outcome.reply_text.contains("💰 金额：30元"));
    }

    #[tokio::test]
    async fn irrelevant_message_is_unrelated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DIRECT_ACCOUNTING_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "smartAccountingResult": {"isRelevant": false}
            })))
            .mount(&server)
            .await;

        let outcome = test_handler(&server.uri()).classify("hello", "bob").await.unwrap();
        assert!(outcome.unrelated);
        assert!(!outcome.should_reply());
        assert_eq!(outcome.accounting_status(), AccountingStatus::Nothing);
    }

    #[tokio::test]
    async fn bad_request_with_marker_is_unrelated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DIRECT_ACCOUNTING_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "info": "消息与记账无关"
            })))
            .mount(&server)
            .await;

        let outcome = test_handler(&server.uri()).classify("hi", "bob").await.unwrap();
        assert_eq!(outcome.accounting_status(), AccountingStatus::Nothing);
    }

    #[tokio::test]
    async fn unauthorized_is_rejected_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DIRECT_ACCOUNTING_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let outcome = test_handler(&server.uri()).classify("lunch 20", "bob").await.unwrap();
        assert!(!outcome.accepted);
        assert!(!outcome.should_reply());
        assert_eq!(outcome.accounting_status(), AccountingStatus::Failed);
        assert!(outcome.reply_text.contains("认证失败"));
    }

    #[tokio::test]
    async fn transport_failure_is_handler_error() {
        // Port 1 refuses connections.
        let err = test_handler("http://127.0.0.1:1")
            .classify("lunch 20", "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::Handler { .. }));
    }
}
