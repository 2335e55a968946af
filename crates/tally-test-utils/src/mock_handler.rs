// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock downstream handler for deterministic testing.
//!
//! `MockHandler` records every classification request and answers from a
//! script, falling back to an accepted outcome with a fresh correlation id.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tally_core::traits::adapter::PluginAdapter;
use tally_core::traits::handler::DownstreamHandler;
use tally_core::types::{AdapterType, HandlerOutcome, HealthStatus};
use tally_core::TallyError;

/// A scripted downstream classifier.
pub struct MockHandler {
    script: Arc<Mutex<VecDeque<Result<HandlerOutcome, String>>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    delay: Option<Duration>,
}

impl MockHandler {
    /// Create a handler that accepts everything.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Create a handler that takes `delay` to answer each call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    /// Queue the outcome of the next call.
    pub async fn push_outcome(&self, outcome: HandlerOutcome) {
        self.script.lock().await.push_back(Ok(outcome));
    }

    /// Queue a transport-level failure for the next call.
    pub async fn push_error(&self, message: &str) {
        self.script.lock().await.push_back(Err(message.to_string()));
    }

    /// Every `(content, sender)` classified so far, in call order.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// How many times `content` was classified.
    pub async fn calls_for(&self, content: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(c, _)| c == content)
            .count()
    }

    /// An accepted outcome carrying a reply and a correlation id.
    pub fn accepted(reply: &str, correlation_id: &str) -> HandlerOutcome {
        HandlerOutcome {
            accepted: true,
            reply_text: reply.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            unrelated: false,
            response: Some(serde_json::json!({ "success": true, "id": correlation_id })),
        }
    }

    /// A rejected outcome without a correlation id.
    pub fn rejected(reason: &str) -> HandlerOutcome {
        HandlerOutcome {
            accepted: false,
            reply_text: reason.to_string(),
            ..Default::default()
        }
    }

    /// An outcome for a message the handler considers out of scope.
    pub fn unrelated() -> HandlerOutcome {
        HandlerOutcome {
            accepted: true,
            reply_text: "unrelated".to_string(),
            unrelated: true,
            ..Default::default()
        }
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockHandler {
    fn name(&self) -> &str {
        "mock-handler"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Handler
    }

    async fn health_check(&self) -> Result<HealthStatus, TallyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TallyError> {
        Ok(())
    }
}

#[async_trait]
impl DownstreamHandler for MockHandler {
    async fn classify(&self, content: &str, sender: &str) -> Result<HandlerOutcome, TallyError> {
        let call = {
            let mut calls = self.calls.lock().await;
            calls.push((content.to_string(), sender.to_string()));
            calls.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.lock().await.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(TallyError::Handler {
                message,
                source: None,
            }),
            None => Ok(Self::accepted(
                &format!("booked: {content}"),
                &format!("rec-{call}"),
            )),
        }
    }
}
