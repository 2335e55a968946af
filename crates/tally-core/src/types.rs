// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Tally workspace.

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter plugged into the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Backend,
    Handler,
    Storage,
}

// --- Snapshot types ---

/// Entry type as reported by the chat-automation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A human message from the counterparty.
    Friend,
    /// A message sent by the monitored account itself.
    #[serde(rename = "self")]
    SelfSent,
    /// System notice.
    Sys,
    /// Bare time separator; its content is the time label.
    Time,
    /// Recalled message placeholder.
    Recall,
    /// Anything the backend adds in the future.
    #[serde(other)]
    Unknown,
}

/// One entry of a raw snapshot, exactly as fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Volatile backend-assigned id. Not stable across window reopen.
    #[serde(default, deserialize_with = "string_like")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, deserialize_with = "string_like")]
    pub content: String,
    #[serde(default, deserialize_with = "string_like")]
    pub sender: String,
    /// Contact remark, preferred over `sender` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_remark: Option<String>,
}

impl RawEntry {
    /// A counterparty message.
    pub fn friend(id: impl Into<String>, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: EntryKind::Friend,
            content: content.into(),
            sender: sender.into(),
            sender_remark: None,
        }
    }

    /// A time separator carrying `label`.
    pub fn time(label: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind: EntryKind::Time,
            content: label.into(),
            sender: String::new(),
            sender_remark: None,
        }
    }

    /// An entry of any other kind.
    pub fn other(kind: EntryKind, id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            sender: String::new(),
            sender_remark: None,
        }
    }
}

/// Accepts a JSON string, number or null and yields a `String`.
fn string_like<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

/// A retained human message after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Volatile backend id, or `unknown_{position}` when the backend sent none.
    pub backend_id: String,
    pub content: String,
    pub sender: String,
    /// Label of the nearest preceding time separator, `unknown` if none.
    pub time_context: String,
    /// Dense 0-based index over retained entries only.
    pub position: usize,
}

// --- Ledger status types ---

/// Processing status of a message record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// Downstream classification outcome recorded for a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountingStatus {
    /// Pre-existing at first attach; never classified.
    Initial,
    Pending,
    Success,
    Failed,
    /// Classified as unrelated.
    Nothing,
}

/// Result returned by the downstream classifier for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub accepted: bool,
    /// Text to send back to the chat. Empty means nothing to send.
    pub reply_text: String,
    /// Correlation id of the downstream record, if one was created.
    pub correlation_id: Option<String>,
    /// The handler signalled the message is unrelated to its domain.
    pub unrelated: bool,
    /// Raw response body, retained on the ledger row.
    pub response: Option<serde_json::Value>,
}

impl HandlerOutcome {
    /// Maps the outcome onto the ledger's accounting status.
    pub fn accounting_status(&self) -> AccountingStatus {
        if self.unrelated {
            AccountingStatus::Nothing
        } else if self.accepted {
            AccountingStatus::Success
        } else {
            AccountingStatus::Failed
        }
    }

    /// Whether a reply should be sent back to the chat. Only accepted,
    /// related outcomes with text produce a reply.
    pub fn should_reply(&self) -> bool {
        self.accepted && !self.unrelated && !self.reply_text.trim().is_empty()
    }
}

/// User-visible per-target monitoring state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum TargetState {
    Stopped,
    Initializing,
    Running,
    Error(String),
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Stopped => write!(f, "stopped"),
            TargetState::Initializing => write!(f, "initializing"),
            TargetState::Running => write!(f, "running"),
            TargetState::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}
