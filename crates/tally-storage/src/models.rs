// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the ledger tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{AccountingStatus, MessageStatus};

/// Format a UTC instant the way every ledger timestamp is stored.
///
/// Matches SQLite's `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` so stored
/// values compare correctly as text.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Current time as a ledger timestamp.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// One distinct message ever seen for a chat target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub chat_target: String,
    /// Ledger key, unique per target.
    pub fingerprint: String,
    /// Fingerprint without the time bucket, used by crash recovery.
    pub relaxed_fingerprint: String,
    pub backend_message_id: String,
    pub content: String,
    pub content_hash: String,
    pub sender: String,
    pub time_context: String,
    pub sequence_position: i64,
    pub session_id: Option<String>,
    pub status: MessageStatus,
    pub accounting_status: AccountingStatus,
    /// Last downstream response body as JSON text.
    pub downstream_response: Option<String>,
    pub downstream_record_id: Option<String>,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
}

/// Per-target monitoring configuration and seeding state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub chat_target: String,
    pub is_initialized: bool,
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub last_sequence_position: Option<i64>,
    pub last_fingerprint: Option<String>,
    pub initialization_time: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TargetConfig {
    /// A fresh, uninitialized target.
    pub fn new(chat_target: impl Into<String>, poll_interval_secs: u64, max_retries: u32) -> Self {
        let now = now_timestamp();
        Self {
            chat_target: chat_target.into(),
            is_initialized: false,
            poll_interval_secs,
            max_retries,
            last_sequence_position: None,
            last_fingerprint: None,
            initialization_time: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Severity of a processing log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// A processing log row to be written.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub chat_target: String,
    pub fingerprint: Option<String>,
    pub action: String,
    pub level: LogLevel,
    pub message: String,
    pub error_details: Option<String>,
    pub processing_time_ms: Option<i64>,
}

impl NewLogEntry {
    pub fn new(
        chat_target: impl Into<String>,
        action: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            chat_target: chat_target.into(),
            fingerprint: None,
            action: action.into(),
            level,
            message: message.into(),
            error_details: None,
            processing_time_ms: None,
        }
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    pub fn elapsed_ms(mut self, ms: i64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }
}

/// A stored processing log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub chat_target: String,
    pub fingerprint: Option<String>,
    pub action: String,
    pub level: String,
    pub message: String,
    pub error_details: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: String,
}

/// One reconciliation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub chat_target: String,
    /// JSON array of the matched `[sender, content]` pairs.
    pub match_sequence: String,
    /// Index in the fresh snapshot where the matched window starts.
    pub match_position: Option<i64>,
    pub new_messages_count: i64,
    pub match_confidence: f64,
    pub created_at: String,
}

/// Aggregate counters for one target, or for all targets when
/// `chat_target` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub chat_target: Option<String>,
    pub total: i64,
    pub processed: i64,
    pub failed: i64,
    pub pending: i64,
    pub accounting_success: i64,
    pub accounting_failed: i64,
    pub accounting_nothing: i64,
    pub accounting_initial: i64,
    pub last_processed_at: Option<String>,
}

impl TargetStats {
    /// Share of dispatched messages that were booked successfully, in percent.
    ///
    /// Baseline (`initial`) rows are not dispatched and are excluded.
    pub fn success_rate(&self) -> f64 {
        let dispatched = self.accounting_success + self.accounting_failed + self.accounting_nothing;
        if dispatched == 0 {
            0.0
        } else {
            self.accounting_success as f64 * 100.0 / dispatched as f64
        }
    }

    /// Share of dispatched messages classified as unrelated, in percent.
    pub fn unrelated_rate(&self) -> f64 {
        let dispatched = self.accounting_success + self.accounting_failed + self.accounting_nothing;
        if dispatched == 0 {
            0.0
        } else {
            self.accounting_nothing as f64 * 100.0 / dispatched as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_format_is_sortable_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1);
        assert_eq!(format_timestamp(early), "2026-01-02T03:04:05.678Z");
        assert!(format_timestamp(early) < format_timestamp(late));
    }

    #[test]
    fn rates_ignore_baseline_rows() {
        let stats = TargetStats {
            accounting_success: 3,
            accounting_failed: 1,
            accounting_nothing: 0,
            accounting_initial: 40,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(stats.unrelated_rate(), 0.0);
        assert_eq!(TargetStats::default().success_rate(), 0.0);
    }
}
