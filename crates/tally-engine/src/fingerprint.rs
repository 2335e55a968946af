// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content identity for normalized messages.
//!
//! The ledger key is `sender|hash8|bucket`, with `|#n` appended for the n-th
//! (n > 0) repeat inside a run of identical `(sender, content)` messages.
//! The bucket is the processing wall clock floored to `bucket_minutes`; the
//! backend provides no per-message timestamps. The relaxed form drops the
//! bucket and is used only to recognise messages from earlier sessions.

use chrono::{DateTime, Duration, DurationRound, Utc};
use sha2::{Digest, Sha256};
use tally_core::{AccountingStatus, MessageStatus, NormalizedMessage};
use tally_storage::{format_timestamp, MessageRecord};

/// First 8 hex digits of the SHA-256 of `content`.
pub fn hash8(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..4])
}

/// Floors `at` to a `minutes`-wide bucket, rendered `YYYY-MM-DD HH:MM`.
pub fn time_bucket(at: DateTime<Utc>, minutes: u32) -> String {
    let width = Duration::minutes(i64::from(minutes.max(1)));
    at.duration_trunc(width)
        .unwrap_or(at)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// A normalized message with its derived identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintedMessage {
    pub message: NormalizedMessage,
    pub content_hash: String,
    /// Ledger key.
    pub fingerprint: String,
    /// Bucket-free form for cross-session recognition.
    pub relaxed_fingerprint: String,
    /// Index within its run of identical consecutive messages.
    pub ordinal: usize,
    /// Ledger timestamp of the observation, stored as `created_at`.
    pub observed_at: String,
}

impl FingerprintedMessage {
    /// The `(sender, content)` pair compared by the reconciler.
    pub fn identity(&self) -> (String, String) {
        (self.message.sender.clone(), self.message.content.clone())
    }

    /// A ledger row for this message in the given state.
    pub fn to_record(
        &self,
        chat_target: &str,
        session_id: Option<&str>,
        status: MessageStatus,
        accounting_status: AccountingStatus,
    ) -> MessageRecord {
        MessageRecord {
            chat_target: chat_target.to_string(),
            fingerprint: self.fingerprint.clone(),
            relaxed_fingerprint: self.relaxed_fingerprint.clone(),
            backend_message_id: self.message.backend_id.clone(),
            content: self.message.content.clone(),
            content_hash: self.content_hash.clone(),
            sender: self.message.sender.clone(),
            time_context: self.message.time_context.clone(),
            sequence_position: self.message.position as i64,
            session_id: session_id.map(str::to_string),
            status,
            accounting_status,
            downstream_response: None,
            downstream_record_id: None,
            retry_count: 0,
            last_error: None,
            created_at: self.observed_at.clone(),
            updated_at: String::new(),
            processed_at: None,
        }
    }
}

impl From<&MessageRecord> for FingerprintedMessage {
    /// Rebuilds a dispatchable message from a stored row, e.g. for a retry.
    fn from(record: &MessageRecord) -> Self {
        let ordinal = record
            .fingerprint
            .rsplit_once("|#")
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(0);
        Self {
            message: NormalizedMessage {
                backend_id: record.backend_message_id.clone(),
                content: record.content.clone(),
                sender: record.sender.clone(),
                time_context: record.time_context.clone(),
                position: record.sequence_position.max(0) as usize,
            },
            content_hash: record.content_hash.clone(),
            fingerprint: record.fingerprint.clone(),
            relaxed_fingerprint: record.relaxed_fingerprint.clone(),
            ordinal,
            observed_at: record.created_at.clone(),
        }
    }
}

/// Derives fingerprints for whole snapshots.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintEngine {
    bucket_minutes: u32,
}

impl FingerprintEngine {
    pub fn new(bucket_minutes: u32) -> Self {
        Self { bucket_minutes }
    }

    /// Fingerprints `messages` as observed at `now`.
    ///
    /// Runs of consecutive identical `(sender, content)` get ordinals
    /// `0..k`, so each repeat has its own key.
    pub fn fingerprint(
        &self,
        messages: Vec<NormalizedMessage>,
        now: DateTime<Utc>,
    ) -> Vec<FingerprintedMessage> {
        let bucket = time_bucket(now, self.bucket_minutes);
        let observed_at = format_timestamp(now);
        let mut out: Vec<FingerprintedMessage> = Vec::with_capacity(messages.len());

        for message in messages {
            let ordinal = match out.last() {
                Some(prev)
                    if prev.message.sender == message.sender
                        && prev.message.content == message.content =>
                {
                    prev.ordinal + 1
                }
                _ => 0,
            };
            let content_hash = hash8(&message.content);
            let base = format!("{}|{content_hash}", message.sender);
            let (fingerprint, relaxed_fingerprint) = if ordinal == 0 {
                (format!("{base}|{bucket}"), base)
            } else {
                (
                    format!("{base}|{bucket}|#{ordinal}"),
                    format!("{base}|#{ordinal}"),
                )
            };
            out.push(FingerprintedMessage {
                message,
                content_hash,
                fingerprint,
                relaxed_fingerprint,
                ordinal,
                observed_at: observed_at.clone(),
            });
        }
        out
    }
}
