// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processing log and reconciliation history.

use rusqlite::params;
use tally_core::TallyError;

use crate::database::Database;
use crate::models::{now_timestamp, LogEntry, MatchHistoryEntry, NewLogEntry};

/// Append a processing log row.
pub async fn log_action(db: &Database, entry: NewLogEntry) -> Result<(), TallyError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO processing_log (chat_target, fingerprint, action, level, message,
                     error_details, processing_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.chat_target,
                    entry.fingerprint,
                    entry.action,
                    entry.level.as_str(),
                    entry.message,
                    entry.error_details,
                    entry.processing_time_ms,
                    now_timestamp(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent log rows for the target, newest first.
pub async fn recent_logs(
    db: &Database,
    chat_target: &str,
    limit: usize,
) -> Result<Vec<LogEntry>, TallyError> {
    let chat_target = chat_target.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_target, fingerprint, action, level, message, error_details,
                        processing_time_ms, created_at
                 FROM processing_log
                 WHERE chat_target = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_target, limit], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    chat_target: row.get(1)?,
                    fingerprint: row.get(2)?,
                    action: row.get(3)?,
                    level: row.get(4)?,
                    message: row.get(5)?,
                    error_details: row.get(6)?,
                    processing_time_ms: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record the outcome of one reconciliation.
pub async fn record_match(db: &Database, entry: MatchHistoryEntry) -> Result<(), TallyError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sequence_match_history (chat_target, match_sequence, match_position,
                     new_messages_count, match_confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.chat_target,
                    entry.match_sequence,
                    entry.match_position,
                    entry.new_messages_count,
                    entry.match_confidence,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reconciliation history for the target, newest first.
pub async fn match_history(
    db: &Database,
    chat_target: &str,
    limit: usize,
) -> Result<Vec<MatchHistoryEntry>, TallyError> {
    let chat_target = chat_target.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_target, match_sequence, match_position, new_messages_count,
                        match_confidence, created_at
                 FROM sequence_match_history
                 WHERE chat_target = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_target, limit], |row| {
                Ok(MatchHistoryEntry {
                    chat_target: row.get(0)?,
                    match_sequence: row.get(1)?,
                    match_position: row.get(2)?,
                    new_messages_count: row.get(3)?,
                    match_confidence: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
