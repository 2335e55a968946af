// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message record operations.
//!
//! Every write is a single-row, key-based upsert on `(chat_target, fingerprint)`:
//! a second write with the same key is a status update, never a new row.

use rusqlite::{params, OptionalExtension};
use tally_core::{MessageStatus, TallyError};

use crate::database::Database;
use crate::models::{now_timestamp, MessageRecord};
use crate::queries::parse_column;

const RECORD_COLUMNS: &str = "chat_target, fingerprint, relaxed_fingerprint, backend_message_id,
     content, content_hash, sender, time_context, sequence_position, session_id, status,
     accounting_status, downstream_response, downstream_record_id, retry_count, last_error,
     created_at, updated_at, processed_at";

pub(crate) fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        chat_target: row.get(0)?,
        fingerprint: row.get(1)?,
        relaxed_fingerprint: row.get(2)?,
        backend_message_id: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        sender: row.get(6)?,
        time_context: row.get(7)?,
        sequence_position: row.get(8)?,
        session_id: row.get(9)?,
        status: parse_column(row, 10)?,
        accounting_status: parse_column(row, 11)?,
        downstream_response: row.get(12)?,
        downstream_record_id: row.get(13)?,
        retry_count: row.get(14)?,
        last_error: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        processed_at: row.get(18)?,
    })
}

pub(crate) fn insert_or_update(
    conn: &rusqlite::Connection,
    record: &MessageRecord,
) -> rusqlite::Result<()> {
    let now = now_timestamp();
    let processed_at = match record.status {
        MessageStatus::Processed => Some(record.processed_at.clone().unwrap_or_else(|| now.clone())),
        _ => None,
    };
    let created_at = if record.created_at.is_empty() {
        now.clone()
    } else {
        record.created_at.clone()
    };
    let retry_count = record.retry_count + i64::from(record.status == MessageStatus::Failed);
    conn.execute(
        "INSERT INTO message_records (chat_target, fingerprint, relaxed_fingerprint,
             backend_message_id, content, content_hash, sender, time_context, sequence_position,
             session_id, status, accounting_status, downstream_response, downstream_record_id,
             retry_count, last_error, created_at, updated_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
         ON CONFLICT (chat_target, fingerprint) DO UPDATE SET
             backend_message_id = excluded.backend_message_id,
             time_context = excluded.time_context,
             sequence_position = excluded.sequence_position,
             session_id = COALESCE(excluded.session_id, session_id),
             status = excluded.status,
             accounting_status = excluded.accounting_status,
             downstream_response = COALESCE(excluded.downstream_response, downstream_response),
             downstream_record_id = COALESCE(excluded.downstream_record_id, downstream_record_id),
             retry_count = retry_count + CASE WHEN excluded.status = 'failed' THEN 1 ELSE 0 END,
             last_error = excluded.last_error,
             updated_at = excluded.updated_at,
             processed_at = CASE WHEN excluded.status = 'processed'
                                 THEN COALESCE(processed_at, excluded.processed_at)
                                 ELSE processed_at END",
        params![
            record.chat_target,
            record.fingerprint,
            record.relaxed_fingerprint,
            record.backend_message_id,
            record.content,
            record.content_hash,
            record.sender,
            record.time_context,
            record.sequence_position,
            record.session_id,
            record.status.to_string(),
            record.accounting_status.to_string(),
            record.downstream_response,
            record.downstream_record_id,
            retry_count,
            record.last_error,
            created_at,
            now,
            processed_at,
        ],
    )?;
    Ok(())
}

/// Insert a record, or update status fields of the existing row with the same key.
///
/// On conflict the correlation id and response are never cleared. Every
/// write with status `failed` counts one attempt in `retry_count`.
pub async fn upsert_record(db: &Database, record: &MessageRecord) -> Result<(), TallyError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| insert_or_update(conn, &record))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch a record by its ledger key.
pub async fn get_record(
    db: &Database,
    chat_target: &str,
    fingerprint: &str,
) -> Result<Option<MessageRecord>, TallyError> {
    let chat_target = chat_target.to_string();
    let fingerprint = fingerprint.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM message_records
                     WHERE chat_target = ?1 AND fingerprint = ?2"
                ),
                params![chat_target, fingerprint],
                record_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// True when a row with the same relaxed fingerprint, in any status, was
/// created in `[since, before)`. Used for messages first seen by an earlier
/// session; rows left `processing` or `failed` by it count as seen.
pub async fn relaxed_seen_between(
    db: &Database,
    chat_target: &str,
    relaxed_fingerprint: &str,
    since: &str,
    before: &str,
) -> Result<bool, TallyError> {
    let args = [
        chat_target.to_string(),
        relaxed_fingerprint.to_string(),
        since.to_string(),
        before.to_string(),
    ];
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM message_records
                     WHERE chat_target = ?1 AND relaxed_fingerprint = ?2
                       AND created_at >= ?3 AND created_at < ?4)",
                params![args[0], args[1], args[2], args[3]],
                |row| row.get::<_, bool>(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of rows for the target, in any status, created since `since`.
pub async fn count_recorded_since(
    db: &Database,
    chat_target: &str,
    since: &str,
) -> Result<i64, TallyError> {
    let chat_target = chat_target.to_string();
    let since = since.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM message_records
                 WHERE chat_target = ?1 AND created_at >= ?2",
                params![chat_target, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// `(fingerprint, relaxed_fingerprint)` of every row created since `since`,
/// whatever its status, for rebuilding in-memory dedup state. Rows a crash
/// left `processing` are included so they are never dispatched again.
pub async fn recorded_fingerprints_since(
    db: &Database,
    chat_target: &str,
    since: &str,
) -> Result<Vec<(String, String)>, TallyError> {
    let chat_target = chat_target.to_string();
    let since = since.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT fingerprint, relaxed_fingerprint FROM message_records
                 WHERE chat_target = ?1 AND created_at >= ?2",
            )?;
            let rows = stmt.query_map(params![chat_target, since], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The last `limit` records for the target in first-seen order.
///
/// Rows are inserted in snapshot order and new messages append, so insertion
/// order is the best persisted approximation of the conversation order.
pub async fn known_sequence(
    db: &Database,
    chat_target: &str,
    limit: usize,
) -> Result<Vec<MessageRecord>, TallyError> {
    let chat_target = chat_target.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM message_records
                 WHERE chat_target = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![chat_target, limit], record_from_row)?;
            let mut records = rows.collect::<Result<Vec<_>, _>>()?;
            records.reverse();
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Rewrite backend ids and positions after a window reopen, in one transaction.
///
/// `updates` holds `(fingerprint, backend_message_id, sequence_position)`.
/// Returns the number of rows changed.
pub async fn update_backend_ids(
    db: &Database,
    chat_target: &str,
    updates: Vec<(String, String, i64)>,
) -> Result<usize, TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE message_records
                     SET backend_message_id = ?3, sequence_position = ?4, updated_at = ?5
                     WHERE chat_target = ?1 AND fingerprint = ?2",
                )?;
                let now = now_timestamp();
                for (fingerprint, backend_id, position) in &updates {
                    changed += stmt.execute(params![chat_target, fingerprint, backend_id, position, now])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Failed records due for another look: those with a correlation id (to be
/// closed without a handler call) and those still under `max_retries`.
pub async fn retryable_failures(
    db: &Database,
    chat_target: &str,
    max_retries: u32,
) -> Result<Vec<MessageRecord>, TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM message_records
                 WHERE chat_target = ?1 AND status = 'failed'
                   AND (downstream_record_id IS NOT NULL OR retry_count < ?2)
                 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![chat_target, max_retries], record_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent records for the target, newest first.
pub async fn recent_records(
    db: &Database,
    chat_target: &str,
    limit: usize,
) -> Result<Vec<MessageRecord>, TallyError> {
    let chat_target = chat_target.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM message_records
                 WHERE chat_target = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![chat_target, limit], record_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete dispatched `processed` records and log rows older than `cutoff`.
///
/// Baseline rows and anything not yet processed are kept: they still carry
/// dedup state. Returns `(records_deleted, log_rows_deleted)`.
pub async fn cleanup_before(db: &Database, cutoff: &str) -> Result<(usize, usize), TallyError> {
    let cutoff = cutoff.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let records = tx.execute(
                "DELETE FROM message_records
                 WHERE status = 'processed' AND accounting_status != 'initial'
                   AND COALESCE(processed_at, updated_at) < ?1",
                params![cutoff],
            )?;
            let logs = tx.execute(
                "DELETE FROM processing_log WHERE created_at < ?1",
                params![cutoff],
            )?;
            tx.commit()?;
            Ok((records, logs))
        })
        .await
        .map_err(crate::database::map_tr_err)
}
