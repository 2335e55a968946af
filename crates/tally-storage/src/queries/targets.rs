// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat target configuration and baseline seeding.

use rusqlite::{params, OptionalExtension};
use tally_core::TallyError;

use crate::database::Database;
use crate::models::{now_timestamp, MessageRecord, TargetConfig};
use crate::queries::records::insert_or_update;

const TARGET_COLUMNS: &str = "chat_target, is_initialized, poll_interval_secs, max_retries,
     last_sequence_position, last_fingerprint, initialization_time, created_at, updated_at";

fn target_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TargetConfig> {
    Ok(TargetConfig {
        chat_target: row.get(0)?,
        is_initialized: row.get(1)?,
        poll_interval_secs: row.get::<_, i64>(2)?.max(1) as u64,
        max_retries: row.get::<_, i64>(3)?.max(0) as u32,
        last_sequence_position: row.get(4)?,
        last_fingerprint: row.get(5)?,
        initialization_time: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Register a target. Returns `false` if it already existed (left untouched).
pub async fn create_target(db: &Database, target: &TargetConfig) -> Result<bool, TallyError> {
    let target = target.clone();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chat_target_config
                     (chat_target, is_initialized, poll_interval_secs, max_retries,
                      created_at, updated_at)
                 VALUES (?1, 0, ?2, ?3, ?4, ?5)",
                params![
                    target.chat_target,
                    target.poll_interval_secs as i64,
                    target.max_retries,
                    target.created_at,
                    target.updated_at,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a target by name.
pub async fn get_target(db: &Database, chat_target: &str) -> Result<Option<TargetConfig>, TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM chat_target_config WHERE chat_target = ?1"),
                params![chat_target],
                target_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All registered targets, by name.
pub async fn list_targets(db: &Database) -> Result<Vec<TargetConfig>, TallyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TARGET_COLUMNS} FROM chat_target_config ORDER BY chat_target"
            ))?;
            let rows = stmt.query_map([], target_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update polling settings of an existing target.
pub async fn update_settings(
    db: &Database,
    chat_target: &str,
    poll_interval_secs: u64,
    max_retries: u32,
) -> Result<(), TallyError> {
    let name = chat_target.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE chat_target_config
                 SET poll_interval_secs = ?2, max_retries = ?3, updated_at = ?4
                 WHERE chat_target = ?1",
                params![name, poll_interval_secs as i64, max_retries, now_timestamp()],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if changed == 0 {
        return Err(TallyError::TargetNotFound(chat_target.to_string()));
    }
    Ok(())
}

/// Write the baseline records and flip `is_initialized` in one transaction.
///
/// Either every baseline row lands and the target is initialized, or nothing
/// changes: a partially seeded target would let history pass as new.
pub async fn seed_baseline(
    db: &Database,
    chat_target: &str,
    records: Vec<MessageRecord>,
) -> Result<(), TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                insert_or_update(&tx, record)?;
            }
            let last = records.last();
            let now = now_timestamp();
            tx.execute(
                "UPDATE chat_target_config
                 SET is_initialized = 1, last_sequence_position = ?2, last_fingerprint = ?3,
                     initialization_time = ?4, updated_at = ?4
                 WHERE chat_target = ?1",
                params![
                    chat_target,
                    last.map(|r| r.sequence_position),
                    last.map(|r| r.fingerprint.clone()),
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Remember the newest message observed for the target.
pub async fn update_last_seen(
    db: &Database,
    chat_target: &str,
    sequence_position: i64,
    fingerprint: &str,
) -> Result<(), TallyError> {
    let chat_target = chat_target.to_string();
    let fingerprint = fingerprint.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE chat_target_config
                 SET last_sequence_position = ?2, last_fingerprint = ?3, updated_at = ?4
                 WHERE chat_target = ?1",
                params![chat_target, sequence_position, fingerprint, now_timestamp()],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Clear seeding state and delete every record of the target.
///
/// The target row itself is kept so it can be started again, which will
/// re-seed from a fresh snapshot. Returns the number of records deleted.
pub async fn reset_target(db: &Database, chat_target: &str) -> Result<usize, TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE chat_target_config
                 SET is_initialized = 0, last_sequence_position = NULL, last_fingerprint = NULL,
                     initialization_time = NULL, updated_at = ?2
                 WHERE chat_target = ?1",
                params![chat_target, now_timestamp()],
            )?;
            let deleted = tx.execute(
                "DELETE FROM message_records WHERE chat_target = ?1",
                params![chat_target],
            )?;
            tx.execute(
                "DELETE FROM sequence_match_history WHERE chat_target = ?1",
                params![chat_target],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
