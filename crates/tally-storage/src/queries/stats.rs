// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregate counters over message records.

use rusqlite::params;
use tally_core::TallyError;

use crate::database::Database;
use crate::models::TargetStats;

const STATS_SELECT: &str = "SELECT
         COUNT(*),
         COALESCE(SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN status IN ('pending', 'processing') THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN accounting_status = 'success' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN accounting_status = 'failed' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN accounting_status = 'nothing' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN accounting_status = 'initial' THEN 1 ELSE 0 END), 0),
         MAX(CASE WHEN accounting_status != 'initial' THEN processed_at END)
     FROM message_records";

fn stats_from_row(row: &rusqlite::Row<'_>, chat_target: Option<String>) -> rusqlite::Result<TargetStats> {
    Ok(TargetStats {
        chat_target,
        total: row.get(0)?,
        processed: row.get(1)?,
        failed: row.get(2)?,
        pending: row.get(3)?,
        accounting_success: row.get(4)?,
        accounting_failed: row.get(5)?,
        accounting_nothing: row.get(6)?,
        accounting_initial: row.get(7)?,
        last_processed_at: row.get(8)?,
    })
}

/// Counters for one target.
pub async fn target_stats(db: &Database, chat_target: &str) -> Result<TargetStats, TallyError> {
    let chat_target = chat_target.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{STATS_SELECT} WHERE chat_target = ?1"),
                params![chat_target],
                |row| stats_from_row(row, Some(chat_target.clone())),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Counters across every target.
pub async fn global_stats(db: &Database) -> Result<TargetStats, TallyError> {
    db.connection()
        .call(|conn| conn.query_row(STATS_SELECT, [], |row| stats_from_row(row, None)))
        .await
        .map_err(crate::database::map_tr_err)
}
