// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally status` command implementation.
//!
//! Reads the ledger directly: which targets are registered, whether each has
//! a baseline, and when it last dispatched a message. Live worker state is
//! only known to the serving process.

use std::io::IsTerminal;

use serde::Serialize;
use tally_config::TallyConfig;
use tally_core::TallyError;
use tally_storage::queries::{stats, targets};
use tally_storage::{Database, TargetConfig, TargetStats};

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub chat_target: String,
    pub initialized: bool,
    pub initialization_time: Option<String>,
    pub poll_interval_secs: u64,
    pub records: i64,
    pub failed: i64,
    pub last_processed_at: Option<String>,
}

impl TargetStatus {
    fn new(config: TargetConfig, stats: &TargetStats) -> Self {
        Self {
            chat_target: config.chat_target,
            initialized: config.is_initialized,
            initialization_time: config.initialization_time,
            poll_interval_secs: config.poll_interval_secs,
            records: stats.total,
            failed: stats.failed,
            last_processed_at: stats.last_processed_at.clone(),
        }
    }
}

/// Run the `tally status` command.
///
/// If `--json` is passed, outputs structured JSON for scripting.
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub async fn run_status(config: &TallyConfig, json: bool, plain: bool) -> Result<(), TallyError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;

    let mut rows = Vec::new();
    for target in targets::list_targets(&db).await? {
        let counters = stats::target_stats(&db, &target.chat_target).await?;
        rows.push(TargetStatus::new(target, &counters));
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&config.storage.database_path, &rows, use_color);
    }
    Ok(())
}

fn print_status(database_path: &str, rows: &[TargetStatus], use_color: bool) {
    println!();
    println!("  tally status");
    println!("  {}", "-".repeat(35));
    println!("    Ledger:   {database_path}");

    if rows.is_empty() {
        println!("    Targets:  none");
        println!();
        println!("  Add one with: tally add <target>");
        println!();
        return;
    }

    for row in rows {
        let last = row.last_processed_at.as_deref().unwrap_or("never");
        if use_color {
            use colored::Colorize;
            let marker = if row.initialized {
                "✓".green()
            } else {
                "✗".red()
            };
            println!(
                "    {marker} {}  records: {}  failed: {}  last dispatch: {last}",
                row.chat_target.bold(),
                row.records,
                row.failed
            );
        } else {
            let marker = if row.initialized { "[OK]" } else { "[NEW]" };
            println!(
                "    {marker} {}  records: {}  failed: {}  last dispatch: {last}",
                row.chat_target, row.records, row.failed
            );
        }
    }
    println!();
}
