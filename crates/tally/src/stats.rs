// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally stats` and `tally cleanup` command implementations.

use chrono::Utc;
use tally_config::TallyConfig;
use tally_core::TallyError;
use tally_storage::queries::{records, stats, targets};
use tally_storage::{format_timestamp, Database, TargetStats};

/// Print counters for `target`, or the global aggregate followed by every
/// registered target.
pub async fn run_stats(
    config: &TallyConfig,
    target: Option<&str>,
    json: bool,
) -> Result<(), TallyError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;

    let all = match target {
        Some(name) => {
            if targets::get_target(&db, name).await?.is_none() {
                return Err(TallyError::TargetNotFound(name.to_string()));
            }
            vec![stats::target_stats(&db, name).await?]
        }
        None => {
            let mut all = vec![stats::global_stats(&db).await?];
            for t in targets::list_targets(&db).await? {
                all.push(stats::target_stats(&db, &t.chat_target).await?);
            }
            all
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&all).unwrap_or_else(|_| "[]".to_string())
        );
    } else {
        for s in &all {
            print!("{}", render(s));
        }
    }
    Ok(())
}

fn render(s: &TargetStats) -> String {
    let name = s.chat_target.as_deref().unwrap_or("all targets");
    format!(
        "\n  {name}\n  {rule}\n    records:    {} ({} processed, {} failed, {} pending)\n    \
         accounting: {} booked, {} failed, {} unrelated, {} baseline\n    \
         success:    {:.1}%  unrelated: {:.1}%\n    last:       {}\n",
        s.total,
        s.processed,
        s.failed,
        s.pending,
        s.accounting_success,
        s.accounting_failed,
        s.accounting_nothing,
        s.accounting_initial,
        s.success_rate(),
        s.unrelated_rate(),
        s.last_processed_at.as_deref().unwrap_or("never"),
        rule = "-".repeat(35),
    )
}

/// Delete processed records and processing-log rows older than `days`
/// (default `storage.retention_days`).
pub async fn run_cleanup(config: &TallyConfig, days: Option<u32>) -> Result<(), TallyError> {
    let days = days.unwrap_or(config.storage.retention_days);
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;

    let cutoff = format_timestamp(Utc::now() - chrono::Duration::days(i64::from(days)));
    let (removed_records, removed_logs) = records::cleanup_before(&db, &cutoff).await?;
    println!("removed {removed_records} records and {removed_logs} log rows older than {days} days");
    db.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_rates_and_defaults() {
        let s = TargetStats {
            chat_target: Some("alice".into()),
            total: 10,
            processed: 9,
            failed: 1,
            accounting_success: 3,
            accounting_failed: 1,
            accounting_initial: 6,
            ..Default::default()
        };
        let text = render(&s);
        assert!(text.contains("alice"));
        assert!(text.contains("success:    75.0%"));
        assert!(text.contains("last:       never"));

        let global = render(&TargetStats::default());
        assert!(global.contains("all targets"));
    }
}
