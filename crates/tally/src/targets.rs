// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally add` and `tally reset` command implementations.

use tally_config::TallyConfig;
use tally_core::TallyError;
use tally_storage::queries::targets;
use tally_storage::{Database, TargetConfig};

/// Register `target`, or update its poll interval / retry bound when it
/// already exists and a flag was given.
pub async fn run_add(
    config: &TallyConfig,
    target: &str,
    poll_interval: Option<u64>,
    max_retries: Option<u32>,
) -> Result<(), TallyError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;

    let created = targets::create_target(
        &db,
        &TargetConfig::new(
            target,
            poll_interval.unwrap_or(config.engine.poll_interval_secs),
            max_retries.unwrap_or(config.engine.max_retries),
        ),
    )
    .await?;

    if created {
        println!("registered {target}; it is seeded on first start");
    } else if poll_interval.is_some() || max_retries.is_some() {
        let existing = targets::get_target(&db, target)
            .await?
            .ok_or_else(|| TallyError::TargetNotFound(target.to_string()))?;
        let poll = poll_interval.unwrap_or(existing.poll_interval_secs);
        let retries = max_retries.unwrap_or(existing.max_retries);
        targets::update_settings(&db, target, poll, retries).await?;
        println!("updated {target}: poll every {poll}s, up to {retries} retries");
    } else {
        println!("{target} is already registered");
    }
    db.close().await
}

/// Forget everything recorded for `target` so the next start seeds a
/// fresh baseline. Refuses to run without `--yes`.
pub async fn run_reset(config: &TallyConfig, target: &str, yes: bool) -> Result<(), TallyError> {
    if !yes {
        return Err(TallyError::InvalidState {
            target: target.to_string(),
            state: "reset deletes the target's ledger; pass --yes to confirm".to_string(),
        });
    }

    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
    if targets::get_target(&db, target).await?.is_none() {
        return Err(TallyError::TargetNotFound(target.to_string()));
    }
    let removed = targets::reset_target(&db, target).await?;
    println!("reset {target}: removed {removed} records; stop any running `tally serve` before restarting it");
    db.close().await
}
