// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Baseline seeding for first-time targets.
//!
//! Every message visible when a target is first attached is written as
//! `processed`/`initial` and is never dispatched. The baseline rows and the
//! `is_initialized` flag land in one transaction.

use tally_core::{AccountingStatus, BackendErrorKind, MessageStatus, TallyError};
use tally_storage::queries::targets;
use tally_storage::{LogLevel, NewLogEntry};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::events::EngineEvent;
use crate::fingerprint::FingerprintedMessage;
use crate::session::SessionState;

/// Seeds the baseline of `target`, retrying up to `seed_max_attempts`.
///
/// Attempt `n` that fails is followed by a wait of `n * seed_retry_delay`.
/// On success the session knows every baseline message. Exhausting the
/// attempts returns [`TallyError::Seeding`]; the target must not be polled.
/// A target the backend does not know fails without further attempts.
pub async fn seed_baseline(
    ctx: &EngineContext,
    target: &str,
    session: &mut SessionState,
) -> Result<usize, TallyError> {
    let max_attempts = ctx.config.seed_max_attempts.max(1);
    let mut reason = String::new();
    let mut attempts = 0;

    for attempt in 1..=max_attempts {
        attempts = attempt;
        match try_seed(ctx, target, session).await {
            Ok(baseline) => {
                let count = baseline.len();
                for message in &baseline {
                    session.mark(message);
                }
                session.set_known_sequence(baseline.iter().map(|m| m.identity()).collect());

                ctx.events.publish(EngineEvent::SeedingProgress {
                    target: target.to_string(),
                    attempt,
                    max_attempts,
                    records: Some(count),
                });
                ctx.log(NewLogEntry::new(
                    target,
                    "seed",
                    LogLevel::Success,
                    format!("baseline of {count} messages recorded on attempt {attempt}"),
                ))
                .await;
                info!(chat_target = target, count, attempt, "baseline seeded");
                return Ok(count);
            }
            Err(e) => {
                warn!(chat_target = target, attempt, max_attempts, error = %e, "baseline seeding attempt failed");
                ctx.events.publish(EngineEvent::SeedingProgress {
                    target: target.to_string(),
                    attempt,
                    max_attempts,
                    records: None,
                });
                reason = e.to_string();
                if e.is_not_found() {
                    break;
                }
                if attempt < max_attempts {
                    tokio::time::sleep(ctx.config.seed_retry_delay() * attempt).await;
                }
            }
        }
    }

    ctx.log(
        NewLogEntry::new(target, "seed", LogLevel::Error, "baseline seeding failed")
            .error_details(reason.clone()),
    )
    .await;
    Err(TallyError::Seeding {
        target: target.to_string(),
        attempts,
        reason,
    })
}

async fn try_seed(
    ctx: &EngineContext,
    target: &str,
    session: &SessionState,
) -> Result<Vec<FingerprintedMessage>, TallyError> {
    let baseline = ctx.observe(target).await?;
    if baseline.is_empty() {
        return Err(TallyError::backend(
            BackendErrorKind::Transient,
            "snapshot contained no messages",
        ));
    }

    let records = baseline
        .iter()
        .map(|m| {
            m.to_record(
                target,
                Some(&session.session_id),
                MessageStatus::Processed,
                AccountingStatus::Initial,
            )
        })
        .collect();
    targets::seed_baseline(&ctx.db, target, records).await?;
    Ok(baseline)
}
