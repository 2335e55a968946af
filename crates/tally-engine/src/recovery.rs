// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Restarting an already initialized target: crash recovery of the dedup
//! cache, then continuity with the live window.
//!
//! Recovery errs toward treating borderline messages as seen. A missed
//! message is recoverable by hand; a duplicate booking is not.

use tally_config::model::ResumeMode;
use tally_core::TallyError;
use tally_storage::queries::{logs, records};
use tally_storage::{format_timestamp, now_timestamp, LogLevel, MatchHistoryEntry, NewLogEntry};
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::fingerprint::FingerprintedMessage;
use crate::reconciler::{reconcile, ReconcileParams, Reconciliation};
use crate::session::SessionState;

/// Seeds the session with the fingerprint of every ledger row created within
/// the recency window, in both full and relaxed form. Rows in `processing`
/// or `failed` count too: they either reached the handler already or belong
/// to the retry path. Returns the number seeded.
pub async fn recover_session(
    ctx: &EngineContext,
    target: &str,
    session: &mut SessionState,
) -> Result<usize, TallyError> {
    let since = recency_cutoff(ctx);
    let recent = records::count_recorded_since(&ctx.db, target, &since).await?;
    if recent == 0 {
        debug!(chat_target = target, "no recent ledger activity, nothing to recover");
        return Ok(0);
    }

    let fingerprints = records::recorded_fingerprints_since(&ctx.db, target, &since).await?;
    let seeded = session.seed_fingerprints(
        fingerprints
            .into_iter()
            .flat_map(|(full, relaxed)| [full, relaxed]),
    );
    info!(chat_target = target, recent, seeded, "session recovered from ledger");
    ctx.log(NewLogEntry::new(
        target,
        "recover",
        LogLevel::Info,
        format!("seeded {seeded} fingerprints from {recent} recent records"),
    ))
    .await;
    Ok(seeded)
}

/// Lines the live window up with what the ledger last knew, so that only
/// messages appended since are left for the first tick.
///
/// Returns how many fresh messages were left unmarked as potentially new.
pub async fn resume(
    ctx: &EngineContext,
    target: &str,
    session: &mut SessionState,
) -> Result<usize, TallyError> {
    let fresh = ctx.observe(target).await?;

    match ctx.config.resume_mode {
        ResumeMode::SkipBacklog => {
            for message in &fresh {
                session.mark_backend_id(&message.message.backend_id);
            }
            session.set_known_sequence(fresh.iter().map(|m| m.identity()).collect());
            info!(chat_target = target, skipped = fresh.len(), "backlog skipped on resume");
            ctx.log(NewLogEntry::new(
                target,
                "reconcile",
                LogLevel::Info,
                format!("skip-backlog: {} visible messages marked seen", fresh.len()),
            ))
            .await;
            Ok(0)
        }
        ResumeMode::Reconcile => {
            let known = records::known_sequence(&ctx.db, target, ctx.config.reconcile_window).await?;
            let known_pairs: Vec<(String, String)> = known
                .iter()
                .map(|r| (r.sender.clone(), r.content.clone()))
                .collect();
            let known_fingerprints: Vec<String> =
                known.iter().map(|r| r.fingerprint.clone()).collect();
            apply_alignment(ctx, target, session, &known_pairs, Some(&known_fingerprints), &fresh).await
        }
    }
}

/// Runs the reconciler and applies its result to the session and ledger.
///
/// Fresh messages up to and including the matched window are marked seen by
/// backend id. When the ledger fingerprints of `known` are given, rows in the
/// window get the fresh backend ids. Without a match every fresh message is
/// marked seen. Returns the size of the remaining delta.
pub async fn apply_alignment(
    ctx: &EngineContext,
    target: &str,
    session: &mut SessionState,
    known: &[(String, String)],
    known_fingerprints: Option<&[String]>,
    fresh: &[FingerprintedMessage],
) -> Result<usize, TallyError> {
    let fresh_pairs: Vec<(String, String)> = fresh.iter().map(|m| m.identity()).collect();
    let params = ReconcileParams::from_config(&ctx.config);
    let result = reconcile(known, &fresh_pairs, &params);
    let new_count = result.new_count(fresh.len());

    let (seen_until, entry) = match &result {
        Reconciliation::Matched(alignment) => {
            if let Some(fingerprints) = known_fingerprints {
                let updates: Vec<(String, String, i64)> = (0..alignment.len)
                    .filter_map(|k| {
                        let fp = fingerprints.get(alignment.known_start + k)?;
                        let m = fresh.get(alignment.fresh_start + k)?;
                        Some((fp.clone(), m.message.backend_id.clone(), m.message.position as i64))
                    })
                    .collect();
                let changed = records::update_backend_ids(&ctx.db, target, updates).await?;
                debug!(chat_target = target, changed, "backend ids refreshed from matched window");
            }
            let window = &fresh_pairs[alignment.fresh_start..alignment.new_from()];
            info!(
                chat_target = target,
                confidence = alignment.confidence,
                window = alignment.len,
                new = new_count,
                "sequence reconciled"
            );
            (
                alignment.new_from(),
                MatchHistoryEntry {
                    chat_target: target.to_string(),
                    match_sequence: serde_json::to_string(window).unwrap_or_default(),
                    match_position: Some(alignment.fresh_start as i64),
                    new_messages_count: new_count as i64,
                    match_confidence: alignment.confidence,
                    created_at: now_timestamp(),
                },
            )
        }
        Reconciliation::NoMatch => {
            warn!(
                chat_target = target,
                known = known.len(),
                fresh = fresh.len(),
                "no sequence alignment, treating visible messages as seen"
            );
            (
                fresh.len(),
                MatchHistoryEntry {
                    chat_target: target.to_string(),
                    match_sequence: "[]".to_string(),
                    match_position: None,
                    new_messages_count: 0,
                    match_confidence: 0.0,
                    created_at: now_timestamp(),
                },
            )
        }
    };

    for message in &fresh[..seen_until] {
        session.mark_backend_id(&message.message.backend_id);
    }
    session.set_known_sequence(fresh_pairs);

    let level = match result {
        Reconciliation::Matched(_) => LogLevel::Info,
        Reconciliation::NoMatch => LogLevel::Warning,
    };
    ctx.log(NewLogEntry::new(
        target,
        "reconcile",
        level,
        format!(
            "confidence {:.2}, {new_count} new of {} visible",
            entry.match_confidence,
            fresh.len()
        ),
    ))
    .await;
    logs::record_match(&ctx.db, entry).await?;
    Ok(new_count)
}

/// Start of the recency window as a ledger timestamp.
pub(crate) fn recency_cutoff(ctx: &EngineContext) -> String {
    let window = chrono::Duration::from_std(ctx.config.recency_window())
        .unwrap_or_else(|_| chrono::Duration::hours(24));
    format_timestamp(ctx.now() - window)
}
