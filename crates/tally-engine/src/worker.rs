// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-target polling loop.
//!
//! One [`PollWorker`] owns one target and its [`SessionState`] for the length
//! of a polling run. Each tick retries eligible failures, observes the
//! snapshot, computes the delta of new messages and dispatches it in
//! snapshot order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::{AccountingStatus, HandlerOutcome, MessageStatus, TallyError, TargetState};
use tally_storage::queries::{records, targets};
use tally_storage::{format_timestamp, LogLevel, MessageRecord, NewLogEntry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::events::EngineEvent;
use crate::fingerprint::FingerprintedMessage;
use crate::recovery;
use crate::session::SessionState;

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Messages in the snapshot after normalization.
    pub fetched: usize,
    /// Messages identified as new, before the burst cut.
    pub new: usize,
    /// Handler invocations for new messages.
    pub dispatched: usize,
    /// New messages dropped by the burst cut.
    pub trimmed: usize,
    /// Failed records retried or closed at the start of the tick.
    pub retried: usize,
}

pub struct PollWorker {
    ctx: Arc<EngineContext>,
    target: String,
    session: SessionState,
    poll_interval: Duration,
    max_retries: u32,
}

impl PollWorker {
    pub fn new(
        ctx: Arc<EngineContext>,
        target: impl Into<String>,
        session: SessionState,
        poll_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            ctx,
            target: target.into(),
            session,
            poll_interval,
            max_retries,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Ticks until `cancel` fires. Cancellation is honored between ticks,
    /// never in the middle of one.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            chat_target = %self.target,
            session = %self.session.session_id,
            interval_secs = self.poll_interval.as_secs(),
            "poll worker started"
        );
        let mut degraded = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.tick().await {
                Ok(report) => {
                    if degraded {
                        self.ctx.status.set(&self.target, TargetState::Running).await;
                        degraded = false;
                    }
                    if report.new > 0 || report.retried > 0 {
                        info!(chat_target = %self.target, ?report, "tick complete");
                    } else {
                        debug!(chat_target = %self.target, fetched = report.fetched, "tick complete, nothing new");
                    }
                    self.poll_interval
                }
                Err(e) => {
                    error!(chat_target = %self.target, error = %e, "tick failed");
                    self.ctx
                        .status
                        .set(&self.target, TargetState::Error(e.to_string()))
                        .await;
                    self.ctx.report_error(&self.target, e.to_string());
                    degraded = true;
                    self.ctx.config.error_backoff()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(chat_target = %self.target, "poll worker stopped");
    }

    /// One poll cycle. A ledger write failure aborts the tick; the session is
    /// not rolled back.
    pub async fn tick(&mut self) -> Result<TickReport, TallyError> {
        let mut report = TickReport {
            retried: self.retry_failed().await?,
            ..Default::default()
        };

        let fresh = self.ctx.observe(&self.target).await?;
        report.fetched = fresh.len();

        if self.session.ids_churned(&fresh) {
            warn!(
                chat_target = %self.target,
                visible = fresh.len(),
                "no known backend ids in snapshot, realigning"
            );
            let known = self.session.known_sequence().to_vec();
            recovery::apply_alignment(&self.ctx, &self.target, &mut self.session, &known, None, &fresh)
                .await?;
        }

        let mut delta = Vec::new();
        for message in &fresh {
            if self.is_new(message).await? {
                delta.push(message.clone());
            }
        }
        report.new = delta.len();

        let limit = self.ctx.config.burst_limit;
        if delta.len() > limit {
            let keep = self.ctx.config.burst_keep.min(delta.len());
            let dropped: Vec<FingerprintedMessage> = delta.drain(..delta.len() - keep).collect();
            report.trimmed = dropped.len();
            self.suppress(&dropped).await?;
        }

        for message in &delta {
            self.dispatch(message).await?;
            report.dispatched += 1;
        }

        self.session
            .set_known_sequence(fresh.iter().map(|m| m.identity()).collect());
        if let Some(last) = fresh.last() {
            targets::update_last_seen(
                &self.ctx.db,
                &self.target,
                last.message.position as i64,
                &last.fingerprint,
            )
            .await?;
        }
        Ok(report)
    }

    /// Walks the dedup layers from cheapest to most expensive. Anything
    /// recognized is marked in the session so the next tick stops early.
    async fn is_new(&mut self, message: &FingerprintedMessage) -> Result<bool, TallyError> {
        if self.session.has_backend_id(&message.message.backend_id) {
            return Ok(false);
        }
        if self.session.has_fingerprint(message) {
            self.session.mark_backend_id(&message.message.backend_id);
            return Ok(false);
        }

        // Any ledger row counts: failed rows belong to the retry path and
        // in-flight rows from a crash are not replayed.
        if let Some(row) = records::get_record(&self.ctx.db, &self.target, &message.fingerprint).await? {
            debug!(
                chat_target = %self.target,
                fingerprint = %message.fingerprint,
                status = %row.status,
                "known to ledger"
            );
            self.session.mark(message);
            return Ok(false);
        }

        let since = recovery::recency_cutoff(&self.ctx);
        let before = format_timestamp(self.session.started_at);
        if records::relaxed_seen_between(
            &self.ctx.db,
            &self.target,
            &message.relaxed_fingerprint,
            &since,
            &before,
        )
        .await?
        {
            debug!(
                chat_target = %self.target,
                fingerprint = %message.relaxed_fingerprint,
                "recorded by an earlier session"
            );
            self.session.mark(message);
            return Ok(false);
        }

        Ok(true)
    }

    /// Records burst-dropped messages as seen without dispatching them.
    async fn suppress(&mut self, dropped: &[FingerprintedMessage]) -> Result<(), TallyError> {
        warn!(
            chat_target = %self.target,
            dropped = dropped.len(),
            kept = self.ctx.config.burst_keep,
            limit = self.ctx.config.burst_limit,
            "new-message burst over limit, keeping only the most recent"
        );
        for message in dropped {
            let record = message.to_record(
                &self.target,
                Some(&self.session.session_id),
                MessageStatus::Processed,
                AccountingStatus::Initial,
            );
            records::upsert_record(&self.ctx.db, &record).await?;
            self.session.mark(message);
        }
        self.ctx
            .log(NewLogEntry::new(
                &self.target,
                "burst_trimmed",
                LogLevel::Warning,
                format!(
                    "{} new messages over limit {}, {} suppressed",
                    dropped.len() + self.ctx.config.burst_keep,
                    self.ctx.config.burst_limit,
                    dropped.len()
                ),
            ))
            .await;
        Ok(())
    }

    /// Retries failed records from earlier ticks. Rows that carry a
    /// correlation id already reached the handler and are only closed.
    async fn retry_failed(&mut self) -> Result<usize, TallyError> {
        let failures = records::retryable_failures(&self.ctx.db, &self.target, self.max_retries).await?;
        for row in &failures {
            if row.downstream_record_id.is_some() {
                self.close_correlated(row).await?;
                self.session.mark(&FingerprintedMessage::from(row));
            } else {
                info!(
                    chat_target = %self.target,
                    fingerprint = %row.fingerprint,
                    attempt = row.retry_count + 1,
                    "retrying failed message"
                );
                self.dispatch(&FingerprintedMessage::from(row)).await?;
            }
        }
        Ok(failures.len())
    }

    async fn close_correlated(&self, row: &MessageRecord) -> Result<(), TallyError> {
        let mut closed = row.clone();
        closed.status = MessageStatus::Processed;
        closed.accounting_status = AccountingStatus::Success;
        closed.last_error = None;
        records::upsert_record(&self.ctx.db, &closed).await?;

        let correlation = row.downstream_record_id.as_deref().unwrap_or_default();
        info!(
            chat_target = %self.target,
            fingerprint = %row.fingerprint,
            correlation,
            "handler already recorded this message, closing without dispatch"
        );
        self.ctx
            .log(
                NewLogEntry::new(
                    &self.target,
                    "skip_correlated",
                    LogLevel::Info,
                    format!("closed with downstream record {correlation}"),
                )
                .fingerprint(&row.fingerprint),
            )
            .await;
        Ok(())
    }

    /// Sends one message through the handler and records the result.
    ///
    /// The handler is never invoked for a row that already carries a
    /// correlation id. A failed reply send is logged but does not fail the
    /// record, since the downstream side effect already happened.
    async fn dispatch(&mut self, message: &FingerprintedMessage) -> Result<(), TallyError> {
        let started = Instant::now();
        let target = self.target.clone();

        if let Some(existing) = records::get_record(&self.ctx.db, &target, &message.fingerprint).await?
            && existing.downstream_record_id.is_some()
        {
            self.close_correlated(&existing).await?;
            self.session.mark(message);
            return Ok(());
        }

        let in_flight = message.to_record(
            &target,
            Some(&self.session.session_id),
            MessageStatus::Processing,
            AccountingStatus::Pending,
        );
        records::upsert_record(&self.ctx.db, &in_flight).await?;
        self.ctx
            .log(
                NewLogEntry::new(
                    &target,
                    "dispatch_start",
                    LogLevel::Info,
                    format!("{}: {}", message.message.sender, message.message.content),
                )
                .fingerprint(&message.fingerprint),
            )
            .await;

        let (record, reply_sent) = match self
            .ctx
            .handler
            .classify(&message.message.content, &message.message.sender)
            .await
        {
            Ok(outcome) => {
                let reply_sent = self.send_reply(&outcome).await;
                (self.outcome_record(message, &outcome), reply_sent)
            }
            Err(e) => {
                warn!(chat_target = %target, fingerprint = %message.fingerprint, error = %e, "handler call failed");
                let mut record = message.to_record(
                    &target,
                    Some(&self.session.session_id),
                    MessageStatus::Failed,
                    AccountingStatus::Failed,
                );
                record.last_error = Some(e.to_string());
                (record, false)
            }
        };
        records::upsert_record(&self.ctx.db, &record).await?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        let entry = match record.status {
            MessageStatus::Processed => NewLogEntry::new(
                &target,
                "dispatch_complete",
                LogLevel::Success,
                format!("accounting {}", record.accounting_status),
            ),
            _ => NewLogEntry::new(&target, "dispatch_failed", LogLevel::Error, "handler did not accept")
                .error_details(record.last_error.clone().unwrap_or_default()),
        };
        self.ctx
            .log(entry.fingerprint(&message.fingerprint).elapsed_ms(elapsed_ms))
            .await;

        debug!(
            chat_target = %target,
            fingerprint = %message.fingerprint,
            status = %record.status,
            accounting = %record.accounting_status,
            elapsed_ms,
            "message dispatched"
        );
        self.ctx.events.publish(EngineEvent::MessageDispatched {
            target,
            fingerprint: message.fingerprint.clone(),
            sender: message.message.sender.clone(),
            content: message.message.content.clone(),
            accounting_status: record.accounting_status,
            reply_sent,
        });
        self.session.mark(message);
        Ok(())
    }

    fn outcome_record(&self, message: &FingerprintedMessage, outcome: &HandlerOutcome) -> MessageRecord {
        let status = if outcome.accepted || outcome.unrelated {
            MessageStatus::Processed
        } else {
            MessageStatus::Failed
        };
        let mut record = message.to_record(
            &self.target,
            Some(&self.session.session_id),
            status,
            outcome.accounting_status(),
        );
        record.downstream_response = outcome.response.as_ref().map(|v| v.to_string());
        record.downstream_record_id = outcome.correlation_id.clone();
        if status == MessageStatus::Failed {
            record.last_error = Some(outcome.reply_text.clone());
        }
        record
    }

    async fn send_reply(&self, outcome: &HandlerOutcome) -> bool {
        if !outcome.should_reply() {
            return false;
        }
        match self.ctx.backend.send_reply(&self.target, &outcome.reply_text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_target = %self.target, error = %e, "reply could not be sent");
                false
            }
        }
    }
}
