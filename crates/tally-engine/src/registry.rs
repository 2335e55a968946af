// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owns one poll worker per active target.
//!
//! The registry is the control surface: targets are added, started, stopped
//! and reset here, and status and counters are read from here. Each started
//! target gets its own task and cancellation token; no state is shared
//! between workers besides the [`EngineContext`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally_core::{TallyError, TargetState};
use tally_storage::queries::{records, stats, targets};
use tally_storage::{format_timestamp, TargetConfig, TargetStats};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::events::EngineEvent;
use crate::recovery;
use crate::seeding;
use crate::session::SessionState;
use crate::worker::PollWorker;

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    session_id: String,
}

/// A target's place in the worker map. `Starting` reserves the slot while
/// `prepare` runs without the map lock held.
enum Slot {
    Starting(u64),
    Running(WorkerHandle),
}

/// Start/stop/status control over every monitored target.
pub struct TargetRegistry {
    ctx: Arc<EngineContext>,
    workers: Mutex<HashMap<String, Slot>>,
    next_start: AtomicU64,
}

impl TargetRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            workers: Mutex::new(HashMap::new()),
            next_start: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Registers `target` with the configured defaults. Returns false when it
    /// already exists; its settings and seeding state are left alone.
    pub async fn add_target(&self, target: &str) -> Result<bool, TallyError> {
        let config = TargetConfig::new(
            target,
            self.ctx.config.poll_interval_secs,
            self.ctx.config.max_retries,
        );
        let created = targets::create_target(&self.ctx.db, &config).await?;
        if created {
            info!(chat_target = target, "target registered");
            self.ctx.status.set(target, TargetState::Stopped).await;
        }
        Ok(created)
    }

    /// Starts polling `target` on its own task.
    ///
    /// Starting a running or starting target is a no-op. See
    /// [`TargetRegistry::prepare`] for what happens before the first tick.
    /// Other targets can be started and stopped while this one seeds; a
    /// `stop` issued meanwhile wins and the prepared worker is dropped.
    pub async fn start(&self, target: &str) -> Result<(), TallyError> {
        let ticket = self.next_start.fetch_add(1, Ordering::Relaxed);
        {
            let mut workers = self.workers.lock().await;
            match workers.get(target) {
                Some(Slot::Running(handle)) if !handle.join.is_finished() => {
                    info!(chat_target = target, session = %handle.session_id, "target already running");
                    return Ok(());
                }
                Some(Slot::Starting(_)) => {
                    info!(chat_target = target, "target already starting");
                    return Ok(());
                }
                _ => {}
            }
            workers.insert(target.to_string(), Slot::Starting(ticket));
        }

        let prepared = self.prepare(target).await;

        let mut workers = self.workers.lock().await;
        let still_ours = matches!(workers.get(target), Some(Slot::Starting(t)) if *t == ticket);
        let worker = match prepared {
            Ok(worker) => worker,
            Err(e) => {
                if still_ours {
                    workers.remove(target);
                }
                return Err(e);
            }
        };
        if !still_ours {
            drop(workers);
            info!(chat_target = target, "target stopped while starting");
            self.ctx.status.set(target, TargetState::Stopped).await;
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let session_id = worker.session().session_id.clone();
        let join = tokio::spawn(worker.run(cancel.clone()));
        workers.insert(
            target.to_string(),
            Slot::Running(WorkerHandle {
                cancel,
                join,
                session_id: session_id.clone(),
            }),
        );
        self.ctx.status.set(target, TargetState::Running).await;
        drop(workers);
        info!(chat_target = target, session = %session_id, "target started");
        Ok(())
    }

    /// Builds the worker for `target` without spawning it.
    ///
    /// A first start seeds the baseline and fails, leaving the target in
    /// `error`, when seeding does. Later starts recover the dedup cache from
    /// the ledger and realign with the live window before the first tick;
    /// they fail the same way when the window cannot be read. A target the
    /// backend does not know fails before either.
    pub async fn prepare(&self, target: &str) -> Result<PollWorker, TallyError> {
        let config = targets::get_target(&self.ctx.db, target)
            .await?
            .ok_or_else(|| TallyError::TargetNotFound(target.to_string()))?;

        self.ctx.status.set(target, TargetState::Initializing).await;

        if let Err(e) = self.ctx.backend.ensure_listening(target).await {
            if e.is_not_found() {
                return Err(self.fail_start(target, e).await);
            }
            warn!(chat_target = target, error = %e, "could not register listener, continuing");
        }

        let mut session = SessionState::starting_at(self.ctx.now());
        if config.is_initialized {
            if let Err(e) = recovery::recover_session(&self.ctx, target, &mut session).await {
                return Err(self.fail_start(target, e).await);
            }
            match recovery::resume(&self.ctx, target, &mut session).await {
                Ok(new) => info!(chat_target = target, new, "resumed"),
                Err(e) => return Err(self.fail_start(target, e).await),
            }
        } else if let Err(e) = seeding::seed_baseline(&self.ctx, target, &mut session).await {
            return Err(self.fail_start(target, e).await);
        }

        Ok(PollWorker::new(
            Arc::clone(&self.ctx),
            target,
            session,
            Duration::from_secs(config.poll_interval_secs.max(1)),
            config.max_retries,
        ))
    }

    async fn fail_start(&self, target: &str, e: TallyError) -> TallyError {
        error!(chat_target = target, error = %e, "target not started");
        self.ctx
            .status
            .set(target, TargetState::Error(e.to_string()))
            .await;
        self.ctx.report_error(target, e.to_string());
        e
    }

    /// Stops polling `target`, waiting up to `stop_timeout` for the worker to
    /// reach a sleep boundary before aborting it. Stopping an idle target
    /// only updates its status; stopping a starting one cancels the start.
    pub async fn stop(&self, target: &str) -> Result<(), TallyError> {
        let slot = self.workers.lock().await.remove(target);
        if let Some(Slot::Running(handle)) = slot {
            handle.cancel.cancel();
            let timeout = self.ctx.config.stop_timeout();
            let mut join = handle.join;
            match tokio::time::timeout(timeout, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(chat_target = target, error = %e, "poll worker ended abnormally"),
                Err(_) => {
                    warn!(
                        chat_target = target,
                        timeout_secs = timeout.as_secs(),
                        "poll worker did not stop in time, aborting"
                    );
                    join.abort();
                }
            }
            info!(chat_target = target, session = %handle.session_id, "target stopped");
        }
        self.ctx.status.set(target, TargetState::Stopped).await;
        Ok(())
    }

    /// Stops `target` if needed and wipes its ledger rows and seeding state.
    /// The next start seeds a fresh baseline.
    pub async fn reset(&self, target: &str) -> Result<usize, TallyError> {
        self.stop(target).await?;
        let removed = targets::reset_target(&self.ctx.db, target).await?;
        info!(chat_target = target, removed, "target reset");
        Ok(removed)
    }

    /// Current state of `target`; unknown targets report `stopped`.
    pub async fn state(&self, target: &str) -> TargetState {
        self.ctx
            .status
            .get(target)
            .await
            .unwrap_or(TargetState::Stopped)
    }

    /// State of every registered target, sorted by name.
    pub async fn states(&self) -> Result<Vec<(String, TargetState)>, TallyError> {
        let known = self.ctx.status.snapshot().await;
        let mut out = Vec::new();
        for config in targets::list_targets(&self.ctx.db).await? {
            let state = known
                .iter()
                .find(|(name, _)| *name == config.chat_target)
                .map(|(_, s)| s.clone())
                .unwrap_or(TargetState::Stopped);
            out.push((config.chat_target, state));
        }
        Ok(out)
    }

    pub async fn get_stats(&self, target: &str) -> Result<TargetStats, TallyError> {
        stats::target_stats(&self.ctx.db, target).await
    }

    pub async fn global_stats(&self) -> Result<TargetStats, TallyError> {
        stats::global_stats(&self.ctx.db).await
    }

    /// Deletes ledger rows and log entries older than `days`. Returns
    /// `(records, log_entries)` removed.
    pub async fn cleanup(&self, days: u32) -> Result<(usize, usize), TallyError> {
        let cutoff = format_timestamp(self.ctx.now() - chrono::Duration::days(i64::from(days)));
        let removed = records::cleanup_before(&self.ctx.db, &cutoff).await?;
        info!(days, records = removed.0, logs = removed.1, "ledger cleaned up");
        Ok(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.ctx.events.subscribe()
    }

    /// Stops every running or starting target.
    pub async fn shutdown(&self) {
        let running: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        for target in running {
            if let Err(e) = self.stop(&target).await {
                warn!(chat_target = %target, error = %e, "failed to stop target during shutdown");
            }
        }
        info!("all targets stopped");
    }
}
