// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tally serve` / `tally start` implementation.
//!
//! Wires the HTTP backend and classifier into a [`TargetRegistry`], starts
//! the requested targets and runs until SIGINT/SIGTERM.

use std::sync::Arc;

use futures::future::join_all;
use tally_backend::{HttpAccountingHandler, HttpChatBackend};
use tally_config::TallyConfig;
use tally_core::{HealthStatus, PluginAdapter, TallyError};
use tally_engine::{install_signal_handler, EngineContext, EngineEvent, TargetRegistry};
use tally_storage::queries::targets;
use tally_storage::Database;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs the engine. With `only`, that single target is monitored (and
/// registered first if needed); otherwise every configured and registered
/// target is.
pub async fn run_serve(config: TallyConfig, only: Option<String>) -> Result<(), TallyError> {
    init_tracing(&config.engine.log_level);

    info!("starting tally serve");

    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
    let backend = Arc::new(HttpChatBackend::new(&config.backend)?);
    let handler = Arc::new(HttpAccountingHandler::new(&config.handler)?);

    check_health("backend", backend.as_ref()).await;
    check_health("handler", handler.as_ref()).await;

    let ctx = EngineContext::new(db.clone(), backend.clone(), handler.clone(), config.engine.clone());
    let registry = TargetRegistry::new(ctx);

    let wanted: Vec<String> = match &only {
        Some(target) => vec![target.clone()],
        None => config.engine.targets.clone(),
    };
    for target in &wanted {
        if registry.add_target(target).await? {
            info!(chat_target = %target, "registered target from configuration");
        }
    }

    let to_start: Vec<String> = match only {
        Some(target) => vec![target],
        None => targets::list_targets(&db)
            .await?
            .into_iter()
            .map(|t| t.chat_target)
            .collect(),
    };
    if to_start.is_empty() {
        warn!("no chat targets registered; add one with `tally add <target>` or engine.targets");
    }

    let cancel = install_signal_handler();
    let events_done = CancellationToken::new();
    let events = tokio::spawn(log_events(registry.subscribe(), events_done.clone()));

    // Targets seed concurrently; one slow baseline does not hold up the rest.
    let results = join_all(to_start.iter().map(|target| registry.start(target))).await;
    let mut running = 0;
    for (target, result) in to_start.iter().zip(results) {
        match result {
            Ok(()) => running += 1,
            Err(e) => error!(chat_target = %target, error = %e, "failed to start target"),
        }
    }
    info!(running, requested = to_start.len(), "tally serve ready");

    cancel.cancelled().await;
    info!("shutdown signal received, stopping targets");
    registry.shutdown().await;
    events_done.cancel();
    if let Err(e) = events.await {
        warn!(error = %e, "event logger ended abnormally");
    }

    backend.shutdown().await?;
    handler.shutdown().await?;
    drop(registry);
    db.close().await?;

    info!("tally serve shutdown complete");
    Ok(())
}

async fn check_health(name: &str, adapter: &dyn PluginAdapter) {
    match adapter.health_check().await {
        Ok(HealthStatus::Healthy) => info!(adapter = name, "health check passed"),
        Ok(HealthStatus::Degraded(reason)) | Ok(HealthStatus::Unhealthy(reason)) => {
            warn!(adapter = name, reason = %reason, "health check failed, continuing")
        }
        Err(e) => warn!(adapter = name, error = %e, "health check failed, continuing"),
    }
}

/// Mirrors engine events into the log until `done` fires.
async fn log_events(mut rx: broadcast::Receiver<EngineEvent>, done: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            event = rx.recv() => event,
            _ = done.cancelled() => break,
        };
        match event {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::MessageDispatched {
            target,
            sender,
            accounting_status,
            reply_sent,
            ..
        } => info!(
            chat_target = %target,
            sender = %sender,
            accounting = %accounting_status,
            reply_sent,
            "message dispatched"
        ),
        EngineEvent::StatusChanged { target, state } => {
            info!(chat_target = %target, state = %state, "target status changed")
        }
        EngineEvent::Error { target, message } => {
            error!(chat_target = %target, error = %message, "target error")
        }
        EngineEvent::SeedingProgress {
            target,
            attempt,
            max_attempts,
            records,
        } => match records {
            Some(count) => info!(chat_target = %target, attempt, count, "baseline seeded"),
            None => warn!(chat_target = %target, attempt, max_attempts, "baseline attempt failed"),
        },
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tally={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
