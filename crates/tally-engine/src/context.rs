// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared collaborators handed to every worker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_config::model::EngineConfig;
use tally_core::{ChatBackend, DownstreamHandler, TallyError};
use tally_storage::queries::logs;
use tally_storage::{Database, NewLogEntry};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::events::{EngineEvent, EventBus, StatusBoard};
use crate::fingerprint::{FingerprintEngine, FingerprintedMessage};
use crate::normalizer::Normalizer;

/// Everything a poll worker needs besides its own session.
pub struct EngineContext {
    pub db: Database,
    pub backend: Arc<dyn ChatBackend>,
    pub handler: Arc<dyn DownstreamHandler>,
    pub config: EngineConfig,
    pub events: EventBus,
    pub status: StatusBoard,
    pub normalizer: Normalizer,
    pub fingerprints: FingerprintEngine,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        db: Database,
        backend: Arc<dyn ChatBackend>,
        handler: Arc<dyn DownstreamHandler>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::default();
        Self {
            db,
            backend,
            handler,
            normalizer: Normalizer::new(config.self_reply_markers.clone()),
            fingerprints: FingerprintEngine::new(config.time_bucket_minutes),
            status: StatusBoard::new(events.clone()),
            clock: Arc::new(SystemClock),
            events,
            config,
        }
    }

    /// Replaces the system clock, e.g. to move tests across time buckets.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fetches, normalizes and fingerprints the current snapshot of `target`.
    pub async fn observe(&self, target: &str) -> Result<Vec<FingerprintedMessage>, TallyError> {
        let raw = self.backend.fetch_snapshot(target).await?;
        let messages = self.normalizer.normalize(target, &raw);
        Ok(self.fingerprints.fingerprint(messages, self.now()))
    }

    /// Appends to the processing log. A failed log write is not worth
    /// failing the operation being logged.
    pub async fn log(&self, entry: NewLogEntry) {
        let action = entry.action.clone();
        if let Err(e) = logs::log_action(&self.db, entry).await {
            warn!(action, error = %e, "failed to write processing log");
        }
    }

    /// Publishes an error event for `target`.
    pub fn report_error(&self, target: &str, message: impl Into<String>) {
        self.events.publish(EngineEvent::Error {
            target: target.to_string(),
            message: message.into(),
        });
    }
}
