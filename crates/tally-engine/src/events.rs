// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine events and per-target status.
//!
//! Workers publish to an [`EventBus`]; any number of consumers (the binary's
//! logger, a UI, tests) subscribe. Publishing never blocks and never fails
//! when nobody listens.

use std::collections::HashMap;
use std::sync::Arc;

use tally_core::{AccountingStatus, TargetState};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A new message went through the downstream handler.
    MessageDispatched {
        target: String,
        fingerprint: String,
        sender: String,
        content: String,
        accounting_status: AccountingStatus,
        reply_sent: bool,
    },
    StatusChanged { target: String, state: TargetState },
    Error { target: String, message: String },
    /// One baseline seeding attempt finished.
    SeedingProgress {
        target: String,
        attempt: u32,
        max_attempts: u32,
        /// Baseline size when the attempt succeeded.
        records: Option<usize>,
    },
}

impl EngineEvent {
    pub fn target(&self) -> &str {
        match self {
            EngineEvent::MessageDispatched { target, .. }
            | EngineEvent::StatusChanged { target, .. }
            | EngineEvent::Error { target, .. }
            | EngineEvent::SeedingProgress { target, .. } => target,
        }
    }
}

/// Broadcast channel for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            trace!("engine event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Current state of every known target, shared by the registry and workers.
///
/// Every change is also published as [`EngineEvent::StatusChanged`].
#[derive(Debug, Clone)]
pub struct StatusBoard {
    states: Arc<RwLock<HashMap<String, TargetState>>>,
    bus: EventBus,
}

impl StatusBoard {
    pub fn new(bus: EventBus) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// Sets the state of `target`, publishing only actual changes.
    pub async fn set(&self, target: &str, state: TargetState) {
        let changed = {
            let mut states = self.states.write().await;
            let previous = states.insert(target.to_string(), state.clone());
            previous.as_ref() != Some(&state)
        };
        if changed {
            self.bus.publish(EngineEvent::StatusChanged {
                target: target.to_string(),
                state,
            });
        }
    }

    pub async fn get(&self, target: &str) -> Option<TargetState> {
        self.states.read().await.get(target).cloned()
    }

    /// All targets and their states, by name.
    pub async fn snapshot(&self) -> Vec<(String, TargetState)> {
        let mut all: Vec<_> = self
            .states
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
