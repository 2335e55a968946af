// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message identity, dedup and session reconciliation for Tally.
//!
//! The engine polls a chat-automation backend for snapshots of recent
//! messages, decides which messages are new, and hands each new message to
//! the downstream handler exactly once. The [`TargetRegistry`] is the entry
//! point; everything else is exposed for tests and embedding.

pub mod clock;
pub mod context;
pub mod events;
pub mod fingerprint;
pub mod normalizer;
pub mod reconciler;
pub mod recovery;
pub mod registry;
pub mod seeding;
pub mod session;
pub mod shutdown;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use context::EngineContext;
pub use events::{EngineEvent, EventBus, StatusBoard};
pub use fingerprint::{FingerprintEngine, FingerprintedMessage};
pub use normalizer::Normalizer;
pub use reconciler::{reconcile, Alignment, ReconcileParams, Reconciliation};
pub use registry::TargetRegistry;
pub use session::SessionState;
pub use shutdown::install_signal_handler;
pub use worker::{PollWorker, TickReport};
