// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tally message engine.
//!
//! Provides the error type, the snapshot and ledger status types, and the
//! adapter traits for the two external collaborators: the chat-automation
//! backend and the downstream classifier.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{BackendErrorKind, TallyError};
pub use types::{
    AccountingStatus, AdapterType, EntryKind, HandlerOutcome, HealthStatus, MessageStatus,
    NormalizedMessage, RawEntry, TargetState,
};

pub use traits::{ChatBackend, DownstreamHandler, PluginAdapter};
