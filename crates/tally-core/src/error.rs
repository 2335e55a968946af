// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tally message engine.

use thiserror::Error;

/// Classification of a chat-backend failure, used to decide between retry,
/// self-healing and surfacing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Timeout, refused connection, HTTP 429 or 5xx.
    Transient,
    /// The backend reports the target is not in its listen list.
    NotListening,
    /// The backend does not know the target at all.
    NotFound,
    /// Any other protocol-level rejection.
    Rejected,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::Transient => write!(f, "transient"),
            BackendErrorKind::NotListening => write!(f, "not-listening"),
            BackendErrorKind::NotFound => write!(f, "not-found"),
            BackendErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// The primary error type used across all Tally crates.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Ledger errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Chat-automation backend errors.
    #[error("backend error ({kind}): {message}")]
    Backend {
        message: String,
        kind: BackendErrorKind,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Downstream classifier/handler errors.
    #[error("handler error: {message}")]
    Handler {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Baseline seeding exhausted its attempts; monitoring must not start.
    #[error("baseline seeding for `{target}` failed after {attempts} attempts: {reason}")]
    Seeding {
        target: String,
        attempts: u32,
        reason: String,
    },

    /// The named chat target is not registered.
    #[error("chat target not found: {0}")]
    TargetNotFound(String),

    /// The requested operation is not valid in the target's current state.
    #[error("chat target `{target}` is {state}")]
    InvalidState { target: String, state: String },
}

impl TallyError {
    /// Shorthand for a backend error without an underlying source.
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        TallyError::Backend {
            message: message.into(),
            kind,
            source: None,
        }
    }

    /// Returns the backend error kind, if this is a backend error.
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            TallyError::Backend { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TallyError::Backend {
                kind: BackendErrorKind::Transient,
                ..
            }
        )
    }

    /// True when the backend dropped the target from its listen list.
    pub fn is_not_listening(&self) -> bool {
        self.backend_kind() == Some(BackendErrorKind::NotListening)
    }

    /// True when the backend does not know the target at all. Retrying or
    /// re-registering cannot help.
    pub fn is_not_found(&self) -> bool {
        self.backend_kind() == Some(BackendErrorKind::NotFound)
    }
}
