// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite ledger for the Tally message engine.
//!
//! The ledger is the only durable state: one row per distinct message ever
//! seen per chat target, keyed by `(chat_target, fingerprint)`, plus target
//! seeding state, a processing log and reconciliation history.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::*;
