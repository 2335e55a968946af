// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tally integration tests.
//!
//! Provides mock adapters and a test harness for deterministic,
//! network-free testing of the engine against a real SQLite ledger.

pub mod clock;
pub mod harness;
pub mod mock_backend;
pub mod mock_handler;

pub use clock::ManualClock;
pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_backend::{friend, MockBackend};
pub use mock_handler::MockHandler;
