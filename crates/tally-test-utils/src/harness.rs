// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end engine tests.
//!
//! `TestHarness` wires a [`TargetRegistry`] to mock adapters and a temp
//! SQLite ledger. `restart()` drops the registry and reopens the same ledger
//! file, which is how tests simulate a process crash.

use std::sync::Arc;

use tally_config::model::EngineConfig;
use tally_core::TallyError;
use tally_engine::{EngineContext, TargetRegistry};
use tally_storage::Database;

use crate::clock::ManualClock;
use crate::mock_backend::MockBackend;
use crate::mock_handler::MockHandler;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: EngineConfig,
    handler: Option<MockHandler>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        // Fast defaults: tests should never wait on real backoff.
        let config = EngineConfig {
            poll_interval_secs: 1,
            error_backoff_secs: 1,
            seed_max_attempts: 3,
            seed_retry_delay_secs: 0,
            stop_timeout_secs: 2,
            ..EngineConfig::default()
        };
        Self {
            config,
            handler: None,
        }
    }

    /// Adjust the engine configuration.
    pub fn with_config(mut self, adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    /// Use a specific handler, e.g. one built with `MockHandler::with_delay`.
    pub fn with_handler(mut self, handler: MockHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the test harness over a fresh temp ledger.
    pub async fn build(self) -> Result<TestHarness, TallyError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| TallyError::Storage { source: e.into() })?;
        let db_path = temp_dir
            .path()
            .join("ledger.db")
            .to_string_lossy()
            .to_string();
        let db = Database::open(&db_path).await?;

        let backend = Arc::new(MockBackend::new());
        let handler = Arc::new(self.handler.unwrap_or_default());
        let clock = Arc::new(ManualClock::new());
        let registry = registry_over(db.clone(), &backend, &handler, &clock, self.config.clone());

        Ok(TestHarness {
            backend,
            handler,
            clock,
            registry,
            db,
            db_path,
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

fn registry_over(
    db: Database,
    backend: &Arc<MockBackend>,
    handler: &Arc<MockHandler>,
    clock: &Arc<ManualClock>,
    config: EngineConfig,
) -> TargetRegistry {
    let ctx = EngineContext::new(db, backend.clone(), handler.clone(), config)
        .with_clock(clock.clone());
    TargetRegistry::new(ctx)
}

/// A complete engine with mock adapters.
pub struct TestHarness {
    pub backend: Arc<MockBackend>,
    pub handler: Arc<MockHandler>,
    /// Engine clock; starts at the real time and only moves when advanced.
    pub clock: Arc<ManualClock>,
    pub registry: TargetRegistry,
    pub db: Database,
    db_path: String,
    config: EngineConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Simulate a crash: stop every worker, drop all in-memory state and
    /// reopen the ledger file. The mock adapters and the clock survive.
    pub async fn restart(&mut self) -> Result<(), TallyError> {
        self.registry.shutdown().await;
        let db = Database::open(&self.db_path).await?;
        self.registry = registry_over(
            db.clone(),
            &self.backend,
            &self.handler,
            &self.clock,
            self.config.clone(),
        );
        self.db = db;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
