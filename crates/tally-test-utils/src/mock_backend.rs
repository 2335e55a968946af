// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock chat backend for deterministic testing.
//!
//! `MockBackend` serves scripted snapshots, captures replies and listener
//! registrations, and can be told to fail the next few fetches or to stop
//! knowing a target altogether.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tally_core::traits::adapter::PluginAdapter;
use tally_core::traits::backend::ChatBackend;
use tally_core::types::{AdapterType, HealthStatus, RawEntry};
use tally_core::{BackendErrorKind, TallyError};

/// Shorthand for a `friend` entry.
pub fn friend(id: &str, sender: &str, content: &str) -> RawEntry {
    RawEntry::friend(id, sender, content)
}

/// A mock chat-automation backend.
///
/// Snapshots queued with `push_snapshot()` are served in order; once the
/// queue is empty the last snapshot served is repeated forever, like a chat
/// window nobody writes to.
pub struct MockBackend {
    queued: Arc<Mutex<VecDeque<Vec<RawEntry>>>>,
    current: Arc<Mutex<Vec<RawEntry>>>,
    failures: Arc<Mutex<VecDeque<BackendErrorKind>>>,
    replies: Arc<Mutex<Vec<(String, String)>>>,
    listening: Arc<Mutex<Vec<String>>>,
    unknown: Arc<Mutex<HashSet<String>>>,
    fetches: Arc<Mutex<usize>>,
}

impl MockBackend {
    /// Create a backend whose window is empty.
    pub fn new() -> Self {
        Self {
            queued: Arc::new(Mutex::new(VecDeque::new())),
            current: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            replies: Arc::new(Mutex::new(Vec::new())),
            listening: Arc::new(Mutex::new(Vec::new())),
            unknown: Arc::new(Mutex::new(HashSet::new())),
            fetches: Arc::new(Mutex::new(0)),
        }
    }

    /// Replace the window contents immediately, dropping anything queued.
    pub async fn set_snapshot(&self, entries: Vec<RawEntry>) {
        self.queued.lock().await.clear();
        *self.current.lock().await = entries;
    }

    /// Queue a snapshot to be served by a later fetch.
    pub async fn push_snapshot(&self, entries: Vec<RawEntry>) {
        self.queued.lock().await.push_back(entries);
    }

    /// Fail the next `count` fetches with the given error kind.
    pub async fn fail_next_fetches(&self, count: usize, kind: BackendErrorKind) {
        let mut failures = self.failures.lock().await;
        failures.extend(std::iter::repeat_n(kind, count));
    }

    /// Answer every call about `target` with a not-found error, like a
    /// backend whose contact list lacks it.
    pub async fn forget_target(&self, target: &str) {
        self.unknown.lock().await.insert(target.to_string());
    }

    async fn check_known(&self, target: &str) -> Result<(), TallyError> {
        if self.unknown.lock().await.contains(target) {
            return Err(TallyError::backend(
                BackendErrorKind::NotFound,
                format!("找不到联系人: {target}"),
            ));
        }
        Ok(())
    }

    /// Every `(target, text)` passed to `send_reply()`.
    pub async fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().await.clone()
    }

    /// Every target passed to `ensure_listening()`.
    pub async fn listen_calls(&self) -> Vec<String> {
        self.listening.lock().await.clone()
    }

    /// Number of `fetch_snapshot()` calls, failed ones included.
    pub async fn fetch_count(&self) -> usize {
        *self.fetches.lock().await
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockBackend {
    fn name(&self) -> &str {
        "mock-backend"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, TallyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TallyError> {
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn ensure_listening(&self, target: &str) -> Result<(), TallyError> {
        self.listening.lock().await.push(target.to_string());
        self.check_known(target).await
    }

    async fn fetch_snapshot(&self, target: &str) -> Result<Vec<RawEntry>, TallyError> {
        *self.fetches.lock().await += 1;
        self.check_known(target).await?;
        if let Some(kind) = self.failures.lock().await.pop_front() {
            return Err(TallyError::backend(kind, "injected failure"));
        }

        let mut current = self.current.lock().await;
        if let Some(next) = self.queued.lock().await.pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }

    async fn send_reply(&self, target: &str, text: &str) -> Result<(), TallyError> {
        self.replies
            .lock()
            .await
            .push((target.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_snapshots_then_last_repeats() {
        let backend = MockBackend::new();
        backend.push_snapshot(vec![friend("1", "bob", "a")]).await;
        backend
            .push_snapshot(vec![friend("1", "bob", "a"), friend("2", "bob", "b")])
            .await;

        assert_eq!(backend.fetch_snapshot("t").await.unwrap().len(), 1);
        assert_eq!(backend.fetch_snapshot("t").await.unwrap().len(), 2);
        assert_eq!(backend.fetch_snapshot("t").await.unwrap().len(), 2);
        assert_eq!(backend.fetch_count().await, 3);
    }

    #[tokio::test]
    async fn injected_failures_come_first() {
        let backend = MockBackend::new();
        backend.set_snapshot(vec![friend("1", "bob", "a")]).await;
        backend.fail_next_fetches(1, BackendErrorKind::Transient).await;

        let err = backend.fetch_snapshot("t").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(backend.fetch_snapshot("t").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forgotten_target_is_not_found() {
        let backend = MockBackend::new();
        backend.set_snapshot(vec![friend("1", "bob", "a")]).await;
        backend.forget_target("ghost").await;

        assert!(backend.ensure_listening("ghost").await.unwrap_err().is_not_found());
        assert!(backend.fetch_snapshot("ghost").await.unwrap_err().is_not_found());
        assert_eq!(backend.fetch_snapshot("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replies_and_listeners_are_captured() {
        let backend = MockBackend::new();
        backend.ensure_listening("alice").await.unwrap();
        backend.send_reply("alice", "booked").await.unwrap();

        assert_eq!(backend.listen_calls().await, vec!["alice".to_string()]);
        assert_eq!(
            backend.replies().await,
            vec![("alice".to_string(), "booked".to_string())]
        );
    }
}
