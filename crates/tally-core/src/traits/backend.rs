// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-automation backend trait.

use async_trait::async_trait;

use crate::error::TallyError;
use crate::traits::adapter::PluginAdapter;
use crate::types::RawEntry;

/// The three operations the engine needs from the chat-automation backend.
///
/// All three are idempotent by contract. Implementations own their retry and
/// self-healing policy; callers see only the final outcome.
#[async_trait]
pub trait ChatBackend: PluginAdapter {
    /// Makes sure the backend is listening to `target`. "Already listening"
    /// is success.
    async fn ensure_listening(&self, target: &str) -> Result<(), TallyError>;

    /// Fetches the full visible message window for `target`, oldest first.
    async fn fetch_snapshot(&self, target: &str) -> Result<Vec<RawEntry>, TallyError>;

    /// Sends `text` into the `target` conversation.
    async fn send_reply(&self, target: &str, text: &str) -> Result<(), TallyError>;
}
