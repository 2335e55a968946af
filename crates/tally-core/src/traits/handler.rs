// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Downstream classifier trait.

use async_trait::async_trait;

use crate::error::TallyError;
use crate::traits::adapter::PluginAdapter;
use crate::types::HandlerOutcome;

/// Business logic that consumes each new message exactly once.
#[async_trait]
pub trait DownstreamHandler: PluginAdapter {
    /// Classifies one message. `Err` means the call itself failed (transport,
    /// auth); a rejected classification is an `Ok` with `accepted == false`.
    async fn classify(&self, content: &str, sender: &str) -> Result<HandlerOutcome, TallyError>;
}
