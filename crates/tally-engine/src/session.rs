// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory dedup state for one polling run of one target.
//!
//! A [`SessionState`] is a cache over the ledger. It is created when polling
//! starts, owned by that target's worker, and dropped when polling stops.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::fingerprint::FingerprintedMessage;

/// What this polling run has already seen.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    seen_backend_ids: HashSet<String>,
    /// Full fingerprints, plus relaxed forms seeded by crash recovery.
    seen_fingerprints: HashSet<String>,
    /// `(sender, content)` of the last observed snapshot, in order.
    known_sequence: Vec<(String, String)>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// A session whose run began at `started_at`.
    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            seen_backend_ids: HashSet::new(),
            seen_fingerprints: HashSet::new(),
            known_sequence: Vec::new(),
        }
    }

    /// Fast path: the backend id was observed during this run.
    pub fn has_backend_id(&self, backend_id: &str) -> bool {
        self.seen_backend_ids.contains(backend_id)
    }

    /// The full or relaxed fingerprint is known to this run.
    pub fn has_fingerprint(&self, message: &FingerprintedMessage) -> bool {
        self.seen_fingerprints.contains(&message.fingerprint)
            || self.seen_fingerprints.contains(&message.relaxed_fingerprint)
    }

    /// Records both identities of `message`.
    pub fn mark(&mut self, message: &FingerprintedMessage) {
        self.seen_backend_ids
            .insert(message.message.backend_id.clone());
        self.seen_fingerprints.insert(message.fingerprint.clone());
    }

    /// Records only the backend id, for messages known by other means.
    pub fn mark_backend_id(&mut self, backend_id: &str) {
        self.seen_backend_ids.insert(backend_id.to_string());
    }

    /// Seeds fingerprints recovered from the ledger.
    pub fn seed_fingerprints<I>(&mut self, fingerprints: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.seen_fingerprints.len();
        self.seen_fingerprints.extend(fingerprints);
        self.seen_fingerprints.len() - before
    }

    /// True when none of `messages` carries a backend id seen in this run,
    /// although this run has seen ids before. Signals a window reopen.
    pub fn ids_churned(&self, messages: &[FingerprintedMessage]) -> bool {
        !self.seen_backend_ids.is_empty()
            && !messages.is_empty()
            && !messages
                .iter()
                .any(|m| self.seen_backend_ids.contains(&m.message.backend_id))
    }

    pub fn known_sequence(&self) -> &[(String, String)] {
        &self.known_sequence
    }

    pub fn set_known_sequence(&mut self, sequence: Vec<(String, String)>) {
        self.known_sequence = sequence;
    }

    pub fn seen_id_count(&self) -> usize {
        self.seen_backend_ids.len()
    }

    pub fn seen_fingerprint_count(&self) -> usize {
        self.seen_fingerprints.len()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintEngine;
    use tally_core::NormalizedMessage;

    fn fingerprinted(id: &str, content: &str) -> FingerprintedMessage {
        FingerprintEngine::new(5)
            .fingerprint(
                vec![NormalizedMessage {
                    backend_id: id.into(),
                    content: content.into(),
                    sender: "bob".into(),
                    time_context: "unknown".into(),
                    position: 0,
                }],
                Utc::now(),
            )
            .remove(0)
    }

    #[test]
    fn every_session_gets_a_fresh_id() {
        assert_ne!(SessionState::new().session_id, SessionState::new().session_id);
    }

    #[test]
    fn relaxed_seed_matches_any_bucket() {
        let mut session = SessionState::new();
        let m = fingerprinted("1", "lunch 20");
        assert!(!session.has_fingerprint(&m));

        session.seed_fingerprints([m.relaxed_fingerprint.clone()]);
        assert!(session.has_fingerprint(&m));
        assert!(!session.has_backend_id("1"));
    }

    #[test]
    fn churn_needs_prior_ids_and_no_overlap() {
        let mut session = SessionState::new();
        let old = fingerprinted("1", "a");
        let reopened = fingerprinted("99", "a");
        assert!(!session.ids_churned(std::slice::from_ref(&reopened)));

        session.mark(&old);
        assert!(session.ids_churned(std::slice::from_ref(&reopened)));
        assert!(!session.ids_churned(&[old, reopened]));
        assert!(!session.ids_churned(&[]));
    }
}
