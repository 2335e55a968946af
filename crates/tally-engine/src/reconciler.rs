// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence alignment between a previously known message order and a fresh
//! snapshot.
//!
//! New content always appends, so the search starts from the tails of both
//! sequences with the longest window and shrinks it. A window whose pairwise
//! equality reaches the threshold counts as a match; a full match ends the
//! search at once. Everything after the matched window in the fresh
//! sequence is the new-message delta.

use std::time::{Duration, Instant};

use tally_config::model::EngineConfig;
use tracing::{debug, warn};

/// Search bounds for [`reconcile`].
#[derive(Debug, Clone, Copy)]
pub struct ReconcileParams {
    /// Longest window tried.
    pub max_window: usize,
    /// Shortest window tried.
    pub min_window: usize,
    /// Start offsets tried from each tail.
    pub max_offsets: usize,
    /// Minimum share of equal pairs in a window, `0 < t <= 1`.
    pub threshold: f64,
    /// Search budget; the best match so far wins when it runs out.
    pub timeout: Duration,
}

impl ReconcileParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_window: config.reconcile_window,
            min_window: config.reconcile_min_window,
            max_offsets: config.reconcile_max_offsets,
            threshold: config.similarity_threshold,
            timeout: config.reconcile_timeout(),
        }
    }
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            max_window: 20,
            min_window: 3,
            max_offsets: 10,
            threshold: 0.8,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Where the known sequence lines up with the fresh one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub known_start: usize,
    pub fresh_start: usize,
    pub len: usize,
    /// Share of equal pairs inside the window.
    pub confidence: f64,
}

impl Alignment {
    /// Index in the fresh sequence of the first new message.
    pub fn new_from(&self) -> usize {
        self.fresh_start + self.len
    }
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Matched(Alignment),
    /// Nothing cleared the threshold; treat the fresh snapshot as seen.
    NoMatch,
}

impl Reconciliation {
    /// Number of fresh messages considered new.
    pub fn new_count(&self, fresh_len: usize) -> usize {
        match self {
            Reconciliation::Matched(a) => fresh_len.saturating_sub(a.new_from()),
            Reconciliation::NoMatch => 0,
        }
    }
}

/// Aligns `known` against `fresh`.
pub fn reconcile<T: PartialEq>(known: &[T], fresh: &[T], params: &ReconcileParams) -> Reconciliation {
    if known.is_empty() || fresh.is_empty() {
        return Reconciliation::NoMatch;
    }

    let started = Instant::now();
    let longest = known.len().min(fresh.len()).min(params.max_window.max(1));
    let shortest = params.min_window.clamp(1, longest);
    let mut best: Option<Alignment> = None;

    debug!(known = known.len(), fresh = fresh.len(), longest, shortest, "aligning sequences");

    'search: for len in (shortest..=longest).rev() {
        let known_offsets = params.max_offsets.min(known.len() - len + 1);
        for i in 0..known_offsets {
            let known_start = known.len() - len - i;
            let known_window = &known[known_start..known_start + len];

            let fresh_offsets = params.max_offsets.min(fresh.len() - len + 1);
            for j in 0..fresh_offsets {
                if started.elapsed() >= params.timeout {
                    warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "alignment timed out, keeping best match"
                    );
                    break 'search;
                }
                let fresh_start = fresh.len() - len - j;
                let fresh_window = &fresh[fresh_start..fresh_start + len];

                let equal = known_window
                    .iter()
                    .zip(fresh_window)
                    .filter(|(a, b)| a == b)
                    .count();
                let confidence = equal as f64 / len as f64;
                let candidate = Alignment {
                    known_start,
                    fresh_start,
                    len,
                    confidence,
                };

                if equal == len {
                    debug!(?candidate, "full match");
                    return Reconciliation::Matched(candidate);
                }
                if confidence >= params.threshold
                    && best.is_none_or(|b| confidence > b.confidence)
                {
                    best = Some(candidate);
                }
            }
        }
    }

    match best {
        Some(alignment) => Reconciliation::Matched(alignment),
        None => Reconciliation::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn seq(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn appended_messages_are_the_delta() {
        let known = seq("ABC");
        let fresh = seq("ABCDE");
        let result = reconcile(&known, &fresh, &ReconcileParams::default());
        let Reconciliation::Matched(a) = result else {
            panic!("expected a match, got {result:?}");
        };
        assert_eq!((a.known_start, a.fresh_start, a.len), (0, 0, 3));
        assert_eq!(a.confidence, 1.0);
        assert_eq!(&fresh[a.new_from()..], &['D', 'E']);
        assert_eq!(result.new_count(fresh.len()), 2);
    }

    #[test]
    fn disjoint_sequences_do_not_match() {
        let result = reconcile(&seq("ABC"), &seq("XYZ"), &ReconcileParams::default());
        assert_eq!(result, Reconciliation::NoMatch);
        assert_eq!(result.new_count(3), 0);
    }

    #[test]
    fn scrolled_window_matches_tail() {
        // Oldest messages scrolled out of view, two new arrived.
        let known = seq("ABCDEFG");
        let fresh = seq("DEFGHI");
        let Reconciliation::Matched(a) = reconcile(&known, &fresh, &ReconcileParams::default())
        else {
            panic!("expected a match");
        };
        assert_eq!((a.known_start, a.fresh_start, a.len), (3, 0, 4));
        assert_eq!(&fresh[a.new_from()..], &['H', 'I']);
    }

    #[test]
    fn partial_match_above_threshold() {
        let known = seq("ABCDEFGHIJ");
        // One message changed in the middle (e.g. recalled and replaced).
        let fresh = seq("ABCDXFGHIJK");
        let Reconciliation::Matched(a) = reconcile(&known, &fresh, &ReconcileParams::default())
        else {
            panic!("expected a match");
        };
        assert!(a.confidence >= 0.8);
        assert!(a.new_from() <= fresh.len());
    }

    #[test]
    fn unchanged_snapshot_has_no_delta() {
        let known = seq("ABCD");
        let result = reconcile(&known, &known, &ReconcileParams::default());
        assert_eq!(result.new_count(known.len()), 0);
    }

    #[test]
    fn empty_inputs_never_match() {
        let empty: Vec<char> = Vec::new();
        assert_eq!(reconcile(&empty, &seq("A"), &ReconcileParams::default()), Reconciliation::NoMatch);
        assert_eq!(reconcile(&seq("A"), &empty, &ReconcileParams::default()), Reconciliation::NoMatch);
    }

    #[test]
    #[traced_test]
    fn exhausted_budget_falls_back() {
        let params = ReconcileParams {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(reconcile(&seq("ABC"), &seq("ABCD"), &params), Reconciliation::NoMatch);
        assert!(logs_contain("alignment timed out"));
    }
}
