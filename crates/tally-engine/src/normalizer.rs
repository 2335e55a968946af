// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw snapshot to ordered human messages.

use tally_core::{EntryKind, NormalizedMessage, RawEntry};

/// Time context used before the first time separator of a snapshot.
pub const UNKNOWN_TIME_CONTEXT: &str = "unknown";

/// Filters a raw snapshot down to counterparty messages.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    self_reply_markers: Vec<String>,
}

impl Normalizer {
    /// `self_reply_markers` are substrings of the monitor's own replies; the
    /// backend sometimes echoes them back as counterparty messages.
    pub fn new(self_reply_markers: Vec<String>) -> Self {
        Self {
            self_reply_markers: self_reply_markers
                .into_iter()
                .filter(|m| !m.trim().is_empty())
                .collect(),
        }
    }

    /// Normalizes one snapshot for `target`.
    ///
    /// Only `friend` entries with non-blank content survive. Time separators
    /// update the context attached to later messages. Positions are dense
    /// over the survivors, starting at 0.
    pub fn normalize(&self, target: &str, entries: &[RawEntry]) -> Vec<NormalizedMessage> {
        let mut time_context = UNKNOWN_TIME_CONTEXT.to_string();
        let mut out = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry.kind {
                EntryKind::Time => {
                    let label = entry.content.trim();
                    if !label.is_empty() {
                        time_context = label.to_string();
                    }
                }
                EntryKind::Friend => {
                    let content = entry.content.trim();
                    if content.is_empty() || self.is_self_echo(content) {
                        continue;
                    }
                    let position = out.len();
                    let backend_id = if entry.id.trim().is_empty() {
                        format!("unknown_{position}")
                    } else {
                        entry.id.clone()
                    };
                    out.push(NormalizedMessage {
                        backend_id,
                        content: content.to_string(),
                        sender: sender_of(entry, target),
                        time_context: time_context.clone(),
                        position,
                    });
                }
                EntryKind::SelfSent | EntryKind::Sys | EntryKind::Recall | EntryKind::Unknown => {}
            }
        }
        out
    }

    fn is_self_echo(&self, content: &str) -> bool {
        self.self_reply_markers
            .iter()
            .any(|m| content.contains(m.as_str()))
    }
}

/// Remark, then display name, then the conversation itself.
fn sender_of(entry: &RawEntry, target: &str) -> String {
    entry
        .sender_remark
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| Some(entry.sender.trim()).filter(|s| !s.is_empty()))
        .unwrap_or(target)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(vec!["✅ 记账成功".into()])
    }

    #[test]
    fn keeps_only_friend_messages_with_time_context() {
        let entries = vec![
            RawEntry::other(EntryKind::Sys, "s1", "bob joined"),
            RawEntry::friend("1", "bob", "coffee 12"),
            RawEntry::time("10:05"),
            RawEntry::other(EntryKind::SelfSent, "2", "noted"),
            RawEntry::friend("3", "ann", "  taxi 30  "),
            RawEntry::other(EntryKind::Recall, "4", "recalled"),
            RawEntry::friend("5", "ann", "   "),
        ];
        let out = normalizer().normalize("family", &entries);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time_context, UNKNOWN_TIME_CONTEXT);
        assert_eq!(out[0].position, 0);
        assert_eq!(out[1].content, "taxi 30");
        assert_eq!(out[1].time_context, "10:05");
        assert_eq!(out[1].position, 1);
    }

    #[test]
    fn sender_fallback_and_missing_ids() {
        let mut remarked = RawEntry::friend("", "bob", "rent 800");
        remarked.sender_remark = Some("Landlord".into());
        let anonymous = RawEntry::friend("", "", "water 3");
        let out = normalizer().normalize("family", &[remarked, anonymous]);

        assert_eq!(out[0].sender, "Landlord");
        assert_eq!(out[0].backend_id, "unknown_0");
        assert_eq!(out[1].sender, "family");
        assert_eq!(out[1].backend_id, "unknown_1");
    }

    #[test]
    fn drops_echoed_replies() {
        let entries = vec![
            RawEntry::friend("1", "bob", "✅ 记账成功！\n💰 金额：12元"),
            RawEntry::friend("2", "bob", "thanks"),
        ];
        let out = normalizer().normalize("t", &entries);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "thanks");
    }

    proptest! {
        #[test]
        fn positions_are_dense(kinds in proptest::collection::vec(0u8..5, 0..40)) {
            let entries: Vec<RawEntry> = kinds
                .iter()
                .enumerate()
                .map(|(i, k)| match k {
                    0 => RawEntry::time(format!("{i}:00")),
                    1 => RawEntry::other(EntryKind::Sys, i.to_string(), "notice"),
                    2 => RawEntry::friend(i.to_string(), "bob", ""),
                    _ => RawEntry::friend(i.to_string(), "bob", format!("m{i}")),
                })
                .collect();
            let out = Normalizer::default().normalize("t", &entries);
            let expected = kinds.iter().filter(|k| **k >= 3).count();
            prop_assert_eq!(out.len(), expected);
            for (i, m) in out.iter().enumerate() {
                prop_assert_eq!(m.position, i);
                prop_assert!(!m.content.is_empty());
            }
        }
    }
}
