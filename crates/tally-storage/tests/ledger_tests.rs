// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the ledger across reopen and concurrent writers.

use tally_core::{AccountingStatus, MessageStatus};
use tally_storage::queries::{records, stats, targets};
use tally_storage::{now_timestamp, Database, MessageRecord, TargetConfig};
use tempfile::tempdir;

fn baseline(target: &str, n: usize) -> Vec<MessageRecord> {
    (0..n)
        .map(|i| MessageRecord {
            chat_target: target.into(),
            fingerprint: format!("alice|{i:08x}|2026-01-01 10:00"),
            relaxed_fingerprint: format!("alice|{i:08x}"),
            backend_message_id: format!("m{i}"),
            content: format!("message {i}"),
            content_hash: format!("{i:08x}"),
            sender: "alice".into(),
            time_context: "10:00".into(),
            sequence_position: i as i64,
            session_id: Some("s1".into()),
            status: MessageStatus::Processed,
            accounting_status: AccountingStatus::Initial,
            downstream_response: None,
            downstream_record_id: None,
            retry_count: 0,
            last_error: None,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
            processed_at: None,
        })
        .collect()
}

#[tokio::test]
async fn seeded_target_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let path = path.to_str().unwrap();

    {
        let db = Database::open(path).await.unwrap();
        assert!(targets::create_target(&db, &TargetConfig::new("family", 5, 3)).await.unwrap());
        assert!(!targets::create_target(&db, &TargetConfig::new("family", 9, 9)).await.unwrap());
        targets::seed_baseline(&db, "family", baseline("family", 4)).await.unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open(path).await.unwrap();
    let target = targets::get_target(&db, "family").await.unwrap().unwrap();
    assert!(target.is_initialized);
    assert_eq!(target.poll_interval_secs, 5);
    assert_eq!(target.last_sequence_position, Some(3));
    assert_eq!(
        target.last_fingerprint.as_deref(),
        Some("alice|00000003|2026-01-01 10:00")
    );
    assert!(target.initialization_time.is_some());

    let s = stats::target_stats(&db, "family").await.unwrap();
    assert_eq!(s.total, 4);
    assert_eq!(s.accounting_initial, 4);
    let first = records::get_record(&db, "family", "alice|00000000|2026-01-01 10:00")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, MessageStatus::Processed);
}

#[tokio::test]
async fn reset_clears_records_and_seeding_state() {
    let db = Database::open_in_memory().await.unwrap();
    targets::create_target(&db, &TargetConfig::new("a", 5, 3)).await.unwrap();
    targets::create_target(&db, &TargetConfig::new("b", 5, 3)).await.unwrap();
    targets::seed_baseline(&db, "a", baseline("a", 3)).await.unwrap();
    targets::seed_baseline(&db, "b", baseline("b", 2)).await.unwrap();

    let deleted = targets::reset_target(&db, "a").await.unwrap();
    assert_eq!(deleted, 3);

    let a = targets::get_target(&db, "a").await.unwrap().unwrap();
    assert!(!a.is_initialized);
    assert!(a.last_fingerprint.is_none());
    assert_eq!(stats::target_stats(&db, "a").await.unwrap().total, 0);

    // Other targets are untouched.
    assert_eq!(stats::target_stats(&db, "b").await.unwrap().total, 2);
    assert!(targets::get_target(&db, "b").await.unwrap().unwrap().is_initialized);
}

#[tokio::test]
async fn update_settings_on_unknown_target_fails() {
    let db = Database::open_in_memory().await.unwrap();
    let err = targets::update_settings(&db, "ghost", 5, 3).await.unwrap_err();
    assert!(matches!(err, tally_core::TallyError::TargetNotFound(name) if name == "ghost"));

    targets::create_target(&db, &TargetConfig::new("real", 5, 3)).await.unwrap();
    targets::update_settings(&db, "real", 30, 1).await.unwrap();
    let real = targets::get_target(&db, "real").await.unwrap().unwrap();
    assert_eq!(real.poll_interval_secs, 30);
    assert_eq!(real.max_retries, 1);
    assert_eq!(targets::list_targets(&db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_upserts_of_one_key_leave_one_row() {
    let db = Database::open_in_memory().await.unwrap();
    let record = baseline("t", 1).remove(0);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let record = record.clone();
        handles.push(tokio::spawn(async move {
            records::upsert_record(&db, &record).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let s = stats::global_stats(&db).await.unwrap();
    assert_eq!(s.total, 1);
    assert_eq!(s.processed, 1);
}
