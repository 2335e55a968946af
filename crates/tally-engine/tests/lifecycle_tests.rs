// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry lifecycle: seeding, start/stop, reset and maintenance.

use std::time::{Duration, Instant};

use tally_core::{BackendErrorKind, TallyError, TargetState};
use tally_engine::EngineEvent;
use tally_storage::queries::{records, stats, targets};
use tally_test_utils::{friend, MockHandler, TestHarness};

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition().await {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn add_target_is_idempotent() {
    let h = TestHarness::builder().build().await.unwrap();
    assert!(h.registry.add_target("alice").await.unwrap());
    assert!(!h.registry.add_target("alice").await.unwrap());
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
}

#[tokio::test]
async fn starting_an_unknown_target_fails() {
    let h = TestHarness::builder().build().await.unwrap();
    let err = h.registry.start("nobody").await.unwrap_err();
    assert!(matches!(err, TallyError::TargetNotFound(name) if name == "nobody"));
}

#[tokio::test]
async fn seeding_failure_leaves_target_in_error() {
    let h = TestHarness::builder().build().await.unwrap();
    h.registry.add_target("alice").await.unwrap();
    let mut events = h.registry.subscribe();

    // The mock window is empty, which never counts as a usable baseline.
    let err = h.registry.start("alice").await.unwrap_err();
    assert!(matches!(err, TallyError::Seeding { attempts: 3, .. }));
    assert!(matches!(h.registry.state("alice").await, TargetState::Error(_)));

    let config = targets::get_target(&h.db, "alice").await.unwrap().unwrap();
    assert!(!config.is_initialized);
    assert_eq!(h.handler.call_count().await, 0);

    let mut attempts = 0;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::SeedingProgress { records: None, .. } = event {
            attempts += 1;
        }
    }
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn seeding_survives_transient_backend_failures() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.set_snapshot(vec![friend("1", "alice", "a")]).await;
    h.backend.fail_next_fetches(2, BackendErrorKind::Transient).await;
    h.registry.add_target("alice").await.unwrap();

    h.registry.start("alice").await.unwrap();
    assert_eq!(h.registry.state("alice").await, TargetState::Running);
    assert_eq!(h.backend.listen_calls().await, vec!["alice".to_string()]);

    h.registry.shutdown().await;
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
}

#[tokio::test]
async fn running_target_dispatches_new_messages() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.push_snapshot(vec![friend("1", "alice", "a")]).await;
    h.backend
        .push_snapshot(vec![friend("1", "alice", "a"), friend("2", "alice", "rent 1200")])
        .await;
    h.registry.add_target("alice").await.unwrap();
    h.registry.start("alice").await.unwrap();

    let handler = h.handler.clone();
    wait_for(|| {
        let handler = handler.clone();
        async move { handler.call_count().await == 1 }
    })
    .await;
    // A second start while running is a no-op.
    h.registry.start("alice").await.unwrap();
    h.registry.stop("alice").await.unwrap();

    assert_eq!(h.handler.calls_for("rent 1200").await, 1);
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
}

#[tokio::test]
async fn stop_aborts_a_worker_stuck_in_the_handler() {
    let h = TestHarness::builder()
        .with_config(|c| c.stop_timeout_secs = 1)
        .with_handler(MockHandler::with_delay(Duration::from_secs(60)))
        .build()
        .await
        .unwrap();
    h.backend.push_snapshot(vec![friend("1", "alice", "a")]).await;
    h.backend
        .push_snapshot(vec![friend("1", "alice", "a"), friend("2", "alice", "slow")])
        .await;
    h.registry.add_target("alice").await.unwrap();
    h.registry.start("alice").await.unwrap();

    let handler = h.handler.clone();
    wait_for(|| {
        let handler = handler.clone();
        async move { handler.call_count().await == 1 }
    })
    .await;

    let started = Instant::now();
    h.registry.stop("alice").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
}

#[tokio::test]
async fn reset_reseeds_on_next_start() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.set_snapshot(vec![friend("1", "alice", "a")]).await;
    h.registry.add_target("alice").await.unwrap();
    let mut worker = h.registry.prepare("alice").await.unwrap();

    h.backend
        .set_snapshot(vec![friend("1", "alice", "a"), friend("2", "alice", "b")])
        .await;
    worker.tick().await.unwrap();
    drop(worker);

    let removed = h.registry.reset("alice").await.unwrap();
    assert_eq!(removed, 2);
    let config = targets::get_target(&h.db, "alice").await.unwrap().unwrap();
    assert!(!config.is_initialized);

    let mut worker = h.registry.prepare("alice").await.unwrap();
    assert_eq!(worker.tick().await.unwrap().dispatched, 0);
    let stats = h.registry.get_stats("alice").await.unwrap();
    assert_eq!(stats.accounting_initial, 2);
    assert_eq!(h.handler.call_count().await, 1);
}

#[tokio::test]
async fn states_list_every_registered_target() {
    let h = TestHarness::builder().build().await.unwrap();
    h.registry.add_target("bob").await.unwrap();
    h.registry.add_target("alice").await.unwrap();

    let states = h.registry.states().await.unwrap();
    assert_eq!(
        states,
        vec![
            ("alice".to_string(), TargetState::Stopped),
            ("bob".to_string(), TargetState::Stopped),
        ]
    );
}

#[tokio::test]
async fn cleanup_keeps_baseline_rows() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.set_snapshot(vec![friend("1", "alice", "a")]).await;
    h.registry.add_target("alice").await.unwrap();
    let mut worker = h.registry.prepare("alice").await.unwrap();
    h.backend
        .set_snapshot(vec![friend("1", "alice", "a"), friend("2", "alice", "b")])
        .await;
    worker.tick().await.unwrap();

    h.clock.advance(chrono::Duration::minutes(1));
    let (removed, _logs) = h.registry.cleanup(0).await.unwrap();
    assert_eq!(removed, 1);

    let left = records::recent_records(&h.db, "alice", 10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].content, "a");
    // The session still remembers the cleaned-up message.
    assert_eq!(worker.tick().await.unwrap().dispatched, 0);
}

#[tokio::test]
async fn global_stats_sum_over_targets() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.set_snapshot(vec![friend("1", "x", "a"), friend("2", "x", "b")]).await;
    for target in ["alice", "bob"] {
        h.registry.add_target(target).await.unwrap();
        h.registry.prepare(target).await.unwrap();
    }

    let global = h.registry.global_stats().await.unwrap();
    assert_eq!(global.total, 4);
    assert_eq!(global.chat_target, None);
    let alice = stats::target_stats(&h.db, "alice").await.unwrap();
    assert_eq!(alice.total, 2);
}

#[tokio::test]
async fn unknown_contact_fails_the_start_immediately() {
    let h = TestHarness::builder().build().await.unwrap();
    h.backend.set_snapshot(vec![friend("1", "ghost", "a")]).await;
    h.backend.forget_target("ghost").await;
    h.registry.add_target("ghost").await.unwrap();

    let err = h.registry.start("ghost").await.unwrap_err();
    assert!(err.is_not_found(), "got: {err}");
    assert!(matches!(h.registry.state("ghost").await, TargetState::Error(_)));
    assert_eq!(h.backend.fetch_count().await, 0);
    assert!(!targets::get_target(&h.db, "ghost").await.unwrap().unwrap().is_initialized);
}

#[tokio::test]
async fn seeding_stops_retrying_once_the_target_is_unknown() {
    let h = TestHarness::builder()
        .with_config(|c| c.seed_retry_delay_secs = 5)
        .build()
        .await
        .unwrap();
    h.backend.set_snapshot(vec![friend("1", "alice", "a")]).await;
    h.backend.fail_next_fetches(3, BackendErrorKind::NotFound).await;
    h.registry.add_target("alice").await.unwrap();

    let started = Instant::now();
    let err = h.registry.start("alice").await.unwrap_err();
    assert!(matches!(err, TallyError::Seeding { attempts: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(h.backend.fetch_count().await, 1);
}

#[tokio::test]
async fn seeding_one_target_does_not_block_the_others() {
    let h = TestHarness::builder()
        .with_config(|c| c.seed_retry_delay_secs = 1)
        .build()
        .await
        .unwrap();
    h.backend.set_snapshot(vec![friend("1", "alice", "a")]).await;
    h.registry.add_target("alice").await.unwrap();
    h.registry.start("alice").await.unwrap();

    // From here on the window is empty, so "slow" keeps retrying its baseline.
    h.backend.set_snapshot(Vec::new()).await;
    h.registry.add_target("slow").await.unwrap();

    let slow = h.registry.start("slow");
    let others = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.registry.state("slow").await, TargetState::Initializing);
        // A second start while the first is still seeding is a no-op.
        h.registry.start("slow").await.unwrap();

        let started = Instant::now();
        h.registry.stop("alice").await.unwrap();
        started.elapsed()
    };
    let (slow_result, stop_took) = tokio::join!(slow, others);

    assert!(stop_took < Duration::from_millis(500), "stop waited {stop_took:?}");
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
    assert!(matches!(slow_result, Err(TallyError::Seeding { attempts: 3, .. })));
    assert!(matches!(h.registry.state("slow").await, TargetState::Error(_)));
}

#[tokio::test]
async fn stop_during_start_discards_the_worker() {
    let h = TestHarness::builder()
        .with_config(|c| c.seed_retry_delay_secs = 1)
        .build()
        .await
        .unwrap();
    h.backend.push_snapshot(Vec::new()).await;
    h.backend.push_snapshot(vec![friend("1", "alice", "a")]).await;
    h.registry.add_target("alice").await.unwrap();

    let start = h.registry.start("alice");
    let stop = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.registry.stop("alice").await.unwrap();
    };
    let (started, ()) = tokio::join!(start, stop);

    // Seeding still finished, but no worker was left running.
    started.unwrap();
    assert_eq!(h.registry.state("alice").await, TargetState::Stopped);
    assert!(targets::get_target(&h.db, "alice").await.unwrap().unwrap().is_initialized);
    h.backend.push_snapshot(vec![friend("1", "alice", "a"), friend("2", "alice", "b")]).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.handler.call_count().await, 0);
}
