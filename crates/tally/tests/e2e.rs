// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end: real HTTP adapters against wiremock servers standing in for
//! the chat backend and the classifier.

use std::sync::Arc;

use serde_json::json;
use tally_backend::{HttpAccountingHandler, HttpChatBackend};
use tally_config::model::{BackendConfig, EngineConfig, HandlerConfig};
use tally_core::{AccountingStatus, MessageStatus};
use tally_engine::{EngineContext, TargetRegistry};
use tally_storage::queries::records;
use tally_storage::Database;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn messages(entries: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0, "message": "success", "data": {"messages": entries}
    }))
}

#[tokio::test]
async fn new_message_flows_from_backend_to_classifier_and_back() {
    let backend_server = MockServer::start().await;
    let handler_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/message/listen/add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "message": "success", "data": null
        })))
        .mount(&backend_server)
        .await;
    // First fetch is the baseline, every later fetch carries one new message.
    Mock::given(method("GET"))
        .and(path("/api/chat-window/get-all-messages"))
        .and(query_param("who", "alice"))
        .respond_with(messages(json!([
            {"id": "1", "type": "time", "content": "09:00"},
            {"id": "2", "type": "friend", "sender": "alice", "content": "coffee 4"}
        ])))
        .up_to_n_times(1)
        .mount(&backend_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/chat-window/get-all-messages"))
        .and(query_param("who", "alice"))
        .respond_with(messages(json!([
            {"id": "11", "type": "time", "content": "09:00"},
            {"id": "12", "type": "friend", "sender": "alice", "content": "coffee 4"},
            {"id": "13", "type": "friend", "sender": "alice", "content": "lunch 12"}
        ])))
        .mount(&backend_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat-window/message/send"))
        .and(body_partial_json(json!({"who": "alice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "message": "success", "data": null
        })))
        .expect(1)
        .mount(&backend_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/ai/smart-accounting/direct"))
        .and(body_partial_json(json!({"description": "lunch 12", "accountBookId": "book-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "smartAccountingResult": {"data": {"id": "tx-9", "amount": 12, "note": "lunch"}}
        })))
        .expect(1)
        .mount(&handler_server)
        .await;

    let backend = HttpChatBackend::new(&BackendConfig {
        base_url: backend_server.uri(),
        max_attempts: 1,
        backoff_base_ms: 0,
        ..Default::default()
    })
    .unwrap();
    let handler = HttpAccountingHandler::new(&HandlerConfig {
        server_url: Some(handler_server.uri()),
        token: Some("tok".into()),
        account_book_id: Some("book-1".into()),
        ..Default::default()
    })
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("ledger.db").display().to_string())
        .await
        .unwrap();
    let ctx = EngineContext::new(
        db.clone(),
        Arc::new(backend),
        Arc::new(handler),
        EngineConfig {
            seed_retry_delay_secs: 0,
            ..Default::default()
        },
    );
    let registry = TargetRegistry::new(ctx);
    registry.add_target("alice").await.unwrap();

    let mut worker = registry.prepare("alice").await.unwrap();
    let report = worker.tick().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(worker.tick().await.unwrap().dispatched, 0);

    let rows = records::recent_records(&db, "alice", 10).await.unwrap();
    let lunch = rows.iter().find(|r| r.content == "lunch 12").unwrap();
    assert_eq!(lunch.status, MessageStatus::Processed);
    assert_eq!(lunch.accounting_status, AccountingStatus::Success);
    assert_eq!(lunch.downstream_record_id.as_deref(), Some("tx-9"));
    let coffee = rows.iter().find(|r| r.content == "coffee 4").unwrap();
    assert_eq!(coffee.accounting_status, AccountingStatus::Initial);
}
