// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the chat-automation backend and the classifier service.

use serde::{Deserialize, Serialize};
use tally_core::RawEntry;

/// Backend result code for success.
pub const CODE_OK: i64 = 0;
/// Backend result code: the target is not in the listen list.
pub const CODE_NOT_LISTENING: i64 = 3001;
/// Backend result code on listen/add: the target is already listened to.
pub const CODE_ALREADY_LISTENING: i64 = 3002;

/// Message texts the backend uses when the target fell out of its listen list.
pub const NOT_LISTENING_TEXTS: &[&str] = &["未在监听列表中", "not in listen list"];

/// Message texts the backend uses when it cannot find the contact or window.
pub const NOT_FOUND_TEXTS: &[&str] = &["找不到联系人", "window not found"];

/// Envelope every backend response is wrapped in.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Payload of `get-all-messages`.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesData {
    #[serde(default)]
    pub messages: Vec<RawEntry>,
}

/// Body of `listen/add`.
#[derive(Debug, Serialize)]
pub struct ListenRequest<'a> {
    pub who: &'a str,
    pub savepic: bool,
    pub savefile: bool,
    pub savevoice: bool,
}

impl<'a> ListenRequest<'a> {
    /// Listen to text only.
    pub fn text_only(who: &'a str) -> Self {
        Self {
            who,
            savepic: false,
            savefile: false,
            savevoice: false,
        }
    }
}

/// Body of `chat-window/message/send`.
#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub who: &'a str,
    pub message: &'a str,
}

/// Body of the classifier's direct accounting call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingRequest<'a> {
    pub description: &'a str,
    pub account_book_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_with_mixed_entries() {
        let body = r#"{
            "code": 0,
            "message": "ok",
            "data": {"messages": [
                {"id": 17, "type": "time", "content": "10:02"},
                {"id": "a1", "type": "friend", "content": "lunch 20", "sender": "bob", "sender_remark": "Bobby"},
                {"id": "a2", "type": "self", "content": "ok", "sender": "me"},
                {"id": "a3", "type": "video", "content": ""}
            ]}
        }"#;
        let env: ApiEnvelope<MessagesData> = serde_json::from_str(body).unwrap();
        assert_eq!(env.code, CODE_OK);
        let messages = env.data.unwrap().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].id, "17");
        assert_eq!(messages[1].sender_remark.as_deref(), Some("Bobby"));
        assert_eq!(messages[3].kind, tally_core::EntryKind::Unknown);
    }

    #[test]
    fn accounting_request_uses_camel_case() {
        let body = serde_json::to_value(AccountingRequest {
            description: "taxi 30",
            account_book_id: "book-1",
            user_name: Some("alice"),
        })
        .unwrap();
        assert_eq!(body["accountBookId"], "book-1");
        assert_eq!(body["userName"], "alice");

        let anonymous = serde_json::to_value(AccountingRequest {
            description: "taxi 30",
            account_book_id: "book-1",
            user_name: None,
        })
        .unwrap();
        assert!(anonymous.get("userName").is_none());
    }
}
