// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading the classifier's response: confirmation text, correlation id and
//! the unrelated-message signal.

use serde_json::Value;

/// Where a downstream record id may appear, first match wins.
const CORRELATION_PATHS: &[&[&str]] = &[
    &["smartAccountingResult", "data", "id"],
    &["smartAccountingResult", "id"],
    &["data", "id"],
    &["id"],
    &["result", "id"],
    &["record", "id"],
    &["recordId"],
    &["accounting_id"],
    &["transactionId"],
];

/// Fallback confirmation when the response carries no details.
pub const DEFAULT_SUCCESS_TEXT: &str = "✅ 记账成功！";

/// Extracts the downstream record id from a classifier response.
///
/// Accepts string or numeric ids; empty strings are ignored.
pub fn correlation_id(response: &Value) -> Option<String> {
    CORRELATION_PATHS.iter().find_map(|path| {
        let value = path.iter().try_fold(response, |node, key| node.get(*key))?;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// True when `text` contains any of the configured unrelated markers.
pub fn is_unrelated(text: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && text.contains(m.as_str()))
}

/// Builds the multi-line confirmation sent back to the chat.
pub fn success_reply(response: &Value) -> String {
    let Some(result) = response.get("smartAccountingResult") else {
        return legacy_reply(response);
    };
    // Newer servers nest the booked record under `data`.
    let record = match result.get("data") {
        Some(data) if data.is_object() => data,
        _ => result,
    };
    if record.get("amount").is_none() {
        return DEFAULT_SUCCESS_TEXT.to_string();
    }

    let mut lines = vec![DEFAULT_SUCCESS_TEXT.to_string()];

    let detail = text_field(record, &["note", "description"]);
    if !detail.is_empty() {
        lines.push(format!("📝 明细：{detail}"));
    }

    let date = text_field(record, &["date"]);
    if !date.is_empty() {
        let day = date.split('T').next().unwrap_or(&date);
        lines.push(format!("📅 日期：{day}"));
    }

    let direction = text_field(record, &["type", "direction"]);
    let category = text_field(record, &["categoryName", "category"]);
    let mut parts = Vec::new();
    if !direction.is_empty() {
        let (icon, label) = direction_label(&direction);
        parts.push(format!("{icon} 方向：{label}"));
    }
    if !category.is_empty() {
        parts.push(format!("分类：{}{category}", category_icon(&category)));
    }
    if !parts.is_empty() {
        lines.push(parts.join("；"));
    }

    let amount = text_field(record, &["amount"]);
    if !amount.is_empty() {
        lines.push(format!("💰 金额：{amount}元"));
    }

    let budget = text_field(record, &["budgetName", "budget"]);
    if !budget.is_empty() {
        let owner = text_field(record, &["budgetOwnerName", "budgetOwner"]);
        if budget == "个人预算" && !owner.is_empty() {
            lines.push(format!("📊 预算：{budget}（{owner}）"));
        } else {
            lines.push(format!("📊 预算：{budget}"));
        }
    }

    lines.join("\n")
}

/// Older response shape: `{success|code, data: {amount, category}}`.
fn legacy_reply(response: &Value) -> String {
    let Some(data) = response.get("data") else {
        return DEFAULT_SUCCESS_TEXT.to_string();
    };
    let amount = text_field(data, &["amount"]);
    let category = text_field(data, &["category"]);
    match (amount.is_empty(), category.is_empty()) {
        (false, false) => format!("{DEFAULT_SUCCESS_TEXT}\n💰 {category} {amount}元"),
        (false, true) => format!("{DEFAULT_SUCCESS_TEXT}\n💰 {amount}元"),
        _ => DEFAULT_SUCCESS_TEXT.to_string(),
    }
}

/// First non-empty of `keys`, rendering numbers as text.
fn text_field(node: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match node.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn direction_label(direction: &str) -> (&'static str, String) {
    match direction.to_lowercase().as_str() {
        "支出" | "expense" => ("💸", "支出".to_string()),
        "收入" | "income" => ("💰", "收入".to_string()),
        "transfer" => ("🔄", "转账".to_string()),
        _ => ("💸", direction.to_string()),
    }
}

fn category_icon(category: &str) -> &'static str {
    match category {
        "餐饮" => "🍽️",
        "交通" => "🚗",
        "购物" => "🛒",
        "娱乐" => "🎮",
        "医疗" => "🏥",
        "教育" => "📚",
        "学习" => "📝",
        "日用" => "🧴",
        "住房" => "🏠",
        "通讯" => "📱",
        "服装" => "👕",
        "美容" => "💄",
        "运动" => "⚽",
        "旅游" => "✈️",
        "投资" | "理财" => "📈",
        "保险" => "🛡️",
        "转账" => "💸",
        "红包" => "🧧",
        "工资" => "💼",
        "奖金" => "🎁",
        "其他" => "📦",
        _ => "📂",
    }
}
