//! Firestore REST document codec for task records.
//!
//! Firestore wraps every field in a typed value (`{"stringValue": ...}`,
//! `{"timestampValue": ...}`, `{"mapValue": {"fields": ...}}`). Only the
//! shapes used by task documents are handled here.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::types::{Task, TaskResult, TaskStatus};

/// A document as returned by `GET` and `runQuery`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the document name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    fn string(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(string_of)
    }
}

pub fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn string_of(value: &Value) -> Option<&str> {
    value.get("stringValue").and_then(Value::as_str)
}

fn timestamp_of(value: &Value) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = value.get("timestampValue").and_then(Value::as_str) else {
        return Ok(None);
    };
    parse_timestamp(raw).map(Some)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parse timestamp '{raw}'"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Encode a task result as a `mapValue`; absent optionals are omitted.
pub fn result_value(result: &TaskResult) -> Value {
    let mut fields = Map::new();
    fields.insert("branchName".to_string(), string_value(&result.branch_name));
    fields.insert("commitHash".to_string(), string_value(&result.commit_hash));
    if let Some(url) = &result.pr_url {
        fields.insert("prUrl".to_string(), string_value(url));
    }
    if let Some(error) = &result.error {
        fields.insert("error".to_string(), string_value(error));
    }
    json!({ "mapValue": { "fields": fields } })
}

fn decode_result(value: &Value) -> Option<TaskResult> {
    let fields = value.get("mapValue")?.get("fields")?;
    let text = |key: &str| fields.get(key).and_then(string_of).map(str::to_string);
    Some(TaskResult {
        branch_name: text("branchName").unwrap_or_default(),
        commit_hash: text("commitHash").unwrap_or_default(),
        pr_url: text("prUrl"),
        error: text("error"),
    })
}

/// Decode a task document. Unknown fields are ignored.
pub fn decode_task(doc: &Document) -> Result<Task> {
    let status = doc
        .string("status")
        .ok_or_else(|| anyhow!("task {} has no status", doc.id()))?
        .parse::<TaskStatus>()
        .with_context(|| format!("task {}", doc.id()))?;
    let updated_at = match doc.fields.get("updatedAt") {
        Some(value) => timestamp_of(value)?,
        None => None,
    };
    Ok(Task {
        id: doc.id().to_string(),
        title: doc.string("title").unwrap_or_default().to_string(),
        description: doc.string("description").map(str::to_string),
        status,
        updated_at,
        result: doc.fields.get("result").and_then(decode_result),
    })
}
