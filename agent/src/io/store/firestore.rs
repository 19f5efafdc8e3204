//! Cloud Firestore backend over the REST API.
//!
//! Claims are conditional commits: the document is read, checked, and written
//! with a `currentDocument.updateTime` precondition, so a concurrent writer
//! makes the commit fail instead of being overwritten. `updatedAt` is always
//! set from the server clock through a field transform.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::document::{Document, decode_task, parse_timestamp, result_value, string_value};
use super::{CasOutcome, TaskStore, TransitionGuard};
use crate::core::types::{Task, TaskResult, TaskStatus, TerminalStatus};
use crate::io::config::{StoreCredentials, StoreSection};

const API_ROOT: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<WriteResult>,
    commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    #[serde(default)]
    transform_results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// How a commit ended.
#[derive(Debug)]
enum CommitOutcome {
    Committed(CommitResponse),
    PreconditionFailed,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct FirestoreTaskStore {
    client: Client,
    api_key: String,
    /// `projects/<p>/databases/<d>/documents`
    documents_path: String,
    collection: String,
    api_root: String,
}

impl FirestoreTaskStore {
    pub fn new(credentials: &StoreCredentials, section: &StoreSection) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_key: credentials.api_key.clone(),
            documents_path: format!(
                "projects/{}/databases/{}/documents",
                credentials.project_id, section.database
            ),
            collection: section.collection.clone(),
            api_root: API_ROOT.to_string(),
        })
    }

    /// Point the client at another endpoint (e.g. the Firestore emulator).
    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = root.into().trim_end_matches('/').to_string();
        self
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path, self.collection, id)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.api_root, self.documents_path, suffix)
    }

    fn status_query(&self, status: TaskStatus, limit: Option<u32>) -> Value {
        let mut query = json!({
            "from": [{ "collectionId": self.collection }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "status" },
                    "op": "EQUAL",
                    "value": string_value(status.as_str()),
                }
            }
        });
        if let Some(limit) = limit {
            query["limit"] = json!(limit);
        }
        json!({ "structuredQuery": query })
    }

    fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .query(&[("key", self.api_key.as_str())])
            .send()
            .context("send firestore request")?;
        let status = response.status();
        let body = response.text().context("read firestore response")?;
        Ok((status, body))
    }

    fn run_query(&self, status: TaskStatus, limit: Option<u32>) -> Result<Vec<Document>> {
        let request = self
            .client
            .post(self.url(":runQuery"))
            .json(&self.status_query(status, limit));
        let (code, body) = self.send(request)?;
        if !code.is_success() {
            return Err(api_failure("runQuery", code, &body));
        }
        let rows: Vec<QueryRow> = serde_json::from_str(&body).context("parse runQuery response")?;
        Ok(rows.into_iter().filter_map(|row| row.document).collect())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let url = format!("{}/{}/{}", self.url(""), self.collection, id);
        let (code, body) = self.send(self.client.get(url))?;
        if code == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !code.is_success() {
            return Err(api_failure("get document", code, &body));
        }
        let doc = serde_json::from_str(&body).context("parse document")?;
        Ok(Some(doc))
    }

    fn commit(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        precondition: Value,
    ) -> Result<CommitOutcome> {
        let mut fields = serde_json::Map::new();
        fields.insert("status".to_string(), string_value(status.as_str()));
        let mut mask = vec!["status"];
        if let Some(result) = result {
            fields.insert("result".to_string(), result_value(result));
            mask.push("result");
        }
        let body = json!({
            "writes": [{
                "update": { "name": self.document_name(id), "fields": fields },
                "updateMask": { "fieldPaths": mask },
                "updateTransforms": [{
                    "fieldPath": "updatedAt",
                    "setToServerValue": "REQUEST_TIME",
                }],
                "currentDocument": precondition,
            }]
        });

        let (code, text) = self.send(self.client.post(self.url(":commit")).json(&body))?;
        classify_commit(code, &text)
    }
}

/// Map a commit response onto its outcome. Lost races (a stale
/// `updateTime`, contention aborts) are `PreconditionFailed`, not errors.
fn classify_commit(code: StatusCode, body: &str) -> Result<CommitOutcome> {
    if code.is_success() {
        let response = serde_json::from_str(body).context("parse commit response")?;
        return Ok(CommitOutcome::Committed(response));
    }
    if code == StatusCode::NOT_FOUND {
        return Ok(CommitOutcome::NotFound);
    }
    let status_name = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.status)
        .unwrap_or_default();
    if matches!(status_name.as_str(), "FAILED_PRECONDITION" | "ABORTED")
        || code == StatusCode::CONFLICT
    {
        return Ok(CommitOutcome::PreconditionFailed);
    }
    Err(api_failure("commit", code, body))
}

fn api_failure(operation: &str, code: StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => anyhow!(
            "firestore {operation} failed ({code}, {}): {}",
            parsed.error.status,
            parsed.error.message
        ),
        Err(_) => anyhow!("firestore {operation} failed ({code}): {}", body.trim()),
    }
}

/// Server timestamp written by the `updatedAt` transform.
fn applied_timestamp(response: &CommitResponse) -> Option<chrono::DateTime<chrono::Utc>> {
    let from_transform = response
        .write_results
        .first()
        .and_then(|w| w.transform_results.first())
        .and_then(|v| v.get("timestampValue"))
        .and_then(Value::as_str);
    from_transform
        .or(response.commit_time.as_deref())
        .and_then(|raw| parse_timestamp(raw).ok())
}

impl TaskStore for FirestoreTaskStore {
    #[instrument(skip_all)]
    fn find_pending(&self) -> Result<Option<String>> {
        let docs = self.run_query(TaskStatus::Pending, Some(1))?;
        debug!(count = docs.len(), "pending query returned");
        Ok(docs.first().map(|doc| doc.id().to_string()))
    }

    #[instrument(skip(self, guard, result), fields(expected = %guard.status))]
    fn transition(
        &self,
        id: &str,
        guard: &TransitionGuard,
        next: TaskStatus,
        result: Option<&TaskResult>,
    ) -> Result<CasOutcome> {
        if !guard.status.can_transition_to(next) {
            bail!("illegal transition {} -> {next}", guard.status);
        }
        let Some(doc) = self.get_document(id)? else {
            return Ok(CasOutcome::Missing);
        };
        let current = decode_task(&doc)?;
        let stale = guard
            .updated_at
            .is_some_and(|expected| current.updated_at != Some(expected));
        if current.status != guard.status || stale {
            return Ok(CasOutcome::Conflict(current.status));
        }
        let update_time = doc
            .update_time
            .clone()
            .ok_or_else(|| anyhow!("document {id} has no updateTime"))?;

        match self.commit(id, next, result, json!({ "updateTime": update_time }))? {
            CommitOutcome::Committed(response) => {
                let mut task = current;
                task.status = next;
                task.updated_at = applied_timestamp(&response);
                if let Some(result) = result {
                    task.result = Some(result.clone());
                }
                Ok(CasOutcome::Applied(task))
            }
            CommitOutcome::NotFound => Ok(CasOutcome::Missing),
            CommitOutcome::PreconditionFailed => {
                warn!(task_id = id, "document changed between read and commit");
                match self.get_document(id)? {
                    Some(doc) => Ok(CasOutcome::Conflict(decode_task(&doc)?.status)),
                    None => Ok(CasOutcome::Missing),
                }
            }
        }
    }

    #[instrument(skip(self, result))]
    fn update_task_status(
        &self,
        id: &str,
        status: TerminalStatus,
        result: Option<&TaskResult>,
    ) -> Result<()> {
        match self.commit(id, status.into(), result, json!({ "exists": true }))? {
            CommitOutcome::Committed(_) => Ok(()),
            CommitOutcome::NotFound | CommitOutcome::PreconditionFailed => {
                Err(anyhow!("task {id} not found"))
            }
        }
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.run_query(status, None)?
            .iter()
            .map(decode_task)
            .collect()
    }
}
