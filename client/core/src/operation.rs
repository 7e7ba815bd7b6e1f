//! Tracked Operations
//!
//! snapd runs long requests (install, remove, refresh, ...) as *changes*: the
//! request is answered with `202 Accepted` and a change ID, and the change is
//! then observed through `GET /v2/changes/{id}` until it reports `ready`.
//!
//! This module holds the snapshot types and the mapping between them and
//! snapd's JSON documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ClientError;
use crate::request::RequestDescriptor;
use crate::response::{check_envelope, Response};

/// Identifier of a server-side operation (a snapd change)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    /// Borrow the raw ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of one task inside an operation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Task ID
    pub id: Option<String>,
    /// Task kind, e.g. `download-snap`
    pub kind: Option<String>,
    /// Human-readable summary
    pub summary: Option<String>,
    /// Task status, e.g. `Doing`
    pub status: Option<String>,
    /// Label of the progress counter
    pub label: Option<String>,
    /// Units done
    pub done: i64,
    /// Units in total
    pub total: i64,
    /// When the task was created
    pub spawn_time: Option<DateTime<Utc>>,
    /// When the task finished
    pub ready_time: Option<DateTime<Utc>>,
}

/// Last observed state of an operation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    /// Operation ID
    pub id: String,
    /// Operation kind, e.g. `install-snap`
    pub kind: Option<String>,
    /// Human-readable summary
    pub summary: Option<String>,
    /// Operation status, e.g. `Doing`, `Done`, `Error`
    pub status: Option<String>,
    /// Whether the operation has finished
    pub ready: bool,
    /// Error reported by the server once finished
    pub error: Option<String>,
    /// Result payload reported by the server once finished
    pub data: Option<Value>,
    /// When the operation was created
    pub spawn_time: Option<DateTime<Utc>>,
    /// When the operation finished
    pub ready_time: Option<DateTime<Utc>>,
    /// Tasks in server order
    pub tasks: Vec<TaskProgress>,
}

impl OperationSnapshot {
    /// Build a snapshot from the `result` member of a change document
    ///
    /// # Errors
    ///
    /// - `ClientError::ProtocolError` if `result` is not an object, its `id`
    ///   differs from `expected`, or a task is not an object
    pub fn from_json(result: &Value, expected: &OperationId) -> Result<Self, ClientError> {
        let object = result
            .as_object()
            .ok_or_else(|| ClientError::ProtocolError("unexpected change type".into()))?;

        let id = string(object, "id").unwrap_or_default();
        if id != expected.as_str() {
            return Err(ClientError::ProtocolError(
                "unexpected change ID returned".into(),
            ));
        }

        let tasks = match object.get("tasks") {
            Some(Value::Array(items)) => items
                .iter()
                .map(task_from_json)
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            id,
            kind: string(object, "kind"),
            summary: string(object, "summary"),
            status: string(object, "status"),
            ready: object.get("ready").and_then(Value::as_bool).unwrap_or(false),
            error: object.get("err").map(|err| {
                err.as_str().unwrap_or("Unknown error").to_string()
            }),
            data: object.get("data").cloned(),
            spawn_time: timestamp(object, "spawn-time"),
            ready_time: timestamp(object, "ready-time"),
            tasks,
        })
    }
}

fn task_from_json(value: &Value) -> Result<TaskProgress, ClientError> {
    let object = value
        .as_object()
        .ok_or_else(|| ClientError::ProtocolError("unexpected task type".into()))?;
    let progress = object.get("progress").and_then(Value::as_object);

    Ok(TaskProgress {
        id: string(object, "id"),
        kind: string(object, "kind"),
        summary: string(object, "summary"),
        status: string(object, "status"),
        label: progress.and_then(|p| string(p, "label")),
        done: progress
            .and_then(|p| p.get("done"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        total: progress
            .and_then(|p| p.get("total"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        spawn_time: timestamp(object, "spawn-time"),
        ready_time: timestamp(object, "ready-time"),
    })
}

fn string(object: &Map<String, Value>, name: &str) -> Option<String> {
    object.get(name).and_then(Value::as_str).map(str::to_string)
}

fn timestamp(object: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    object
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Successful outcome of a tracked request
#[derive(Clone, Debug, PartialEq)]
pub struct OperationResult {
    /// The operation that finished
    pub id: OperationId,
    /// The operation's `data` payload, if any
    pub data: Option<Value>,
    /// The terminal snapshot
    pub snapshot: OperationSnapshot,
}

/// Extract the operation ID from the response accepting a tracked request
///
/// # Errors
///
/// - `ClientError::ProtocolError` if the body is not JSON or has no `change`
/// - `ClientError::Api` for error envelopes
pub fn accepted_operation_id(response: &Response) -> Result<OperationId, ClientError> {
    let document = response.json()?;
    check_envelope(response.status(), &document)?;
    document
        .get("change")
        .and_then(Value::as_str)
        .map(|id| OperationId(id.to_string()))
        .ok_or_else(|| ClientError::ProtocolError("missing operation ID".into()))
}

/// Parse a status or abort response into a snapshot
///
/// # Errors
///
/// - `ClientError::ProtocolError` for bodies that are not change documents
/// - `ClientError::Api` for error envelopes
pub fn parse_snapshot(
    response: &Response,
    expected: &OperationId,
) -> Result<OperationSnapshot, ClientError> {
    let document = response.json()?;
    check_envelope(response.status(), &document)?;
    let result = document
        .get("result")
        .ok_or_else(|| ClientError::ProtocolError("missing change document".into()))?;
    OperationSnapshot::from_json(result, expected)
}

/// Request polling the state of an operation
#[must_use]
pub fn status_request(id: &OperationId) -> RequestDescriptor {
    RequestDescriptor::get(format!("/v2/changes/{id}"))
}

/// Request asking the server to abort an operation
#[must_use]
pub fn abort_request(id: &OperationId) -> RequestDescriptor {
    RequestDescriptor::post(format!("/v2/changes/{id}")).with_json(json!({"action": "abort"}))
}
