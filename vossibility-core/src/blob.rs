//! Event model: the normalised representation of one ingested GitHub event.
//!
//! A [`Blob`] carries its kind (decided once, from the event-kind string),
//! the delivery id supplied by GitHub, the raw payload as a JSON tree, and
//! the point in time the event is considered to have occurred.
//!
//! Payload attributes are addressed by dotted paths (`pull_request.labels`).
//! Numeric segments index into arrays when reading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BlobError;

/// Location of the labels of a pull request event payload.
pub const LABELS_ATTRIBUTE: &str = "pull_request.labels";

/// Kind of an event, as announced by the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    PullRequest,
    Issue,
    IssueComment,
    PullRequestReviewComment,
    Label,
    Other(String),
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PullRequest => "pull_request",
            EventKind::Issue => "issues",
            EventKind::IssueComment => "issue_comment",
            EventKind::PullRequestReviewComment => "pull_request_review_comment",
            EventKind::Label => "label",
            EventKind::Other(name) => name,
        }
    }

    /// Attribute paths tried in order to find the natural key of a blob.
    fn natural_key_paths(&self) -> &'static [&'static str] {
        match self {
            EventKind::PullRequest => &["number", "pull_request.number"],
            EventKind::Issue => &["number", "issue.number"],
            EventKind::IssueComment | EventKind::PullRequestReviewComment => &["comment.id"],
            EventKind::Label => &["label.id", "label.name"],
            EventKind::Other(_) => &["id"],
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "pull_request" => EventKind::PullRequest,
            "issues" => EventKind::Issue,
            "issue_comment" => EventKind::IssueComment,
            "pull_request_review_comment" => EventKind::PullRequestReviewComment,
            "label" => EventKind::Label,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from(s.as_str()))
    }
}

/// Minimal envelope of a queue message, used to route to full blob
/// construction. The raw body is kept separately as the blob data.
#[derive(Debug, Clone, Deserialize)]
pub struct PartialMessage {
    #[serde(rename = "X-GitHub-Event")]
    pub github_event: String,
    #[serde(rename = "X-GitHub-Delivery")]
    pub github_delivery: String,
}

/// One ingested event.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub kind: EventKind,
    pub delivery: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Blob {
    /// Parse `payload` into a blob. Fails if the payload is not well-formed
    /// JSON. The timestamp defaults to now and is expected to be overwritten
    /// by the caller.
    pub fn from_payload(
        kind: EventKind,
        delivery: impl Into<String>,
        payload: &[u8],
    ) -> Result<Self, BlobError> {
        let data: Value = serde_json::from_slice(payload)?;
        Ok(Self::from_value(kind, delivery, data))
    }

    pub fn from_value(kind: EventKind, delivery: impl Into<String>, data: Value) -> Self {
        Blob {
            kind,
            delivery: delivery.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// True if `path` resolves to a present, non-null value.
    pub fn has_attribute(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve(&self.data, path)
    }

    pub fn get_i64(&self, path: &str) -> Result<i64, BlobError> {
        let value = self
            .get(path)
            .ok_or_else(|| BlobError::MissingAttribute(path.to_string()))?;
        value.as_i64().ok_or_else(|| BlobError::WrongType {
            path: path.to_string(),
            expected: "an integer",
        })
    }

    pub fn get_str(&self, path: &str) -> Result<&str, BlobError> {
        let value = self
            .get(path)
            .ok_or_else(|| BlobError::MissingAttribute(path.to_string()))?;
        value.as_str().ok_or_else(|| BlobError::WrongType {
            path: path.to_string(),
            expected: "a string",
        })
    }

    /// Set `path` to `value`, creating intermediate objects as needed.
    pub fn push(&mut self, path: &str, value: Value) -> Result<(), BlobError> {
        insert(&mut self.data, path, value)
    }

    /// Remove the attribute at `path`, returning it if it was there.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        remove(&mut self.data, path)
    }

    /// Identity of the object the event is about: an issue or pull request
    /// number, a comment id, a label id.
    pub fn natural_key(&self) -> Result<String, BlobError> {
        let paths = self.kind.natural_key_paths();
        for path in paths {
            match self.get(path) {
                Some(Value::Number(n)) => return Ok(n.to_string()),
                Some(Value::String(s)) if !s.is_empty() => return Ok(s.clone()),
                Some(_) => {
                    return Err(BlobError::WrongType {
                        path: path.to_string(),
                        expected: "a number or string",
                    })
                }
                None => continue,
            }
        }
        Err(BlobError::MissingAttribute(paths.join(" | ")))
    }
}

pub(crate) fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

pub(crate) fn insert(root: &mut Value, path: &str, value: Value) -> Result<(), BlobError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = root;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = object_mut(current, path)?
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
    object_mut(current, path)?.insert(leaf.to_string(), value);
    Ok(())
}

pub(crate) fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = root;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = current.as_object_mut()?.get_mut(segment)?;
        }
    }
    current.as_object_mut()?.remove(leaf)
}

fn object_mut<'a>(value: &'a mut Value, path: &str) -> Result<&'a mut Map<String, Value>, BlobError> {
    // A null placeholder is promoted to an object; anything else is a shape error.
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().ok_or_else(|| BlobError::WrongType {
        path: path.to_string(),
        expected: "an object along the path",
    })
}
