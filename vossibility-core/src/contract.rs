//! # contract: seams between the pipeline and the outside world
//!
//! Two collaborators are deliberately opaque to the pipeline:
//!
//! - [`Upstream`]: the authenticated GitHub REST client (issue listing and
//!   label listing).
//! - [`BlobSink`]: the document store, seen as an idempotent upsert of a
//!   [`Document`] into one of two [`Destination`]s.
//!
//! Both traits return boxed errors, so implementations can surface whatever
//! their transport produces. They are annotated for `mockall`, and the mocks
//! are exported under the `test-export-mocks` feature for the integration
//! tests and for downstream crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blob::EventKind;
use crate::error::BoxError;
use crate::repository::Repository;

/// Logical index target within the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Incremental events from the live path.
    Live,
    /// Full-state documents from the sync path.
    Snapshot,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Live => "live",
            Destination::Snapshot => "snapshot",
        }
    }
}

impl std::str::FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Destination::Live),
            "snapshot" => Ok(Destination::Snapshot),
            other => Err(format!("unknown destination {other:?}, expected live or snapshot")),
        }
    }
}

/// Issue state filter of the GitHub issue listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl StateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

impl std::str::FromStr for StateFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(StateFilter::Open),
            "closed" => Ok(StateFilter::Closed),
            "all" => Ok(StateFilter::All),
            other => Err(format!("unknown state {other:?}, expected open, closed or all")),
        }
    }
}

/// One page of the issue history, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based position of the first item of the page.
    pub from: u64,
    pub per_page: u32,
}

/// A label as returned by the GitHub label listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    #[serde(default)]
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// What the sink stores: a transformed blob plus its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Upsert key, unique per destination.
    pub id: String,
    /// `user/repo` of the originating repository.
    pub repository: String,
    pub kind: EventKind,
    pub delivery: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// The authenticated upstream client.
///
/// Implementations own their retry budget: an error returned from here means
/// the call is not going to succeed by retrying it immediately.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// List issues and pull requests of `repository`, oldest first.
    async fn list_issues(
        &self,
        repository: &Repository,
        state: StateFilter,
        page: PageRequest,
    ) -> Result<Vec<Value>, BoxError>;

    /// List the labels attached to issue or pull request `number`.
    async fn list_labels(&self, repository: &Repository, number: i64) -> Result<Vec<Label>, BoxError>;
}

/// The indexing sink. Writes are upserts keyed by [`Document::id`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn upsert(&self, destination: Destination, document: Document) -> Result<(), BoxError>;
}
