//! Historical backfill: walk the issue history of each repository page by
//! page and index every issue and pull request.
//!
//! The job is sequential: one repository at a time, one page at a
//! time, with an optional sleep between pages to stay under GitHub's abuse
//! detection. A repository is done when a page comes back empty.
//!
//! # Failure policy
//! - An item that cannot be indexed is logged and skipped.
//! - A page that cannot be fetched aborts the repository; its report carries
//!   the cursor to restart from (`--from`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::blob::{Blob, EventKind};
use crate::contract::{BlobSink, Destination, PageRequest, StateFilter, Upstream};
use crate::error::SyncError;
use crate::repository::Repository;
use crate::store::TransformingStore;

/// Options of one sync run. Never mutated while the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Position in the issue history to start from (1-based).
    pub from: u64,
    pub sleep_per_page: Duration,
    pub state: StateFilter,
    pub storage: Destination,
    pub per_page: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            from: 1,
            sleep_per_page: Duration::ZERO,
            state: StateFilter::All,
            storage: Destination::Snapshot,
            per_page: 100,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub repositories: Vec<RepositorySyncReport>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.repositories.iter().all(|r| r.error.is_none())
    }
}

#[derive(Debug)]
pub struct RepositorySyncReport {
    pub repository: String,
    /// Page requests issued, including the one confirming the end.
    pub pages: u64,
    pub indexed: u64,
    pub skipped: u64,
    /// Cursor after the last successful page: where a restart resumes.
    pub next_cursor: u64,
    pub error: Option<SyncError>,
}

pub struct SyncJob<U: ?Sized, S: ?Sized> {
    client: Arc<U>,
    store: Arc<TransformingStore<S>>,
    options: SyncOptions,
}

impl<U, S> SyncJob<U, S>
where
    U: Upstream + ?Sized,
    S: BlobSink + ?Sized,
{
    pub fn new(client: Arc<U>, store: Arc<TransformingStore<S>>, options: SyncOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn run(&self, repositories: &[Repository]) -> SyncReport {
        let mut report = SyncReport::default();
        for repository in repositories {
            let repo_report = self.sync_repository(repository).await;
            match &repo_report.error {
                None => info!(
                    repository = %repository.pretty_name(),
                    pages = repo_report.pages,
                    indexed = repo_report.indexed,
                    skipped = repo_report.skipped,
                    "Synchronised repository"
                ),
                Some(e) => error!(
                    repository = %repository.pretty_name(),
                    next_cursor = repo_report.next_cursor,
                    error = %e,
                    "Synchronisation aborted, restart from next_cursor"
                ),
            }
            report.repositories.push(repo_report);
        }
        report
    }

    async fn sync_repository(&self, repository: &Repository) -> RepositorySyncReport {
        let options = &self.options;
        let mut report = RepositorySyncReport {
            repository: repository.full_name(),
            pages: 0,
            indexed: 0,
            skipped: 0,
            next_cursor: options.from,
            error: None,
        };
        info!(
            repository = %repository.pretty_name(),
            from = options.from,
            state = options.state.as_str(),
            destination = options.storage.as_str(),
            "Starting synchronisation"
        );

        loop {
            let page = PageRequest {
                from: report.next_cursor,
                per_page: options.per_page,
            };
            report.pages += 1;
            let items = match self.client.list_issues(repository, options.state, page).await {
                Ok(items) => items,
                Err(source) => {
                    report.error = Some(SyncError::Fetch {
                        repository: repository.full_name(),
                        cursor: report.next_cursor,
                        source,
                    });
                    return report;
                }
            };
            if items.is_empty() {
                debug!(repository = %repository.pretty_name(), cursor = report.next_cursor, "Reached end of history");
                return report;
            }

            let count = items.len() as u64;
            for item in items {
                match self.index_item(repository, item).await {
                    Ok(()) => report.indexed += 1,
                    Err(e) => {
                        warn!(repository = %repository.pretty_name(), error = %e, "Skipping item");
                        report.skipped += 1;
                    }
                }
            }
            report.next_cursor += count;
            debug!(
                repository = %repository.pretty_name(),
                cursor = report.next_cursor,
                "Page synchronised"
            );

            if !options.sleep_per_page.is_zero() {
                tokio::time::sleep(options.sleep_per_page).await;
            }
        }
    }

    async fn index_item(
        &self,
        repository: &Repository,
        item: Value,
    ) -> Result<(), crate::error::StoreError> {
        let blob = blob_from_item(item);
        self.store.index(self.options.storage, repository, blob).await
    }
}

/// Convert an item of the issue listing into a blob. Pull requests are told
/// apart by their `pull_request` field.
///
/// The delivery is derived from `updated_at`: syncing an unchanged item
/// again into the live destination lands on the same document.
pub fn blob_from_item(item: Value) -> Blob {
    let kind = if item.get("pull_request").is_some_and(|v| !v.is_null()) {
        EventKind::PullRequest
    } else {
        EventKind::Issue
    };
    let updated_at = item.get("updated_at").and_then(Value::as_str);
    let delivery = match updated_at {
        Some(updated_at) => format!("sync-{updated_at}"),
        None => "sync".to_string(),
    };
    let timestamp = updated_at
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let mut blob = Blob::from_value(kind, delivery, item);
    if let Some(timestamp) = timestamp {
        blob.timestamp = timestamp;
    }
    blob
}
